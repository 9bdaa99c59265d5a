use crate::error::{LinkageError, Result};

/// Upper bound on the number of subsets `pick_all` will materialise.
pub const MAX_SUBSETS: u128 = 1_000_000;

/// C(n, k), or `None` on overflow.
pub fn binomial(n: usize, k: usize) -> Option<u128> {
    if k > n {
        return Some(0);
    }
    let k = k.min(n - k) as u128;
    let mut acc: u128 = 1;
    for i in 0..k {
        // acc * (n - i) is always divisible by (i + 1) here
        acc = acc.checked_mul(n as u128 - i)? / (i + 1);
    }
    Some(acc)
}

/// Lexicographic k-subsets of {0, .., n-1}.
pub struct KSubsets {
    n: usize,
    current: Option<Vec<usize>>,
}

impl KSubsets {
    pub fn new(n: usize, k: usize) -> Self {
        let current = if k <= n { Some((0..k).collect()) } else { None };
        Self { n, current }
    }
}

impl Iterator for KSubsets {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let out = self.current.take()?;
        let k = out.len();

        // Advance: find the rightmost slot that can still move right.
        let mut next = out.clone();
        let mut i = k;
        while i > 0 {
            i -= 1;
            if next[i] < self.n - k + i {
                next[i] += 1;
                for j in i + 1..k {
                    next[j] = next[j - 1] + 1;
                }
                self.current = Some(next);
                return Some(out);
            }
        }
        Some(out)
    }
}

/// All C(n, k) distinct k-subsets, in lexicographic order.
pub fn pick_all(n: usize, k: usize) -> Result<Vec<Vec<usize>>> {
    match binomial(n, k) {
        Some(count) if count <= MAX_SUBSETS => Ok(KSubsets::new(n, k).collect()),
        Some(count) => Err(LinkageError::ResourceExhausted(format!(
            "C({}, {}) = {} subsets exceeds the limit of {}",
            n, k, count, MAX_SUBSETS
        ))),
        None => Err(LinkageError::ResourceExhausted(format!(
            "C({}, {}) overflows",
            n, k
        ))),
    }
}
