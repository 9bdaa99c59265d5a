use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Deref;
use std::sync::Arc;

use bit_vec::BitVec;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LinkageError, Result};
use crate::metric::RecordMetric;
use crate::model::{Record, Side};

pub const DEFAULT_SEED: u64 = 34_258_723_425;
pub const DEFAULT_REFERENCE_POINTS: usize = 70;

// Lower bounds within this of the threshold are not pruned (float noise).
const PRUNE_SLACK: f64 = 1e-9;

/// Settings for building a search structure over the larger record set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub reference_points: usize,
    pub seed: u64,
    pub min_reference_points: usize,
    pub retry_step: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            reference_points: DEFAULT_REFERENCE_POINTS,
            seed: DEFAULT_SEED,
            min_reference_points: 20,
            retry_step: 10,
        }
    }
}

/// A record of the indexed set found within range of a query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbour<'a> {
    /// Position in the indexed slice.
    pub index: usize,
    pub record: &'a Record,
    pub distance: f64,
}

/// Range-search structure over a fixed slice of records.
///
/// The indexed records are read through the `side` fields of the metric's mapping and
/// queries through the other side. Built once per run, queried many times, and
/// terminated exactly once. Callers get that last guarantee from [`SearchGuard`].
pub trait SearchStructure<'a>: Sized {
    fn build(
        metric: Arc<dyn RecordMetric>,
        side: Side,
        reference_points: Vec<&'a Record>,
        data: &'a [Record],
    ) -> Result<Self>;

    /// All indexed records within `threshold` of `query`, nearest first.
    fn find_within_threshold(&self, query: &Record, threshold: f64) -> Vec<Neighbour<'a>>;

    fn terminate(&mut self);
}

/// Deterministic sample of `n` distinct records. Returns all of them when `n >= data.len()`.
pub fn choose_reference_points(data: &[Record], n: usize, seed: u64) -> Vec<&Record> {
    if n >= data.len() {
        return data.iter().collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut chosen = BitVec::from_elem(data.len(), false);
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let i = rng.gen_range(0..data.len());
        if !chosen.get(i).unwrap_or(true) {
            chosen.set(i, true);
            out.push(&data[i]);
        }
    }
    out
}

/// Builds `S` over `data`, retrying with a new seed and fewer reference points on failure.
pub fn build_with_retry<'a, S: SearchStructure<'a>>(
    metric: Arc<dyn RecordMetric>,
    side: Side,
    data: &'a [Record],
    config: &IndexConfig,
) -> Result<S> {
    if !metric.is_true_metric() {
        warn!(
            metric = %metric.name(),
            "metric does not satisfy the triangle inequality; pivot pruning may drop pairs"
        );
    }

    let mut seed = config.seed;
    let mut count = config.reference_points;
    loop {
        let refs = choose_reference_points(data, count, seed);
        info!(reference_points = refs.len(), seed, size = data.len(), "building search structure");
        match S::build(metric.clone(), side, refs, data) {
            Ok(structure) => return Ok(structure),
            Err(e) => {
                let next = count.saturating_sub(config.retry_step);
                if config.retry_step == 0 || next < config.min_reference_points {
                    return Err(e);
                }
                warn!(error = %e, next, "search structure build failed, retrying");
                seed = seed.wrapping_mul(17).wrapping_add(23);
                count = next;
            }
        }
    }
}

/// Owns a search structure and terminates it exactly once: on `release`, or on drop
/// if the run exits early.
pub struct SearchGuard<'a, S: SearchStructure<'a>> {
    inner: S,
    released: bool,
    _data: std::marker::PhantomData<&'a Record>,
}

impl<'a, S: SearchStructure<'a>> SearchGuard<'a, S> {
    pub fn new(inner: S) -> Self {
        Self { inner, released: false, _data: std::marker::PhantomData }
    }

    pub fn release(mut self) {
        self.inner.terminate();
        self.released = true;
    }
}

impl<'a, S: SearchStructure<'a>> Deref for SearchGuard<'a, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<'a, S: SearchStructure<'a>> Drop for SearchGuard<'a, S> {
    fn drop(&mut self) {
        if !self.released {
            self.inner.terminate();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    dist: OrderedFloat<f64>,
    index: usize,
}

// Reversed so BinaryHeap pops the nearest (then lowest index) first.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.dist.cmp(&self.dist).then_with(|| other.index.cmp(&self.index))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pivot table range search.
///
/// Stores the distance from every indexed record to every reference point, both read
/// through the indexed side's fields. A query first measures itself against the
/// reference points; any record whose lower bound `max_p |d(q,p) - d(x,p)|` exceeds
/// the threshold is skipped without a full distance computation. Every distance
/// involved lives in the indexed side's field space, so the bound is exact for
/// metrics satisfying the triangle inequality.
pub struct PivotTable<'a> {
    metric: Arc<dyn RecordMetric>,
    side: Side,
    pivots: Vec<&'a Record>,
    data: &'a [Record],
    table: Vec<Vec<f64>>,
    terminated: bool,
}

impl<'a> PivotTable<'a> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pivot_count(&self) -> usize {
        self.pivots.len()
    }
}

impl<'a> SearchStructure<'a> for PivotTable<'a> {
    fn build(
        metric: Arc<dyn RecordMetric>,
        side: Side,
        reference_points: Vec<&'a Record>,
        data: &'a [Record],
    ) -> Result<Self> {
        let mut table = Vec::with_capacity(data.len());
        for (i, record) in data.iter().enumerate() {
            let mut row = Vec::with_capacity(reference_points.len());
            for pivot in &reference_points {
                let d = metric.sided_distance(record, side, pivot, side);
                if !d.is_finite() || d < 0.0 {
                    return Err(LinkageError::SearchStructure(format!(
                        "distance {} from record {} to a reference point is not a valid metric value",
                        d, i
                    )));
                }
                row.push(d);
            }
            table.push(row);
        }
        debug!(rows = table.len(), pivots = reference_points.len(), "pivot table ready");

        Ok(Self {
            metric,
            side,
            pivots: reference_points,
            data,
            table,
            terminated: false,
        })
    }

    fn find_within_threshold(&self, query: &Record, threshold: f64) -> Vec<Neighbour<'a>> {
        if self.terminated {
            return vec![];
        }

        let query_side = self.side.other();

        // 1. Query to pivot distances
        let to_pivots: Vec<f64> = self
            .pivots
            .iter()
            .map(|p| self.metric.sided_distance(query, query_side, p, self.side))
            .collect();

        // 2. Prune on the triangle-inequality lower bound, verify the rest
        let mut results = BinaryHeap::new();
        for (index, row) in self.table.iter().enumerate() {
            let lower = row
                .iter()
                .zip(&to_pivots)
                .map(|(dx, dq)| (dq - dx).abs())
                .fold(0.0, f64::max);
            if lower > threshold + PRUNE_SLACK {
                continue;
            }
            let d = self.metric.sided_distance(query, query_side, &self.data[index], self.side);
            if d <= threshold {
                results.push(Candidate { dist: OrderedFloat(d), index });
            }
        }

        // 3. Drain nearest first
        let mut out = Vec::with_capacity(results.len());
        while let Some(c) = results.pop() {
            out.push(Neighbour {
                index: c.index,
                record: &self.data[c.index],
                distance: c.dist.into_inner(),
            });
        }
        out
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.table = Vec::new();
        debug!(size = self.data.len(), "pivot table terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::{Aggregate, SigmaMetric};
    use crate::metric::StringMetric;
    use crate::model::{BirthField, DeathField, FieldMapping};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn metric() -> Arc<dyn RecordMetric> {
        let mapping = FieldMapping::identity(vec![BirthField::Forename.into(), BirthField::Surname.into()]).unwrap();
        Arc::new(SigmaMetric::new(StringMetric::Levenshtein, mapping, Aggregate::Sum))
    }

    fn people() -> Vec<Record> {
        [
            ("JOHN", "SMITH"),
            ("JON", "SMITH"),
            ("MARY", "BROWN"),
            ("MARIE", "BROWN"),
            ("ISABELLA", "MACDONALD"),
            ("JOHN", "SMYTH"),
        ]
        .iter()
        .map(|(f, s)| Record::birth([(BirthField::Forename, *f), (BirthField::Surname, *s)]))
        .collect()
    }

    #[test]
    fn reference_points_are_deterministic() {
        let data = people();
        let a: Vec<_> = choose_reference_points(&data, 3, DEFAULT_SEED).iter().map(|r| r.id).collect();
        let b: Vec<_> = choose_reference_points(&data, 3, DEFAULT_SEED).iter().map(|r| r.id).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        let mut dedup = a.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 3);
        assert_eq!(choose_reference_points(&data, 100, DEFAULT_SEED).len(), data.len());
    }

    #[test]
    fn range_query_matches_linear_scan() {
        let data = people();
        let m = metric();
        let refs = choose_reference_points(&data, 2, DEFAULT_SEED);
        let table = PivotTable::build(m.clone(), Side::Right, refs, &data).unwrap();
        assert_eq!(table.pivot_count(), 2);

        for query in &data {
            for threshold in [0.0, 1.0, 2.0, 5.0, 100.0] {
                let found: Vec<usize> = table.find_within_threshold(query, threshold).iter().map(|n| n.index).collect();
                let mut expected: Vec<usize> = (0..data.len())
                    .filter(|i| m.distance(query, &data[*i]) <= threshold)
                    .collect();
                let mut sorted = found.clone();
                sorted.sort();
                expected.sort();
                assert_eq!(sorted, expected, "threshold {}", threshold);
            }
        }
    }

    #[test]
    fn cross_kind_range_query_matches_linear_scan() {
        let mapping = FieldMapping::new(
            vec![BirthField::Forename.into(), BirthField::Surname.into()],
            vec![DeathField::Forename.into(), DeathField::Surname.into()],
        )
        .unwrap();
        let m: Arc<dyn RecordMetric> = Arc::new(SigmaMetric::new(StringMetric::Levenshtein, mapping, Aggregate::Sum));
        let births = people();
        let deaths: Vec<Record> = [
            ("ANN", "KERR"),
            ("JOHN", "SMITH"),
            ("MARIE", "BROWN"),
            ("JAMES", "MACDONALD"),
            ("JON", "SMYTH"),
            ("ISOBEL", "MCDONALD"),
            ("MARY", "BROUN"),
        ]
        .iter()
        .map(|(f, s)| Record::death([(DeathField::Forename, *f), (DeathField::Surname, *s)]))
        .collect();

        for seed in [DEFAULT_SEED, 3, 11] {
            let table = PivotTable::build(m.clone(), Side::Right, choose_reference_points(&deaths, 3, seed), &deaths)
                .unwrap();
            for query in &births {
                for threshold in [0.0, 1.0, 3.0, 6.0] {
                    let mut found: Vec<usize> =
                        table.find_within_threshold(query, threshold).iter().map(|n| n.index).collect();
                    found.sort();
                    let expected: Vec<usize> = (0..deaths.len())
                        .filter(|i| m.distance(query, &deaths[*i]) <= threshold)
                        .collect();
                    assert_eq!(found, expected, "seed {} threshold {}", seed, threshold);
                }
            }
        }
    }

    #[test]
    fn results_are_nearest_first() {
        let data = people();
        let table = PivotTable::build(metric(), Side::Right, choose_reference_points(&data, 2, 7), &data).unwrap();
        let hits = table.find_within_threshold(&data[0], 100.0);
        assert_eq!(hits[0].index, 0);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    static TERMINATIONS: AtomicUsize = AtomicUsize::new(0);

    struct Counting;

    impl<'a> SearchStructure<'a> for Counting {
        fn build(_: Arc<dyn RecordMetric>, _: Side, _: Vec<&'a Record>, _: &'a [Record]) -> Result<Self> {
            Ok(Counting)
        }
        fn find_within_threshold(&self, _: &Record, _: f64) -> Vec<Neighbour<'a>> {
            vec![]
        }
        fn terminate(&mut self) {
            TERMINATIONS.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    #[test]
    fn guard_terminates_once_on_both_paths() {
        let before = TERMINATIONS.load(AtomicOrdering::SeqCst);
        SearchGuard::new(Counting).release();
        {
            let _early_exit = SearchGuard::new(Counting);
        }
        assert_eq!(TERMINATIONS.load(AtomicOrdering::SeqCst) - before, 2);
    }

    struct Fussy;

    impl<'a> SearchStructure<'a> for Fussy {
        fn build(_: Arc<dyn RecordMetric>, _: Side, refs: Vec<&'a Record>, _: &'a [Record]) -> Result<Self> {
            if refs.len() > 3 {
                Err(LinkageError::SearchStructure("too many reference points".into()))
            } else {
                Ok(Fussy)
            }
        }
        fn find_within_threshold(&self, _: &Record, _: f64) -> Vec<Neighbour<'a>> {
            vec![]
        }
        fn terminate(&mut self) {}
    }

    #[test]
    fn retry_shrinks_reference_points() {
        let data: Vec<Record> = (0..10).map(|_| Record::new(crate::model::RecordKind::Birth)).collect();
        let config = IndexConfig { reference_points: 5, min_reference_points: 1, retry_step: 1, ..Default::default() };
        assert!(build_with_retry::<Fussy>(metric(), Side::Right, &data, &config).is_ok());

        let strict = IndexConfig { reference_points: 5, min_reference_points: 5, retry_step: 1, ..Default::default() };
        assert!(matches!(
            build_with_retry::<Fussy>(metric(), Side::Right, &data, &strict),
            Err(LinkageError::SearchStructure(_))
        ));
    }
}
