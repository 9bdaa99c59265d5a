use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{FieldMapping, Record, Side};
use crate::msed;

/// Base distance over two field values. LOWER is ALWAYS closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringMetric {
    /// 0 for equal strings, 1 otherwise.
    Exact,
    /// Raw edit count.
    Levenshtein,
    NormalisedLevenshtein,
    JaroWinkler,
    SorensenDice,
    /// Jaccard distance over bigram sets.
    Jaccard,
    /// Structural entropic distance: MSED over the two strings.
    Sed,
}

impl StringMetric {
    #[inline(always)]
    pub fn distance(&self, a: &str, b: &str) -> f64 {
        match self {
            StringMetric::Exact => {
                if a == b { 0.0 } else { 1.0 }
            }
            StringMetric::Levenshtein => strsim::levenshtein(a, b) as f64,
            StringMetric::NormalisedLevenshtein => 1.0 - strsim::normalized_levenshtein(a, b),
            StringMetric::JaroWinkler => 1.0 - strsim::jaro_winkler(a, b),
            StringMetric::SorensenDice => 1.0 - strsim::sorensen_dice(a, b),
            StringMetric::Jaccard => jaccard(a, b),
            StringMetric::Sed => msed::msed(&[a, b]).max(0.0),
        }
    }

    /// Whether every distance lies in [0, 1].
    pub fn max_distance_is_one(&self) -> bool {
        !matches!(self, StringMetric::Levenshtein)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StringMetric::Exact => "Exact",
            StringMetric::Levenshtein => "Levenshtein",
            StringMetric::NormalisedLevenshtein => "NormalisedLevenshtein",
            StringMetric::JaroWinkler => "JaroWinkler",
            StringMetric::SorensenDice => "SorensenDice",
            StringMetric::Jaccard => "Jaccard",
            StringMetric::Sed => "SED",
        }
    }
}

fn jaccard(a: &str, b: &str) -> f64 {
    let x: BTreeSet<String> = msed::bigrams(a);
    let y: BTreeSet<String> = msed::bigrams(b);
    let union = x.union(&y).count();
    if union == 0 {
        return 0.0;
    }
    let inter = x.intersection(&y).count();
    1.0 - inter as f64 / union as f64
}

/// Record-level distance. Implementations hold no mutable state and are shared
/// read-only across threads for the whole run.
pub trait RecordMetric: Send + Sync {
    /// Distance with `a` read through the `a_side` fields of the mapping and `b`
    /// through the `b_side` fields. Reading both through one side gives the distance
    /// within that side's field space, which index structures build on.
    fn sided_distance(&self, a: &Record, a_side: Side, b: &Record, b_side: Side) -> f64;

    fn mapping(&self) -> &FieldMapping;

    fn distance(&self, a: &Record, b: &Record) -> f64 {
        let (sa, sb) = self.mapping().orient(a, b);
        self.sided_distance(a, sa, b, sb)
    }

    fn name(&self) -> String;

    /// False for scores that do not satisfy the triangle inequality.
    /// Pivot pruning is only exact for true metrics.
    fn is_true_metric(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_zero_apart() {
        for m in [
            StringMetric::Exact,
            StringMetric::Levenshtein,
            StringMetric::NormalisedLevenshtein,
            StringMetric::JaroWinkler,
            StringMetric::SorensenDice,
            StringMetric::Jaccard,
            StringMetric::Sed,
        ] {
            assert!(m.distance("MACDONALD", "MACDONALD").abs() < 1e-12, "{}", m.name());
        }
    }

    #[test]
    fn bounded_metrics_stay_in_unit_range() {
        for m in [StringMetric::NormalisedLevenshtein, StringMetric::JaroWinkler, StringMetric::Jaccard] {
            let d = m.distance("SMITH", "SMYTHE");
            assert!((0.0..=1.0).contains(&d), "{} gave {}", m.name(), d);
        }
        assert_eq!(StringMetric::Levenshtein.distance("SMITH", "SMYTH"), 1.0);
        assert!(!StringMetric::Levenshtein.max_distance_is_one());
    }

    #[test]
    fn jaccard_of_empty_strings() {
        assert_eq!(StringMetric::Jaccard.distance("", ""), 0.0);
        assert_eq!(StringMetric::Jaccard.distance("AB", ""), 1.0);
    }
}
