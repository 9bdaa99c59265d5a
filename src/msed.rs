//! Multi-way structural entropic divergence.
//!
//! Scores how much N strings diverge as a group, from the Shannon entropy of their
//! bigram distributions. N identical strings score exactly 0.

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::OrderedFloat;
use tracing::warn;

use crate::binomials;
use crate::error::Result;
use crate::model::{Field, FieldMapping, Record};

/// Power that would restore the triangle inequality for the raw divergence.
/// Not applied by [`msed`]; see [`msed_with_correction`].
pub const FINAL_POWER: f64 = 0.486;

/// Sorted mapping from bigram to probability mass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseProbabilityArray {
    events: BTreeMap<String, f64>,
}

impl SparseProbabilityArray {
    /// Distribution over the distinct bigrams of `s`. Each distinct bigram counts once.
    pub fn of(s: &str) -> Self {
        let set = bigrams(s);
        let total = set.len() as f64;
        let events = set.into_iter().map(|b| (b, 1.0 / total)).collect();
        Self { events }
    }

    pub fn prob(&self, event: &str) -> f64 {
        self.events.get(event).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = (&str, f64)> {
        self.events.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn complexity(&self) -> f64 {
        complexity(self.events.values().copied())
    }
}

/// All length-2 character windows of `s`, as a set.
pub fn bigrams(s: &str) -> BTreeSet<String> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// `exp(-Σ p·ln p)` with zero entries skipped.
fn complexity(probs: impl Iterator<Item = f64>) -> f64 {
    let entropy: f64 = probs.filter(|p| *p > 0.0).map(|p| -p * p.ln()).sum();
    entropy.exp()
}

/// Divergence of the group of strings.
pub fn msed<S: AsRef<str>>(strings: &[S]) -> f64 {
    let n = strings.len();
    if n == 0 {
        return 0.0;
    }

    let distributions: Vec<SparseProbabilityArray> = strings
        .iter()
        .map(|s| SparseProbabilityArray::of(s.as_ref()))
        .collect();

    // Consistent representation: one column per bigram seen anywhere, sorted.
    let features: BTreeSet<&str> = distributions
        .iter()
        .flat_map(|d| d.events.keys().map(String::as_str))
        .collect();

    let consistent: Vec<Vec<f64>> = distributions
        .iter()
        .map(|d| features.iter().map(|f| d.prob(f)).collect())
        .collect();

    let average: Vec<f64> = (0..features.len())
        .map(|col| consistent.iter().map(|row| row[col]).sum::<f64>() / n as f64)
        .collect();

    let c_avg = complexity(average.into_iter());
    let product: f64 = consistent
        .iter()
        .map(|row| complexity(row.iter().copied()))
        .product();

    let ratio = c_avg / product.powf(1.0 / n as f64) - 1.0;
    let result = (1.0 / (n as f64 - 1.0)) * ratio;

    if result.is_finite() {
        result
    } else {
        warn!(n, "degenerate MSED input, using uncorrected ratio");
        ratio
    }
}

/// [`msed`] raised to [`FINAL_POWER`].
pub fn msed_with_correction<S: AsRef<str>>(strings: &[S]) -> f64 {
    msed(strings).max(0.0).powf(FINAL_POWER)
}

#[derive(Debug, Clone)]
pub struct ScoredGroup {
    pub members: Vec<usize>,
    pub divergence: f64,
}

/// Scores candidate groups of records (e.g. sibling clusters) on a set of linkage fields.
pub struct ClusterScorer {
    mapping: FieldMapping,
}

impl ClusterScorer {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }

    /// The record's linkage fields, each followed by '/'.
    pub fn signature(&self, record: &Record) -> String {
        let fields: &[Field] = self.mapping.fields_for(record);
        let mut s = String::new();
        for f in fields {
            s.push_str(record.get(*f));
            s.push('/');
        }
        s
    }

    pub fn score(&self, group: &[&Record]) -> f64 {
        let sigs: Vec<String> = group.iter().map(|r| self.signature(r)).collect();
        msed(&sigs)
    }

    /// Every k-member subgroup, most cohesive first.
    pub fn rank_subgroups(&self, group: &[&Record], k: usize) -> Result<Vec<ScoredGroup>> {
        let sigs: Vec<String> = group.iter().map(|r| self.signature(r)).collect();
        let mut scored: Vec<ScoredGroup> = binomials::pick_all(group.len(), k)?
            .into_iter()
            .map(|members| {
                let chosen: Vec<&str> = members.iter().map(|i| sigs[*i].as_str()).collect();
                ScoredGroup { divergence: msed(&chosen), members }
            })
            .collect();
        scored.sort_by_key(|g| OrderedFloat(g.divergence));
        Ok(scored)
    }
}
