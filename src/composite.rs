use serde::{Deserialize, Serialize};

use crate::error::{LinkageError, Result};
use crate::metric::{RecordMetric, StringMetric};
use crate::model::{FieldMapping, Record, Side};

/// Tolerance on weight vectors that must sum to 1.
pub const EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Sum,
    Mean,
    Max,
}

/// Sum (or mean, or max) of per-field base distances, fields compared positionally.
#[derive(Debug, Clone)]
pub struct SigmaMetric {
    base: StringMetric,
    mapping: FieldMapping,
    aggregate: Aggregate,
    weights: Option<Vec<f64>>,
}

impl SigmaMetric {
    pub fn new(base: StringMetric, mapping: FieldMapping, aggregate: Aggregate) -> Self {
        Self { base, mapping, aggregate, weights: None }
    }

    /// Per-field multipliers. A weight of 0 takes the field out of the comparison.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.mapping.len() {
            return Err(LinkageError::Config(format!(
                "{} weights for {} fields",
                weights.len(),
                self.mapping.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(LinkageError::Config("field weights must be finite and non-negative".into()));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    fn weight(&self, i: usize) -> f64 {
        self.weights.as_ref().map_or(1.0, |w| w[i])
    }
}

impl RecordMetric for SigmaMetric {
    fn sided_distance(&self, a: &Record, a_side: Side, b: &Record, b_side: Side) -> f64 {
        let mut total = 0.0;
        let mut counted = 0usize;
        let mut max: f64 = 0.0;

        for (i, (x, y)) in self.mapping.values_on(a, a_side, b, b_side).enumerate() {
            let w = self.weight(i);
            if w == 0.0 {
                continue;
            }
            let d = w * self.base.distance(x, y);
            total += d;
            max = max.max(d);
            counted += 1;
        }

        match self.aggregate {
            Aggregate::Sum => total,
            Aggregate::Mean if counted == 0 => 0.0,
            Aggregate::Mean => total / counted as f64,
            Aggregate::Max => max,
        }
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn name(&self) -> String {
        format!("Sigma-{:?}-{}", self.aggregate, self.base.name())
    }
}

/// Fellegi-Sunter log-odds score mapped into [0, 1).
///
/// Each field contributes `log2(m/u - (m/u - (1-m)/(1-u)) * d)` where `d` is the base
/// distance: full agreement gives the agreement weight `log2(m/u)`, full disagreement
/// the disagreement weight `log2((1-m)/(1-u))`, and partial agreement interpolates the
/// likelihood ratio. The summed log-odds, scaled by the prior odds, become a match
/// posterior `p`; the distance is `1 - p`.
///
/// Not a metric in the mathematical sense: the triangle inequality does not hold.
#[derive(Debug, Clone)]
pub struct FellegiSunterMetric {
    base: StringMetric,
    mapping: FieldMapping,
    m_priors: Vec<f64>,
    u_priors: Vec<f64>,
    odds_prior: f64,
}

impl FellegiSunterMetric {
    pub fn new(
        base: StringMetric,
        mapping: FieldMapping,
        m_priors: Vec<f64>,
        u_priors: Vec<f64>,
        odds_prior: f64,
    ) -> Result<Self> {
        if m_priors.len() != mapping.len() || u_priors.len() != mapping.len() {
            return Err(LinkageError::Config(format!(
                "{} fields but {} m-priors and {} u-priors",
                mapping.len(),
                m_priors.len(),
                u_priors.len()
            )));
        }
        let in_open_unit = |p: &f64| *p > 0.0 && *p < 1.0;
        if !m_priors.iter().all(in_open_unit) || !u_priors.iter().all(in_open_unit) {
            return Err(LinkageError::Config("m and u priors must lie strictly between 0 and 1".into()));
        }
        if !(odds_prior > 0.0 && odds_prior.is_finite()) {
            return Err(LinkageError::Config(format!("odds prior {} must be positive", odds_prior)));
        }
        if !base.max_distance_is_one() {
            return Err(LinkageError::Config(format!(
                "base metric {} is not bounded by 1",
                base.name()
            )));
        }
        Ok(Self { base, mapping, m_priors, u_priors, odds_prior })
    }

    /// Summed per-field log2 likelihood ratios.
    pub fn log_odds(&self, a: &Record, b: &Record) -> f64 {
        let (sa, sb) = self.mapping.orient(a, b);
        self.sided_log_odds(a, sa, b, sb)
    }

    fn sided_log_odds(&self, a: &Record, a_side: Side, b: &Record, b_side: Side) -> f64 {
        let mut sigma = 0.0;
        for (i, (x, y)) in self.mapping.values_on(a, a_side, b, b_side).enumerate() {
            let d = self.base.distance(x, y).clamp(0.0, 1.0);
            let m = self.m_priors[i];
            let u = self.u_priors[i];
            let agree = m / u;
            let disagree = (1.0 - m) / (1.0 - u);
            sigma += (agree - (agree - disagree) * d).log2();
        }
        sigma
    }
}

impl RecordMetric for FellegiSunterMetric {
    fn sided_distance(&self, a: &Record, a_side: Side, b: &Record, b_side: Side) -> f64 {
        let posterior_odds = self.sided_log_odds(a, a_side, b, b_side).exp2() * self.odds_prior;
        if posterior_odds.is_infinite() {
            return 0.0;
        }
        1.0 - posterior_odds / (1.0 + posterior_odds)
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn name(&self) -> String {
        format!("FellegiSunter-{}", self.base.name())
    }

    fn is_true_metric(&self) -> bool {
        false
    }
}

/// Linear combination of per-field base distances with weights summing to 1.
#[derive(Debug, Clone)]
pub struct WeightedAverageMetric {
    base: StringMetric,
    mapping: FieldMapping,
    weights: Vec<f64>,
}

impl WeightedAverageMetric {
    pub fn new(base: StringMetric, mapping: FieldMapping, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != mapping.len() {
            return Err(LinkageError::Config(format!(
                "{} weights for {} fields",
                weights.len(),
                mapping.len()
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > EPSILON {
            return Err(LinkageError::InvalidWeights { sum });
        }
        Ok(Self { base, mapping, weights })
    }
}

impl RecordMetric for WeightedAverageMetric {
    fn sided_distance(&self, a: &Record, a_side: Side, b: &Record, b_side: Side) -> f64 {
        self.mapping
            .values_on(a, a_side, b, b_side)
            .zip(self.weights.iter())
            .map(|((x, y), w)| w * self.base.distance(x, y))
            .sum()
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn name(&self) -> String {
        format!("WeightedAverage-{}", self.base.name())
    }
}
