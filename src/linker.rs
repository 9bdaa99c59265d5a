use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::index::{build_with_retry, IndexConfig, Neighbour, SearchGuard, SearchStructure};
use crate::metric::RecordMetric;
use crate::model::{Link, Record, RecordPair, RoleTag, Side};
use crate::recipe::LinkageRecipe;
use crate::viability::ViabilityFilter;

/// Turns two record collections into candidate pairs and accepted links.
///
/// The threshold can only change through `&mut self`, so it is fixed for the life of
/// any pair sequence borrowed from this linker.
pub struct Linker {
    metric: Arc<dyn RecordMetric>,
    threshold: f64,
    symmetric: bool,
    viability: ViabilityFilter,
    link_type: String,
    role1: String,
    role2: String,
}

impl Linker {
    pub fn from_recipe(recipe: &LinkageRecipe, metric: Arc<dyn RecordMetric>) -> Self {
        Self {
            metric,
            threshold: recipe.threshold,
            symmetric: recipe.symmetric,
            viability: ViabilityFilter::new(recipe.viability, recipe.viability_config),
            link_type: recipe.link_type.clone(),
            role1: recipe.role1.role.clone(),
            role2: recipe.role2.role.clone(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn metric(&self) -> &Arc<dyn RecordMetric> {
        &self.metric
    }

    /// Number of distance computations brute force will perform.
    pub fn total_comparisons(&self, records1: &[Record], records2: &[Record]) -> u64 {
        let n = records1.len() as u64;
        let m = records2.len() as u64;
        if same_collection(records1, records2) {
            if self.symmetric {
                n * n.saturating_sub(1) / 2
            } else {
                n * n.saturating_sub(1)
            }
        } else {
            n * m
        }
    }

    pub fn brute_force_pairs<'a>(&'a self, records1: &'a [Record], records2: &'a [Record]) -> BruteForcePairs<'a> {
        let same = same_collection(records1, records2);
        let total = self.total_comparisons(records1, records2);
        let skip_lower = same && self.symmetric;
        BruteForcePairs {
            metric: self.metric.as_ref(),
            records1,
            records2,
            threshold: self.threshold,
            same,
            skip_lower,
            i: 0,
            j: if skip_lower { 1 } else { 0 },
            progress: Progress::new(total),
        }
    }

    /// Pair sequence over a structure already built on `plan.indexed`.
    pub fn indexed_pairs<'a, 's, S: SearchStructure<'a>>(
        &self,
        structure: &'s S,
        plan: IndexPlan<'a>,
    ) -> IndexedPairs<'a, 's, S> {
        IndexedPairs {
            structure,
            probes: plan.probes,
            probe_is_first: plan.probe_is_first,
            same: plan.same,
            skip_lower: plan.same && self.symmetric,
            threshold: self.threshold,
            next_probe: 0,
            current: 0,
            batch: Vec::new().into_iter(),
            progress: Progress::new(plan.probes.len() as u64),
        }
    }

    /// Applies the viability filter and packages each surviving pair as a link.
    pub fn links<'l, I>(&'l self, pairs: I) -> Links<'l, I> {
        Links { linker: self, pairs, rejected: 0, reported: false }
    }

    pub fn link_brute_force(&self, records1: &[Record], records2: &[Record]) -> Vec<Link> {
        info!(
            link_type = %self.link_type,
            comparisons = self.total_comparisons(records1, records2),
            threshold = self.threshold,
            "brute force linkage"
        );
        self.links(self.brute_force_pairs(records1, records2)).collect()
    }

    /// Builds `S` over the larger collection, links, and terminates the structure on
    /// every exit path.
    pub fn link_indexed<'a, S: SearchStructure<'a>>(
        &self,
        records1: &'a [Record],
        records2: &'a [Record],
        config: &IndexConfig,
    ) -> Result<Vec<Link>> {
        let plan = IndexPlan::new(records1, records2, self.sides(records1, records2));
        info!(
            link_type = %self.link_type,
            probes = plan.probes.len(),
            indexed = plan.indexed.len(),
            threshold = self.threshold,
            "index-assisted linkage"
        );
        let structure: S = build_with_retry(self.metric.clone(), plan.indexed_side, plan.indexed, config)?;
        let guard = SearchGuard::new(structure);
        let links: Vec<Link> = self.links(self.indexed_pairs(&*guard, plan)).collect();
        guard.release();
        Ok(links)
    }

    /// Mapping sides the two collections are read through, oriented as `distance` does.
    fn sides(&self, records1: &[Record], records2: &[Record]) -> (Side, Side) {
        match (records1.first(), records2.first()) {
            (Some(a), Some(b)) => self.metric.mapping().orient(a, b),
            _ => (Side::Left, Side::Right),
        }
    }

    fn make_link(&self, pair: &RecordPair<'_>) -> Link {
        let link = Link::new(
            RoleTag::new(pair.record1(), self.role1.as_str()),
            RoleTag::new(pair.record2(), self.role2.as_str()),
            self.link_type.as_str(),
            pair.distance(),
            vec![
                format!("threshold match at {}", self.threshold),
                format!("distance: {}", pair.distance()),
            ],
        );
        if self.symmetric {
            link.canonical()
        } else {
            link
        }
    }
}

/// Same collection means the same slice, not equal contents.
pub fn same_collection(a: &[Record], b: &[Record]) -> bool {
    std::ptr::eq(a, b)
}

/// Which side probes and which side is indexed. The smaller collection probes.
///
/// For a collection linked against itself, `probes` and `indexed` are the same slice,
/// so a neighbour's index and the probe's position share one ordering. The symmetric
/// skip in [`IndexedPairs`] relies on that and applies only when `same` is set.
#[derive(Debug, Clone, Copy)]
pub struct IndexPlan<'a> {
    pub probes: &'a [Record],
    pub indexed: &'a [Record],
    /// Probes come from `records1`, so pairs keep (probe, neighbour) order.
    pub probe_is_first: bool,
    /// Mapping side the indexed records are read through; probes use the other one.
    pub indexed_side: Side,
    pub same: bool,
}

impl<'a> IndexPlan<'a> {
    /// `sides` are the mapping sides `records1` and `records2` are read through.
    pub fn new(records1: &'a [Record], records2: &'a [Record], sides: (Side, Side)) -> Self {
        let same = same_collection(records1, records2);
        if same || records1.len() <= records2.len() {
            Self { probes: records1, indexed: records2, probe_is_first: true, indexed_side: sides.1, same }
        } else {
            Self { probes: records2, indexed: records1, probe_is_first: false, indexed_side: sides.0, same }
        }
    }
}

/// Exhaustive pair sequence. Row-major over `records1 x records2`.
pub struct BruteForcePairs<'a> {
    metric: &'a dyn RecordMetric,
    records1: &'a [Record],
    records2: &'a [Record],
    threshold: f64,
    same: bool,
    // same collection and symmetric relation: only j > i
    skip_lower: bool,
    i: usize,
    j: usize,
    progress: Progress,
}

impl<'a> Iterator for BruteForcePairs<'a> {
    type Item = RecordPair<'a>;

    fn next(&mut self) -> Option<RecordPair<'a>> {
        while self.i < self.records1.len() {
            if self.j >= self.records2.len() {
                self.i += 1;
                self.j = if self.skip_lower { self.i + 1 } else { 0 };
                continue;
            }
            let j = self.j;
            self.j += 1;
            if self.same && j == self.i {
                continue;
            }

            let a = &self.records1[self.i];
            let b = &self.records2[j];
            let d = self.metric.distance(a, b);
            self.progress.tick();
            if d <= self.threshold {
                return Some(RecordPair::new(a, b, d));
            }
        }
        None
    }
}

/// Index-assisted pair sequence: one range query per probe record, drained lazily.
pub struct IndexedPairs<'a, 's, S: SearchStructure<'a>> {
    structure: &'s S,
    probes: &'a [Record],
    probe_is_first: bool,
    same: bool,
    skip_lower: bool,
    threshold: f64,
    next_probe: usize,
    current: usize,
    batch: std::vec::IntoIter<Neighbour<'a>>,
    progress: Progress,
}

impl<'a, 's, S: SearchStructure<'a>> Iterator for IndexedPairs<'a, 's, S> {
    type Item = RecordPair<'a>;

    fn next(&mut self) -> Option<RecordPair<'a>> {
        loop {
            if let Some(n) = self.batch.next() {
                if self.same && (n.index == self.current || (self.skip_lower && n.index < self.current)) {
                    continue;
                }
                let probe = &self.probes[self.current];
                let pair = if self.probe_is_first {
                    RecordPair::new(probe, n.record, n.distance)
                } else {
                    RecordPair::new(n.record, probe, n.distance)
                };
                return Some(pair);
            }

            if self.next_probe >= self.probes.len() {
                return None;
            }
            self.current = self.next_probe;
            self.next_probe += 1;
            self.batch = self
                .structure
                .find_within_threshold(&self.probes[self.current], self.threshold)
                .into_iter();
            self.progress.tick();
        }
    }
}

/// Viable pairs as links.
pub struct Links<'l, I> {
    linker: &'l Linker,
    pairs: I,
    rejected: u64,
    reported: bool,
}

impl<'l, I> Links<'l, I> {
    /// Pairs within threshold that failed the viability check so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl<'l, 'a, I: Iterator<Item = RecordPair<'a>>> Iterator for Links<'l, I> {
    type Item = Link;

    fn next(&mut self) -> Option<Link> {
        for pair in self.pairs.by_ref() {
            if self.linker.viability.is_viable(&pair) {
                return Some(self.linker.make_link(&pair));
            }
            self.rejected += 1;
        }
        if !self.reported {
            self.reported = true;
            debug!(link_type = %self.linker.link_type, rejected = self.rejected, "pairs dropped as not viable");
        }
        None
    }
}

struct Progress {
    total: u64,
    done: u64,
    next_report: u64,
}

impl Progress {
    const UPDATES: u64 = 10;

    fn new(total: u64) -> Self {
        Self { total, done: 0, next_report: Self::step(total) }
    }

    fn step(total: u64) -> u64 {
        (total / Self::UPDATES).max(1)
    }

    fn tick(&mut self) {
        self.done += 1;
        if self.done >= self.next_report {
            debug!(done = self.done, total = self.total, "linkage progress {}%", self.done * 100 / self.total.max(1));
            self.next_report += Self::step(self.total);
        }
    }
}
