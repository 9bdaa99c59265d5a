pub mod binomials;
pub mod composite;
pub mod error;
pub mod evaluation;
pub mod filter;
pub mod index;
pub mod linker;
pub mod metric;
pub mod model;
pub mod msed;
pub mod parser;
pub mod recipe;
pub mod sweep;
pub mod viability;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub use crate::error::{LinkageError, Result};
use crate::evaluation::{evaluate, ground_truth_links, LinkageQuality};
use crate::filter::{filter_records, populated_count};
use crate::index::{IndexConfig, PivotTable};
use crate::linker::Linker;
use crate::metric::RecordMetric;
use crate::model::{Field, Link, Record, RecordKind};
use crate::recipe::LinkageRecipe;
use crate::sweep::AnnotatedLink;

/// How candidate pairs are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    BruteForce,
    Indexed,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub links: Vec<Link>,
    /// Present when the recipe defines a ground truth.
    pub quality: Option<LinkageQuality>,
    /// Distance computations brute force needs for the filtered input.
    pub comparisons: u64,
}

/// One configured linkage: pre-filter, link, then evaluate.
pub struct LinkageRun {
    recipe: LinkageRecipe,
    metric: Arc<dyn RecordMetric>,
    strategy: Strategy,
    index: IndexConfig,
}

impl fmt::Debug for LinkageRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkageRun")
        .field("link_type", &self.recipe.link_type)
        .field("metric", &self.metric.name())
        .field("strategy", &self.strategy)
        .finish()
    }
}

impl LinkageRun {
    pub fn new(recipe: LinkageRecipe, metric: Arc<dyn RecordMetric>, strategy: Strategy) -> Result<Self> {
        recipe.validate()?;
        Ok(Self { recipe, metric, strategy, index: IndexConfig::default() })
    }

    pub fn with_index_config(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    pub fn recipe(&self) -> &LinkageRecipe {
        &self.recipe
    }

    /// Links a collection against itself.
    pub fn run_within(&self, records: &[Record]) -> Result<RunOutcome> {
        if self.recipe.role1.kind != self.recipe.role2.kind {
            return Err(LinkageError::Config(format!(
                "{} links {:?} to {:?}; it needs two collections",
                self.recipe.link_type, self.recipe.role1.kind, self.recipe.role2.kind
            )));
        }
        check_kind(records, self.recipe.role1.kind)?;
        let kept = filter_records(records, &self.recipe.fields1, self.recipe.required_fields);
        self.link(&kept, &kept)
    }

    pub fn run_between(&self, records1: &[Record], records2: &[Record]) -> Result<RunOutcome> {
        check_kind(records1, self.recipe.role1.kind)?;
        check_kind(records2, self.recipe.role2.kind)?;
        let kept1 = filter_records(records1, &self.recipe.fields1, self.recipe.required_fields);
        let kept2 = filter_records(records2, &self.recipe.fields2, self.recipe.required_fields);
        self.link(&kept1, &kept2)
    }

    fn link(&self, records1: &[Record], records2: &[Record]) -> Result<RunOutcome> {
        let linker = Linker::from_recipe(&self.recipe, self.metric.clone());
        let comparisons = linker.total_comparisons(records1, records2);

        let links = match self.strategy {
            Strategy::BruteForce => linker.link_brute_force(records1, records2),
            Strategy::Indexed => linker.link_indexed::<PivotTable<'_>>(records1, records2, &self.index)?,
        };

        let quality = match self.recipe.ground_truth {
            Some(_) => {
                let mut truth = ground_truth_links(&self.recipe, records1, records2)?;
                Some(evaluate(links.iter().cloned(), &mut truth))
            }
            None => None,
        };

        info!(
            link_type = %self.recipe.link_type,
            links = links.len(),
            comparisons,
            "linkage run complete"
        );
        Ok(RunOutcome { links, quality, comparisons })
    }

    /// Links and ground truth for a sweep, each tagged with the populated-field count
    /// of its sparser record. No pre-filtering: the sweep applies field counts itself.
    pub fn sweep_candidates(
        &self,
        records1: &[Record],
        records2: &[Record],
    ) -> Result<(Vec<AnnotatedLink>, Vec<AnnotatedLink>)> {
        check_kind(records1, self.recipe.role1.kind)?;
        check_kind(records2, self.recipe.role2.kind)?;
        let outcome = self.link(records1, records2)?;
        let truth = match self.recipe.ground_truth {
            Some(_) => ground_truth_links(&self.recipe, records1, records2)?,
            None => Default::default(),
        };

        // symmetric links may have swapped roles; their two field lists coincide
        let populated1 = count_fields(records1, &self.recipe.fields1);
        let populated2 = count_fields(records2, &self.recipe.fields2);
        let annotate = |link: Link| {
            let a = populated1.get(&link.role1.record_id).copied().unwrap_or(0);
            let b = populated2.get(&link.role2.record_id).copied().unwrap_or(0);
            AnnotatedLink { link, populated: a.min(b) }
        };

        Ok((
            outcome.links.into_iter().map(annotate).collect(),
            truth.into_iter().map(annotate).collect(),
        ))
    }
}

fn count_fields(records: &[Record], fields: &[Field]) -> HashMap<Uuid, usize> {
    records.iter().map(|r| (r.id, populated_count(r, fields))).collect()
}

fn check_kind(records: &[Record], kind: RecordKind) -> Result<()> {
    match records.iter().find(|r| r.kind() != kind) {
        Some(r) => Err(LinkageError::Config(format!(
            "record {} is a {:?} record, expected {:?}",
            r.id,
            r.kind(),
            kind
        ))),
        None => Ok(()),
    }
}
