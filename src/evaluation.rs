use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{LinkageError, Result};
use crate::linker::same_collection;
use crate::model::{Field, GroundTruthLink, Link, Record, RecordKind, RoleTag};
use crate::recipe::LinkageRecipe;

/// How the true links of a linkage are known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroundTruth {
    /// A pair is a true match if every field pair of any one alternative holds equal,
    /// non-empty values. Pairs matching an `excluded` mapping are left out of scoring.
    FieldEquality {
        alternatives: Vec<Vec<(Field, Field)>>,
        #[serde(default)]
        excluded: Vec<Vec<(Field, Field)>>,
        /// Classify as unknown when any identity field is blank, rather than only
        /// when all of them are.
        #[serde(default)]
        treat_any_absent_as_unknown: bool,
    },
    /// Externally supplied (record id, record id) relationships.
    Facts(HashSet<(Uuid, Uuid)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    TrueMatch,
    NotTrueMatch,
    Unknown,
    Excluded,
}

impl GroundTruth {
    pub fn status(&self, record1: &Record, record2: &Record) -> LinkStatus {
        match self {
            GroundTruth::Facts(facts) => {
                if facts.contains(&(record1.id, record2.id)) || facts.contains(&(record2.id, record1.id)) {
                    LinkStatus::TrueMatch
                } else {
                    LinkStatus::NotTrueMatch
                }
            }
            GroundTruth::FieldEquality { alternatives, excluded, treat_any_absent_as_unknown } => {
                let (r1, r2) = match alternatives.first().and_then(|a| a.first()) {
                    Some((f, _)) if record1.kind() != f.kind() && record2.kind() == f.kind() => (record2, record1),
                    _ => (record1, record2),
                };

                if excluded.iter().any(|mapping| all_equal(r1, r2, mapping)) {
                    return LinkStatus::Excluded;
                }
                if alternatives.iter().any(|mapping| all_equal(r1, r2, mapping)) {
                    return LinkStatus::TrueMatch;
                }

                let identity_fields = || alternatives.iter().flatten();
                let blank = |r: &Record, f: Field| f != Field::standardised_id(r.kind()) && r.get(f).is_empty();

                let any_empty = identity_fields().any(|(a, b)| blank(r1, *a) || blank(r2, *b));
                let all_empty = identity_fields().all(|(a, b)| {
                    (blank(r1, *a) || *a == Field::standardised_id(r1.kind()))
                        && (blank(r2, *b) || *b == Field::standardised_id(r2.kind()))
                });

                if (*treat_any_absent_as_unknown && any_empty) || (!treat_any_absent_as_unknown && all_empty) {
                    LinkStatus::Unknown
                } else {
                    LinkStatus::NotTrueMatch
                }
            }
        }
    }

    /// Every field kind used must be one of the linkage's two record kinds.
    pub fn validate(&self, kind1: RecordKind, kind2: RecordKind) -> Result<()> {
        if let GroundTruth::FieldEquality { alternatives, excluded, .. } = self {
            for (a, b) in alternatives.iter().chain(excluded.iter()).flatten() {
                if a.kind() != kind1 || b.kind() != kind2 {
                    return Err(LinkageError::Config(format!(
                        "ground truth pair ({}, {}) does not match a {:?}-{:?} linkage",
                        a, b, kind1, kind2
                    )));
                }
            }
        }
        Ok(())
    }
}

fn all_equal(r1: &Record, r2: &Record, mapping: &[(Field, Field)]) -> bool {
    !mapping.is_empty()
        && mapping.iter().all(|(a, b)| {
            let (x, y) = (r1.get(*a), r2.get(*b));
            !x.is_empty() && x == y
        })
}

/// The exact true-link set for the recipe over the two collections.
pub fn ground_truth_links(
    recipe: &LinkageRecipe,
    records1: &[Record],
    records2: &[Record],
) -> Result<HashSet<GroundTruthLink>> {
    let truth = recipe
        .ground_truth
        .as_ref()
        .ok_or_else(|| LinkageError::Config(format!("recipe {} has no ground truth", recipe.link_type)))?;

    let same = same_collection(records1, records2);
    let mut links = HashSet::new();
    let (mut unknown, mut excluded) = (0u64, 0u64);

    for (i, r1) in records1.iter().enumerate() {
        let start = if same && recipe.symmetric { i + 1 } else { 0 };
        for (j, r2) in records2.iter().enumerate().skip(start) {
            if same && i == j {
                continue;
            }
            match truth.status(r1, r2) {
                LinkStatus::TrueMatch => {
                    let link = Link::new(
                        RoleTag::new(r1, recipe.role1.role.as_str()),
                        RoleTag::new(r2, recipe.role2.role.as_str()),
                        recipe.link_type.as_str(),
                        0.0,
                        vec!["ground truth".to_string()],
                    );
                    links.insert(if recipe.symmetric { link.canonical() } else { link });
                }
                LinkStatus::Unknown => unknown += 1,
                LinkStatus::Excluded => excluded += 1,
                LinkStatus::NotTrueMatch => {}
            }
        }
    }

    info!(link_type = %recipe.link_type, true_links = links.len(), unknown, excluded, "ground truth computed");
    Ok(links)
}

/// Counts and derived rates. Rates are always computed from the counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinkageQuality {
    true_positives: u64,
    false_positives: u64,
    false_negatives: u64,
    precision: f64,
    recall: f64,
    f_measure: f64,
}

impl LinkageQuality {
    pub fn from_counts(tp: u64, fp: u64, fn_: u64) -> Self {
        Self {
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            precision: precision(tp, fp),
            recall: recall(tp, fn_),
            f_measure: f1(tp, fp, fn_),
        }
    }

    pub fn true_positives(&self) -> u64 {
        self.true_positives
    }

    pub fn false_positives(&self) -> u64 {
        self.false_positives
    }

    pub fn false_negatives(&self) -> u64 {
        self.false_negatives
    }

    pub fn precision(&self) -> f64 {
        self.precision
    }

    pub fn recall(&self) -> f64 {
        self.recall
    }

    pub fn f_measure(&self) -> f64 {
        self.f_measure
    }
}

pub fn precision(tp: u64, fp: u64) -> f64 {
    if tp + fp == 0 { 0.0 } else { tp as f64 / (tp + fp) as f64 }
}

pub fn recall(tp: u64, fn_: u64) -> f64 {
    if tp + fn_ == 0 { 0.0 } else { tp as f64 / (tp + fn_) as f64 }
}

pub fn f1(tp: u64, fp: u64, fn_: u64) -> f64 {
    let p = precision(tp, fp);
    let r = recall(tp, fn_);
    if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
}

/// Scores emitted links against the ground truth. Each link found in `ground_truth`
/// is a true positive and is removed from it; whatever remains afterwards is a false
/// negative. Pass a copy to keep the set.
pub fn evaluate<I: IntoIterator<Item = Link>>(links: I, ground_truth: &mut HashSet<GroundTruthLink>) -> LinkageQuality {
    let (mut tp, mut fp) = (0u64, 0u64);
    for link in links {
        if ground_truth.remove(&link) {
            tp += 1;
        } else {
            fp += 1;
        }
    }
    LinkageQuality::from_counts(tp, fp, ground_truth.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BirthField, DeathField};

    fn link(a: &Record, b: &Record) -> Link {
        Link::new(RoleTag::new(a, "baby"), RoleTag::new(b, "deceased"), "ID", 0.0, vec![])
    }

    #[test]
    fn zero_denominators_are_zero() {
        assert_eq!(precision(0, 0), 0.0);
        assert_eq!(recall(0, 0), 0.0);
        assert_eq!(f1(0, 0, 0), 0.0);
        let q = LinkageQuality::from_counts(0, 5, 0);
        assert_eq!(q.precision(), 0.0);
        assert_eq!(q.f_measure(), 0.0);
    }

    #[test]
    fn rates_follow_counts() {
        let q = LinkageQuality::from_counts(6, 2, 4);
        assert_eq!(q.precision(), 0.75);
        assert_eq!(q.recall(), 0.6);
        assert!((q.f_measure() - 2.0 * 0.75 * 0.6 / 1.35).abs() < 1e-12);
    }

    #[test]
    fn evaluate_consumes_ground_truth() {
        let b1 = Record::new(RecordKind::Birth);
        let b2 = Record::new(RecordKind::Birth);
        let d1 = Record::new(RecordKind::Death);
        let d2 = Record::new(RecordKind::Death);

        let mut gt: HashSet<Link> = [link(&b1, &d1), link(&b2, &d2)].into_iter().collect();
        let q = evaluate(vec![link(&b1, &d1), link(&b1, &d2)], &mut gt);
        assert_eq!((q.true_positives(), q.false_positives(), q.false_negatives()), (1, 1, 1));
        assert_eq!(gt.len(), 1);
        assert!(gt.contains(&link(&b2, &d2)));
    }

    #[test]
    fn empty_ground_truth_degrades_gracefully() {
        let b = Record::new(RecordKind::Birth);
        let d = Record::new(RecordKind::Death);
        let mut gt = HashSet::new();
        let q = evaluate(vec![link(&b, &d)], &mut gt);
        assert_eq!(q.precision(), 0.0);
        assert_eq!(q.recall(), 0.0);
        let q = evaluate(Vec::new(), &mut HashSet::new());
        assert_eq!(q.f_measure(), 0.0);
    }

    fn identity_truth() -> GroundTruth {
        GroundTruth::FieldEquality {
            alternatives: vec![
                vec![(BirthField::ChildIdentity.into(), DeathField::DeceasedIdentity.into())],
                vec![(BirthField::StandardisedId.into(), DeathField::BirthRecordIdentity.into())],
            ],
            excluded: vec![],
            treat_any_absent_as_unknown: false,
        }
    }

    #[test]
    fn field_equality_statuses() {
        let gt = identity_truth();
        let b = Record::birth([(BirthField::ChildIdentity, "p1"), (BirthField::StandardisedId, "b9")]);
        let same = Record::death([(DeathField::DeceasedIdentity, "p1")]);
        let other = Record::death([(DeathField::DeceasedIdentity, "p2")]);
        let via_record_id = Record::death([(DeathField::BirthRecordIdentity, "b9")]);
        let blank_birth = Record::birth([(BirthField::StandardisedId, "b1")]);
        let blank_death = Record::new(RecordKind::Death);

        assert_eq!(gt.status(&b, &same), LinkStatus::TrueMatch);
        assert_eq!(gt.status(&same, &b), LinkStatus::TrueMatch);
        assert_eq!(gt.status(&b, &via_record_id), LinkStatus::TrueMatch);
        assert_eq!(gt.status(&b, &other), LinkStatus::NotTrueMatch);
        // the record's own id does not count as identity information
        assert_eq!(gt.status(&blank_birth, &blank_death), LinkStatus::Unknown);
    }

    #[test]
    fn any_absent_policy() {
        let lenient = GroundTruth::FieldEquality {
            alternatives: vec![vec![(BirthField::ChildIdentity.into(), DeathField::DeceasedIdentity.into())]],
            excluded: vec![],
            treat_any_absent_as_unknown: true,
        };
        let b = Record::birth([(BirthField::ChildIdentity, "p1")]);
        let d = Record::new(RecordKind::Death);
        assert_eq!(lenient.status(&b, &d), LinkStatus::Unknown);
        assert_eq!(identity_truth().status(&b, &d), LinkStatus::NotTrueMatch);
    }

    #[test]
    fn excluded_mapping_wins() {
        let gt = GroundTruth::FieldEquality {
            alternatives: vec![vec![(BirthField::MotherIdentity.into(), BirthField::MotherIdentity.into())]],
            excluded: vec![vec![(BirthField::ChildIdentity.into(), BirthField::ChildIdentity.into())]],
            treat_any_absent_as_unknown: false,
        };
        let a = Record::birth([(BirthField::MotherIdentity, "m"), (BirthField::ChildIdentity, "c")]);
        let b = Record::birth([(BirthField::MotherIdentity, "m"), (BirthField::ChildIdentity, "c")]);
        assert_eq!(gt.status(&a, &b), LinkStatus::Excluded);
    }

    #[test]
    fn facts_are_unordered() {
        let b = Record::new(RecordKind::Birth);
        let d = Record::new(RecordKind::Death);
        let facts = GroundTruth::Facts([(b.id, d.id)].into_iter().collect());
        assert_eq!(facts.status(&d, &b), LinkStatus::TrueMatch);
        assert_eq!(facts.status(&b, &Record::new(RecordKind::Death)), LinkStatus::NotTrueMatch);
    }

    #[test]
    fn ground_truth_for_recipe() {
        let recipe = LinkageRecipe::birth_death_identity();
        let births = vec![
            Record::birth([(BirthField::ChildIdentity, "p1")]),
            Record::birth([(BirthField::ChildIdentity, "p2")]),
        ];
        let deaths = vec![
            Record::death([(DeathField::DeceasedIdentity, "p2")]),
            Record::death([(DeathField::DeceasedIdentity, "p3")]),
        ];
        let gt = ground_truth_links(&recipe, &births, &deaths).unwrap();
        assert_eq!(gt.len(), 1);
        assert!(gt.contains(&Link::new(
            RoleTag::new(&births[1], "baby"),
            RoleTag::new(&deaths[0], "deceased"),
            "anything",
            1.0,
            vec![],
        )));
    }
}
