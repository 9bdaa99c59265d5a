use std::collections::HashSet;
use std::sync::Arc;

use kinlink::composite::{Aggregate, SigmaMetric};
use kinlink::index::IndexConfig;
use kinlink::metric::{RecordMetric, StringMetric};
use kinlink::model::{BirthField, DeathField, Link, Record};
use kinlink::recipe::LinkageRecipe;
use kinlink::viability::ViabilityRule;
use kinlink::LinkageRun;
use proptest::prelude::*;
use uuid::Uuid;

const FORENAMES: &[&str] = &["JOHN", "JON", "JAMES", "MARY", "MARIE", "ANN", "ANNE", "WILLIAM", ""];
const SURNAMES: &[&str] = &["SMITH", "SMYTH", "BROWN", "BROUN", "REID", "REED", "KERR", ""];

fn person() -> impl Strategy<Value = (&'static str, &'static str)> {
    (prop::sample::select(FORENAMES), prop::sample::select(SURNAMES))
}

fn birth() -> impl Strategy<Value = Record> {
    (person(), person(), person()).prop_map(|(child, father, mother)| {
        Record::birth([
            (BirthField::Forename, child.0),
            (BirthField::Surname, child.1),
            (BirthField::FatherForename, father.0),
            (BirthField::FatherSurname, father.1),
            (BirthField::MotherForename, mother.0),
            (BirthField::MotherMaidenSurname, mother.1),
        ])
    })
}

fn death() -> impl Strategy<Value = Record> {
    (person(), person(), person()).prop_map(|(deceased, father, mother)| {
        Record::death([
            (DeathField::Forename, deceased.0),
            (DeathField::Surname, deceased.1),
            (DeathField::FatherForename, father.0),
            (DeathField::FatherSurname, father.1),
            (DeathField::MotherForename, mother.0),
            (DeathField::MotherMaidenSurname, mother.1),
        ])
    })
}

fn index(seed: u64) -> IndexConfig {
    IndexConfig { reference_points: 4, seed, min_reference_points: 1, retry_step: 1 }
}

fn directed(links: &[Link]) -> HashSet<(Uuid, Uuid)> {
    links.iter().map(|l| (l.role1.record_id, l.role2.record_id)).collect()
}

fn runs(recipe: LinkageRecipe, threshold: f64, seed: u64) -> (LinkageRun, LinkageRun) {
    let mut recipe = recipe.with_threshold(threshold);
    recipe.viability = ViabilityRule::Always;
    let metric: Arc<dyn RecordMetric> =
        Arc::new(SigmaMetric::new(StringMetric::Levenshtein, recipe.mapping().unwrap(), Aggregate::Sum));
    let brute = LinkageRun::new(recipe.clone(), metric.clone(), kinlink::Strategy::BruteForce).unwrap();
    let indexed = LinkageRun::new(recipe, metric, kinlink::Strategy::Indexed)
        .unwrap()
        .with_index_config(index(seed));
    (brute, indexed)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn birth_death_identity_strategies_agree(
        births in prop::collection::vec(birth(), 1..16),
        deaths in prop::collection::vec(death(), 1..16),
        threshold in prop::sample::select(vec![0.0, 2.0, 5.0, 9.0]),
        seed in any::<u64>(),
    ) {
        let (brute, indexed) = runs(LinkageRecipe::birth_death_identity(), threshold, seed);
        let expected = brute.run_between(&births, &deaths).unwrap();
        let found = indexed.run_between(&births, &deaths).unwrap();
        prop_assert_eq!(directed(&found.links), directed(&expected.links));
    }

    #[test]
    fn birth_father_identity_strategies_agree_within(
        births in prop::collection::vec(birth(), 2..20),
        threshold in prop::sample::select(vec![0.0, 1.0, 3.0, 6.0]),
        seed in any::<u64>(),
    ) {
        let (brute, indexed) = runs(LinkageRecipe::birth_father_identity(), threshold, seed);
        let expected = brute.run_within(&births).unwrap();
        let found = indexed.run_within(&births).unwrap();
        prop_assert_eq!(found.links.len(), expected.links.len());
        prop_assert_eq!(directed(&found.links), directed(&expected.links));
    }

    #[test]
    fn birth_father_identity_strategies_agree_between(
        fathers in prop::collection::vec(birth(), 1..16),
        children in prop::collection::vec(birth(), 1..16),
        threshold in prop::sample::select(vec![0.0, 1.0, 3.0, 6.0]),
        seed in any::<u64>(),
    ) {
        let (brute, indexed) = runs(LinkageRecipe::birth_father_identity(), threshold, seed);
        let expected = brute.run_between(&fathers, &children).unwrap();
        let found = indexed.run_between(&fathers, &children).unwrap();
        prop_assert_eq!(directed(&found.links), directed(&expected.links));
    }
}
