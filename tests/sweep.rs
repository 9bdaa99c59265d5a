use std::fs;
use std::sync::Arc;

use kinlink::composite::{Aggregate, SigmaMetric};
use kinlink::metric::StringMetric;
use kinlink::model::{BirthField, Record};
use kinlink::parser::{parse_field_range, parse_threshold_range};
use kinlink::recipe::LinkageRecipe;
use kinlink::sweep::{CsvDirectorySink, InMemoryLinkStore, MemorySink, SweepOrchestrator};
use kinlink::{LinkageRun, Strategy};

fn child(forename: &str, father: &str, mother: &str, family: &str) -> Record {
    let mother_id = format!("m-{}", family);
    let father_id = format!("f-{}", family);
    Record::birth([
        (BirthField::Forename, forename),
        (BirthField::FatherForename, father),
        (BirthField::FatherSurname, "SMITH"),
        (BirthField::MotherForename, mother),
        (BirthField::MotherMaidenSurname, "REID"),
        (BirthField::MotherIdentity, mother_id.as_str()),
        (BirthField::FatherIdentity, father_id.as_str()),
    ])
}

fn store() -> Arc<InMemoryLinkStore> {
    let records = vec![
        child("ANN", "JOHN", "MARY", "a"),
        child("JAMES", "JOHN", "MARY", "a"),
        child("JANET", "JON", "MARY", "a"),
        child("WILLIAM", "PETER", "JEAN", "b"),
        child("ALEXANDER", "PETER", "", "b"),
    ];
    let recipe = LinkageRecipe::birth_birth_sibling().with_threshold(2.0);
    let metric = Arc::new(SigmaMetric::new(StringMetric::Levenshtein, recipe.mapping().unwrap(), Aggregate::Sum));
    let run = LinkageRun::new(recipe, metric, Strategy::BruteForce).unwrap();
    let (candidates, truth) = run.sweep_candidates(&records, &records).unwrap();
    assert_eq!(truth.len(), 4);
    Arc::new(InMemoryLinkStore::new(candidates, truth))
}

#[test]
fn recall_grows_with_threshold() {
    let orchestrator = SweepOrchestrator::new(
        parse_threshold_range("0.00:2.00:1.00").unwrap(),
        parse_field_range("3..4").unwrap(),
    );
    let mut sink = MemorySink::default();
    let summary = orchestrator.run(&store(), &mut sink).unwrap();
    assert_eq!(summary.rows_written, 6);

    let recall = |fields: usize, threshold: f64| {
        sink.rows()
            .iter()
            .find(|r| r.field_count == fields && r.threshold == threshold)
            .map(|r| r.quality.recall())
            .unwrap()
    };
    // with three fields: a has 3 pairs (one at distance 1), b has 1 pair (distance 4)
    assert_eq!(recall(3, 0.0), 0.25);
    assert_eq!(recall(3, 1.0), 0.75);
    assert_eq!(recall(3, 2.0), 0.75);
    // at four fields family b's sparse child drops out
    assert_eq!(recall(4, 0.0), 1.0 / 3.0);
    assert_eq!(recall(4, 1.0), 1.0);
}

#[test]
fn csv_reports_are_written_per_field_count() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = SweepOrchestrator::new(
        parse_threshold_range("0.00:1.00:0.50").unwrap(),
        parse_field_range("0..2").unwrap(),
    );
    let mut sink = CsvDirectorySink::new(dir.path(), "birth_sibling").unwrap();
    let summary = orchestrator.run(&store(), &mut sink).unwrap();
    assert_eq!(summary.rows_written, 9);
    assert!(summary.failures.is_empty());

    for n in 0..=2 {
        let text = fs::read_to_string(dir.path().join(format!("birth_sibling-fields-{}.csv", n))).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("threshold,precision,recall,fmeasure"));
        let thresholds: Vec<&str> = lines.map(|l| l.split(',').next().unwrap()).collect();
        assert_eq!(thresholds, vec!["0.00", "0.50", "1.00"]);
    }
}
