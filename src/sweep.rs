//! Threshold × required-field-count parameter sweeps.
//!
//! One worker per field count, drawn from a fixed pool. Each worker opens its own
//! session and walks the threshold grid in order. Rows are written as soon as they
//! arrive so a failing worker loses only its own cells.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::error::{LinkageError, Result};
use crate::evaluation::{evaluate, LinkageQuality};
use crate::model::{GroundTruthLink, Link};

// --- GRID ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRange {
    min: f64,
    max: f64,
    step: f64,
}

impl ThresholdRange {
    pub fn new(min: f64, max: f64, step: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && step.is_finite()) || step <= 0.0 || min > max {
            return Err(LinkageError::Config(format!(
                "threshold range {}:{}:{} is empty or unbounded",
                min, max, step
            )));
        }
        Ok(Self { min, max, step })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Grid points from min to max inclusive, each rounded to 2 decimals.
    pub fn values(&self) -> Vec<f64> {
        let steps = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        (0..=steps)
            .map(|i| round2(self.min + i as f64 * self.step))
            .collect()
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCountRange {
    min: usize,
    max: usize,
}

impl FieldCountRange {
    pub fn new(min: usize, max: usize) -> Result<Self> {
        if min > max {
            return Err(LinkageError::Config(format!("field-count range {}..{} is empty", min, max)));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn values(&self) -> Vec<usize> {
        (self.min..=self.max).collect()
    }

    pub fn pool_size(&self) -> usize {
        (self.max - self.min).max(1)
    }
}

// --- SESSIONS ---

/// One worker's private view of the link store.
pub trait SweepSession {
    fn counts(&mut self, threshold: f64, min_fields: usize) -> Result<LinkageQuality>;

    /// Extra named columns for a cell, e.g. pattern counts from an analysis pass.
    fn supplementary(&mut self, _threshold: f64, _min_fields: usize) -> Result<Vec<(String, f64)>> {
        Ok(Vec::new())
    }
}

/// Opens sessions. Called once on each worker thread; sessions never cross threads.
pub trait SessionFactory: Sync {
    type Session: SweepSession;

    fn open(&self) -> Result<Self::Session>;
}

/// A candidate or ground-truth link and how many linkage fields its sparser record has.
#[derive(Debug, Clone)]
pub struct AnnotatedLink {
    pub link: Link,
    pub populated: usize,
}

/// Candidate links computed once at the loosest threshold, plus the ground truth.
#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    candidates: Vec<AnnotatedLink>,
    ground_truth: Vec<AnnotatedLink>,
}

impl InMemoryLinkStore {
    pub fn new(candidates: Vec<AnnotatedLink>, ground_truth: Vec<AnnotatedLink>) -> Self {
        Self { candidates, ground_truth }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }
}

impl SessionFactory for Arc<InMemoryLinkStore> {
    type Session = InMemorySession;

    fn open(&self) -> Result<InMemorySession> {
        Ok(InMemorySession { store: Arc::clone(self) })
    }
}

pub struct InMemorySession {
    store: Arc<InMemoryLinkStore>,
}

impl SweepSession for InMemorySession {
    fn counts(&mut self, threshold: f64, min_fields: usize) -> Result<LinkageQuality> {
        let mut truth: HashSet<GroundTruthLink> = self
            .store
            .ground_truth
            .iter()
            .filter(|a| a.populated >= min_fields)
            .map(|a| a.link.clone())
            .collect();
        let links = self
            .store
            .candidates
            .iter()
            .filter(|a| a.populated >= min_fields && a.link.distance <= threshold)
            .map(|a| a.link.clone());
        Ok(evaluate(links, &mut truth))
    }
}

// --- SINKS ---

#[derive(Debug, Clone, PartialEq)]
pub struct SweepRow {
    pub field_count: usize,
    pub threshold: f64,
    pub quality: LinkageQuality,
    pub extra: Vec<(String, f64)>,
}

pub trait ResultSink {
    fn write_row(&mut self, row: &SweepRow) -> Result<()>;
}

/// One CSV file per field count; every row is flushed as it is written.
pub struct CsvDirectorySink {
    dir: PathBuf,
    prefix: String,
    files: HashMap<usize, BufWriter<File>>,
}

impl CsvDirectorySink {
    pub fn new(dir: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            files: HashMap::new(),
        })
    }

    pub fn path_for(&self, field_count: usize) -> PathBuf {
        self.dir.join(format!("{}-fields-{}.csv", self.prefix, field_count))
    }

    fn writer(&mut self, row: &SweepRow) -> Result<&mut BufWriter<File>> {
        if !self.files.contains_key(&row.field_count) {
            let mut out = BufWriter::new(File::create(self.path_for(row.field_count))?);
            let mut header = String::from("threshold,precision,recall,fmeasure");
            for (name, _) in &row.extra {
                header.push(',');
                header.push_str(name);
            }
            writeln!(out, "{}", header)?;
            self.files.insert(row.field_count, out);
        }
        self.files
            .get_mut(&row.field_count)
            .ok_or_else(|| LinkageError::Config(format!("no output for field count {}", row.field_count)))
    }
}

impl ResultSink for CsvDirectorySink {
    fn write_row(&mut self, row: &SweepRow) -> Result<()> {
        let mut line = format!(
            "{:.2},{:.4},{:.4},{:.4}",
            row.threshold,
            row.quality.precision(),
            row.quality.recall(),
            row.quality.f_measure()
        );
        for (_, value) in &row.extra {
            line.push_str(&format!(",{}", value));
        }
        let out = self.writer(row)?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<SweepRow>,
}

impl MemorySink {
    pub fn rows(&self) -> &[SweepRow] {
        &self.rows
    }
}

impl ResultSink for MemorySink {
    fn write_row(&mut self, row: &SweepRow) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }
}

// --- ORCHESTRATOR ---

#[derive(Debug, Default)]
pub struct SweepSummary {
    pub rows_written: usize,
    pub failures: Vec<LinkageError>,
    pub stopped: bool,
}

enum WorkerEvent {
    Row(SweepRow),
    Failed(LinkageError),
}

pub struct SweepOrchestrator {
    thresholds: ThresholdRange,
    fields: FieldCountRange,
    stop: Arc<AtomicBool>,
    stop_file: Option<PathBuf>,
}

impl SweepOrchestrator {
    pub fn new(thresholds: ThresholdRange, fields: FieldCountRange) -> Self {
        Self {
            thresholds,
            fields,
            stop: Arc::new(AtomicBool::new(false)),
            stop_file: None,
        }
    }

    /// Trips the stop flag when this path appears.
    pub fn with_stop_file(mut self, path: PathBuf) -> Self {
        self.stop_file = Some(path);
        self
    }

    /// Setting the flag stops every worker after its current cell.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn should_stop(&self) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(path) = &self.stop_file {
            if path.exists() {
                info!(path = %path.display(), "stop file found");
                self.stop.store(true, Ordering::SeqCst);
                return true;
            }
        }
        false
    }

    pub fn run<F, K>(&self, factory: &F, sink: &mut K) -> Result<SweepSummary>
    where
        F: SessionFactory,
        K: ResultSink,
    {
        let field_counts = self.fields.values();
        let pool = self.fields.pool_size();
        info!(
            workers = pool,
            field_counts = field_counts.len(),
            thresholds = self.thresholds.values().len(),
            "starting sweep"
        );

        let (job_tx, job_rx) = bounded::<usize>(field_counts.len());
        for n in &field_counts {
            job_tx
                .send(*n)
                .map_err(|e| LinkageError::Config(format!("job queue closed: {}", e)))?;
        }
        drop(job_tx);

        let (event_tx, event_rx) = unbounded::<WorkerEvent>();
        let mut summary = SweepSummary::default();
        let mut sink_error = None;

        thread::scope(|scope| {
            for worker in 0..pool {
                let jobs = job_rx.clone();
                let events = event_tx.clone();
                scope.spawn(move || self.work(worker, factory, jobs, events));
            }
            drop(event_tx);

            for event in event_rx {
                match event {
                    WorkerEvent::Row(row) => {
                        if sink_error.is_some() {
                            continue;
                        }
                        match sink.write_row(&row) {
                            Ok(()) => summary.rows_written += 1,
                            Err(e) => {
                                warn!(error = %e, "result sink failed, stopping sweep");
                                self.stop.store(true, Ordering::SeqCst);
                                sink_error = Some(e);
                            }
                        }
                    }
                    WorkerEvent::Failed(e) => summary.failures.push(e),
                }
            }
        });

        if let Some(e) = sink_error {
            return Err(e);
        }
        summary.stopped = self.stop.load(Ordering::SeqCst);
        info!(
            rows = summary.rows_written,
            failures = summary.failures.len(),
            stopped = summary.stopped,
            "sweep finished"
        );
        Ok(summary)
    }

    fn work<F: SessionFactory>(
        &self,
        worker: usize,
        factory: &F,
        jobs: Receiver<usize>,
        events: Sender<WorkerEvent>,
    ) {
        let mut session: Option<F::Session> = None;

        for field_count in jobs {
            if self.should_stop() {
                info!(worker, field_count, "stop requested, skipping field count");
                continue;
            }
            if session.is_none() {
                match factory.open() {
                    Ok(s) => session = Some(s),
                    Err(e) => {
                        warn!(worker, field_count, error = %e, "could not open session");
                        let _ = events.send(WorkerEvent::Failed(LinkageError::Worker {
                            field_count,
                            reason: e.to_string(),
                        }));
                        continue;
                    }
                }
            }
            let Some(current) = session.as_mut() else { continue };

            info!(worker, field_count, "sweep worker started");
            match self.sweep_thresholds(current, field_count, &events) {
                Ok(cells) => info!(worker, field_count, cells, "sweep worker finished"),
                Err(e) => {
                    warn!(worker, field_count, error = %e, "sweep worker failed");
                    let _ = events.send(WorkerEvent::Failed(LinkageError::Worker {
                        field_count,
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }

    fn sweep_thresholds<S: SweepSession>(
        &self,
        session: &mut S,
        field_count: usize,
        events: &Sender<WorkerEvent>,
    ) -> Result<usize> {
        let mut cells = 0;
        for threshold in self.thresholds.values() {
            if self.should_stop() {
                info!(field_count, threshold, "stop requested");
                break;
            }
            let quality = session.counts(threshold, field_count)?;
            let extra = session.supplementary(threshold, field_count)?;
            let row = SweepRow { field_count, threshold, quality, extra };
            if events.send(WorkerEvent::Row(row)).is_err() {
                break;
            }
            cells += 1;
        }
        Ok(cells)
    }
}
