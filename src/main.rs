use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kinlink::composite::{Aggregate, FellegiSunterMetric, SigmaMetric, WeightedAverageMetric};
use kinlink::index::IndexConfig;
use kinlink::metric::{RecordMetric, StringMetric};
use kinlink::model::Record;
use kinlink::parser::{parse_field_range, parse_float_list, parse_threshold_range};
use kinlink::recipe::LinkageRecipe;
use kinlink::sweep::{CsvDirectorySink, InMemoryLinkStore, SweepOrchestrator};
use kinlink::{LinkageError, LinkageRun, Result, Strategy};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    /// Link records and write the accepted links as JSON.
    Link {
        #[clap(flatten)]
        input: Input,

        #[clap(long, value_enum, default_value = "brute-force")]
        strategy: StrategyArg,

        /// Overrides the recipe's threshold.
        #[clap(long)]
        threshold: Option<f64>,

        /// Reference points for the indexed strategy.
        #[clap(long, default_value = "70")]
        reference_points: usize,

        /// Output file; stdout when absent.
        #[clap(long)]
        out: Option<PathBuf>,
    },
    /// Evaluate quality across a threshold x required-field-count grid.
    Sweep {
        #[clap(flatten)]
        input: Input,

        /// MIN:MAX:STEP
        #[clap(long, default_value = "0.00:1.00:0.01")]
        thresholds: String,

        /// MIN..MAX
        #[clap(long)]
        fields: String,

        #[clap(long, default_value = "sweep")]
        out_dir: PathBuf,

        /// The sweep stops after the current cells once this file exists.
        #[clap(long)]
        stop_file: Option<PathBuf>,
    },
}

#[derive(clap::Args, Clone, Debug)]
struct Input {
    /// Stock recipe name (e.g. BIRTH_SIBLING) or path to a recipe JSON file.
    #[clap(long)]
    recipe: String,

    /// JSON array of records.
    #[clap(long)]
    records: PathBuf,

    /// Second collection, for linkages between two record sets.
    #[clap(long)]
    other: Option<PathBuf>,

    #[clap(long, value_enum, default_value = "sigma")]
    metric: MetricArg,

    #[clap(long, value_enum, default_value = "jaro-winkler")]
    base: BaseArg,

    /// Per-field weights, e.g. "0.5,0.25,0.25".
    #[clap(long)]
    weights: Option<String>,

    /// Fellegi-Sunter m priors, one per field.
    #[clap(long)]
    m_priors: Option<String>,

    /// Fellegi-Sunter u priors, one per field.
    #[clap(long)]
    u_priors: Option<String>,

    #[clap(long, default_value = "1.0")]
    odds_prior: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    BruteForce,
    Indexed,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MetricArg {
    Sigma,
    Mean,
    WeightedAverage,
    FellegiSunter,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BaseArg {
    Exact,
    Levenshtein,
    NormalisedLevenshtein,
    JaroWinkler,
    SorensenDice,
    Jaccard,
    Sed,
}

impl From<BaseArg> for StringMetric {
    fn from(arg: BaseArg) -> Self {
        match arg {
            BaseArg::Exact => StringMetric::Exact,
            BaseArg::Levenshtein => StringMetric::Levenshtein,
            BaseArg::NormalisedLevenshtein => StringMetric::NormalisedLevenshtein,
            BaseArg::JaroWinkler => StringMetric::JaroWinkler,
            BaseArg::SorensenDice => StringMetric::SorensenDice,
            BaseArg::Jaccard => StringMetric::Jaccard,
            BaseArg::Sed => StringMetric::Sed,
        }
    }
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,kinlink=info");
    }
    tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_target(false)
    .with_level(true)
    .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Link { input, strategy, threshold, reference_points, out } => {
            link(&input, strategy, threshold, reference_points, out.as_deref())
        }
        Command::Sweep { input, thresholds, fields, out_dir, stop_file } => {
            sweep(&input, &thresholds, &fields, &out_dir, stop_file)
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_recipe(name_or_path: &str) -> Result<LinkageRecipe> {
    let path = Path::new(name_or_path);
    if path.exists() {
        return LinkageRecipe::from_json_file(path);
    }
    LinkageRecipe::stock(name_or_path)
        .ok_or_else(|| LinkageError::Config(format!("'{}' is neither a recipe file nor a stock recipe", name_or_path)))
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)?;
    let records: Vec<Record> = serde_json::from_str(&text)?;
    info!(path = %path.display(), records = records.len(), "loaded records");
    Ok(records)
}

fn build_metric(input: &Input, recipe: &LinkageRecipe) -> Result<Arc<dyn RecordMetric>> {
    let base = StringMetric::from(input.base);
    let mapping = recipe.mapping()?;
    let weights = input.weights.as_deref().map(parse_float_list).transpose()?;

    let metric: Arc<dyn RecordMetric> = match input.metric {
        MetricArg::Sigma | MetricArg::Mean => {
            let aggregate = if matches!(input.metric, MetricArg::Mean) { Aggregate::Mean } else { Aggregate::Sum };
            let sigma = SigmaMetric::new(base, mapping, aggregate);
            match weights {
                Some(w) => Arc::new(sigma.with_weights(w)?),
                None => Arc::new(sigma),
            }
        }
        MetricArg::WeightedAverage => {
            let w = weights.ok_or_else(|| LinkageError::Config("--weights is required for weighted-average".into()))?;
            Arc::new(WeightedAverageMetric::new(base, mapping, w)?)
        }
        MetricArg::FellegiSunter => {
            let priors = |arg: &Option<String>, name: &str| -> Result<Vec<f64>> {
                arg.as_deref()
                    .map(parse_float_list)
                    .transpose()?
                    .ok_or_else(|| LinkageError::Config(format!("--{} is required for fellegi-sunter", name)))
            };
            let m = priors(&input.m_priors, "m-priors")?;
            let u = priors(&input.u_priors, "u-priors")?;
            Arc::new(FellegiSunterMetric::new(base, mapping, m, u, input.odds_prior)?)
        }
    };
    info!(metric = %metric.name(), "metric ready");
    Ok(metric)
}

/// The two sides of the linkage. A single file holding both kinds is split by kind.
fn collections(input: &Input, recipe: &LinkageRecipe) -> Result<(Vec<Record>, Option<Vec<Record>>)> {
    let records = load_records(&input.records)?;
    if let Some(other) = &input.other {
        return Ok((records, Some(load_records(other)?)));
    }
    if recipe.role1.kind == recipe.role2.kind {
        return Ok((records, None));
    }
    let (first, second): (Vec<Record>, Vec<Record>) =
        records.into_iter().partition(|r| r.kind() == recipe.role1.kind);
    Ok((first, Some(second)))
}

fn link(
    input: &Input,
    strategy: StrategyArg,
    threshold: Option<f64>,
    reference_points: usize,
    out: Option<&Path>,
) -> Result<()> {
    let mut recipe = load_recipe(&input.recipe)?;
    if let Some(t) = threshold {
        recipe = recipe.with_threshold(t);
    }
    let metric = build_metric(input, &recipe)?;
    let strategy = match strategy {
        StrategyArg::BruteForce => Strategy::BruteForce,
        StrategyArg::Indexed => Strategy::Indexed,
    };
    let (records1, records2) = collections(input, &recipe)?;

    let index = IndexConfig { reference_points, ..IndexConfig::default() };
    let run = LinkageRun::new(recipe, metric, strategy)?.with_index_config(index);
    let outcome = match &records2 {
        Some(records2) => run.run_between(&records1, records2)?,
        None => run.run_within(&records1)?,
    };

    match outcome.quality {
        Some(q) => info!(
            tp = q.true_positives(),
            fp = q.false_positives(),
            fn_ = q.false_negatives(),
            precision = q.precision(),
            recall = q.recall(),
            f_measure = q.f_measure(),
            "linkage quality"
        ),
        None => warn!("recipe has no ground truth; quality not computed"),
    }

    let mut writer: Box<dyn Write> = match out {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    serde_json::to_writer_pretty(&mut writer, &outcome.links)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn sweep(
    input: &Input,
    thresholds: &str,
    fields: &str,
    out_dir: &Path,
    stop_file: Option<PathBuf>,
) -> Result<()> {
    let thresholds = parse_threshold_range(thresholds)?;
    let fields = parse_field_range(fields)?;

    // candidates are generated once, at the loosest threshold of the grid
    let recipe = load_recipe(&input.recipe)?.with_threshold(thresholds.max());
    let metric = build_metric(input, &recipe)?;
    let prefix = recipe.link_type.to_lowercase();
    let (records1, records2) = collections(input, &recipe)?;

    let run = LinkageRun::new(recipe, metric, Strategy::BruteForce)?;
    let (candidates, truth) = match &records2 {
        Some(records2) => run.sweep_candidates(&records1, records2)?,
        None => run.sweep_candidates(&records1, &records1)?,
    };
    let store = Arc::new(InMemoryLinkStore::new(candidates, truth));
    info!(candidates = store.candidate_count(), "candidate links ready");

    let mut orchestrator = SweepOrchestrator::new(thresholds, fields);
    if let Some(path) = stop_file {
        orchestrator = orchestrator.with_stop_file(path);
    }
    let mut sink = CsvDirectorySink::new(out_dir, &prefix)?;
    let summary = orchestrator.run(&store, &mut sink)?;

    for failure in &summary.failures {
        warn!("{}", failure);
    }
    info!(
        rows = summary.rows_written,
        failures = summary.failures.len(),
        stopped = summary.stopped,
        out_dir = %out_dir.display(),
        "sweep complete"
    );
    Ok(())
}
