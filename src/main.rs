use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use zip_invest_ranker::io::{self, GeoLookup};
use zip_invest_ranker::ml::{ModelVersion, TrainingReport};
use zip_invest_ranker::{InvestmentLabel, InvestmentPipeline, ModelStore, PipelineConfig, ResultTable};

#[derive(Parser)]
#[command(name = "zip-invest-ranker")]
#[command(version = "0.1.0")]
#[command(about = "Rank postal-code real-estate markets by investment potential", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Label, train and rank a batch in one run
    Rank {
        /// Input CSV with growth, vacancy and affordability columns
        #[arg(short, long)]
        input: PathBuf,
        /// Output CSV for the ranked table
        #[arg(short, long, default_value = "ranked_regions.csv")]
        output: PathBuf,
        /// Also store the trained model in this directory
        #[arg(long)]
        save_model: Option<PathBuf>,
    },
    /// Train a model and store it under the next version
    Train {
        #[arg(short, long)]
        input: PathBuf,
        /// Model directory
        #[arg(short, long, default_value = "models")]
        models: PathBuf,
        /// Explicit version (major.minor.patch); defaults to a patch bump
        #[arg(long)]
        version: Option<String>,
    },
    /// Rank a batch with a stored model
    Predict {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "ranked_regions.csv")]
        output: PathBuf,
        #[arg(short, long, default_value = "models")]
        models: PathBuf,
        /// Stored version to use; defaults to the latest
        #[arg(long)]
        version: Option<String>,
    },
    /// Append Latitude/Longitude to a result CSV from a local gazetteer
    Geo {
        #[arg(short, long)]
        input: PathBuf,
        /// Gazetteer CSV (postal_code,latitude,longitude)
        #[arg(short, long)]
        gazetteer: PathBuf,
        #[arg(short, long, default_value = "ranked_regions_geo.csv")]
        output: PathBuf,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("ZIP Investment Ranker v0.1.0");

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Rank { input, output, save_model } => {
            run_rank(config, &input, &output, save_model.as_deref())?;
        }
        Commands::Train { input, models, version } => {
            run_train(config, &input, &models, version.as_deref())?;
        }
        Commands::Predict { input, output, models, version } => {
            run_predict(config, &input, &output, &models, version.as_deref())?;
        }
        Commands::Geo { input, gazetteer, output } => {
            run_geo(&config, &input, &gazetteer, &output)?;
        }
        Commands::ShowConfig => {
            println!(
                "# forest profile '{}': {}",
                config.forest.profile.name(),
                config.forest.profile.description()
            );
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn run_rank(config: PipelineConfig, input: &Path, output: &Path, save_model: Option<&Path>) -> Result<()> {
    let table = io::read_table(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let pipeline = InvestmentPipeline::new(config)?;
    let run = pipeline.run(&table)?;

    for warning in &run.labeling.warnings {
        warn!("'{}' was constant over {} regions", warning.column, warning.rows);
    }

    if let Some(dir) = save_model {
        let store = ModelStore::new(dir);
        let mut model = run.model.clone();
        model.version = store.suggest_next_version()?;
        store.save(&model)?;
    }

    io::write_results(output, &run.results)?;
    print_report(&run.report);
    print_top(&run.results, 10);
    Ok(())
}

fn run_train(config: PipelineConfig, input: &Path, models: &Path, version: Option<&str>) -> Result<()> {
    let table = io::read_table(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let pipeline = InvestmentPipeline::new(config)?;
    let (mut model, report) = pipeline.train(&table)?;

    let store = ModelStore::new(models);
    model.version = match version {
        Some(v) => parse_version(v)?,
        None => store.suggest_next_version()?,
    };
    let path = store.save(&model)?;

    print_report(&report);
    println!("Model v{} saved to {}", model.version, path.display());
    Ok(())
}

fn run_predict(
    config: PipelineConfig,
    input: &Path,
    output: &Path,
    models: &Path,
    version: Option<&str>,
) -> Result<()> {
    let store = ModelStore::new(models);
    let model = match version {
        Some(v) => store.load(&parse_version(v)?)?,
        None => store
            .load_latest()?
            .ok_or_else(|| anyhow!("No stored model in {}", models.display()))?,
    };
    info!("Using model v{} trained {}", model.version, model.trained_at.format("%Y-%m-%d %H:%M"));

    let table = io::read_table(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let pipeline = InvestmentPipeline::new(config)?;
    let results = pipeline.predict(&model, &table)?;

    io::write_results(output, &results)?;
    print_top(&results, 10);
    Ok(())
}

fn run_geo(config: &PipelineConfig, input: &Path, gazetteer: &Path, output: &Path) -> Result<()> {
    let lookup = GeoLookup::load(gazetteer).with_context(|| format!("Failed to read {}", gazetteer.display()))?;
    let table = io::read_table(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let enriched = lookup.enrich(&table, &config.columns.region_column)?;
    io::write_table(output, &enriched)?;
    info!("Geocoded table written to {}", output.display());
    Ok(())
}

fn parse_version(s: &str) -> Result<ModelVersion> {
    s.parse::<ModelVersion>().map_err(|e| anyhow!(e))
}

fn print_report(report: &TrainingReport) {
    println!("\n=== Training Report ===");
    println!(
        "Samples: {} train / {} test",
        report.train_samples, report.test_samples
    );
    println!("Accuracy: {:.1}%", report.accuracy * 100.0);
    println!(
        "Macro precision/recall/F1: {:.3} / {:.3} / {:.3}",
        report.macro_precision, report.macro_recall, report.macro_f1
    );
    if let Some(oob) = report.oob_accuracy {
        println!("Out-of-bag accuracy: {:.1}%", oob * 100.0);
    }
    println!(
        "Label distribution: {} HighPotential / {} Stable / {} LowPotential",
        report.class_distribution[0], report.class_distribution[1], report.class_distribution[2]
    );

    println!("\nConfusion matrix (rows = labeled, columns = predicted):");
    for (label, row) in InvestmentLabel::all().iter().zip(report.confusion_matrix.iter()) {
        println!("  {:<14} {:>4} {:>4} {:>4}", label.as_str(), row[0], row[1], row[2]);
    }

    println!("\nFeature importance:");
    for (name, importance) in &report.feature_importances {
        println!("  {:<20} {:.3}", name, importance);
    }
}

fn print_top(results: &ResultTable, n: usize) {
    println!("\n=== Top {} Regions ===", n.min(results.len()));
    for row in results.rows.iter().take(n) {
        println!(
            "{}  {:<20} {:<3} {:<14} {:>5.1}%  growth {:>5.1}%",
            row.region_id,
            row.city,
            row.state,
            row.classification.as_str(),
            row.confidence_pct,
            row.growth_pct
        );
    }
}
