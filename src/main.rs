use anyhow::{Context, bail};
use clap::{CommandFactory, Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use valuation_desk::analytics::DashboardAnalytics;
use valuation_desk::reconcile::reconcile;
use valuation_desk::{FieldBag, FormType, config, downloader, logging, saving, valuation};

#[derive(Debug, Parser)]
#[command(name = "valuation")]
#[command(about = "Merge, analyse and export valuation records", long_about = None)]
struct Cli {
    /// Configuration file (defaults to Valuation.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge per-form-type JSON dumps (named after the form, e.g. bomflat.json) into a snapshot
    Merge {
        dumps: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print dashboard analytics for a snapshot
    Analyze { snapshot: PathBuf },
    /// Export a snapshot as CSV, or XLSX when the output ends in .xlsx
    Export {
        snapshot: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Recalculate line items from key=value fields
    Calc { fields: Vec<String> },
    /// Run the HTTP server
    #[cfg(feature = "web")]
    Serve,
}

fn main() {
    dotenv().ok();

    let args = Cli::parse();
    let config = match config::load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };
    logging::init_logger(&config.log_level);

    let result = match args.command {
        Some(Commands::Merge { dumps, out }) => run_merge(&dumps, &out),
        Some(Commands::Analyze { snapshot }) => run_analyze(&snapshot),
        Some(Commands::Export { snapshot, out }) => run_export(&snapshot, &out),
        Some(Commands::Calc { fields }) => run_calc(&fields),
        #[cfg(feature = "web")]
        Some(Commands::Serve) => run_serve(config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn form_type_of(path: &Path) -> anyhow::Result<FormType> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match FormType::from_slug(stem) {
        Some(form_type) => Ok(form_type),
        None => bail!("cannot tell the form type of {}", path.display()),
    }
}

fn run_merge(dumps: &[PathBuf], out: &Path) -> anyhow::Result<()> {
    if dumps.is_empty() {
        bail!("no dumps given");
    }

    let mut batches = Vec::with_capacity(dumps.len());
    for path in dumps {
        let form_type = form_type_of(path)?;
        let records = saving::read_record_dump(path)
            .with_context(|| format!("reading {}", path.display()))?;
        info!("{}: {} records", path.display(), records.len());
        batches.push((form_type, records));
    }

    let merged = reconcile(batches);
    saving::save_records(out, &merged).with_context(|| format!("writing {}", out.display()))?;
    println!("{} records written to {}", merged.len(), out.display());
    Ok(())
}

fn run_analyze(snapshot: &Path) -> anyhow::Result<()> {
    let records = saving::load_records(snapshot)?;
    let analytics = DashboardAnalytics::from_records(&records);
    println!("{}", serde_json::to_string_pretty(&analytics)?);
    Ok(())
}

fn run_export(snapshot: &Path, out: &Path) -> anyhow::Result<()> {
    let records = saving::load_records(snapshot)?;
    let is_xlsx = out
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));

    let bytes = if is_xlsx {
        export_xlsx(&records)?
    } else {
        downloader::to_csv(&records)?.into_bytes()
    };
    fs::write(out, bytes).with_context(|| format!("writing {}", out.display()))?;
    println!("{} records exported to {}", records.len(), out.display());
    Ok(())
}

#[cfg(feature = "web")]
fn export_xlsx(records: &[valuation_desk::ValuationRecord]) -> anyhow::Result<Vec<u8>> {
    Ok(downloader::to_xlsx(records)?)
}

#[cfg(not(feature = "web"))]
fn export_xlsx(_records: &[valuation_desk::ValuationRecord]) -> anyhow::Result<Vec<u8>> {
    bail!("XLSX export needs the `web` feature")
}

fn run_calc(pairs: &[String]) -> anyhow::Result<()> {
    let mut fields = FieldBag::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value, got {}", pair);
        };
        fields.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
    }

    valuation::recalculate(&mut fields);
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

#[cfg(feature = "web")]
fn run_serve(config: config::AppConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(valuation_desk::app::run(config))?;
    Ok(())
}
