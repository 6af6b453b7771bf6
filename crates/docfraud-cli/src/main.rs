use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use colored::Colorize;
use docfraud_core::{
    render_report, save_result, AntiFraudPipeline, OutputFormat, ProcessingResult, RiskLevel,
    Settings,
};
use tracing_subscriber::EnvFilter;

const URL_RESULT_FILE: &str = "fraud_analysis_result.json";

#[derive(Parser, Debug)]
#[command(
    name = "docfraud",
    author,
    version,
    about = "Document fraud-risk analysis CLI"
)]
#[command(group(ArgGroup::new("input").required(true).args(["document", "url"])))]
struct Cli {
    /// Path to the document to analyze
    #[arg(value_name = "DOCUMENT")]
    document: Option<PathBuf>,

    /// Analyze a remote document instead of a local file
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Optional configuration file (TOML, YAML or JSON) layered under the environment
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to write the JSON result (default: result_<stem>.json)
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Format printed to standard output
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Print only the report; no banner, status line or info logs on stderr
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Human,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => OutputFormat::Json,
            Format::Human => OutputFormat::Human,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    if let Some(path) = &cli.document {
        if !path.is_file() {
            bail!("document not found: {}", path.display());
        }
    }

    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?settings, "configuration loaded");
    let pipeline = AntiFraudPipeline::from_settings(&settings)?;

    let (result, default_output) = match (&cli.document, &cli.url) {
        (Some(path), _) => (pipeline.process_document(path).await, result_file_for(path)),
        (None, Some(url)) => (
            pipeline.process_document_url(url).await,
            PathBuf::from(URL_RESULT_FILE),
        ),
        (None, None) => bail!("a document path or --url is required"),
    };

    if !cli.quiet {
        eprintln!("{}", "=".repeat(80));
        eprintln!("{}", "FRAUD ANALYSIS RESULT".bold());
        eprintln!("{}", "=".repeat(80));
    }
    println!("{}", render_report(&result, cli.format.into())?);

    let output = cli.output.unwrap_or(default_output);
    save_result(&result, &output)?;
    if !cli.quiet {
        print_status(&result);
        eprintln!("\nResult saved to: {}", output.display());
    }
    Ok(())
}

fn result_file_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    PathBuf::from(format!("result_{stem}.json"))
}

fn print_status(result: &ProcessingResult) {
    match &result.fraud_analysis {
        Some(analysis) if result.success => {
            let level = match analysis.risk_level {
                RiskLevel::Low => analysis.risk_level.as_str().green(),
                RiskLevel::Medium => analysis.risk_level.as_str().yellow(),
                RiskLevel::High => analysis.risk_level.as_str().red().bold(),
            };
            eprintln!("Risk level: {level} (score {:.2})", analysis.risk_score);
        }
        _ => {
            let stage = result
                .stage
                .map(|stage| stage.to_string())
                .unwrap_or_else(|| "unknown".into());
            eprintln!("{} during {stage}", "Processing failed".red().bold());
        }
    }
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info,tokio=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
