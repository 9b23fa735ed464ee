use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use feedaudit::config::Config;
use feedaudit::feed::{self, Classifier, ExceptionRule, Verifier};
use feedaudit::report::{OutputFormat, Reporter, Summary};

const USAGE: &str = "Usage: feedaudit [OPTIONS] <OPML_FILE>";

/// Get the default config file path (~/.config/feedaudit/config.toml)
fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("feedaudit")
            .join("config.toml"),
    )
}

#[derive(Parser, Debug)]
#[command(
    name = "feedaudit",
    about = "Check every feed in an OPML file for a live RSS/Atom response"
)]
struct Args {
    /// OPML file to audit
    #[arg(value_name = "OPML_FILE")]
    file: Option<PathBuf>,

    /// Config file (default: ~/.config/feedaudit/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format for per-feed lines
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Per-request timeout in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Maximum concurrent requests (0 = unbounded)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Extra URL substring to accept regardless of Content-Type (repeatable)
    #[arg(long = "exception", value_name = "PATTERN")]
    exceptions: Vec<String>,

    /// Also print a line for valid feeds in text mode
    #[arg(long)]
    show_valid: bool,

    /// Don't print the summary line on stderr
    #[arg(long)]
    no_summary: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?
        }
        None => match default_config_path() {
            Some(path) => Config::load(&path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => Config::default(),
        },
    };

    if let Some(format) = args.format {
        config.format = format;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_requests = concurrency;
    }
    config
        .exceptions
        .extend(args.exceptions.iter().map(ExceptionRule::substring));

    Ok(config)
}

async fn run(args: Args, opml_path: &Path) -> Result<Summary> {
    let config = load_config(&args)?;

    let doc = feed::parse(opml_path)
        .await
        .with_context(|| format!("Failed to load OPML file: {}", opml_path.display()))?;

    let total = feed::count_feeds(&doc.outlines);
    tracing::info!(
        path = %opml_path.display(),
        title = doc.title.as_deref().unwrap_or(""),
        feeds = total,
        concurrency = config.max_concurrent_requests,
        "Verifying feeds"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let classifier = Classifier::new(
        client,
        config.exception_list(),
        config.classifier_options(),
    );
    let verifier = Verifier::new(classifier, config.max_concurrent_requests);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reporter = Reporter::new(std::io::stdout(), config.format, args.show_valid);
    let printer = tokio::spawn(async move {
        while let Some(outcome) = rx.recv().await {
            if let Err(e) = reporter.record(&outcome) {
                tracing::warn!(url = %outcome.url, error = %e, "Failed to write outcome");
            }
        }
        reporter.summary()
    });

    verifier.verify_into(doc.outlines, tx).await;

    let summary = printer.await.context("Output task failed")?;
    tracing::info!(
        checked = summary.checked,
        invalid = summary.invalid,
        exceptions = summary.exceptions,
        "Verification complete"
    );
    Ok(summary)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let Some(opml_path) = args.file.clone() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let no_summary = args.no_summary;

    match run(args, &opml_path).await {
        Ok(summary) => {
            if !no_summary {
                eprintln!("{summary}");
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
