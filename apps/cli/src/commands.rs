//! CLI command definitions, routing, and tracing setup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use brandpipe_core::{CompletionService, OpenRouterClient, Pipeline, run_verification};
use brandpipe_shared::{AppConfig, JobState, JobStoreConfig, VerifyOutcome, init_config, load_config};
use brandpipe_storage::{JobStore, Storage};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// brandpipe: crawl a brand's site, derive a guide, plan and score content.
#[derive(Parser)]
#[command(
    name = "brandpipe",
    version,
    about = "Crawl brand websites and turn them into brand guides and scored content plans.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Queue a crawl of a brand's website.
    Ingest {
        /// Brand identifier that owns the job.
        brand: String,

        /// Page to crawl (http or https).
        url: String,

        /// Crawl in-process and wait for the job to finish.
        #[arg(long)]
        wait: bool,

        /// Seconds to wait when --wait is given.
        #[arg(long, default_value = "120")]
        timeout: u64,
    },

    /// Run crawl workers and onboarding until interrupted.
    Serve {
        /// Crawl only; do not start onboarding runs.
        #[arg(long)]
        no_onboarding: bool,
    },

    /// Show one crawl job as JSON.
    Job {
        brand: String,
        job_id: String,
    },

    /// Show the latest onboarding run for a brand and its drafts.
    Run {
        brand: String,
    },

    /// Crawl one URL end to end and report the outcome as an exit code.
    Verify {
        brand: String,
        url: String,

        /// Seconds to wait for the job to finish.
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "brandpipe=info",
        1 => "brandpipe=debug",
        _ => "brandpipe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest {
            brand,
            url,
            wait,
            timeout,
        } => cmd_ingest(&brand, &url, wait, Duration::from_secs(timeout)).await,
        Command::Serve { no_onboarding } => cmd_serve(no_onboarding).await,
        Command::Job { brand, job_id } => cmd_job(&brand, &job_id).await,
        Command::Run { brand } => cmd_run(&brand).await,
        Command::Verify {
            brand,
            url,
            timeout,
        } => cmd_verify(&brand, &url, Duration::from_secs(timeout)).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let storage = Storage::open(Path::new(&config.storage.database_path)).await?;
    Ok(Arc::new(storage))
}

/// A job store for one-shot commands. Completion events are only consumed
/// by a running `serve`, so nothing listens here.
async fn offline_job_store(config: &AppConfig) -> Result<JobStore> {
    let storage = open_storage(config).await?;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    Ok(JobStore::new(storage, JobStoreConfig::from(config), events_tx))
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

async fn cmd_ingest(brand: &str, url: &str, wait: bool, timeout: Duration) -> Result<()> {
    let config = load_config()?;

    if !wait {
        let jobs = offline_job_store(&config).await?;
        let job_id = jobs.enqueue(brand, url).await?;
        println!("{job_id}");
        return Ok(());
    }

    let pipeline = Pipeline::start(&config, None).await?;
    let job_id = pipeline.jobs().enqueue(brand, url).await?;
    info!(job_id = %job_id, "waiting for crawl");

    let progress = spinner(format!("Crawling {url}"));
    let waited = pipeline.jobs().wait_for_terminal(brand, &job_id, timeout).await;
    progress.finish_and_clear();
    pipeline.shutdown().await;

    let job = waited?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.state != JobState::Succeeded {
        return Err(eyre!(
            "job {job_id} ended {}: {}",
            job.state,
            job.error.as_deref().unwrap_or("no error recorded")
        ));
    }
    Ok(())
}

async fn cmd_serve(no_onboarding: bool) -> Result<()> {
    let config = load_config()?;

    let completion: Option<Arc<dyn CompletionService>> = if no_onboarding {
        None
    } else {
        Some(Arc::new(OpenRouterClient::from_config(&config)?))
    };
    if completion.is_none() {
        warn!("onboarding disabled; crawl results will not start runs");
    }

    let pipeline = Pipeline::start(&config, completion).await?;
    println!(
        "brandpipe serving with {} worker(s). Press Ctrl+C to stop.",
        config.jobs.worker_count
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for Ctrl+C: {e}"))?;

    info!("shutting down");
    pipeline.shutdown().await;
    Ok(())
}

async fn cmd_job(brand: &str, job_id: &str) -> Result<()> {
    let config = load_config()?;
    let jobs = offline_job_store(&config).await?;
    let job = jobs.get(brand, job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn cmd_run(brand: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let run = storage
        .latest_run(brand)
        .await?
        .ok_or_else(|| eyre!("no onboarding run for brand {brand}"))?;
    let drafts = storage.list_drafts(brand, &run.id).await?;

    let out = serde_json::json!({ "run": run, "drafts": drafts });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn cmd_verify(brand: &str, url: &str, timeout: Duration) -> Result<()> {
    // A missing or unreadable config is an environment failure, not a crash.
    let outcome = match load_config() {
        Ok(config) => {
            let progress = spinner(format!("Verifying {url}"));
            let outcome = run_verification(&config, brand, url, timeout).await;
            progress.finish_and_clear();
            outcome
        }
        Err(e) => VerifyOutcome::EnvironmentMissing(e.to_string()),
    };

    println!("{outcome}");
    std::process::exit(outcome.exit_code());
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
