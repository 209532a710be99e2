//! wikirollback - roll back edits on one or many wikis
//!
//! ## Commands
//!
//! - `rollback`: roll back the latest edits on one page of the default site
//! - `massrollback`: roll back every page listed in a target file under the data directory
//!
//! Exit status: 0 when every target succeeded, 1 when any target failed, was
//! skipped or did not parse, 2 when the run could not start.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mw_api::HttpWikiApi;
use rollback_core::engine::MAX_CONCURRENCY;
use rollback_core::metrics::METRICS;
use rollback_core::telemetry::init_tracing;
use rollback_core::{
    load_target_list, render_report_text, write_report_json, BatchEngine, BatchReport, Config,
    RollbackOptions, SessionPool, Target,
};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "wikirollback")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Roll back recent edits on one or many wikis", long_about = None)]
struct Cli {
    /// Config file (default: wikirollback.toml, or $WIKIROLLBACK_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll back the latest edits on a single page
    Rollback {
        /// Page id to roll back
        page_id: u64,

        /// Site to act on (default: `default_site` from the config)
        #[arg(long)]
        site: Option<String>,

        /// Edit summary (default: the wiki's own rollback summary)
        #[arg(long)]
        summary: Option<String>,

        /// Mark the reverted edits and the rollback as bot edits
        #[arg(short = 'b', long = "markbots")]
        mark_bots: bool,
    },

    /// Roll back every page listed in a target file
    Massrollback {
        /// Target list inside the data directory, one `site page_id` per line
        file_name: String,

        /// Edit summary for every rollback (default: each wiki's own)
        summary: Option<String>,

        /// Mark the reverted edits and the rollbacks as bot edits
        #[arg(short = 'b', long = "markbots")]
        mark_bots: bool,

        /// Rollbacks in flight at once (default: `engine.concurrency`)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Also write the report as JSON to this path
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "run failed before any target was attempted");
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Rollback {
            page_id,
            site,
            summary,
            mark_bots,
        } => cmd_rollback(&config, page_id, site.as_deref(), summary, mark_bots).await,
        Commands::Massrollback {
            file_name,
            summary,
            mark_bots,
            concurrency,
            report_json,
        } => {
            cmd_massrollback(
                &config,
                &file_name,
                summary,
                mark_bots,
                concurrency,
                report_json.as_deref(),
            )
            .await
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let path = Config::resolve_path(explicit, |key| std::env::var(key).ok());
    let mut config =
        Config::load(&path).with_context(|| format!("load config {}", path.display()))?;
    config
        .apply_env_overrides()
        .context("apply environment overrides")?;
    Ok(config)
}

fn build_engine(config: &Config, concurrency: Option<usize>) -> Result<BatchEngine> {
    let mut engine_config = config.engine_config();
    if let Some(concurrency) = concurrency {
        anyhow::ensure!(
            (1..=MAX_CONCURRENCY).contains(&concurrency),
            "--concurrency must be between 1 and {MAX_CONCURRENCY}"
        );
        engine_config.concurrency = concurrency;
    }
    let api = HttpWikiApi::new(config.http_config()).context("build HTTP client")?;
    let pool = SessionPool::new(Arc::new(api), Arc::new(config.credentials.clone()));
    Ok(BatchEngine::new(Arc::new(pool), engine_config))
}

/// Run the batch, cancelling on Ctrl-C.
async fn execute(engine: &BatchEngine, targets: Vec<Target>, options: RollbackOptions) -> BatchReport {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, letting in-flight rollbacks finish");
            let _ = cancel_tx.send(true);
        }
    });

    let report = engine.run_until_cancelled(targets, options, cancel_rx).await;
    interrupt.abort();
    engine.pool().close().await;
    METRICS.flush();
    report
}

async fn cmd_rollback(
    config: &Config,
    page_id: u64,
    site: Option<&str>,
    summary: Option<String>,
    mark_bots: bool,
) -> Result<u8> {
    let site = site
        .or(config.default_site.as_deref())
        .context("no site given: pass --site or set default_site in the config")?;
    let target = Target::new(site, page_id)
        .with_context(|| format!("invalid target {site} {page_id}"))?;
    let engine = build_engine(config, Some(1))?;

    let report = execute(&engine, vec![target], RollbackOptions::new(summary, mark_bots)).await;
    print!("{}", render_report_text(&report));
    Ok(report.exit_code())
}

async fn cmd_massrollback(
    config: &Config,
    file_name: &str,
    summary: Option<String>,
    mark_bots: bool,
    concurrency: Option<usize>,
    report_json: Option<&Path>,
) -> Result<u8> {
    let list = load_target_list(&config.data_dir, file_name)
        .with_context(|| format!("load target list {file_name}"))?;
    if list.is_empty() {
        warn!(file = %file_name, "target list has no targets");
    }
    let engine = build_engine(config, concurrency)?;
    info!(
        targets = list.targets.len(),
        unparsed = list.errors.len(),
        concurrency = engine.config().concurrency,
        "starting massrollback"
    );

    let options = RollbackOptions::new(summary, mark_bots);
    let report = execute(&engine, list.targets, options)
        .await
        .with_parse_errors(list.errors);
    print!("{}", render_report_text(&report));

    let mut code = report.exit_code();
    if let Some(path) = report_json {
        if let Err(err) = write_report_json(path, &report) {
            error!(error = %format!("{err:#}"), "could not write JSON report");
            eprintln!("error: {err:#}");
            code = code.max(1);
        }
    }
    Ok(code)
}
