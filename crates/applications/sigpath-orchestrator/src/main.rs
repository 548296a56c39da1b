//! Sigpath - broadcast routing and encoder operations
//!
//! ## Usage
//!
//! ```bash
//! # Interactive menu
//! sigpath --config config/uhd.yaml --credentials ~/.sigpath/credentials.yaml
//!
//! # Status only
//! sigpath --config config/alt.yaml --status
//!
//! # Unattended: TARGET ACTION [INPUT]
//! sigpath --config config/alt.yaml M2005 start
//! sigpath --config config/alt.yaml M2005 switch M2005_NFLNAL2_NFL_SES_PRI
//! ```
//!
//! Exits 0 on success, on operator cancel and when an action has nothing to
//! act on; non-zero on invalid arguments or configuration.

use anyhow::Context;
use clap::Parser;
use sigpath_orchestrator::{
    Collaborators, Credentials, DeploymentConfig, HttpBroadcaster, HttpControl, HttpDirectory, Operator,
    Orchestrator, TerminalOperator, UnattendedRequest, status,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sigpath: routing and encoder orchestration for a primary/backup broadcaster pair
#[derive(Parser)]
#[command(name = "sigpath")]
#[command(about = "Routing and encoder orchestration for a primary/backup broadcaster pair", long_about = None)]
struct Cli {
    /// Deployment profile
    #[arg(long, env = "SIGPATH_CONFIG", default_value = "config/uhd.yaml")]
    config: PathBuf,

    /// Broadcaster credentials file
    #[arg(long, env = "SIGPATH_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Print encoder and routing status, then exit
    #[arg(long)]
    status: bool,

    /// Source id to act on (unattended mode)
    target: Option<String>,

    /// Action keyword: start, stop, stop_service, switch, segment, exit
    action: Option<String>,

    /// Input override for start/switch
    input: Option<String>,
}

/// Console output plus an optional daily-rolling file
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sigpath.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigpath=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn open_urls(urls: &[String]) {
    for url in urls {
        match std::process::Command::new("open").arg(url).status() {
            Ok(status) if status.success() => info!("🌐 Opened {}", url),
            Ok(status) => warn!("⚠️  Could not open {}: {}", url, status),
            Err(e) => warn!("⚠️  Could not open {}: {}", url, e),
        }
    }
}

fn print_status(orchestrator: &Orchestrator) {
    println!(
        "{}",
        status::render_status(
            &orchestrator.config().name,
            orchestrator.paths(),
            orchestrator.registry()
        )
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = DeploymentConfig::load(&cli.config)
        .with_context(|| format!("loading deployment {}", cli.config.display()))?;

    let _guard = init_tracing(config.log_dir.as_deref());

    // Unattended arguments are checked before anything remote is touched
    let request = match (&cli.target, &cli.action) {
        (Some(target), Some(action)) => Some(
            UnattendedRequest::parse(target, action, cli.input.as_deref(), &config).inspect_err(|e| {
                error!("❌ {}", e);
            })?,
        ),
        (Some(_), None) => anyhow::bail!("an action keyword is required after the target"),
        _ => None,
    };

    let credentials = Credentials::load(cli.credentials.as_deref())?;

    info!("🚀 Starting sigpath ({})", config.name);
    info!("📡 Primary broadcaster: {}", config.primary.address);
    info!("📡 Backup broadcaster: {}", config.backup.address);

    let collaborators = Collaborators {
        primary: Arc::new(HttpBroadcaster::new(&config.primary, &credentials)?),
        backup: Arc::new(HttpBroadcaster::new(&config.backup, &credentials)?),
        control: Arc::new(HttpControl::new(&config.control)?),
        directory: Arc::new(HttpDirectory::new(&config.directory)?),
    };

    let mut orchestrator = Orchestrator::bootstrap(config, collaborators)
        .await
        .context("building the routing and encoder model")?;

    print_status(&orchestrator);
    if cli.status {
        return Ok(());
    }

    let result = match &request {
        Some(request) => orchestrator.run_unattended(request).await,
        None => {
            let mut operator = TerminalOperator::stdio();
            match operator.choose_action(&orchestrator.config().actions) {
                Ok(kind) => orchestrator.run_interactive(kind, &mut operator).await,
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok(report) => {
            info!(
                run_id = %report.run_id,
                steps = report.steps.len(),
                "✅ {} complete",
                report.kind.label()
            );
            if !report.steps.is_empty() {
                orchestrator.refresh_statuses().await;
                print_status(&orchestrator);
            }
            open_urls(&report.open_urls);
            Ok(())
        }
        Err(e) if e.is_graceful() => {
            info!("👋 {}", e);
            Ok(())
        }
        Err(e) => {
            error!("❌ {}", e);
            Err(e.into())
        }
    }
}
