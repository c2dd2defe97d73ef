//! Stockfeed - bulk ingestion of A-share daily history.
//!
//! `stockfeed run` brings every configured stock up to the latest settled
//! session; `stockfeed status` reports what the local store holds.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stockfeed::{calendar, IngestService};
use stockfeed_common::config::{Config, ConfigSource};
use stockfeed_common::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "stockfeed")]
#[command(version)]
#[command(about = "Resilient bulk ingestion of A-share daily history", long_about = None)]
struct Cli {
    /// Config file (default: ~/.stockfeed/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one ingestion batch
    Run(RunArgs),

    /// Show catalog and storage statistics
    Status {
        /// Due threshold (default: latest settled session)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Comma-separated stock codes, e.g. 600000.SH,000001.SZ
    #[arg(long, value_delimiter = ',')]
    codes: Vec<String>,

    /// File with one stock code per line
    #[arg(long)]
    codes_file: Option<PathBuf>,

    /// Ingest up to this date (default: latest settled session)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Rotation calls per rotation sequence
    #[arg(long)]
    max_rotation_attempts: Option<u32>,

    /// Consecutive transient failures before rotating
    #[arg(long)]
    escalation_threshold: Option<u32>,

    /// Number of recently used identities remembered
    #[arg(long)]
    registry_capacity: Option<usize>,

    /// Fixed delay between plain retries, in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Skip the reconciliation sweep
    #[arg(long)]
    no_sweep: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        let mut codes: Vec<String> = self
            .codes
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if let Some(path) = &self.codes_file {
            codes.extend(read_codes_file(path)?);
        }
        if !codes.is_empty() {
            let mut seen = HashSet::new();
            codes.retain(|c| seen.insert(c.clone()));
            config.entities = codes;
        }

        if let Some(v) = self.max_rotation_attempts {
            config.rotation.max_attempts = v;
        }
        if let Some(v) = self.escalation_threshold {
            config.ingest.escalation_threshold = v;
        }
        if let Some(v) = self.registry_capacity {
            config.rotation.registry_capacity = v;
        }
        if let Some(v) = self.retry_delay_ms {
            config.ingest.retry_delay_ms = v;
        }
        if self.no_sweep {
            config.ingest.reconcile_empty = false;
        }
        Ok(())
    }
}

/// One code per line; blank lines and `#` comments are skipped.
fn read_codes_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read codes from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Cancel the token on Ctrl-C.
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current step and stopping");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, config_source) = Config::load_with_env(cli.config.as_deref())?;
    if let Commands::Run(args) = &cli.command {
        args.apply(&mut config)?;
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    config.validate()?;

    info!("Stockfeed v{}", env!("CARGO_PKG_VERSION"));
    match &config_source {
        ConfigSource::File(path) => info!(path = %path.display(), "Loaded configuration"),
        ConfigSource::Defaults(path) => {
            info!(path = %path.display(), "Config file not found, using defaults")
        }
    }

    let service = IngestService::new(config)?;

    match cli.command {
        Commands::Run(args) => {
            let as_of = args.as_of.unwrap_or_else(calendar::today_session);
            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            let report = service.run(as_of, cancel).await?;
            println!("{}", report);
        }
        Commands::Status { as_of } => {
            let as_of = as_of.unwrap_or_else(calendar::today_session);
            println!("{}", service.status(as_of).await?);
        }
    }

    Ok(())
}
