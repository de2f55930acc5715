use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ping_diff_rs::orchestrator::{Orchestrator, ScanConfig, DEFAULT_NETWORK_1, DEFAULT_NETWORK_2};
use ping_diff_rs::pool::DEFAULT_MAX_CONCURRENT_WORKERS;
use ping_diff_rs::probe::{IcmpProbe, Probe, SystemPingProbe};
use ping_diff_rs::retry::RetryPolicy;
use ping_diff_rs::targets::LAST_OCTET;
use ping_diff_rs::types::ScanReport;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How each host is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProbeKind {
    /// Raw ICMP echo (usually needs root or CAP_NET_RAW).
    Icmp,
    /// The platform `ping` command.
    System,
}

/// ping-diff-rs — ping two networks and report last-octet reachability mismatches.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ping-diff-rs",
    version,
    about = "Ping two networks and report hosts whose reachability differs at the same last octet.",
    long_about = None
)]
struct Cli {
    /// First range, CIDR notation (or a single address).
    #[arg(long = "network-1", default_value = DEFAULT_NETWORK_1)]
    network_1: String,

    /// Second range, CIDR notation (or a single address).
    #[arg(long = "network-2", default_value = DEFAULT_NETWORK_2)]
    network_2: String,

    /// Last octets to skip, space separated.
    #[arg(long, num_args = 0..)]
    skips: Vec<String>,

    /// Max concurrent workers.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_WORKERS)]
    concurrency: usize,

    /// Probe attempts per host before giving up.
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Base backoff in milliseconds; attempt N waits N times this.
    #[arg(long = "retry-delay-ms", default_value_t = 500)]
    retry_delay_ms: u64,

    /// Per-attempt probe timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Probe implementation.
    #[arg(long, value_enum, default_value_t = ProbeKind::Icmp)]
    probe: ProbeKind,

    /// Write the scan report as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        let exclude: HashSet<String> = self.skips.iter().map(|s| s.trim().to_string()).collect();
        ScanConfig {
            networks: vec![self.network_1.clone(), self.network_2.clone()],
            exclude: (!exclude.is_empty()).then_some(exclude),
            concurrency: self.concurrency,
            retry: RetryPolicy::new(self.attempts, Duration::from_millis(self.retry_delay_ms)),
            probe_timeout: Duration::from_millis(self.timeout_ms),
            octet_position: LAST_OCTET,
        }
    }

    fn probe(&self) -> Arc<dyn Probe> {
        match self.probe {
            ProbeKind::Icmp => Arc::new(IcmpProbe::new()),
            ProbeKind::System => Arc::new(SystemPingProbe::new()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!(
        network_1 = %cli.network_1,
        network_2 = %cli.network_2,
        skips = ?cli.skips,
        concurrency = cli.concurrency,
        attempts = cli.attempts,
        retry_delay_ms = cli.retry_delay_ms,
        timeout_ms = cli.timeout_ms,
        probe = ?cli.probe,
        "ping-diff-rs configuration"
    );

    let orchestrator = Orchestrator::new(cli.scan_config(), cli.probe());
    let report = orchestrator.run_report().await?;

    if let Some(path) = cli.output.as_deref() {
        match write_report_json(path, &report) {
            Ok(()) => info!(path = %path.display(), "wrote JSON report"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write JSON report"),
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create report file: {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
