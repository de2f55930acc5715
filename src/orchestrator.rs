use crate::error::ScanError;
use crate::pool::{WorkerPool, DEFAULT_MAX_CONCURRENT_WORKERS};
use crate::probe::{IcmpProbe, Probe};
use crate::retry::{probe_with_retry, RetryPolicy, DEFAULT_PROBE_TIMEOUT};
use crate::store::ResultStore;
use crate::targets::{AddressEnumerator, LAST_OCTET};
use crate::types::{ResultMap, ScanReport};
use ::time::{format_description::well_known, OffsetDateTime};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Span};

pub const DEFAULT_NETWORK_1: &str = "192.168.1.0/24";
pub const DEFAULT_NETWORK_2: &str = "192.168.2.0/24";

/// Parameters for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// CIDR ranges or single addresses to scan.
    pub networks: Vec<String>,
    /// Last-octet values to leave out.
    pub exclude: Option<HashSet<String>>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Bound on each probe attempt.
    pub probe_timeout: Duration,
    pub octet_position: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            networks: vec![DEFAULT_NETWORK_1.to_string(), DEFAULT_NETWORK_2.to_string()],
            exclude: None,
            concurrency: DEFAULT_MAX_CONCURRENT_WORKERS,
            retry: RetryPolicy::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            octet_position: LAST_OCTET,
        }
    }
}

/// Runs a scan end to end: enumerate, probe through the worker pool,
/// correlate, report.
pub struct Orchestrator {
    config: ScanConfig,
    probe: Arc<dyn Probe>,
    span: Span,
}

impl Orchestrator {
    pub fn new(config: ScanConfig, probe: Arc<dyn Probe>) -> Self {
        Self::with_span(config, probe, info_span!("orchestrator"))
    }

    pub fn with_span(config: ScanConfig, probe: Arc<dyn Probe>, span: Span) -> Self {
        Self {
            config,
            probe,
            span,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The addresses a scan would probe.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.enumerator().expand(&self.config.networks)
    }

    fn enumerator(&self) -> AddressEnumerator {
        AddressEnumerator::with_span(
            self.config.exclude.clone(),
            info_span!(parent: &self.span, "address_enumerator"),
        )
    }

    /// Scan and return the result map.
    pub async fn run(&self) -> Result<ResultMap, ScanError> {
        Ok(self.run_report().await?.results)
    }

    /// Scan and return the full report, mismatches included.
    pub async fn run_report(&self) -> Result<ScanReport, ScanError> {
        let pool = WorkerPool::with_span(
            self.config.concurrency,
            info_span!(parent: &self.span, "worker_pool"),
        )?;
        let store = Arc::new(
            ResultStore::with_span(info_span!(parent: &self.span, "result_store"))
                .with_octet_position(self.config.octet_position)?,
        );

        let started_at = now_rfc3339();
        let addresses = self.addresses();
        let total = addresses.len();
        info!(parent: &self.span, addresses = total, concurrency = pool.concurrency(), "starting ping scan");

        let probe = self.probe.clone();
        let retry = self.config.retry;
        let timeout = self.config.probe_timeout;
        let work = move |addr: IpAddr| {
            let probe = probe.clone();
            async move { probe_with_retry(&*probe, addr, &retry, timeout).await }
        };
        let sink = store.clone();
        let stats = pool
            .run(addresses, work, move |addr, reachable| sink.add(addr, reachable))
            .await;
        info!(
            parent: &self.span,
            processed = stats.processed,
            unreachable = stats.failed,
            "scan finished"
        );

        store.log_mismatches();

        Ok(ScanReport {
            started_at,
            finished_at: now_rfc3339(),
            networks: self.config.networks.clone(),
            addresses: total,
            results: store.all_results(),
            mismatches: store.mismatches(),
        })
    }
}

/// Scan `networks` with ICMP and the default retry policy.
pub async fn run(
    networks: &[String],
    exclude: Option<HashSet<String>>,
    concurrency: usize,
) -> Result<ResultMap, ScanError> {
    let config = ScanConfig {
        networks: networks.to_vec(),
        exclude,
        concurrency,
        ..ScanConfig::default()
    };
    Orchestrator::new(config, Arc::new(IcmpProbe::new()))
        .run()
        .await
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysUp;

    #[async_trait]
    impl Probe for AlwaysUp {
        async fn probe(&self, _addr: IpAddr, _timeout: Duration) -> bool {
            true
        }
    }

    #[test]
    fn default_config() {
        let c = ScanConfig::default();
        assert_eq!(c.networks, vec!["192.168.1.0/24", "192.168.2.0/24"]);
        assert_eq!(c.concurrency, 50);
        assert_eq!(c.probe_timeout, Duration::from_secs(1));
        assert_eq!(c.retry, RetryPolicy::default());
        assert!(c.exclude.is_none());
    }

    #[test]
    fn addresses_honor_exclusions() {
        let config = ScanConfig {
            networks: vec!["192.168.1.0/29".into()],
            exclude: Some(["1", "3", "5"].iter().map(|s| s.to_string()).collect()),
            ..ScanConfig::default()
        };
        let o = Orchestrator::new(config, Arc::new(AlwaysUp));
        assert_eq!(o.addresses().len(), 3);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let config = ScanConfig {
            concurrency: 0,
            ..ScanConfig::default()
        };
        let err = Orchestrator::new(config, Arc::new(AlwaysUp))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_results() {
        let config = ScanConfig {
            networks: vec!["not_an_ip".into()],
            ..ScanConfig::default()
        };
        let report = Orchestrator::new(config, Arc::new(AlwaysUp))
            .run_report()
            .await
            .unwrap();
        assert_eq!(report.addresses, 0);
        assert!(report.results.is_empty());
        assert!(report.mismatches.is_empty());
    }
}
