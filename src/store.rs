use crate::error::ScanError;
use crate::targets::{correlation_key, LAST_OCTET};
use crate::types::{HostMap, MismatchRecord, ResultMap};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, info_span, Span};

pub const REPORT_START: &str = "**********MISMATCH ANALYSIS START***********";
pub const REPORT_END: &str = "**********MISMATCH ANALYSIS END***********";
pub const REPORT_DIVIDER: &str = "----------------------------------";
pub const NO_MISMATCHES: &str = "No mismatches found between networks";

/// Report label for a reachability value.
pub fn reachability_label(reachable: bool) -> &'static str {
    if reachable {
        "IS REACHABLE"
    } else {
        "IS NOT REACHABLE"
    }
}

#[derive(Debug, Default)]
struct Inner {
    table: ResultMap,
    mismatches: Vec<MismatchRecord>,
}

/// Accumulates probe results keyed by correlation key and records a
/// mismatch whenever a key holds both reachable and unreachable hosts.
///
/// Every `add` re-checks its key and, on a mismatch, appends a snapshot of
/// that key's hosts as they are at that moment. Snapshots are never revised.
#[derive(Debug)]
pub struct ResultStore {
    octet_position: usize,
    inner: Mutex<Inner>,
    span: Span,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::with_span(info_span!("result_store"))
    }

    pub fn with_span(span: Span) -> Self {
        Self {
            octet_position: LAST_OCTET,
            inner: Mutex::new(Inner::default()),
            span,
        }
    }

    /// Correlate on a different IPv4 octet (0..=3).
    pub fn with_octet_position(mut self, position: usize) -> Result<Self, ScanError> {
        if position > LAST_OCTET {
            return Err(ScanError::InvalidInput(format!(
                "octet position {position} out of range 0..={LAST_OCTET}"
            )));
        }
        self.octet_position = position;
        Ok(self)
    }

    pub fn octet_position(&self) -> usize {
        self.octet_position
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one result and re-check its key for a mismatch.
    pub fn add(&self, addr: IpAddr, reachable: bool) {
        let key = correlation_key(&addr, self.octet_position);
        let mut inner = self.lock();
        let Inner { table, mismatches } = &mut *inner;
        let hosts = table.entry(key.clone()).or_default();
        hosts.insert(addr, reachable);
        if let Some(record) = check_mismatch(&key, hosts) {
            debug!(parent: &self.span, key = %record.key, hosts = record.hosts.len(), "mismatch detected");
            mismatches.push(record);
        }
    }

    /// Snapshot of every result recorded so far.
    pub fn all_results(&self) -> ResultMap {
        self.lock().table.clone()
    }

    /// Mismatch snapshots in the order they were detected.
    pub fn mismatches(&self) -> Vec<MismatchRecord> {
        self.lock().mismatches.clone()
    }

    /// The lines [`log_mismatches`](Self::log_mismatches) emits.
    pub fn report_lines(&self) -> Vec<String> {
        render_report(&self.lock().mismatches)
    }

    /// Emit the consolidated mismatch report at info level.
    pub fn log_mismatches(&self) {
        let _guard = self.span.enter();
        for line in self.report_lines() {
            info!("{line}");
        }
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A mismatch needs at least two hosts with differing reachability.
pub fn check_mismatch(key: &str, hosts: &HostMap) -> Option<MismatchRecord> {
    if hosts.len() < 2 {
        return None;
    }
    let any_up = hosts.values().any(|&r| r);
    let any_down = hosts.values().any(|&r| !r);
    (any_up && any_down).then(|| MismatchRecord {
        key: key.to_string(),
        hosts: hosts.clone(),
    })
}

pub fn render_report(mismatches: &[MismatchRecord]) -> Vec<String> {
    if mismatches.is_empty() {
        return vec![NO_MISMATCHES.to_string()];
    }
    let mut lines = vec![REPORT_START.to_string()];
    for record in mismatches {
        for (addr, &reachable) in &record.hosts {
            lines.push(format!("{addr} {}", reachability_label(reachable)));
        }
        lines.push(REPORT_DIVIDER.to_string());
    }
    lines.push(REPORT_END.to_string());
    lines
}
