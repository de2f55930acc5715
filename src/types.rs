use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Reachability of every host sharing one correlation key.
pub type HostMap = BTreeMap<IpAddr, bool>;

/// Correlation key (last octet) to the hosts that share it.
pub type ResultMap = BTreeMap<String, HostMap>;

/// Snapshot of a key's hosts taken when a mismatch was detected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MismatchRecord {
    pub key: String,
    pub hosts: HostMap,
}

/// Everything one scan produced.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub started_at: String,
    pub finished_at: String,
    pub networks: Vec<String>,
    pub addresses: usize,
    pub results: ResultMap,
    pub mismatches: Vec<MismatchRecord>,
}
