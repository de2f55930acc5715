//! Library crate for ping-diff-rs: scan two networks and report hosts whose
//! reachability differs between them at the same last octet.
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod probe;
pub mod retry;
pub mod store;
pub mod targets;
pub mod types;
