use thiserror::Error;

/// Errors surfaced by a retried probe.
///
/// Single attempts never fail; they report `false`. Only running out of
/// attempts is an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("max attempts({attempts}) reached")]
    MaxAttemptsExceeded { attempts: u32 },
}

/// Errors that abort a scan before it starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
