//! Harness error type.

use std::path::PathBuf;

use segalloc_core::Misuse;
use thiserror::Error;

/// Failures surfaced by a scenario run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("alloc({size}) returned null")]
    AllocationFailed { size: u64 },
    #[error("{path}: file length {len} does not fit in memory")]
    FileTooLarge { path: PathBuf, len: u64 },
    #[error("string length {found} after NUL termination, expected {expected}")]
    ContentMismatch { expected: usize, found: usize },
    #[error("heap verification failed: {0}")]
    HeapInvalid(#[from] Misuse),
    #[error("{path}: {errors} schema violation(s) in {lines} line(s)")]
    InvalidLog {
        path: PathBuf,
        lines: usize,
        errors: usize,
    },
    #[error("alloc({size}) should have returned null")]
    OversizeAccepted { size: u64 },
    #[error("{0} was not detected; the process should have aborted")]
    MisuseNotDetected(&'static str),
}
