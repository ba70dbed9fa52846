//! Driver scenarios and structured evidence logs for segalloc.
//!
//! This crate provides:
//! - Churn: interleaved allocate/release cycles over small random sizes
//! - Read-file: a file read into an `alloc`ed buffer and checked as a C string
//! - Misuse: double free and foreign-pointer releases that must abort
//! - JSONL run logs with SHA-256 artifact indexes

#![deny(unsafe_code)]

pub mod error;
#[allow(unsafe_code)]
pub mod scenarios;
pub mod structured_log;

pub use error::HarnessError;
pub use scenarios::{
    ChurnConfig, ChurnReport, MisuseKind, OversizeReport, RoundTripReport, XorShift64,
    probe_oversize, provoke_misuse, read_file_round_trip, run_churn,
};
