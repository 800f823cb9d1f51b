//! Typed error hierarchy for the engine (A2, SPEC_FULL §7).
//!
//! The teacher uses bare `anyhow::Result` throughout. The wider genomics
//! tooling corpus's closest CLI (`varlociraptor`, see
//! `examples/PROSIC-libprosic/Cargo.toml`) layers a typed error enum
//! (`thiserror`/`snafu`) under `anyhow` at the binary boundary; this engine
//! does the same so tests and callers can match on error *kind* — something
//! a bare `anyhow::Error` cannot do — while `main.rs` still just propagates
//! `anyhow::Result` like the teacher's `main`.

use thiserror::Error;

/// Terminal error kinds (SPEC_FULL §7). Every variant here unwinds the
/// pipeline, triggers temp-file cleanup, and deletes any partial output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed or truncated input record: {0}")]
    InputDecodeError(String),

    #[error("input claims coordinate sort but record {index} at {reference}:{position} arrived out of order")]
    SortOrderViolation { index: u64, reference: i32, position: i32 },

    #[error("reference index required but absent on record {index}")]
    MissingReferenceIndex { index: u64 },

    #[error("temporary file I/O failure: {0}")]
    TempIoError(#[from] std::io::Error),

    #[error("second pass saw {second} records, first pass saw {first}")]
    PassCountMismatch { first: u64, second: u64 },

    #[error("could not recover from out-of-file-handles condition: {0}")]
    OutOfFileHandlesFatal(String),
}
