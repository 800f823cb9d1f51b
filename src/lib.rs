//! dupmark — duplicate-read detection and marking for coordinate-sorted
//! alignment files (SPEC_FULL §1, §2).
//!
//! Identifies reads and read pairs that represent the same original
//! physical molecule, sampled more than once via PCR amplification or an
//! optical artifact of the sequencing instrument, and sets a duplicate flag
//! on every record but one representative per equivalence class. Produces a
//! per-library metrics report alongside the marked output.
//!
//! The pipeline runs in two full passes over the input (`pipeline::run`):
//! the first builds a geometric fingerprint per fragment/pair (`fingerprint`,
//! `fingerprint_builder`) and feeds two external, disk-spilling sorted sets
//! (`external_sort`); between passes, `duplicate_marker` groups fingerprints
//! into equivalence classes, picks one winner per class by base-quality
//! score, and separates optical duplicates (`optical`) from PCR duplicates;
//! the second pass re-reads the input and sets/clears the duplicate flag
//! (`output_writer`), emitting a metrics file (`metrics`) with a
//! Lander-Waterman library-size projection (`library_size`).

pub mod config;
pub mod diagnostics;
pub mod duplicate_marker;
pub mod error;
pub mod external_sort;
pub mod fingerprint;
pub mod fingerprint_builder;
pub mod io;
pub mod library_registry;
pub mod library_size;
pub mod mate_table;
pub mod metrics;
pub mod optical;
pub mod output_writer;
pub mod physical_location;
pub mod pipeline;
pub mod program_group;
pub mod record;
pub mod utils;

pub use config::Config;
pub use error::EngineError;
pub use pipeline::run;
