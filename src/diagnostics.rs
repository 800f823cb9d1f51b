//! Once-per-kind-per-run rate limiting for non-fatal conditions (SPEC_FULL §7).
//!
//! Grounded on the teacher's existing pattern of a single summary line per
//! category (`main.rs`'s final `"(orphan={}, pe={}, se_only={})"` print),
//! generalized into a small reusable counter and routed through
//! `log::warn!` instead of `eprintln!` (A3).

use std::collections::HashMap;

/// Counts occurrences of a warning kind and reports only the first one at
/// `warn`, after which occurrences are tallied silently until
/// [`Diagnostics::summarize`] logs the total at the end of the run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    counts: HashMap<&'static str, u64>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `kind`, logging at `warn` only the first time.
    pub fn record(&mut self, kind: &'static str, detail: &str) {
        let count = self.counts.entry(kind).or_insert(0);
        if *count == 0 {
            log::warn!("{kind}: {detail} (further occurrences suppressed)");
        }
        *count += 1;
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    /// Log one summary line per kind seen, at the end of the run.
    pub fn summarize(&self) {
        for (kind, count) in &self.counts {
            if *count > 0 {
                log::info!("{kind}: {count} occurrence(s) this run");
            }
        }
    }
}

pub const ORPHAN_MATE: &str = "orphan_mate";
pub const PROGRAM_RECORD_COLLISION: &str = "program_record_collision";
pub const LIBRARY_SIZE_UNDEFINED: &str = "library_size_undefined";
pub const OUT_OF_FILE_HANDLES: &str = "out_of_file_handles";
pub const PHYSICAL_LOCATION_PARSE_FAILURE: &str = "physical_location_parse_failure";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_kind() {
        let mut d = Diagnostics::new();
        d.record(ORPHAN_MATE, "read1");
        d.record(ORPHAN_MATE, "read2");
        d.record(PROGRAM_RECORD_COLLISION, "bwa.1");
        assert_eq!(d.count(ORPHAN_MATE), 2);
        assert_eq!(d.count(PROGRAM_RECORD_COLLISION), 1);
        assert_eq!(d.count(LIBRARY_SIZE_UNDEFINED), 0);
    }
}
