//! Collision-resolving program-group (`PG`) rename table (A5, SPEC_FULL
//! §4.10/§7 `ProgramRecordCollision`).
//!
//! No teacher equivalent: `yukaiquan-rmdups` never rewrites program-group
//! tags. Grounded on the header-derived id/library lookups the teacher
//! already builds in `main.rs` (a flat map constructed once at open time,
//! consulted per record) and generalized to program-record ids instead of
//! library names.

/// Resolves a requested base program-record id against the set of ids
/// already present in the input header, appending a numeric suffix on
/// collision (`bwa` → `bwa.1` → `bwa.2` ...) until the id is unique.
///
/// Also tracks which existing program record a newly chained record should
/// point to via `PP` (the previous program in the chain): the header's last
/// program record in declaration order, matching how chained aligner/sort/
/// mark-duplicates pipelines append records.
pub struct ProgramRecordRegistry {
    existing: Vec<String>,
}

impl ProgramRecordRegistry {
    pub fn new(existing_ids: &[String]) -> Self {
        Self { existing: existing_ids.to_vec() }
    }

    /// The id a new program record's `PP` tag should reference, if any
    /// program records already exist in the header.
    pub fn chain_predecessor(&self) -> Option<&str> {
        self.existing.last().map(String::as_str)
    }

    /// Resolve `requested_base_id` to a collision-free id. Returns the
    /// resolved id and whether a collision occurred (so the caller can log
    /// `ProgramRecordCollision` exactly once).
    pub fn resolve(&mut self, requested_base_id: &str) -> (String, bool) {
        if !self.existing.iter().any(|id| id == requested_base_id) {
            self.existing.push(requested_base_id.to_string());
            return (requested_base_id.to_string(), false);
        }

        let mut suffix = 1u32;
        loop {
            let candidate = format!("{requested_base_id}.{suffix}");
            if !self.existing.iter().any(|id| id == &candidate) {
                self.existing.push(candidate.clone());
                return (candidate, true);
            }
            suffix += 1;
        }
    }
}
