//! The AlignedRecordStream abstraction (SPEC_FULL §6).
//!
//! C1–C12 never name the BAM codec crate directly; they only see
//! `AlignedRecord`/`AlignedRecordHeader`. The concrete BAM-backed
//! implementation lives in `io::bam` and is the sole module permitted to
//! import `noodles`. This keeps the duplicate-detection semantics
//! codec-agnostic, matching the spec's framing of the file-format
//! reader/writer as an external collaborator — while still giving us a
//! runnable binary built on the teacher's existing dependency.

/// A single decoded alignment record, as the engine needs to see it
/// (SPEC_FULL §6).
pub trait AlignedRecord {
    /// `-1` when unmapped.
    fn reference_index(&self) -> i32;
    fn unclipped_start(&self) -> anyhow::Result<i32>;
    fn unclipped_end(&self) -> anyhow::Result<i32>;
    fn is_reverse_strand(&self) -> bool;
    fn is_paired(&self) -> bool;
    fn mate_is_unmapped(&self) -> bool;
    /// `-1` when unmapped or unpaired.
    fn mate_reference_index(&self) -> i32;
    fn is_secondary_or_supplementary(&self) -> bool;
    fn is_unmapped(&self) -> bool;
    fn read_name(&self) -> anyhow::Result<Vec<u8>>;
    fn read_group_id(&self) -> Option<String>;
    /// Sum of base qualities (Phred+0) at or above 15.
    fn score(&self) -> anyhow::Result<u32>;
}

/// One read-group entry from the header (SPEC_FULL §6).
#[derive(Debug, Clone)]
pub struct ReadGroupInfo {
    pub id: String,
    pub library_name: Option<String>,
}

/// The header context C1–C12 need (SPEC_FULL §6).
pub trait AlignedRecordHeader {
    fn is_coordinate_sorted(&self) -> bool;
    fn read_groups(&self) -> &[ReadGroupInfo];
    fn read_group_ordinal(&self, read_group_id: &str) -> Option<u16>;
    fn library_name_for(&self, read_group_id: &str) -> Option<&str>;
    /// Every program-record id currently present in the header, for
    /// collision-free renaming (SPEC_FULL §7 `ProgramRecordCollision`).
    fn program_record_ids(&self) -> &[String];
}
