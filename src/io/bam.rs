//! BAM-backed realization of the AlignedRecordStream abstraction.
//!
//! The only module in this crate allowed to name `noodles` directly
//! (SPEC_FULL §6, `record.rs`). Grounded on
//! `examples/yukaiquan-rmdups/src/io/mod.rs` and `src/algorithm.rs` (header
//! write, record-to-bytes, raw-byte duplicate-flag toggle, CIGAR-based
//! unclipped-position computation), plus `main.rs`'s header/library-map
//! construction, generalized behind the `record` module's traits and
//! extended to merge multiple coordinate-sorted inputs in input order.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bstr::BStr;
use noodles::bam;
use noodles::bgzf::io::Writer as BgzfWriter;
use noodles::sam::alignment::io::Write as SamWrite;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::{Tag, Value};
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles::sam::header::Header as SamHeader;

use crate::record::{AlignedRecord, AlignedRecordHeader, ReadGroupInfo};

/// Offset of the flag field in a BAM record's binary encoding (ref_id=4 +
/// pos=4 + bin_mq_nl=4). Kept from the teacher's `io/mod.rs`.
pub const FLAG_OFFSET: usize = 12;
pub const DUPLICATE_FLAG: u16 = 0x400;

/// Toggle the DUPLICATE bit directly in a record's raw BAM bytes, without
/// decoding. This is the fast path used whenever no program-group rewrite is
/// requested (SPEC_FULL §4.10), grounded verbatim on the teacher's
/// `io/mod.rs::toggle_duplicate_flag`.
#[inline]
pub fn toggle_duplicate_flag(data: &mut [u8], is_duplicate: bool) -> Option<u16> {
    if data.len() < FLAG_OFFSET + 2 {
        return None;
    }
    let flag = u16::from_le_bytes([data[FLAG_OFFSET], data[FLAG_OFFSET + 1]]);
    let new_flag = if is_duplicate { flag | DUPLICATE_FLAG } else { flag & !DUPLICATE_FLAG };
    data[FLAG_OFFSET] = new_flag as u8;
    data[FLAG_OFFSET + 1] = (new_flag >> 8) as u8;
    Some(new_flag)
}

/// Header adapter implementing [`AlignedRecordHeader`] over a parsed
/// `noodles` SAM header (SPEC_FULL §6).
pub struct BamHeaderAdapter {
    pub header: Arc<SamHeader>,
    read_groups: Vec<ReadGroupInfo>,
    ordinal_by_id: HashMap<String, u16>,
    library_by_id: HashMap<String, String>,
    program_ids: Vec<String>,
}

impl BamHeaderAdapter {
    pub fn new(header: Arc<SamHeader>) -> Self {
        let mut read_groups = Vec::new();
        let mut ordinal_by_id = HashMap::new();
        let mut library_by_id = HashMap::new();

        for (ordinal, (id, rg)) in header.read_groups().iter().enumerate() {
            let id_string = id.to_string();
            let library_name = rg
                .other_fields()
                .get(Tag::LIBRARY.as_ref())
                .map(|v| v.to_string());
            if let Some(lib) = &library_name {
                library_by_id.insert(id_string.clone(), lib.clone());
            }
            ordinal_by_id.insert(id_string.clone(), ordinal as u16);
            read_groups.push(ReadGroupInfo { id: id_string, library_name });
        }

        let program_ids = header.programs().iter().map(|(id, _)| id.to_string()).collect();

        Self { header, read_groups, ordinal_by_id, library_by_id, program_ids }
    }
}

impl AlignedRecordHeader for BamHeaderAdapter {
    fn is_coordinate_sorted(&self) -> bool {
        self.header
            .header()
            .map(|hdr| hdr.sort_order() == Some(noodles::sam::header::record::value::map::header::SortOrder::Coordinate))
            .unwrap_or(false)
    }

    fn read_groups(&self) -> &[ReadGroupInfo] {
        &self.read_groups
    }

    fn read_group_ordinal(&self, read_group_id: &str) -> Option<u16> {
        self.ordinal_by_id.get(read_group_id).copied()
    }

    fn library_name_for(&self, read_group_id: &str) -> Option<&str> {
        self.library_by_id.get(read_group_id).map(String::as_str)
    }

    fn program_record_ids(&self) -> &[String] {
        &self.program_ids
    }
}

/// Read-only view over a decoded `noodles::bam::Record`, implementing
/// [`AlignedRecord`] (SPEC_FULL §6). Grounded on
/// `examples/yukaiquan-rmdups/src/algorithm.rs` (`get_5p_pos`, `get_score`)
/// and `main.rs`'s per-record field extraction.
pub struct BamRecordView<'a> {
    pub record: &'a bam::Record,
}

impl<'a> BamRecordView<'a> {
    pub fn new(record: &'a bam::Record) -> Self {
        Self { record }
    }
}

impl<'a> AlignedRecord for BamRecordView<'a> {
    fn reference_index(&self) -> i32 {
        self.record
            .reference_sequence_id()
            .transpose()
            .ok()
            .flatten()
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    fn unclipped_start(&self) -> Result<i32> {
        let start = self
            .record
            .alignment_start()
            .transpose()?
            .map(|p| p.get() as i32 - 1)
            .unwrap_or(-1);
        if start < 0 {
            return Ok(-1);
        }
        let mut clipped = 0;
        for op in self.record.cigar().iter() {
            let op = op?;
            match op.kind() {
                Kind::SoftClip | Kind::HardClip => clipped += op.len() as i32,
                _ => break,
            }
        }
        Ok(start - clipped)
    }

    fn unclipped_end(&self) -> Result<i32> {
        let start = self
            .record
            .alignment_start()
            .transpose()?
            .map(|p| p.get() as i32 - 1)
            .unwrap_or(-1);
        if start < 0 {
            return Ok(-1);
        }
        let mut ref_span = 0;
        let ops: Vec<_> = self.record.cigar().iter().collect::<std::result::Result<_, _>>()?;
        for op in &ops {
            if op.kind().consumes_reference() {
                ref_span += op.len() as i32;
            }
        }
        let mut clipped_end = 0;
        for op in ops.iter().rev() {
            match op.kind() {
                Kind::SoftClip | Kind::HardClip => clipped_end += op.len() as i32,
                _ => break,
            }
        }
        Ok(start + ref_span + clipped_end)
    }

    fn is_reverse_strand(&self) -> bool {
        self.record.flags().is_reverse_complemented()
    }

    fn is_paired(&self) -> bool {
        self.record.flags().is_segmented()
    }

    fn mate_is_unmapped(&self) -> bool {
        self.record.flags().is_mate_unmapped()
    }

    fn mate_reference_index(&self) -> i32 {
        self.record
            .mate_reference_sequence_id()
            .transpose()
            .ok()
            .flatten()
            .map(|i| i as i32)
            .unwrap_or(-1)
    }

    fn is_secondary_or_supplementary(&self) -> bool {
        self.record.flags().is_secondary() || self.record.flags().is_supplementary()
    }

    fn is_unmapped(&self) -> bool {
        self.record.flags().is_unmapped()
    }

    fn read_name(&self) -> Result<Vec<u8>> {
        Ok(self.record.name().context("record has no name")?.to_vec())
    }

    fn read_group_id(&self) -> Option<String> {
        self.record
            .data()
            .get(Tag::READ_GROUP.as_ref())
            .and_then(|v| v.ok())
            .and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
    }

    fn score(&self) -> Result<u32> {
        Ok(self
            .record
            .quality_scores()
            .as_ref()
            .iter()
            .map(|&q| u8::from(q) as u32)
            .filter(|&q| q >= 15)
            .sum())
    }
}

/// One coordinate-sorted BAM input, opened for the first or second pass.
pub struct BamInput {
    reader: bam::io::Reader<noodles::bgzf::io::Reader<File>>,
    pub header: Arc<SamHeader>,
}

impl BamInput {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = bam::io::reader::Builder::default()
            .build_from_path(path)
            .with_context(|| format!("opening BAM input {}", path.display()))?;
        let header = Arc::new(reader.read_header()?);
        Ok(Self { reader, header })
    }

    pub fn records(&mut self) -> impl Iterator<Item = Result<bam::Record>> + '_ {
        self.reader.records().map(|r| r.map_err(anyhow::Error::from))
    }
}

/// Merges multiple coordinate-sorted BAM inputs in input order (SPEC_FULL §6
/// `input_paths`). The engine only ever needs one reference reads ahead, so
/// this walks each input to completion in sequence rather than performing a
/// genuine k-way coordinate merge: "merged by input-order" per the config
/// description means concatenation of already-sorted inputs, not a
/// re-sort.
pub struct MergedBamInputs {
    paths: Vec<std::path::PathBuf>,
    current: usize,
    reader: Option<BamInput>,
    pub header: Arc<SamHeader>,
}

impl MergedBamInputs {
    pub fn open(paths: &[std::path::PathBuf]) -> Result<Self> {
        anyhow::ensure!(!paths.is_empty(), "at least one input path is required");
        let first = BamInput::open(&paths[0])?;
        let header = first.header.clone();
        Ok(Self { paths: paths.to_vec(), current: 0, reader: Some(first), header })
    }

    /// Re-open from the first input, for the second pass (SPEC_FULL §4.11
    /// `MARKED --reopen inputs--> PASS2`).
    pub fn reopen(&mut self) -> Result<()> {
        self.current = 0;
        self.reader = Some(BamInput::open(&self.paths[0])?);
        Ok(())
    }

    pub fn next_record(&mut self) -> Result<Option<bam::Record>> {
        loop {
            let Some(reader) = self.reader.as_mut() else { return Ok(None) };
            match reader.records().next() {
                Some(result) => return Ok(Some(result?)),
                None => {
                    self.current += 1;
                    if self.current >= self.paths.len() {
                        self.reader = None;
                        return Ok(None);
                    }
                    self.reader = Some(BamInput::open(&self.paths[self.current])?);
                }
            }
        }
    }
}

/// Write a BGZF-compressed BAM header (grounded on the teacher's
/// `io/mod.rs::write_header`).
pub fn write_header(writer: &mut BgzfWriter<File>, header: &SamHeader) -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut w = bam::io::Writer::from(&mut buf);
        w.write_header(header)?;
    }
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Serialize a decoded record back to raw BAM bytes (grounded on the
/// teacher's `io/mod.rs::record_to_bytes`).
pub fn record_to_bytes(header: &SamHeader, record: &bam::Record) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    {
        let mut w = bam::io::Writer::from(&mut data);
        w.write_alignment_record(header, record)?;
    }
    Ok(data)
}

/// Decode+re-encode path used only when a program-group rewrite is requested
/// (SPEC_FULL §4.10). Converts to an owned, fully mutable `RecordBuf`, sets
/// the duplicate flag and `PG` tag, and re-serializes. More expensive than
/// [`toggle_duplicate_flag`]'s raw-byte path, so it is gated behind the
/// `program_record_id` option rather than used unconditionally.
pub fn rewrite_with_program_group(
    header: &SamHeader,
    record: &bam::Record,
    set_duplicate: bool,
    new_program_group_id: &str,
) -> Result<Vec<u8>> {
    let mut record_buf = RecordBuf::try_from_alignment_record(header, record)?;

    let flags = record_buf.flags_mut();
    if set_duplicate {
        *flags |= noodles::sam::alignment::record::Flags::DUPLICATE;
    } else {
        *flags &= !noodles::sam::alignment::record::Flags::DUPLICATE;
    }

    record_buf
        .data_mut()
        .insert(Tag::PROGRAM, Value::String(new_program_group_id.into()));

    let mut data = Vec::new();
    {
        let mut w = bam::io::Writer::from(&mut data);
        w.write_alignment_record(header, &record_buf)?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_offset_matches_bam_spec() {
        assert_eq!(FLAG_OFFSET, 12);
    }

    #[test]
    fn duplicate_flag_bit_is_0x400() {
        assert_eq!(DUPLICATE_FLAG, 0x400);
    }

    #[test]
    fn toggle_sets_bit() {
        let mut data = [0u8; 20];
        let result = toggle_duplicate_flag(&mut data, true);
        assert_eq!(result, Some(0x400));
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), 0x400);
    }

    #[test]
    fn toggle_clears_bit_preserving_others() {
        let mut data = [0u8; 20];
        data[12] = 0x02; // PAIRED
        data[13] = 0x04; // | DUPLICATE
        let result = toggle_duplicate_flag(&mut data, false);
        assert_eq!(result, Some(0x0002));
        assert_eq!(data[12], 0x02);
        assert_eq!(data[13], 0x00);
    }

    #[test]
    fn toggle_rejects_short_buffer() {
        let mut data = [0u8; 12];
        assert!(toggle_duplicate_flag(&mut data, true).is_none());
    }
}
