//! External hash map holding half-fingerprints awaiting their mate (C4).
//!
//! Generalizes the teacher's in-memory `pending_pairs: HashMap<Vec<u8>, ..>`
//! (`main.rs`) with an explicit spill path: once a per-reference bucket grows
//! past `spill_threshold` entries it is flushed to an append-only log file,
//! and further lookups for that reference consult an on-disk offset index
//! before falling back to the log.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tempfile::TempDir;

/// One outstanding half-fingerprint, stashed until its mate arrives.
#[derive(Clone, Debug)]
pub struct PartialFingerprint {
    pub library_id: u16,
    pub r_ref: i32,
    pub r_pos: i32,
    pub reverse: bool,
    pub score: u32,
    pub ordinal: u64,
    pub read_group_ordinal: u16,
    pub tile: i16,
    pub x: i16,
    pub y: i16,
}

struct Bucket {
    memory: HashMap<Vec<u8>, PartialFingerprint>,
    spill_index: HashMap<Vec<u8>, u64>,
    spill_path: Option<PathBuf>,
}

impl Bucket {
    fn new() -> Self {
        Self { memory: HashMap::new(), spill_index: HashMap::new(), spill_path: None }
    }
}

/// Bucketed-by-reference external mate-pair table (C4, SPEC_FULL §4.3).
pub struct MatePairTable {
    dir: TempDir,
    buckets: HashMap<i32, Bucket>,
    spill_threshold: usize,
    size: usize,
    /// Orphans observed when the table is drained at end of run.
    pub orphan_count: usize,
}

impl MatePairTable {
    pub fn new(dir: TempDir, spill_threshold: usize) -> Self {
        Self {
            dir,
            buckets: HashMap::new(),
            spill_threshold: spill_threshold.max(1),
            size: 0,
            orphan_count: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stash a half-fingerprint keyed by `(read_group_id, read_name)`,
    /// bucketed under `expected_mate_ref` — the reference index the mate will
    /// appear on, since input is coordinate-sorted (SPEC_FULL §4.3).
    pub fn put(&mut self, expected_mate_ref: i32, key: &[u8], partial: PartialFingerprint) -> Result<()> {
        let bucket = self.buckets.entry(expected_mate_ref).or_insert_with(Bucket::new);
        bucket.memory.insert(key.to_vec(), partial);
        self.size += 1;
        if bucket.memory.len() >= self.spill_threshold {
            spill_bucket(&self.dir, expected_mate_ref, bucket)?;
        }
        Ok(())
    }

    /// Retrieve and remove the mate stashed for `(current_ref, key)`, probing
    /// memory first and then the on-disk log if the bucket was spilled.
    pub fn remove(&mut self, current_ref: i32, key: &[u8]) -> Result<Option<PartialFingerprint>> {
        let Some(bucket) = self.buckets.get_mut(&current_ref) else { return Ok(None) };

        if let Some(partial) = bucket.memory.remove(key) {
            self.size -= 1;
            return Ok(Some(partial));
        }

        if let Some(offset) = bucket.spill_index.remove(key) {
            let path = bucket.spill_path.as_ref().expect("spill_index implies spill_path");
            let partial = read_spilled_entry(path, offset)?;
            self.size -= 1;
            return Ok(Some(partial));
        }

        Ok(None)
    }

    /// Drain every remaining entry (reads whose mate never arrived). These
    /// are orphans: the scan has moved past their reference, so they are
    /// treated as single-end fragments by the caller (SPEC_FULL §4.3, §7
    /// `OrphanMate`).
    pub fn drain_orphans(&mut self) -> Result<Vec<PartialFingerprint>> {
        let mut orphans = Vec::new();
        for (_ref_id, bucket) in self.buckets.drain() {
            orphans.extend(bucket.memory.into_values());
            if let Some(path) = bucket.spill_path {
                for offset in bucket.spill_index.into_values() {
                    orphans.push(read_spilled_entry(&path, offset)?);
                }
            }
        }
        self.orphan_count += orphans.len();
        self.size = 0;
        Ok(orphans)
    }
}

fn spill_bucket(dir: &TempDir, ref_id: i32, bucket: &mut Bucket) -> Result<()> {
    let path = bucket
        .spill_path
        .clone()
        .unwrap_or_else(|| dir.path().join(format!("mate-bucket-{}-{:08x}.log", ref_id, fastrand::u32(..))));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening mate-table spill log {}", path.display()))?;
    let mut offset = file.stream_position()?;
    let mut writer = BufWriter::new(&mut file);

    for (key, partial) in bucket.memory.drain() {
        writer.write_all(&(key.len() as u32).to_le_bytes())?;
        writer.write_all(&key)?;
        write_partial(&mut writer, &partial)?;
        bucket.spill_index.insert(key, offset);
        offset += 4 + key.len() as u64 + PARTIAL_SIZE as u64;
    }
    writer.flush()?;
    bucket.spill_path = Some(path);
    Ok(())
}

const PARTIAL_SIZE: usize = 2 + 4 + 4 + 1 + 4 + 8 + 2 + 2 + 2 + 2;

fn write_partial<W: Write>(w: &mut W, p: &PartialFingerprint) -> Result<()> {
    w.write_all(&p.library_id.to_le_bytes())?;
    w.write_all(&p.r_ref.to_le_bytes())?;
    w.write_all(&p.r_pos.to_le_bytes())?;
    w.write_all(&[p.reverse as u8])?;
    w.write_all(&p.score.to_le_bytes())?;
    w.write_all(&p.ordinal.to_le_bytes())?;
    w.write_all(&p.read_group_ordinal.to_le_bytes())?;
    w.write_all(&p.tile.to_le_bytes())?;
    w.write_all(&p.x.to_le_bytes())?;
    w.write_all(&p.y.to_le_bytes())?;
    Ok(())
}

fn read_spilled_entry(path: &std::path::Path, offset: u64) -> Result<PartialFingerprint> {
    let mut file = File::open(path).with_context(|| format!("reopening mate-table spill log {}", path.display()))?;
    file.seek(SeekFrom::Start(offset))?;

    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let key_len = u32::from_le_bytes(len_buf) as usize;
    let mut key = vec![0u8; key_len];
    file.read_exact(&mut key)?;

    let mut buf2 = [0u8; 2];
    file.read_exact(&mut buf2)?;
    let library_id = u16::from_le_bytes(buf2);
    let mut buf4 = [0u8; 4];
    file.read_exact(&mut buf4)?;
    let r_ref = i32::from_le_bytes(buf4);
    file.read_exact(&mut buf4)?;
    let r_pos = i32::from_le_bytes(buf4);
    let mut buf1 = [0u8; 1];
    file.read_exact(&mut buf1)?;
    let reverse = buf1[0] == 1;
    file.read_exact(&mut buf4)?;
    let score = u32::from_le_bytes(buf4);
    let mut buf8 = [0u8; 8];
    file.read_exact(&mut buf8)?;
    let ordinal = u64::from_le_bytes(buf8);
    file.read_exact(&mut buf2)?;
    let read_group_ordinal = u16::from_le_bytes(buf2);
    file.read_exact(&mut buf2)?;
    let tile = i16::from_le_bytes(buf2);
    file.read_exact(&mut buf2)?;
    let x = i16::from_le_bytes(buf2);
    file.read_exact(&mut buf2)?;
    let y = i16::from_le_bytes(buf2);

    Ok(PartialFingerprint { library_id, r_ref, r_pos, reverse, score, ordinal, read_group_ordinal, tile, x, y })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(spill_threshold: usize) -> MatePairTable {
        let dir = tempfile::Builder::new().prefix("mate-table-test").tempdir().unwrap();
        MatePairTable::new(dir, spill_threshold)
    }

    fn sample(ordinal: u64) -> PartialFingerprint {
        PartialFingerprint {
            library_id: 1,
            r_ref: 0,
            r_pos: 100,
            reverse: false,
            score: 50,
            ordinal,
            read_group_ordinal: 0,
            tile: -1,
            x: -1,
            y: -1,
        }
    }

    #[test]
    fn put_then_remove_in_memory() {
        let mut t = table(100);
        t.put(1, b"rg:read1", sample(5)).unwrap();
        assert_eq!(t.size(), 1);
        let got = t.remove(1, b"rg:read1").unwrap().unwrap();
        assert_eq!(got.ordinal, 5);
        assert_eq!(t.size(), 0);
    }

    #[test]
    fn remove_wrong_ref_returns_none() {
        let mut t = table(100);
        t.put(1, b"rg:read1", sample(5)).unwrap();
        assert!(t.remove(2, b"rg:read1").unwrap().is_none());
    }

    #[test]
    fn spills_past_threshold_and_still_retrievable() {
        let mut t = table(2);
        t.put(0, b"a", sample(1)).unwrap();
        t.put(0, b"b", sample(2)).unwrap();
        // third insert triggers a spill of the bucket
        t.put(0, b"c", sample(3)).unwrap();
        assert_eq!(t.size(), 3);

        let a = t.remove(0, b"a").unwrap().unwrap();
        let b = t.remove(0, b"b").unwrap().unwrap();
        let c = t.remove(0, b"c").unwrap().unwrap();
        assert_eq!((a.ordinal, b.ordinal, c.ordinal), (1, 2, 3));
        assert_eq!(t.size(), 0);
    }

    #[test]
    fn drain_orphans_returns_unmatched_and_clears_table() {
        let mut t = table(100);
        t.put(0, b"a", sample(1)).unwrap();
        t.put(0, b"b", sample(2)).unwrap();
        let orphans = t.drain_orphans().unwrap();
        assert_eq!(orphans.len(), 2);
        assert_eq!(t.orphan_count, 2);
        assert_eq!(t.size(), 0);
    }
}
