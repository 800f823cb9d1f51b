//! Bounded-RAM, disk-spilling sorted collection (C2) and its `u64` specialization (C3).
//!
//! Generalizes the teacher's `save_chunk_parallel`/`open_chunk_reader`/
//! `BinaryHeap<MergeItem>` chunking from `main.rs`, which was hardcoded to one
//! `Metadata` type, into a reusable external-merge-sort for any
//! [`SortRecord`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use rayon::prelude::*;
use tempfile::TempDir;

/// A type that can be held in an [`ExternalSortedSet`]: totally ordered and
/// equipped with a compact binary codec.
pub trait SortRecord: Ord + Send + Sized {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()>;
    fn read_from<R: std::io::Read>(r: &mut R) -> Result<Option<Self>>;
}

impl SortRecord for u64 {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: std::io::Read>(r: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; 8];
        if r.read_exact(&mut buf).is_err() {
            return Ok(None);
        }
        Ok(Some(u64::from_le_bytes(buf)))
    }
}

/// Insert-only, bounded-RAM, disk-spilling sorted collection (C2).
///
/// Items accumulate in an in-memory buffer of capacity `buffer_capacity`. On
/// overflow the buffer is sorted in parallel and spilled to an LZ4-compressed
/// run file under `dir`, mirroring the teacher's `save_chunk_parallel`.
/// `finish()` consumes the final in-memory run plus every spilled run through
/// a k-way heap merge, yielding items in comparator order exactly once.
pub struct ExternalSortedSet<T: SortRecord> {
    dir: TempDir,
    buffer: Vec<T>,
    buffer_capacity: usize,
    run_paths: Vec<PathBuf>,
    max_open_runs: usize,
}

impl<T: SortRecord + 'static> ExternalSortedSet<T> {
    /// `buffer_capacity` bounds how many items are held in memory before a
    /// spill; SPEC_FULL §4.1 sizes this as a fraction of available heap
    /// divided by `sizeof(T)` — callers compute that outside this type.
    pub fn new(dir: TempDir, buffer_capacity: usize) -> Self {
        Self {
            dir,
            buffer: Vec::with_capacity(buffer_capacity.min(1 << 20)),
            buffer_capacity: buffer_capacity.max(1),
            run_paths: Vec::new(),
            max_open_runs: usize::MAX,
        }
    }

    /// Caps how many spilled run files `finish()` holds open at once (SPEC_FULL
    /// §4.3/§5 `--max-file-handles`). When more runs than this have
    /// accumulated, `finish()` first cascades: it merges runs together in
    /// capped-size batches, replacing many small runs with fewer larger ones,
    /// until the final k-way merge needs no more than `max_open_runs` open
    /// readers at once.
    pub fn with_max_open_runs(mut self, max_open_runs: usize) -> Self {
        self.max_open_runs = max_open_runs.max(2);
        self
    }

    pub fn insert(&mut self, item: T) -> Result<()> {
        self.buffer.push(item);
        if self.buffer.len() >= self.buffer_capacity {
            self.spill()?;
        }
        Ok(())
    }

    pub fn len_in_memory(&self) -> usize {
        self.buffer.len()
    }

    pub fn run_count(&self) -> usize {
        self.run_paths.len()
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.buffer_capacity));
        let path = write_run(chunk, self.dir.path()).context("spilling external sort run")?;
        self.run_paths.push(path);
        Ok(())
    }

    /// Consume the collection, returning an iterator over all items in
    /// comparator order. Temp files are deleted once the returned iterator is
    /// dropped (the backing `TempDir` lives inside the iterator).
    pub fn finish(mut self) -> Result<ExternalSortedIter<T>> {
        self.buffer.par_sort_unstable();

        // The in-memory tail holds no file handle, so only spilled runs count
        // against the budget; cascade until the final merge fits under it.
        while self.run_paths.len() > self.max_open_runs {
            let batch_size = self.max_open_runs;
            let runs = std::mem::take(&mut self.run_paths);
            let mut merged = Vec::with_capacity(runs.len().div_ceil(batch_size));
            for batch in runs.chunks(batch_size) {
                if batch.len() == 1 {
                    merged.push(batch[0].clone());
                } else {
                    merged.push(merge_runs_batch::<T>(batch, self.dir.path())?);
                }
            }
            self.run_paths = merged;
        }

        let mut readers: Vec<BufReader<FrameDecoder<File>>> = self
            .run_paths
            .iter()
            .map(|p| open_run(p))
            .collect::<Result<_>>()?;

        let mut heap = BinaryHeap::new();
        for (i, r) in readers.iter_mut().enumerate() {
            if let Some(item) = T::read_from(r)? {
                heap.push(HeapItem { item, source: Source::Run(i) });
            }
        }

        let mut mem_iter = std::mem::take(&mut self.buffer).into_iter();
        if let Some(item) = mem_iter.next() {
            heap.push(HeapItem { item, source: Source::Memory });
        }

        Ok(ExternalSortedIter {
            _dir: self.dir,
            readers,
            mem_iter,
            heap,
        })
    }
}

/// Specialization of [`ExternalSortedSet`] for `u64` record ordinals (C3).
/// Semantically a sorted multiset: duplicate ordinals are legal and the
/// second pass treats repeats as a no-op (SPEC_FULL §4.2).
pub type ExternalSortedLongs = ExternalSortedSet<u64>;

enum Source {
    Memory,
    Run(usize),
}

struct HeapItem<T> {
    item: T,
    source: Source,
}

impl<T: Ord> PartialEq for HeapItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item
    }
}
impl<T: Ord> Eq for HeapItem<T> {}

impl<T: Ord> PartialOrd for HeapItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for HeapItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest item on top.
        other.item.cmp(&self.item)
    }
}

/// Iterator yielding items from an [`ExternalSortedSet`] in comparator order.
pub struct ExternalSortedIter<T: SortRecord> {
    _dir: TempDir,
    readers: Vec<BufReader<FrameDecoder<File>>>,
    mem_iter: std::vec::IntoIter<T>,
    heap: BinaryHeap<HeapItem<T>>,
}

impl<T: SortRecord> Iterator for ExternalSortedIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        match top.source {
            Source::Memory => {
                if let Some(next_item) = self.mem_iter.next() {
                    self.heap.push(HeapItem { item: next_item, source: Source::Memory });
                }
            }
            Source::Run(i) => match T::read_from(&mut self.readers[i]) {
                Ok(Some(next_item)) => self.heap.push(HeapItem { item: next_item, source: Source::Run(i) }),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            },
        }
        Some(Ok(top.item))
    }
}

fn write_run<T: SortRecord>(mut chunk: Vec<T>, dir: &Path) -> Result<PathBuf> {
    chunk.par_sort_unstable();
    let path = dir.join(format!("{:016x}.lz4", fastrand::u64(..)));
    let mut enc = FrameEncoder::new(BufWriter::with_capacity(1 << 20, File::create(&path)?));
    for item in &chunk {
        item.write_to(&mut enc)?;
    }
    enc.finish()?;
    Ok(path)
}

fn open_run(path: &Path) -> Result<BufReader<FrameDecoder<File>>> {
    let file = File::open(path).with_context(|| format!("reopening sort run {}", path.display()))?;
    Ok(BufReader::with_capacity(1 << 18, FrameDecoder::new(file)))
}

/// K-way merges `paths` into a single new run file under `dir`, opening all
/// of `paths` but no more, and returns the merged run's path. Used by
/// `finish()`'s file-handle budget cascade to shrink a run count that would
/// otherwise exceed `max_open_runs`.
fn merge_runs_batch<T: SortRecord>(paths: &[PathBuf], dir: &Path) -> Result<PathBuf> {
    let mut readers: Vec<BufReader<FrameDecoder<File>>> = paths.iter().map(|p| open_run(p)).collect::<Result<_>>()?;

    let mut heap = BinaryHeap::new();
    for (i, r) in readers.iter_mut().enumerate() {
        if let Some(item) = T::read_from(r)? {
            heap.push(HeapItem { item, source: Source::Run(i) });
        }
    }

    let out_path = dir.join(format!("{:016x}.lz4", fastrand::u64(..)));
    let mut enc = FrameEncoder::new(BufWriter::with_capacity(1 << 20, File::create(&out_path)?));
    while let Some(top) = heap.pop() {
        top.item.write_to(&mut enc)?;
        if let Source::Run(i) = top.source {
            if let Some(next_item) = T::read_from(&mut readers[i])? {
                heap.push(HeapItem { item: next_item, source: Source::Run(i) });
            }
        }
    }
    enc.finish()?;
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_set<T: SortRecord + 'static>(capacity: usize) -> ExternalSortedSet<T> {
        let dir = tempfile::Builder::new().prefix("ext-sort-test").tempdir().unwrap();
        ExternalSortedSet::new(dir, capacity)
    }

    #[test]
    fn empty_set_yields_nothing() {
        let set: ExternalSortedSet<u64> = new_set(10);
        let out: Vec<u64> = set.finish().unwrap().map(|r| r.unwrap()).collect();
        assert!(out.is_empty());
    }

    #[test]
    fn in_memory_only_is_sorted() {
        let mut set = new_set(100);
        for v in [5u64, 1, 4, 2, 3] {
            set.insert(v).unwrap();
        }
        let out: Vec<u64> = set.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn spills_and_merges_across_runs() {
        let mut set = new_set(3);
        let input: Vec<u64> = (0..20).rev().collect();
        for v in &input {
            set.insert(*v).unwrap();
        }
        assert!(set.run_count() >= 2, "expected multiple spilled runs");
        let out: Vec<u64> = set.finish().unwrap().map(|r| r.unwrap()).collect();
        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(out, expected);
    }

    #[test]
    fn cascades_merges_to_respect_max_open_runs() {
        let dir = tempfile::Builder::new().prefix("ext-sort-test").tempdir().unwrap();
        let mut set = ExternalSortedSet::new(dir, 3).with_max_open_runs(2);
        let input: Vec<u64> = (0..20).rev().collect();
        for v in &input {
            set.insert(*v).unwrap();
        }
        assert!(set.run_count() > 2, "expected more runs than the budget to force cascading");
        let out: Vec<u64> = set.finish().unwrap().map(|r| r.unwrap()).collect();
        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(out, expected);
    }

    #[test]
    fn duplicates_are_preserved_as_multiset() {
        let mut set = new_set(2);
        for v in [1u64, 1, 1, 2] {
            set.insert(v).unwrap();
        }
        let out: Vec<u64> = set.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(out, vec![1, 1, 1, 2]);
    }
}
