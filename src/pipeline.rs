//! Orchestration: wires C9 → C10 → C11, manages temp directories, and
//! reports the explicit state machine from SPEC_FULL §4.11 (C12).
//!
//! Grounded on the overall shape of the teacher's `main.rs` (temp-dir setup,
//! pass 1, merge/collect, pass 2, elapsed-time reporting), factored out of
//! `main.rs` into a library-testable function. Where the teacher printed
//! progress with bare `eprintln!`, this module logs through `log` (A3),
//! matching the rest of the transformed crate.

use std::fs::File;
use std::io::Write;
use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use noodles::bgzf::io::Writer as BgzfWriter;
use noodles::sam::header::Header as SamHeader;
use tempfile::Builder as TempDirBuilder;

use crate::config::{Config, OpticalAnalysisMode};
use crate::diagnostics::Diagnostics;
use crate::duplicate_marker::mark_duplicates;
use crate::error::EngineError;
use crate::fingerprint::Fingerprint;
use crate::fingerprint_builder::FingerprintBuilder;
use crate::io::bam::{
    record_to_bytes, rewrite_with_program_group, toggle_duplicate_flag, write_header, BamHeaderAdapter, BamRecordView,
    MergedBamInputs,
};
use crate::metrics::write_metrics;
use crate::output_writer::{classify_record, DuplicateOrdinalCursor};
use crate::physical_location::PhysicalLocationParser;
use crate::program_group::ProgramRecordRegistry;
use crate::record::{AlignedRecord, AlignedRecordHeader};
use crate::utils::format_duration_verbose;

/// Depth of the bounded handoff queue between the pass-2 record loop and the
/// background writer thread (SPEC_FULL §5: "a bounded handoff queue owned by
/// the writer"). Deliberately small: the point is to let the writer lag a
/// handful of records behind the reader/classifier, not to buffer unbounded
/// amounts of compressed output in memory.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Pass-2 output sink (SPEC_FULL §5 "one optional background worker dedicated
/// to output compression/write-ahead to overlap CPU and I/O"). `Inline` writes
/// on the calling thread, matching `--single-threaded`; `Background` hands
/// already-serialized record bytes to a dedicated writer thread over a
/// bounded channel, so BGZF compression overlaps the next record's read and
/// classification. No state besides the byte buffer itself crosses the
/// thread boundary.
enum OutputSink {
    Inline(BgzfWriter<File>),
    Background { tx: Sender<Vec<u8>>, join: JoinHandle<Result<()>> },
}

impl OutputSink {
    fn open(out_file: File, header: Arc<SamHeader>, background: bool) -> Result<Self> {
        if !background {
            let mut writer = BgzfWriter::new(out_file);
            write_header(&mut writer, &header)?;
            return Ok(OutputSink::Inline(writer));
        }

        let (tx, rx) = bounded::<Vec<u8>>(WRITE_QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("dupmark-writer".to_string())
            .spawn(move || -> Result<()> {
                let mut writer = BgzfWriter::new(out_file);
                write_header(&mut writer, &header)?;
                for bytes in rx {
                    writer.write_all(&bytes)?;
                }
                writer.finish()?;
                Ok(())
            })
            .context("spawning background output writer thread")?;
        Ok(OutputSink::Background { tx, join })
    }

    fn write(&mut self, bytes: Vec<u8>) -> Result<()> {
        match self {
            OutputSink::Inline(writer) => writer.write_all(&bytes).map_err(Into::into),
            OutputSink::Background { tx, .. } => {
                tx.send(bytes).map_err(|_| anyhow::anyhow!("background output writer thread exited early"))
            }
        }
    }

    fn finish(self) -> Result<()> {
        match self {
            OutputSink::Inline(mut writer) => {
                writer.finish()?;
                Ok(())
            }
            OutputSink::Background { tx, join } => {
                drop(tx);
                join.join().map_err(|_| anyhow::anyhow!("background output writer thread panicked"))?
            }
        }
    }
}

/// Default total-memory assumption used to size the external sorted sets'
/// in-memory buffers when no more precise figure is available (SPEC_FULL
/// §4.1, §5). A real deployment would read this from the OS; this crate, like
/// the teacher, keeps memory sizing a pure function of a configured ratio
/// rather than pulling in a system-introspection dependency.
const ASSUMED_TOTAL_MEMORY_BYTES: usize = 1 << 30;
const MIN_BUFFER_CAPACITY: usize = 1024;
const MATE_TABLE_SPILL_THRESHOLD: usize = 1 << 16;

/// The engine's run states (SPEC_FULL §4.11). Transitions are logged at
/// `debug`; `FAILED` is reached implicitly whenever `run` returns `Err`; the
/// temp directories created along the way are always cleaned up on drop
/// regardless of which state the run ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Pass1,
    Marked,
    Pass2,
    WritingMetrics,
    Done,
}

fn transition(from: State, to: State) {
    log::debug!("{from:?} -> {to:?}");
}

/// Run the full duplicate-marking engine against `config` (C12).
pub fn run(config: &Config) -> Result<()> {
    let mut state = State::Init;
    let mut diagnostics = Diagnostics::new();
    let total_start = Instant::now();

    let tmp_root = config.tmp_dir.clone().unwrap_or_else(std::env::temp_dir);

    transition(state, State::Pass1);
    state = State::Pass1;

    let mut inputs = MergedBamInputs::open(&config.input_paths)?;
    let header_adapter = BamHeaderAdapter::new(inputs.header.clone());

    if !header_adapter.is_coordinate_sorted() && !config.assume_sorted {
        log::warn!("input header does not claim coordinate sort order; proceeding because records are still checked in-line");
    }

    let physical_location_parser = match config.optical_analysis_mode() {
        OpticalAnalysisMode::Disabled => None,
        OpticalAnalysisMode::Enabled { regex_spec } => Some(PhysicalLocationParser::new(regex_spec.as_deref())?),
    };

    let buffer_capacity = sort_buffer_capacity(config.sorting_collection_ratio);

    // The pair set, fragment set, and ordinal set each cascade-merge under
    // this same cap independently, so the true worst case is roughly
    // 3x `max_file_handles` concurrently open run files, not a single shared
    // budget across them; splitting the configured budget would starve any
    // one set long before the others needed to cascade. SPEC_FULL §4.3/§5
    // names `--max-file-handles` as a per-sorted-set guard against "too many
    // open files," which this matches.
    let max_open_runs = (config.max_file_handles as usize).max(2);

    let mut builder = FingerprintBuilder::new(
        temp_dir(&tmp_root, "pair")?,
        temp_dir(&tmp_root, "fragment")?,
        temp_dir(&tmp_root, "mate")?,
        buffer_capacity,
        MATE_TABLE_SPILL_THRESHOLD,
        physical_location_parser,
        max_open_runs,
    );

    let pass1_start = Instant::now();
    let mut last_key: Option<(i32, i32)> = None;
    let mut ordinal_seen = 0u64;

    loop {
        let Some(record) = inputs.next_record()? else { break };
        let view = BamRecordView::new(&record);

        if !view.is_secondary_or_supplementary() {
            let key = (
                if view.reference_index() < 0 { i32::MAX } else { view.reference_index() },
                view.unclipped_start()?,
            );
            if let Some(prev) = last_key {
                if !config.assume_sorted && key < prev {
                    return Err(EngineError::SortOrderViolation {
                        index: ordinal_seen,
                        reference: view.reference_index(),
                        position: key.1,
                    }
                    .into());
                }
            }
            last_key = Some(key);
            ordinal_seen += 1;
        }

        builder.process_record(&header_adapter, &view, &mut diagnostics)?;
    }

    let outcome = builder.finish(&mut diagnostics)?;
    log::info!(
        "pass 1 finished in {}: {} records examined",
        format_duration_verbose(pass1_start.elapsed()),
        outcome.total_records_seen
    );

    transition(state, State::Marked);
    state = State::Marked;

    let optical_pixel_distance = match config.optical_analysis_mode() {
        OpticalAnalysisMode::Disabled => None,
        OpticalAnalysisMode::Enabled { .. } => Some(config.optical_duplicate_pixel_distance),
    };

    let mark_start = Instant::now();
    let marker_outcome = mark_duplicates(
        outcome.pair_set,
        outcome.fragment_set,
        &outcome.library_registry,
        temp_dir(&tmp_root, "ordinals")?,
        buffer_capacity,
        optical_pixel_distance,
        max_open_runs,
    )?;
    log::info!("duplicate marking finished in {}", format_duration_verbose(mark_start.elapsed()));

    transition(state, State::Pass2);
    state = State::Pass2;

    inputs.reopen()?;

    let program_group_rewrite = config.program_record_id.as_ref().map(|base_id| {
        let mut registry = ProgramRecordRegistry::new(header_adapter.program_record_ids());
        let (resolved_id, collided) = registry.resolve(base_id);
        if collided {
            diagnostics.record(
                crate::diagnostics::PROGRAM_RECORD_COLLISION,
                &format!("requested id '{base_id}' already present in header, using '{resolved_id}'"),
            );
        }
        resolved_id
    });

    let mut metrics_by_library_id = marker_outcome.metrics_by_library_id;
    let mut cursor = DuplicateOrdinalCursor::new(marker_outcome.duplicate_ordinals.finish()?)?;

    let out_file = File::create(&config.output).with_context(|| format!("creating output file {}", config.output.display()))?;
    let mut sink = OutputSink::open(out_file, inputs.header.clone(), !config.single_threaded)?;

    let pass2_start = Instant::now();
    let mut ordinal = 0u64;
    let mut records_written = 0u64;

    loop {
        let Some(record) = inputs.next_record()? else { break };
        let view = BamRecordView::new(&record);

        let this_ordinal = if view.is_secondary_or_supplementary() { None } else { Some(ordinal) };

        let disposition = classify_record(
            &header_adapter,
            &view,
            this_ordinal,
            &mut cursor,
            &outcome.library_registry,
            &mut metrics_by_library_id,
            config.remove_duplicates,
        )?;

        if this_ordinal.is_some() {
            ordinal += 1;
        }

        if !disposition.should_forward {
            continue;
        }

        let bytes = match &program_group_rewrite {
            Some(new_id) if this_ordinal.is_some() => {
                rewrite_with_program_group(&inputs.header, &record, disposition.is_duplicate, new_id)?
            }
            _ => {
                let mut bytes = record_to_bytes(&inputs.header, &record)?;
                if this_ordinal.is_some() {
                    toggle_duplicate_flag(&mut bytes, disposition.is_duplicate);
                }
                bytes
            }
        };

        sink.write(bytes)?;
        records_written += 1;
    }

    if ordinal != outcome.total_records_seen {
        return Err(EngineError::PassCountMismatch { first: outcome.total_records_seen, second: ordinal }.into());
    }

    sink.finish()?;
    log::info!(
        "pass 2 finished in {}: {} records written",
        format_duration_verbose(pass2_start.elapsed()),
        records_written
    );

    transition(state, State::WritingMetrics);
    state = State::WritingMetrics;

    for metrics in metrics_by_library_id.values_mut() {
        metrics.finalize_pair_counts();
        if !crate::metrics::check_optical_bound(metrics) {
            log::warn!("library '{}' has more optical than pair duplicates; this is a program bug", metrics.library_name);
        }
        if matches!(metrics.estimated_library_size(), crate::library_size::LibrarySizeEstimate::Undefined) {
            diagnostics.record(crate::diagnostics::LIBRARY_SIZE_UNDEFINED, &metrics.library_name);
        }
    }

    let mut rows: Vec<_> = metrics_by_library_id.into_values().collect();
    rows.sort_by(|a, b| a.library_name.cmp(&b.library_name));

    let metrics_file =
        File::create(&config.metrics).with_context(|| format!("creating metrics file {}", config.metrics.display()))?;
    write_metrics(metrics_file, &rows)?;

    transition(state, State::Done);
    let _ = state;

    diagnostics.summarize();
    log::info!("done in {} total", format_duration_verbose(total_start.elapsed()));

    Ok(())
}

fn sort_buffer_capacity(ratio: f64) -> usize {
    let budget = (ASSUMED_TOTAL_MEMORY_BYTES as f64 * ratio.clamp(0.01, 1.0)) as usize;
    (budget / size_of::<Fingerprint>()).max(MIN_BUFFER_CAPACITY)
}

fn temp_dir(root: &Path, label: &str) -> Result<tempfile::TempDir> {
    TempDirBuilder::new()
        .prefix(&format!("dupmark-{}-{}-", std::process::id(), label))
        .tempdir_in(root)
        .with_context(|| format!("creating {label} temp directory under {}", root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Arc<SamHeader> {
        Arc::new(SamHeader::builder().build())
    }

    #[test]
    fn buffer_capacity_respects_ratio_and_floor() {
        let full = sort_buffer_capacity(1.0);
        let quarter = sort_buffer_capacity(0.25);
        assert!(full > quarter);
        assert!(sort_buffer_capacity(0.0) >= MIN_BUFFER_CAPACITY);
    }

    #[test]
    fn inline_sink_writes_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bam");
        let file = File::create(&path).unwrap();
        let mut sink = OutputSink::open(file, header(), false).unwrap();
        sink.write(vec![1, 2, 3]).unwrap();
        sink.write(vec![4, 5]).unwrap();
        sink.finish().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn background_sink_writes_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bam");
        let file = File::create(&path).unwrap();
        let mut sink = OutputSink::open(file, header(), true).unwrap();
        for i in 0..(WRITE_QUEUE_DEPTH * 2) {
            sink.write(vec![i as u8]).unwrap();
        }
        sink.finish().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
