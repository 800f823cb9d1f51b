//! Per-library duplication metrics and the tabular metrics file (SPEC_FULL §3, §6).
//!
//! The row shape is grounded directly in SPEC_FULL §6's column list; the
//! writer uses the `csv` crate (dependency grounded in
//! `examples/PROSIC-libprosic/Cargo.toml`) with a tab delimiter to match the
//! upstream METRICS file convention described there.

use std::io::Write;

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;

use crate::library_size::{estimate_library_size, LibrarySizeEstimate};

/// Sequencing multiples at which the "return on investment" histogram is
/// reported (SPEC_FULL §6).
pub const ROI_MULTIPLES: [f64; 100] = {
    let mut arr = [0.0; 100];
    let mut i = 0;
    while i < 100 {
        arr[i] = (i + 1) as f64;
        i += 1;
    }
    arr
};

/// Running counters for one library, accumulated across both passes
/// (SPEC_FULL §3 `PerLibraryMetrics`).
#[derive(Debug, Clone, Default)]
pub struct PerLibraryMetrics {
    pub library_name: String,
    pub unpaired_examined: u64,
    pub pairs_examined: u64,
    pub unmapped: u64,
    pub unpaired_duplicates: u64,
    pub pair_duplicates: u64,
    pub optical_pair_duplicates: u64,
}

impl PerLibraryMetrics {
    pub fn new(library_name: impl Into<String>) -> Self {
        Self { library_name: library_name.into(), ..Default::default() }
    }

    /// `pairs_examined`/`unpaired_examined` are accumulated once per end seen
    /// during the second pass; per SPEC_FULL §4.10 the paired counters are
    /// halved once at finalization since each pair contributes two records.
    pub fn finalize_pair_counts(&mut self) {
        self.pairs_examined /= 2;
        self.pair_duplicates /= 2;
        self.optical_pair_duplicates /= 2;
    }

    pub fn percent_duplication(&self) -> f64 {
        let numerator = self.unpaired_duplicates + 2 * self.pair_duplicates;
        let denominator = self.unpaired_examined + 2 * self.pairs_examined;
        if denominator == 0 {
            0.0
        } else {
            numerator as f64 / denominator as f64
        }
    }

    pub fn estimated_library_size(&self) -> LibrarySizeEstimate {
        let n = (self.pairs_examined.saturating_sub(self.optical_pair_duplicates)) as f64;
        let c = (self.pairs_examined.saturating_sub(self.pair_duplicates)) as f64;
        estimate_library_size(n, c)
    }

    fn to_row(&self) -> MetricsRow {
        let estimated = match self.estimated_library_size() {
            LibrarySizeEstimate::Estimated(x) => Some(x.round() as u64),
            LibrarySizeEstimate::Undefined => None,
        };
        MetricsRow {
            library_name: self.library_name.clone(),
            unpaired_examined: self.unpaired_examined,
            pairs_examined: self.pairs_examined,
            unmapped: self.unmapped,
            unpaired_duplicates: self.unpaired_duplicates,
            pair_duplicates: self.pair_duplicates,
            optical_pair_duplicates: self.optical_pair_duplicates,
            percent_duplication: self.percent_duplication(),
            estimated_library_size: estimated,
        }
    }
}

/// I6: every library's optical count must never exceed its pair-duplicate count.
pub fn check_optical_bound(m: &PerLibraryMetrics) -> bool {
    m.optical_pair_duplicates <= m.pair_duplicates
}

/// Projects unique-pairs-at-sequencing-multiple `m`, reusing the Lander-Waterman
/// model behind [`estimate_library_size`]: if the library truly holds `x`
/// distinct molecules and `n` pairs were examined, sequencing `m*n` pairs is
/// expected to observe `x * (1 - exp(-m*n/x))` unique ones (SPEC_FULL §6 ROI
/// histogram).
fn roi_unique_pairs(library_size: f64, pairs_examined: f64, multiple: f64) -> f64 {
    if library_size <= 0.0 {
        return 0.0;
    }
    library_size * (1.0 - (-multiple * pairs_examined / library_size).exp())
}

#[derive(Serialize)]
struct RoiRow {
    library_name: String,
    sequencing_multiple: f64,
    estimated_unique_pairs: f64,
}

fn roi_rows(m: &PerLibraryMetrics) -> Vec<RoiRow> {
    let LibrarySizeEstimate::Estimated(x) = m.estimated_library_size() else {
        return Vec::new();
    };
    ROI_MULTIPLES
        .iter()
        .map(|&mult| RoiRow {
            library_name: m.library_name.clone(),
            sequencing_multiple: mult,
            estimated_unique_pairs: roi_unique_pairs(x, m.pairs_examined as f64, mult),
        })
        .collect()
}

#[derive(Serialize)]
struct MetricsRow {
    library_name: String,
    unpaired_examined: u64,
    pairs_examined: u64,
    unmapped: u64,
    unpaired_duplicates: u64,
    pair_duplicates: u64,
    optical_pair_duplicates: u64,
    percent_duplication: f64,
    estimated_library_size: Option<u64>,
}

/// Writes the tabular metrics file: one row per library, tab-delimited, plus
/// a blank separator line and the sequencing-multiple ROI histogram section
/// (SPEC_FULL §6).
pub fn write_metrics<W: Write>(w: W, libraries: &[PerLibraryMetrics]) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(w);
    for lib in libraries {
        writer.serialize(lib.to_row())?;
    }
    writer.flush()?;

    let mut inner = writer.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    writeln!(inner)?;
    let mut roi_writer = WriterBuilder::new().delimiter(b'\t').from_writer(inner);
    for lib in libraries {
        for row in roi_rows(lib) {
            roi_writer.serialize(row)?;
        }
    }
    roi_writer.flush()?;
    Ok(())
}
