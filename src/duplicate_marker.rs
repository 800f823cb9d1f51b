//! Pair-pass + fragment-pass equivalence-class grouping, winner selection,
//! and optical-duplicate accounting, run between the two full input passes
//! (C10, SPEC_FULL §4.9).
//!
//! Grounded on `examples/yukaiquan-rmdups/src/algorithm.rs::identify_dups`'s
//! shape (stream sorted records, accumulate a same-key chunk, pick a winner,
//! mark the rest), split into the spec's two explicit passes over two
//! separate sorted sets rather than the teacher's single interleaved stream.

use std::collections::HashMap;

use anyhow::Result;
use tempfile::TempDir;

use crate::external_sort::{ExternalSortedLongs, ExternalSortedSet};
use crate::fingerprint::Fingerprint;
use crate::library_registry::LibraryRegistry;
use crate::metrics::PerLibraryMetrics;
use crate::optical::{find_optical_duplicates, PhysicalLocation};

/// Output of the between-passes marking step: the sorted duplicate-ordinal
/// multiset consumed by the second pass, and the per-library duplicate
/// counters the second pass will layer its examined/unmapped counts onto.
pub struct DuplicateMarkerOutcome {
    pub duplicate_ordinals: ExternalSortedLongs,
    pub metrics_by_library_id: HashMap<u16, PerLibraryMetrics>,
}

/// `optical_pixel_distance`: `None` disables optical-duplicate analysis
/// entirely (SPEC_FULL §6 `skip_optical_duplicates`); every duplicate is then
/// counted as a plain pair-duplicate and `optical_pair_duplicates` stays 0.
#[allow(clippy::too_many_arguments)]
pub fn mark_duplicates(
    pair_set: ExternalSortedSet<Fingerprint>,
    fragment_set: ExternalSortedSet<Fingerprint>,
    library_registry: &LibraryRegistry,
    ordinal_dir: TempDir,
    ordinal_buffer_capacity: usize,
    optical_pixel_distance: Option<u32>,
    max_open_runs: usize,
) -> Result<DuplicateMarkerOutcome> {
    let mut metrics_by_library_id: HashMap<u16, PerLibraryMetrics> = library_registry
        .iter()
        .map(|(id, name)| (id, PerLibraryMetrics::new(name)))
        .collect();

    let mut duplicate_ordinals = ExternalSortedLongs::new(ordinal_dir, ordinal_buffer_capacity).with_max_open_runs(max_open_runs);

    mark_pair_pass(pair_set, &mut duplicate_ordinals, &mut metrics_by_library_id, optical_pixel_distance)?;
    mark_fragment_pass(fragment_set, &mut duplicate_ordinals, &mut metrics_by_library_id)?;

    Ok(DuplicateMarkerOutcome { duplicate_ordinals, metrics_by_library_id })
}

fn mark_pair_pass(
    pair_set: ExternalSortedSet<Fingerprint>,
    duplicate_ordinals: &mut ExternalSortedLongs,
    metrics_by_library_id: &mut HashMap<u16, PerLibraryMetrics>,
    optical_pixel_distance: Option<u32>,
) -> Result<()> {
    let mut chunk: Vec<Fingerprint> = Vec::new();

    for item in pair_set.finish()? {
        let fp = item?;
        if let Some(last) = chunk.last() {
            if last.pair_class_key() != fp.pair_class_key() {
                finalize_pair_chunk(std::mem::take(&mut chunk), duplicate_ordinals, metrics_by_library_id, optical_pixel_distance)?;
            }
        }
        chunk.push(fp);
    }
    finalize_pair_chunk(chunk, duplicate_ordinals, metrics_by_library_id, optical_pixel_distance)?;
    Ok(())
}

fn finalize_pair_chunk(
    chunk: Vec<Fingerprint>,
    duplicate_ordinals: &mut ExternalSortedLongs,
    metrics_by_library_id: &mut HashMap<u16, PerLibraryMetrics>,
    optical_pixel_distance: Option<u32>,
) -> Result<()> {
    if chunk.len() < 2 {
        return Ok(());
    }

    let winner_index = pick_winner(&chunk);
    let library_id = chunk[0].library_id;

    for (i, fp) in chunk.iter().enumerate() {
        if i == winner_index {
            continue;
        }
        duplicate_ordinals.insert(fp.ordinal_1)?;
        duplicate_ordinals.insert(fp.ordinal_2.expect("pair-set entries always have ordinal_2"))?;
    }

    let metrics = metrics_by_library_id.entry(library_id).or_insert_with(|| PerLibraryMetrics::new("Unknown Library"));
    metrics.pair_duplicates += (chunk.len() as u64 - 1) * 2;

    if let Some(pixel_distance) = optical_pixel_distance {
        // The whole chunk, winner included, goes to the optical finder: a
        // loser optically adjacent to the kept read is still an optical
        // duplicate of an earlier-ordered cluster member (SPEC_FULL §4.6,
        // §4.9 step 3). `member_id` tags each location with its index in
        // `chunk` so the winner's own flag can be excluded afterward —
        // `find_optical_duplicates` sorts the slice in place.
        let mut locations: Vec<PhysicalLocation> = chunk
            .iter()
            .enumerate()
            .map(|(i, fp)| PhysicalLocation {
                member_id: i as u64,
                read_group_ordinal: fp.read_group_ordinal,
                tile: fp.tile,
                x: fp.x,
                y: fp.y,
            })
            .collect();
        let optical_flags = find_optical_duplicates(&mut locations, pixel_distance as i32);
        let optical_count = locations
            .iter()
            .zip(optical_flags.iter())
            .filter(|(loc, &flagged)| flagged && loc.member_id != winner_index as u64)
            .count() as u64;
        metrics.optical_pair_duplicates += optical_count * 2;
    }

    Ok(())
}

/// Highest `score`, ties broken by lowest `ordinal_1` (SPEC_FULL §4.9, I4).
fn pick_winner(chunk: &[Fingerprint]) -> usize {
    let mut best = 0;
    for i in 1..chunk.len() {
        let candidate = &chunk[i];
        let current_best = &chunk[best];
        if candidate.score > current_best.score
            || (candidate.score == current_best.score && candidate.ordinal_1 < current_best.ordinal_1)
        {
            best = i;
        }
    }
    best
}

fn mark_fragment_pass(
    fragment_set: ExternalSortedSet<Fingerprint>,
    duplicate_ordinals: &mut ExternalSortedLongs,
    metrics_by_library_id: &mut HashMap<u16, PerLibraryMetrics>,
) -> Result<()> {
    let mut chunk: Vec<Fingerprint> = Vec::new();

    for item in fragment_set.finish()? {
        let fp = item?;
        if let Some(last) = chunk.last() {
            if last.fragment_class_key() != fp.fragment_class_key() {
                finalize_fragment_chunk(std::mem::take(&mut chunk), duplicate_ordinals, metrics_by_library_id)?;
            }
        }
        chunk.push(fp);
    }
    finalize_fragment_chunk(chunk, duplicate_ordinals, metrics_by_library_id)?;
    Ok(())
}

fn finalize_fragment_chunk(
    chunk: Vec<Fingerprint>,
    duplicate_ordinals: &mut ExternalSortedLongs,
    metrics_by_library_id: &mut HashMap<u16, PerLibraryMetrics>,
) -> Result<()> {
    if chunk.len() < 2 {
        return Ok(());
    }

    let library_id = chunk[0].library_id;
    let contains_paired = chunk.iter().any(|fp| fp.is_member_of_pair);

    let mut unpaired_duplicate_count = 0u64;

    if contains_paired {
        // A paired member beats any fragment that only coincides at one end
        // (SPEC_FULL §4.9, B3): every fragment-only member is a duplicate.
        for fp in &chunk {
            if !fp.is_member_of_pair {
                duplicate_ordinals.insert(fp.ordinal_1)?;
                unpaired_duplicate_count += 1;
            }
        }
    } else {
        let winner_index = pick_winner(&chunk);
        for (i, fp) in chunk.iter().enumerate() {
            if i != winner_index {
                duplicate_ordinals.insert(fp.ordinal_1)?;
                unpaired_duplicate_count += 1;
            }
        }
    }

    if unpaired_duplicate_count > 0 {
        let metrics = metrics_by_library_id.entry(library_id).or_insert_with(|| PerLibraryMetrics::new("Unknown Library"));
        metrics.unpaired_duplicates += unpaired_duplicate_count;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Orientation;

    fn tmp() -> TempDir {
        tempfile::Builder::new().prefix("dup-marker-test").tempdir().unwrap()
    }

    fn pair(library_id: u16, pos1: i32, pos2: i32, score: u16, ord1: u64, ord2: u64) -> Fingerprint {
        pair_at(library_id, pos1, pos2, score, ord1, ord2, -1, -1, -1)
    }

    #[allow(clippy::too_many_arguments)]
    fn pair_at(
        library_id: u16,
        pos1: i32,
        pos2: i32,
        score: u16,
        ord1: u64,
        ord2: u64,
        tile: i16,
        x: i16,
        y: i16,
    ) -> Fingerprint {
        Fingerprint {
            library_id,
            r1_ref: 0,
            r1_pos: pos1,
            r2_ref: 0,
            r2_pos: pos2,
            orientation: Orientation::FR,
            score,
            read_group_ordinal: 0,
            tile,
            x,
            y,
            ordinal_1: ord1,
            ordinal_2: Some(ord2),
            is_member_of_pair: true,
        }
    }

    fn frag(library_id: u16, pos: i32, score: u16, ord: u64, is_member_of_pair: bool) -> Fingerprint {
        Fingerprint {
            library_id,
            r1_ref: 0,
            r1_pos: pos,
            r2_ref: -1,
            r2_pos: 0,
            orientation: Orientation::F,
            score,
            read_group_ordinal: 0,
            tile: -1,
            x: -1,
            y: -1,
            ordinal_1: ord,
            ordinal_2: None,
            is_member_of_pair,
        }
    }

    #[test]
    fn scenario_s1_minimal_pair_duplicate() {
        let mut registry = LibraryRegistry::new();
        let lib = registry.id_for("L");

        let mut pair_set = ExternalSortedSet::new(tmp(), 1024);
        pair_set.insert(pair(lib, 100, 300, 240, 0, 1)).unwrap();
        pair_set.insert(pair(lib, 100, 300, 160, 2, 3)).unwrap();
        let fragment_set = ExternalSortedSet::new(tmp(), 1024);

        let outcome = mark_duplicates(pair_set, fragment_set, &registry, tmp(), 1024, Some(100), 8_000).unwrap();
        let dups: Vec<u64> = outcome.duplicate_ordinals.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(dups, vec![2, 3]);

        let m = &outcome.metrics_by_library_id[&lib];
        assert_eq!(m.pair_duplicates, 2);
    }

    #[test]
    fn scenario_s2_fragment_loses_to_pair() {
        let mut registry = LibraryRegistry::new();
        let lib = registry.id_for("L");

        let mut pair_set = ExternalSortedSet::new(tmp(), 1024);
        pair_set.insert(pair(lib, 500, 900, 200, 0, 1)).unwrap();
        let mut fragment_set = ExternalSortedSet::new(tmp(), 1024);
        fragment_set.insert(frag(lib, 500, 200, 0, true)).unwrap();
        fragment_set.insert(frag(lib, 500, 90, 2, false)).unwrap();

        let outcome = mark_duplicates(pair_set, fragment_set, &registry, tmp(), 1024, Some(100), 8_000).unwrap();
        let dups: Vec<u64> = outcome.duplicate_ordinals.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(dups, vec![2]);

        let m = &outcome.metrics_by_library_id[&lib];
        assert_eq!(m.unpaired_duplicates, 1);
        assert_eq!(m.pair_duplicates, 0);
    }

    #[test]
    fn fragment_only_chunk_picks_highest_score() {
        let mut registry = LibraryRegistry::new();
        let lib = registry.id_for("L");

        let pair_set = ExternalSortedSet::new(tmp(), 1024);
        let mut fragment_set = ExternalSortedSet::new(tmp(), 1024);
        fragment_set.insert(frag(lib, 500, 50, 0, false)).unwrap();
        fragment_set.insert(frag(lib, 500, 90, 1, false)).unwrap();
        fragment_set.insert(frag(lib, 500, 10, 2, false)).unwrap();

        let outcome = mark_duplicates(pair_set, fragment_set, &registry, tmp(), 1024, Some(100), 8_000).unwrap();
        let mut dups: Vec<u64> = outcome.duplicate_ordinals.finish().unwrap().map(|r| r.unwrap()).collect();
        dups.sort_unstable();
        assert_eq!(dups, vec![0, 2], "ordinal 1 has the highest score and is kept");
    }

    #[test]
    fn single_member_chunk_is_never_a_duplicate() {
        let mut registry = LibraryRegistry::new();
        let lib = registry.id_for("L");
        let pair_set = ExternalSortedSet::new(tmp(), 1024);
        let mut fragment_set = ExternalSortedSet::new(tmp(), 1024);
        fragment_set.insert(frag(lib, 500, 50, 0, false)).unwrap();

        let outcome = mark_duplicates(pair_set, fragment_set, &registry, tmp(), 1024, Some(100), 8_000).unwrap();
        let dups: Vec<u64> = outcome.duplicate_ordinals.finish().unwrap().map(|r| r.unwrap()).collect();
        assert!(dups.is_empty());
    }

    #[test]
    fn scenario_s3_optical_count_unaffected_by_which_member_wins() {
        // Three duplicate pairs, same tile, at x = {0, 10, 10010}; the x=10
        // and x=10010 reads are 10000px apart (not optical), x=0 and x=10
        // are 10px apart (optical). The highest-scoring (winning) read is
        // the one at x=0, so a marker that drops the winner before running
        // the optical finder would see only the {10, 10010} pair and report
        // zero optical duplicates instead of the required one.
        let mut registry = LibraryRegistry::new();
        let lib = registry.id_for("L");

        let mut pair_set = ExternalSortedSet::new(tmp(), 1024);
        pair_set.insert(pair_at(lib, 100, 300, 300, 0, 1, 5, 0, 0)).unwrap(); // winner
        pair_set.insert(pair_at(lib, 100, 300, 200, 2, 3, 5, 10, 0)).unwrap();
        pair_set.insert(pair_at(lib, 100, 300, 100, 4, 5, 5, 10010, 0)).unwrap();
        let fragment_set = ExternalSortedSet::new(tmp(), 1024);

        let outcome = mark_duplicates(pair_set, fragment_set, &registry, tmp(), 1024, Some(100), 8_000).unwrap();
        let mut dups: Vec<u64> = outcome.duplicate_ordinals.finish().unwrap().map(|r| r.unwrap()).collect();
        dups.sort_unstable();
        assert_eq!(dups, vec![2, 3, 4, 5], "winner (ordinals 0,1) is never marked a duplicate");

        let m = &outcome.metrics_by_library_id[&lib];
        assert_eq!(m.pair_duplicates, 4);
        assert_eq!(m.optical_pair_duplicates, 2, "one optical pair (x=0 vs x=10) -> 2 ends");
    }

    #[test]
    fn skip_optical_duplicates_leaves_optical_count_zero() {
        let mut registry = LibraryRegistry::new();
        let lib = registry.id_for("L");
        let mut pair_set = ExternalSortedSet::new(tmp(), 1024);
        pair_set.insert(pair(lib, 100, 300, 240, 0, 1)).unwrap();
        pair_set.insert(pair(lib, 100, 300, 160, 2, 3)).unwrap();
        let fragment_set = ExternalSortedSet::new(tmp(), 1024);

        let outcome = mark_duplicates(pair_set, fragment_set, &registry, tmp(), 1024, None, 8_000).unwrap();
        let m = &outcome.metrics_by_library_id[&lib];
        assert_eq!(m.pair_duplicates, 2);
        assert_eq!(m.optical_pair_duplicates, 0);
    }
}
