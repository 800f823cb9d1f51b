//! Separates optical duplicates from PCR duplicates within one equivalence
//! class (C7).
//!
//! Grounded on the sort-then-sweep-with-early-break shape of the teacher's
//! `identify_dups` PE-internal loop
//! (`examples/yukaiquan-rmdups/src/algorithm.rs`, the `while j < pes.len() &&
//! ...` loop), adapted from mate-position equality to 2-D pixel proximity.

/// One member of a duplicate cluster, as far as optical analysis cares.
///
/// `member_id` is an opaque tag the algorithm never reads or sorts on — it
/// exists purely so a caller can correlate the returned flags back to a
/// specific member after [`find_optical_duplicates`] reorders the slice in
/// place (e.g. so the duplicate marker can tell which flagged member is the
/// winner it must not count).
#[derive(Debug, Clone, Copy)]
pub struct PhysicalLocation {
    pub member_id: u64,
    pub read_group_ordinal: u16,
    pub tile: i16,
    pub x: i16,
    pub y: i16,
}

/// Flags which members of `cluster` are optical duplicates of an
/// earlier-ordered member (SPEC_FULL §4.6).
///
/// **Contract:** this function sorts `cluster` in place by `(read_group_ordinal,
/// tile, x, y)`. Callers must not rely on the slice's original order after
/// calling this — the index of the output bit matches the *post-sort*
/// position, not the caller's original position. The duplicate marker only
/// needs the *count* of optical flags, so it indexes the returned `Vec<bool>`
/// against the same (now-reordered) slice.
pub fn find_optical_duplicates(cluster: &mut [PhysicalLocation], pixel_distance: i32) -> Vec<bool> {
    cluster.sort_unstable_by_key(|p| (p.read_group_ordinal, p.tile, p.x, p.y));

    let n = cluster.len();
    let mut is_optical = vec![false; n];

    for i in 0..n {
        if cluster[i].tile < 0 {
            continue; // unknown physical location, SPEC_FULL B5
        }
        for j in (i + 1)..n {
            let a = &cluster[i];
            let b = &cluster[j];
            if a.read_group_ordinal != b.read_group_ordinal || a.tile != b.tile {
                break;
            }
            let dx = (b.x as i32) - (a.x as i32);
            if dx > pixel_distance {
                break;
            }
            let dy = ((b.y as i32) - (a.y as i32)).abs();
            if dy <= pixel_distance {
                is_optical[j] = true;
            }
        }
    }

    is_optical
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(rg: u16, tile: i16, x: i16, y: i16) -> PhysicalLocation {
        PhysicalLocation { member_id: 0, read_group_ordinal: rg, tile, x, y }
    }

    #[test]
    fn empty_cluster() {
        let mut c: Vec<PhysicalLocation> = vec![];
        assert_eq!(find_optical_duplicates(&mut c, 100), Vec::<bool>::new());
    }

    #[test]
    fn single_member_never_optical() {
        let mut c = vec![loc(0, 1, 50, 50)];
        assert_eq!(find_optical_duplicates(&mut c, 100), vec![false]);
    }

    #[test]
    fn close_pair_is_optical() {
        let mut c = vec![loc(0, 1, 50, 50), loc(0, 1, 60, 55)];
        let flags = find_optical_duplicates(&mut c, 100);
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn far_pair_is_not_optical() {
        let mut c = vec![loc(0, 1, 50, 50), loc(0, 1, 20000, 20000)];
        let flags = find_optical_duplicates(&mut c, 100);
        assert_eq!(flags, vec![false, false]);
    }

    #[test]
    fn negative_tile_never_flagged_b5() {
        let mut c = vec![loc(0, -1, 50, 50), loc(0, -1, 51, 51)];
        let flags = find_optical_duplicates(&mut c, 100);
        assert_eq!(flags, vec![false, false]);
    }

    #[test]
    fn scenario_s3_one_optical_one_pcr() {
        // Three duplicate pairs, same tile, pixel distances 10 and 10000.
        let mut c = vec![loc(0, 5, 0, 0), loc(0, 5, 10, 0), loc(0, 5, 10010, 0)];
        let flags = find_optical_duplicates(&mut c, 100);
        assert_eq!(flags.iter().filter(|&&b| b).count(), 1);
    }

    #[test]
    fn different_tiles_never_optical() {
        let mut c = vec![loc(0, 1, 50, 50), loc(0, 2, 50, 50)];
        let flags = find_optical_duplicates(&mut c, 100);
        assert_eq!(flags, vec![false, false]);
    }
}
