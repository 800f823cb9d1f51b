//! The geometric identity of a fragment end or read pair (C1).
//!
//! A `Fingerprint` is the unit the duplicate marker groups by equality. Two
//! fingerprints that compare equal on their key fields (library, positions,
//! orientation) came from the same original molecule as far as this engine
//! is concerned, regardless of read name or sequence.

use std::io::{Read, Write};

use anyhow::Result;

use crate::external_sort::SortRecord;

/// Orientation of a fragment end or a pair, encoded per the invariant in
/// SPEC_FULL §3 F-2: for pair variants, bit 0 is the strand of the
/// coordinate-first end and bit 1 the strand of the coordinate-second end.
/// Fragment variants (`F`/`R`) set bit 2 to keep every variant's discriminant
/// distinct from the pair variants that otherwise reuse bits 0-1 — a single
/// `#[repr(u8)]` enum cannot assign `F`/`FF` (or `R`/`RF`) the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Orientation {
    F = 0b000,
    R = 0b001,
    FF = 0b100,
    FR = 0b110,
    RF = 0b101,
    RR = 0b111,
}

impl Orientation {
    /// Build pair orientation from the two ends' strands, in coordinate order.
    pub fn from_pair(first_reverse: bool, second_reverse: bool) -> Self {
        match (first_reverse, second_reverse) {
            (false, false) => Orientation::FF,
            (false, true) => Orientation::FR,
            (true, false) => Orientation::RF,
            (true, true) => Orientation::RR,
        }
    }

    pub fn from_fragment(reverse: bool) -> Self {
        if reverse { Orientation::R } else { Orientation::F }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0b000 => Orientation::F,
            0b001 => Orientation::R,
            0b100 => Orientation::FF,
            0b110 => Orientation::FR,
            0b101 => Orientation::RF,
            0b111 => Orientation::RR,
            _ => unreachable!("orientation byte must be one of the six encoded variants"),
        }
    }
}

/// Sentinel library id for reads with no attached read-group/library (§3).
pub const UNKNOWN_LIBRARY: u16 = 0;

/// A fragment-end or read-pair fingerprint (C1, SPEC_FULL §3).
///
/// Field declaration order here follows the teacher's `Metadata` layout for
/// readability, but the *sort key* is defined explicitly by [`Fingerprint::sort_key`]
/// and does NOT match declaration order — `score`, `tile`, `x`, `y`, and
/// `read_group_ordinal` never participate in ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub library_id: u16,
    pub r1_ref: i32,
    pub r1_pos: i32,
    pub r2_ref: i32,
    pub r2_pos: i32,
    pub orientation: Orientation,
    pub score: u16,
    pub read_group_ordinal: u16,
    pub tile: i16,
    pub x: i16,
    pub y: i16,
    pub ordinal_1: u64,
    pub ordinal_2: Option<u64>,
    /// Only meaningful for fragment-set entries: true when the underlying
    /// record is flagged paired with a mapped mate, regardless of whether the
    /// mate was actually observed before end of input (SPEC_FULL §4.9
    /// fragment-pass `contains_paired`). Always true for pair-set entries.
    pub is_member_of_pair: bool,
}

impl Fingerprint {
    /// Construct a single-end (fragment) fingerprint.
    #[allow(clippy::too_many_arguments)]
    pub fn new_fragment(
        library_id: u16,
        r1_ref: i32,
        r1_pos: i32,
        reverse: bool,
        score: u32,
        read_group_ordinal: u16,
        tile: i16,
        x: i16,
        y: i16,
        ordinal_1: u64,
        is_member_of_pair: bool,
    ) -> Self {
        Self {
            library_id,
            r1_ref,
            r1_pos,
            r2_ref: -1,
            r2_pos: 0,
            orientation: Orientation::from_fragment(reverse),
            score: saturate_score(score),
            read_group_ordinal,
            tile,
            x,
            y,
            ordinal_1,
            ordinal_2: None,
            is_member_of_pair,
        }
    }

    /// True for a fingerprint representing a completed read pair (both ends merged).
    pub fn is_paired(&self) -> bool {
        self.ordinal_2.is_some()
    }

    /// The key that defines duplicate-class membership for pairs: everything
    /// except `ordinal_1`/`ordinal_2` (SPEC_FULL §4.9 pair-pass chunk key).
    pub fn pair_class_key(&self) -> (u16, i32, i32, u8, i32, i32) {
        (
            self.library_id,
            self.r1_ref,
            self.r1_pos,
            self.orientation.as_u8(),
            self.r2_ref,
            self.r2_pos,
        )
    }

    /// The key that defines duplicate-class membership for fragments: `r2_*`
    /// is deliberately excluded (SPEC_FULL §4.9 fragment-pass chunk key).
    pub fn fragment_class_key(&self) -> (u16, i32, i32, u8) {
        (self.library_id, self.r1_ref, self.r1_pos, self.orientation.as_u8())
    }

    /// Full comparator key used to order the external sorted sets (SPEC_FULL §4.9).
    fn sort_key(&self) -> (u16, i32, i32, u8, i32, i32, u64, u64) {
        (
            self.library_id,
            self.r1_ref,
            self.r1_pos,
            self.orientation.as_u8(),
            self.r2_ref,
            self.r2_pos,
            self.ordinal_1,
            self.ordinal_2.unwrap_or(0),
        )
    }
}

/// Saturate a running base-quality sum into `u16`, per SPEC_FULL §9: the
/// upstream accumulator overflows a 16-bit counter on long high-quality
/// reads; this implementation saturates instead of wrapping.
pub fn saturate_score(score: u32) -> u16 {
    score.min(u16::MAX as u32) as u16
}

impl PartialOrd for Fingerprint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fingerprint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl SortRecord for Fingerprint {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.library_id.to_le_bytes())?;
        w.write_all(&self.r1_ref.to_le_bytes())?;
        w.write_all(&self.r1_pos.to_le_bytes())?;
        w.write_all(&self.r2_ref.to_le_bytes())?;
        w.write_all(&self.r2_pos.to_le_bytes())?;
        w.write_all(&[self.orientation.as_u8()])?;
        w.write_all(&self.score.to_le_bytes())?;
        w.write_all(&self.read_group_ordinal.to_le_bytes())?;
        w.write_all(&self.tile.to_le_bytes())?;
        w.write_all(&self.x.to_le_bytes())?;
        w.write_all(&self.y.to_le_bytes())?;
        w.write_all(&self.ordinal_1.to_le_bytes())?;
        let (has_ordinal_2, ordinal_2) = match self.ordinal_2 {
            Some(v) => (1u8, v),
            None => (0u8, 0u64),
        };
        w.write_all(&[has_ordinal_2])?;
        w.write_all(&ordinal_2.to_le_bytes())?;
        w.write_all(&[self.is_member_of_pair as u8])?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>> {
        let mut buf2 = [0u8; 2];
        if r.read_exact(&mut buf2).is_err() {
            return Ok(None);
        }
        let library_id = u16::from_le_bytes(buf2);

        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let r1_ref = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let r1_pos = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let r2_ref = i32::from_le_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let r2_pos = i32::from_le_bytes(buf4);

        let mut buf1 = [0u8; 1];
        r.read_exact(&mut buf1)?;
        let orientation = Orientation::from_u8(buf1[0]);

        r.read_exact(&mut buf2)?;
        let score = u16::from_le_bytes(buf2);
        r.read_exact(&mut buf2)?;
        let read_group_ordinal = u16::from_le_bytes(buf2);

        r.read_exact(&mut buf2)?;
        let tile = i16::from_le_bytes(buf2);
        r.read_exact(&mut buf2)?;
        let x = i16::from_le_bytes(buf2);
        r.read_exact(&mut buf2)?;
        let y = i16::from_le_bytes(buf2);

        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let ordinal_1 = u64::from_le_bytes(buf8);

        r.read_exact(&mut buf1)?;
        let has_ordinal_2 = buf1[0] == 1;
        r.read_exact(&mut buf8)?;
        let ordinal_2_raw = u64::from_le_bytes(buf8);
        let ordinal_2 = has_ordinal_2.then_some(ordinal_2_raw);

        r.read_exact(&mut buf1)?;
        let is_member_of_pair = buf1[0] == 1;

        Ok(Some(Fingerprint {
            library_id,
            r1_ref,
            r1_pos,
            r2_ref,
            r2_pos,
            orientation,
            score,
            read_group_ordinal,
            tile,
            x,
            y,
            ordinal_1,
            ordinal_2,
            is_member_of_pair,
        }))
    }
}
