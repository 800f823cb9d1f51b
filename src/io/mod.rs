//! Concrete realizations of external interfaces (SPEC_FULL §6).
//!
//! `bam` is the only submodule permitted to name the `noodles` crate
//! directly; everything else in this crate talks to alignment records
//! through the `record` module's traits.

pub mod bam;
