//! Error types for conditions `spec.md` §7 marks as recoverable.
//!
//! Conditions §7 marks "Fatal" or "Fatal assertion" are not represented
//! here — those are `assert!`/`panic!` at the call site, the same way the
//! original firmware's `assert(!"...")` calls and the teacher's
//! `debug_assert!` calls in `mm::page` never return a `Result`.

use core::fmt;

/// Recoverable error conditions surfaced by the translator and bad-block
/// machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtlError {
    /// A logical slice address fell outside `[0, SLICES_PER_SSD)`.
    ///
    /// `AddrTransWrite`/`AddrTransRead` in the original treat this as a
    /// fatal assertion (API misuse); this variant exists for the one
    /// caller-facing helper ([`crate::geometry::Geometry::check_lsa`]) that
    /// lets an embedder validate a host-supplied LBA before it would
    /// otherwise panic.
    LsaOutOfRange { lsa: u32, limit: u32 },

    /// `RemapBadBlock` ran out of spare blocks in a LUN for a given die;
    /// the affected virtual block stays bad and excluded from the free
    /// list, capacity is reduced, and `mbPerbadBlockSpace` reflects the
    /// deficit (spec.md §4.3, §7).
    NoReservedBlockAvailable { die: u32, block: u32 },

    /// A GC-mode [`crate::virtual_die::VirtualDie`] free-list pop found the
    /// list empty. Surfaced to the [`crate::gc::GcBackend`] rather than
    /// panicked so a caller-supplied policy can decide whether that is
    /// fatal (spec.md §7: "Free-block exhaustion (GC) — Pathological —
    /// Fatal", but the *decision* to treat it as fatal belongs to the GC
    /// collaborator, not to this core).
    FreeBlockExhausted { die: u32 },

    /// The persisted bad-block-table read for a die could not be
    /// classified as NORMAL/BAD at all (not even "table does not exist").
    /// Reserved for a stricter future BBT reader; today an ECC failure or
    /// garbage first byte is treated as "table does not exist" and
    /// silently triggers a rebuild (spec.md §4.2, §7), so this variant is
    /// never returned by the current `bbt` implementation.
    BadBlockTableCorrupt { die: u32 },
}

impl fmt::Display for FtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtlError::LsaOutOfRange { lsa, limit } => {
                write!(f, "logical slice address {lsa} is out of range (limit {limit})")
            }
            FtlError::NoReservedBlockAvailable { die, block } => {
                write!(f, "no reserved spare block available for die {die} block {block}")
            }
            FtlError::FreeBlockExhausted { die } => {
                write!(f, "free block list exhausted on die {die}")
            }
            FtlError::BadBlockTableCorrupt { die } => {
                write!(f, "bad block table for die {die} is corrupt")
            }
        }
    }
}

impl std::error::Error for FtlError {}
