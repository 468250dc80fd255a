//! Geometry & address arithmetic.
//!
//! Pure, total functions translating between the host-visible logical slice
//! address space and the physical geometry of the NAND array
//! (channels × ways × dies × LUNs × blocks × pages × slices).
//!
//! The geometry itself (channel/way counts, blocks per LUN, pages per block,
//! ...) is a runtime-validated value rather than build-time constants — see
//! `SPEC_FULL.md` §B for why. Everything built on top of [`Geometry`] is a
//! pure function of it, mirroring how the teacher's `util::align` module is
//! a set of pure functions over an alignment order.

use crate::error::FtlError;

/// Sentinel meaning "no virtual slice address mapped".
pub const VSA_NONE: u32 = u32::MAX;
/// Sentinel returned by a failed read translation.
pub const VSA_FAIL: u32 = u32::MAX - 1;
/// Sentinel meaning "no logical slice address mapped" (reverse map is free).
pub const LSA_NONE: u32 = u32::MAX;
/// Sentinel meaning "no block" (free-list link, uninitialized cursor, ...).
pub const BLOCK_NONE: u32 = u32::MAX;
/// Sentinel returned when block allocation could not be satisfied.
pub const BLOCK_FAIL: u32 = u32::MAX - 1;

/// Geometry of the NAND array and the logical address spaces built on top
/// of it.
///
/// All fields are derived once at construction time by [`Geometry::new`] and
/// never change afterwards; every address-arithmetic function in this
/// module takes `&Geometry` rather than closing over globals, so a process
/// can host more than one geometry (e.g. a production-sized one and the
/// tiny one `spec.md` §8's end-to-end scenarios use) side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub user_channels: u32,
    pub user_ways: u32,
    pub luns_per_die: u32,
    pub user_blocks_per_lun: u32,
    /// Total blocks per LUN, including the reserved/spare region used by
    /// bad-block remapping.
    pub total_blocks_per_lun: u32,
    pub user_pages_per_block: u32,
    pub slices_per_page: u32,
}

impl Geometry {
    /// Validate and construct a geometry.
    ///
    /// # Panics
    /// Panics if any of the invariants required by `spec.md` §3 do not
    /// hold: `user_pages_per_block <= 2^15 - 1`, `total_blocks_per_lun >
    /// user_blocks_per_lun` (there must be at least one spare block per
    /// LUN), and no field may be zero.
    pub fn new(
        user_channels: u32,
        user_ways: u32,
        luns_per_die: u32,
        user_blocks_per_lun: u32,
        total_blocks_per_lun: u32,
        user_pages_per_block: u32,
        slices_per_page: u32,
    ) -> Self {
        assert!(user_channels > 0 && user_ways > 0, "empty die array");
        assert!(luns_per_die > 0, "a die needs at least one LUN");
        assert!(user_blocks_per_lun > 0, "a LUN needs at least one user block");
        assert!(
            total_blocks_per_lun > user_blocks_per_lun,
            "total_blocks_per_lun must reserve spare capacity beyond user_blocks_per_lun"
        );
        assert!(
            user_pages_per_block > 0 && user_pages_per_block <= 0x7FFF,
            "USER_PAGES_PER_BLOCK must fit the 15-bit programmed-page counter"
        );
        assert!(slices_per_page > 0, "a page needs at least one slice");

        Geometry {
            user_channels,
            user_ways,
            luns_per_die,
            user_blocks_per_lun,
            total_blocks_per_lun,
            user_pages_per_block,
            slices_per_page,
        }
    }

    #[inline(always)]
    pub const fn user_dies(&self) -> u32 {
        self.user_channels * self.user_ways
    }

    #[inline(always)]
    pub const fn user_blocks_per_die(&self) -> u32 {
        self.user_blocks_per_lun * self.luns_per_die
    }

    #[inline(always)]
    pub const fn total_blocks_per_die(&self) -> u32 {
        self.total_blocks_per_lun * self.luns_per_die
    }

    #[inline(always)]
    pub const fn slices_per_block(&self) -> u32 {
        self.user_pages_per_block * self.slices_per_page
    }

    #[inline(always)]
    pub fn logical_blocks_per_ssd(&self) -> u32 {
        self.user_blocks_per_die() * self.user_dies()
    }

    #[inline(always)]
    pub fn slices_per_ssd(&self) -> u32 {
        self.logical_blocks_per_ssd() * self.slices_per_block()
    }

    /// `die mod USER_CHANNELS`.
    #[inline(always)]
    pub fn vdie_to_pch(&self, die: u32) -> u32 {
        die % self.user_channels
    }

    /// `die / USER_CHANNELS`.
    #[inline(always)]
    pub fn vdie_to_pway(&self, die: u32) -> u32 {
        die / self.user_channels
    }

    /// `way * USER_CHANNELS + ch`.
    #[inline(always)]
    pub fn pcw_to_vdie(&self, ch: u32, way: u32) -> u32 {
        way * self.user_channels + ch
    }

    /// Pack `(die, vblock, page_or_slice)` into an opaque virtual slice
    /// address. The encoding only needs to be bijective over valid inputs;
    /// this crate uses a fixed-width positional encoding
    /// `die * user_blocks_per_die * slices_per_block + vblock *
    /// slices_per_block + offset`.
    #[inline]
    pub fn vorg_to_vsa(&self, die: u32, vblock: u32, offset: u32) -> u32 {
        debug_assert!(die < self.user_dies());
        debug_assert!(vblock < self.user_blocks_per_die());
        debug_assert!(offset < self.slices_per_block());
        die * self.user_blocks_per_die() * self.slices_per_block()
            + vblock * self.slices_per_block()
            + offset
    }

    #[inline]
    pub fn vsa_to_vdie(&self, vsa: u32) -> u32 {
        vsa / (self.user_blocks_per_die() * self.slices_per_block())
    }

    #[inline]
    pub fn vsa_to_vblock(&self, vsa: u32) -> u32 {
        (vsa / self.slices_per_block()) % self.user_blocks_per_die()
    }

    #[inline]
    pub fn vsa_to_vpage(&self, vsa: u32) -> u32 {
        (vsa % self.slices_per_block()) / self.slices_per_page
    }

    /// Map a user-visible virtual-block index into the total-block-space
    /// index of the corresponding physical block in the same LUN, skipping
    /// the reserved/spare region of each LUN.
    #[inline]
    pub fn vblock_to_pblock_of_tbs(&self, vblock: u32) -> u32 {
        let lun = vblock / self.user_blocks_per_lun;
        let within_lun = vblock % self.user_blocks_per_lun;
        lun * self.total_blocks_per_lun + within_lun
    }

    /// Convert an LSB-only page index (used for bad-block-table durability)
    /// into the full virtual contiguous page numbering.
    ///
    /// This crate's simulated NAND treats every page as LSB-capable (no
    /// MLC/TLC LSB/MSB split is modeled), so the mapping is the identity;
    /// the function exists so callers never need to special-case a future
    /// backend that does model multi-bit cells.
    #[inline(always)]
    pub fn plsb_page_to_vpage(&self, lsb_page: u32) -> u32 {
        lsb_page
    }

    #[inline(always)]
    pub fn vpage_to_plsb_page(&self, vpage: u32) -> u32 {
        vpage
    }

    /// `lsa / SLICES_PER_BLOCK`.
    #[inline(always)]
    pub fn addr_to_block(&self, lsa: u32) -> u32 {
        lsa / self.slices_per_block()
    }

    /// `lsa mod SLICES_PER_BLOCK`.
    #[inline(always)]
    pub fn addr_to_offset(&self, lsa: u32) -> u32 {
        lsa % self.slices_per_block()
    }

    /// Bounds-check an LSA against `SLICES_PER_SSD`.
    ///
    /// `spec.md` §4.7 treats LSA-out-of-range as a fatal assertion, not a
    /// recoverable error, so callers that must not panic (e.g. a future
    /// host-facing wrapper around this core) should check
    /// `lsa < self.slices_per_ssd()` themselves before calling into the
    /// translator; this helper exists for the one call site
    /// (`Translator::addr_trans_read`) that needs a non-panicking variant
    /// to return [`FtlError::LsaOutOfRange`] for host-read-of-bad-LBA paths
    /// that would otherwise crash a caller that can recover.
    #[inline]
    pub fn check_lsa(&self, lsa: u32) -> Result<(), FtlError> {
        if lsa < self.slices_per_ssd() {
            Ok(())
        } else {
            Err(FtlError::LsaOutOfRange { lsa, limit: self.slices_per_ssd() })
        }
    }
}

#[cfg(test)]
pub(crate) fn tiny_geometry() -> Geometry {
    // 2 channels x 2 ways = 4 dies, 1 LUN/die, 4 user blocks/die + 1 spare,
    // 4 pages/block, 1 slice/page -> matches spec.md §8's E1-E6 scenarios.
    Geometry::new(2, 2, 1, 4, 5, 4, 1)
}
