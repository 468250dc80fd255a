//! The translator: owns every map and scalar named in `spec.md` §5's
//! "shared resources" list and exposes the upstream API of §6
//! (`spec.md` §4.7, §9 "Global mutable maps").

use log::{debug, info};

use crate::allocator::{self, AllocationTarget};
use crate::bbt::{self, BbtStorage};
use crate::error::FtlError;
use crate::gc::GcBackend;
use crate::geometry::{Geometry, LSA_NONE, VSA_FAIL, VSA_NONE};
use crate::nand::{BlockSpace, DataBufFormat, EccOpt, NandAddrKind, NandBackend, NandInfo, NandRequest, PhyOrgAddr, ReqCode, ReqOpt, ReqType, RowAddrDependencyCheck, VsaAddr};
use crate::phy_block::{BlockHealth, PhyBlockMap};
use crate::slice_map::{LogicalSliceMap, VirtualSliceMap};
use crate::cursor::LogicalBlockCursorMap;
use crate::virtual_block::VirtualBlockMap;
use crate::virtual_die::{put_to_fb_list, VirtualDieMap};

/// Operator boot choice (`spec.md` §6 "Operator surface", `SPEC_FULL.md`
/// §E.2). Console I/O itself is out of this core's scope; this enum is the
/// decision the console prompt used to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAction {
    /// Preserve on-NAND state; rebuild the bad-block table only if missing.
    Normal,
    /// Erase every physical block (including spares) and force a full
    /// bad-block-table rebuild.
    RebuildBadBlockTable,
}

/// Owns every map and scalar the translator API operates on.
pub struct Translator<N: NandBackend, G: GcBackend> {
    pub geo: Geometry,
    phy_blocks: PhyBlockMap,
    virtual_blocks: VirtualBlockMap,
    dies: VirtualDieMap,
    logical_slices: LogicalSliceMap,
    virtual_slices: VirtualSliceMap,
    cursors: LogicalBlockCursorMap,
    bbt_storage: BbtStorage,
    allocation_target: AllocationTarget,
    mb_per_bad_block_space: u32,
    nand: N,
    gc: G,
}

impl<N: NandBackend, G: GcBackend> Translator<N, G> {
    /// Constructs a `Translator` by running `spec.md` §4.7 `InitAddressMap`
    /// against a freshly built set of maps.
    pub fn new(geo: Geometry, nand: N, gc: G, boot: BootAction, is_physically_bad: &dyn Fn(u32, u32) -> bool) -> Self {
        let phy_blocks = PhyBlockMap::new(geo.user_dies(), geo.total_blocks_per_die());
        let virtual_blocks = VirtualBlockMap::new(geo.user_dies(), geo.user_blocks_per_die());
        let dies = VirtualDieMap::new(geo.user_dies());
        let cursors = LogicalBlockCursorMap::new(geo.logical_blocks_per_ssd());
        let bbt_storage = BbtStorage::new(geo.user_dies());
        let allocation_target = AllocationTarget::new(&geo);

        let mut translator = Translator {
            geo,
            phy_blocks,
            virtual_blocks,
            dies,
            logical_slices: LogicalSliceMap::new(0),
            virtual_slices: VirtualSliceMap::new(0),
            cursors,
            bbt_storage,
            allocation_target,
            mb_per_bad_block_space: 0,
            nand,
            gc,
        };
        translator.init_address_map(boot, is_physically_bad);
        translator
    }

    /// `spec.md` §4.7 `InitAddressMap`: build the slice maps fresh, then
    /// run `InitSliceMap` and `InitBlockDieMap`. The physical/virtual-block
    /// maps, cursor table, and BBT storage are already fresh from `new`'s
    /// construction, matching the original's single boot-time entry point
    /// that wires every region together before the first host request.
    fn init_address_map(&mut self, boot: BootAction, is_physically_bad: &dyn Fn(u32, u32) -> bool) {
        self.init_slice_map();
        self.init_block_die_map(boot, is_physically_bad);
    }

    /// `spec.md` §4.7 `InitSliceMap`: every LSA and VSA starts unmapped.
    fn init_slice_map(&mut self) {
        self.logical_slices = LogicalSliceMap::new(self.geo.slices_per_ssd());
        self.virtual_slices = VirtualSliceMap::new(self.geo.slices_per_ssd());
    }

    /// `spec.md` §4.7 `InitBlockDieMap`: the full boot orchestration.
    fn init_block_die_map(&mut self, boot: BootAction, is_physically_bad: &dyn Fn(u32, u32) -> bool) {
        let mut erase_user_space_after = true;
        if boot == BootAction::RebuildBadBlockTable {
            self.erase_total_block_space();
            erase_user_space_after = false;
        }

        crate::virtual_die::init_die_map(&mut self.dies);

        bbt::recover_bad_block_table(&mut self.phy_blocks, &mut self.bbt_storage, &self.geo, is_physically_bad);

        // Prevent the BBT's own physical block from ever being targeted by
        // the user virtual-block space (`spec.md` §4.3).
        for die in 0..self.geo.user_dies() {
            let bbt_block = self.phy_blocks.bbt_info[die as usize].phy_block;
            self.phy_blocks.get_mut(die, bbt_block).health = BlockHealth::Bad;
        }

        self.mb_per_bad_block_space = bbt::remap_bad_block(&mut self.phy_blocks, &self.geo, bbt::MB_PER_BLOCK);

        self.init_block_map();

        if erase_user_space_after {
            self.erase_user_block_space();
        }

        self.init_current_block_of_die_map();
    }

    /// `spec.md` §4.4 `InitBlockMap`.
    fn init_block_map(&mut self) {
        for die in 0..self.geo.user_dies() {
            for vb in 0..self.geo.user_blocks_per_die() {
                let pb = self.geo.vblock_to_pblock_of_tbs(vb);
                let final_pb = self.phy_blocks.get(die, pb).remapped_phy_block;
                let bad = self.phy_blocks.get(die, final_pb).health.is_bad();

                let vblock = self.virtual_blocks.get_mut(die, vb);
                vblock.bad = bad;
                vblock.free = true;
                vblock.invalid_slice_cnt = 0;
                vblock.current_page.reset();
                vblock.erase_cnt = 0;

                if bad {
                    vblock.prev_block = crate::geometry::BLOCK_NONE;
                    vblock.next_block = crate::geometry::BLOCK_NONE;
                    vblock.free = false;
                } else {
                    put_to_fb_list(&mut self.dies, &mut self.virtual_blocks, die, vb);
                }
            }
        }
    }

    /// `spec.md` §4.4 `InitCurrentBlockOfDieMap`.
    fn init_current_block_of_die_map(&mut self) {
        for die in 0..self.geo.user_dies() {
            let block = crate::virtual_die::get_from_fb_list(
                &mut self.dies,
                &mut self.virtual_blocks,
                die,
                crate::virtual_die::FreeBlockMode::Normal,
                allocator::reserved_free_block_count(&self.geo),
            );
            assert_ne!(block, crate::geometry::BLOCK_FAIL, "no free block available on die {die} at boot");
            self.dies.get_mut(die).current_block = block;
        }
    }

    pub fn mb_per_bad_block_space(&self) -> u32 {
        self.mb_per_bad_block_space
    }

    /// `spec.md` §4.7 `AddrTransRead`.
    pub fn addr_trans_read(&self, lsa: u32) -> Result<u32, FtlError> {
        self.geo.check_lsa(lsa)?;
        let vsa = self.logical_slices.get(lsa);
        if vsa != VSA_NONE {
            debug!("translator: read lsa {lsa} -> vsa {vsa}");
            Ok(vsa)
        } else {
            debug!("translator: read lsa {lsa} has no mapped vsa");
            Ok(VSA_FAIL)
        }
    }

    /// `spec.md` §4.7 `AddrTransWrite`.
    pub fn addr_trans_write(&mut self, lsa: u32) -> u32 {
        assert!(lsa < self.geo.slices_per_ssd(), "logical address {lsa} exceeds SLICES_PER_SSD");

        let lblk = self.geo.addr_to_block(lsa);

        let old = self.logical_slices.get(lsa);
        if old != VSA_NONE {
            assert_eq!(self.virtual_slices.get(old), lsa, "reverse map disagrees with forward map for lsa {lsa}");
            self.invalidate_old_vsa(lsa);
        }

        if self.cursors.get(lblk).base_vsa == VSA_NONE {
            let base_vsa = allocator::find_free_virtual_block(&self.geo, &mut self.dies, &mut self.virtual_blocks, &mut self.gc, &mut self.allocation_target)
                .expect("free-block exhaustion (Normal) is fatal: reserve invariant violated and GC could not recover a block");
            let c = self.cursors.get_mut(lblk);
            c.base_vsa = base_vsa;
            c.next_offset = 0;
            info!("translator: new block allocated for logical block {lblk}: base vsa {base_vsa}");
        }

        let cursor = *self.cursors.get(lblk);
        assert!(cursor.next_offset < self.geo.slices_per_block(), "logical block {lblk} already fully populated");

        let die = self.geo.vsa_to_vdie(cursor.base_vsa);
        let block = self.geo.vsa_to_vblock(cursor.base_vsa);
        let vsa = self.geo.vorg_to_vsa(die, block, cursor.next_offset);
        let next_offset = cursor.next_offset + 1;
        self.cursors.get_mut(lblk).next_offset = next_offset;

        self.logical_slices.set(lsa, vsa);
        self.virtual_slices.set(vsa, lsa);

        let programmed_pages = crate::util::ceil_div(next_offset as usize, self.geo.slices_per_page as usize) as u16;
        let vblock = self.virtual_blocks.get_mut(die, block);
        if vblock.current_page.count() < programmed_pages {
            vblock.current_page.set_count(programmed_pages);
        }

        debug!("translator: write lsa {lsa} -> vsa {vsa} (logical block {lblk}, slot {})", next_offset - 1);

        if next_offset == self.geo.slices_per_block() {
            self.virtual_blocks.get_mut(die, block).current_page.unlock();
            info!("translator: logical block {lblk} fully populated (base vsa {})", cursor.base_vsa);
            let c = self.cursors.get_mut(lblk);
            c.base_vsa = VSA_NONE;
            c.next_offset = 0;
        }

        vsa
    }

    /// `spec.md` §4.7 `InvalidateOldVsa`.
    pub fn invalidate_old_vsa(&mut self, lsa: u32) {
        let vsa = self.logical_slices.get(lsa);
        if vsa == VSA_NONE {
            return;
        }
        if self.virtual_slices.get(vsa) != lsa {
            return;
        }

        let die = self.geo.vsa_to_vdie(vsa);
        let block = self.geo.vsa_to_vblock(vsa);

        self.gc.selective_get_from_gc_victim_list(die, block);
        let vblock = self.virtual_blocks.get_mut(die, block);
        vblock.invalid_slice_cnt += 1;
        let invalid_slice_cnt = vblock.invalid_slice_cnt;
        self.logical_slices.set(lsa, VSA_NONE);
        self.gc.put_to_gc_victim_list(die, block, invalid_slice_cnt);
    }

    /// `spec.md` §4.7 `InvalidateOldVsaForBlockLevel`: same invalidation,
    /// provided for call sites that already have `lsa` at hand.
    pub fn invalidate_old_vsa_for_block_level(&mut self, lsa: u32) {
        self.invalidate_old_vsa(lsa);
    }

    /// `spec.md` §4.7 `InvalidateOldVsaBlock`.
    pub fn invalidate_old_vsa_block(&mut self, lblk: u32) {
        let spb = self.geo.slices_per_block();
        for offset in 0..spb {
            let lsa = lblk * spb + offset;
            self.invalidate_old_vsa(lsa);
        }
        self.cursors.reset(lblk);
    }

    /// `spec.md` §4.7 `EraseBlock`.
    pub fn erase_block(&mut self, die: u32, block: u32) {
        let programmed_pages = self.virtual_blocks.get(die, block).current_page.count() as u32;
        let vsa0 = self.geo.vorg_to_vsa(die, block, 0);

        let tag = self.nand.get_from_free_req_q();
        self.nand.select_low_level_req_q(
            tag,
            NandRequest {
                req_type: ReqType::Nand,
                req_code: ReqCode::Erase,
                req_opt: ReqOpt {
                    data_buf_format: DataBufFormat::None,
                    nand_addr: NandAddrKind::Vsa,
                    nand_ecc: EccOpt::Off,
                    row_addr_dependency_check: RowAddrDependencyCheck::Check,
                    block_space: BlockSpace::Main,
                },
                data_buf_addr: None,
                nand_info: NandInfo::Vsa(VsaAddr { virtual_slice_addr: vsa0, programmed_page_cnt: programmed_pages }),
            },
        );
        self.nand.sync_all_low_level_req_done();

        let vblock = self.virtual_blocks.get_mut(die, block);
        vblock.free = true;
        vblock.erase_cnt += 1;
        vblock.invalid_slice_cnt = 0;
        vblock.current_page.reset();
        put_to_fb_list(&mut self.dies, &mut self.virtual_blocks, die, block);

        for offset in 0..self.geo.slices_per_block() {
            let vsa = self.geo.vorg_to_vsa(die, block, offset);
            self.virtual_slices.set(vsa, LSA_NONE);
        }
    }

    /// `spec.md` §4.7 `EraseTotalBlockSpace`: boot/factory-reset only; does
    /// not update in-memory metadata.
    pub fn erase_total_block_space(&mut self) {
        info!("translator: erasing total block space");
        for block in 0..self.geo.total_blocks_per_die() {
            for die in 0..self.geo.user_dies() {
                let tag = self.nand.get_from_free_req_q();
                self.nand.select_low_level_req_q(
                    tag,
                    NandRequest {
                        req_type: ReqType::Nand,
                        req_code: ReqCode::Erase,
                        req_opt: ReqOpt {
                            data_buf_format: DataBufFormat::None,
                            nand_addr: NandAddrKind::PhyOrg,
                            nand_ecc: EccOpt::Off,
                            row_addr_dependency_check: RowAddrDependencyCheck::None,
                            block_space: BlockSpace::Total,
                        },
                        data_buf_addr: None,
                        nand_info: NandInfo::PhyOrg(PhyOrgAddr {
                            physical_ch: self.geo.vdie_to_pch(die),
                            physical_way: self.geo.vdie_to_pway(die),
                            physical_block: block,
                            physical_page: 0,
                        }),
                    },
                );
            }
        }
        self.nand.sync_all_low_level_req_done();
    }

    /// `spec.md` §4.7 `EraseUserBlockSpace`: boot/factory-reset only; does
    /// not update in-memory metadata.
    pub fn erase_user_block_space(&mut self) {
        info!("translator: erasing user block space");
        for block in 0..self.geo.user_blocks_per_die() {
            for die in 0..self.geo.user_dies() {
                if self.virtual_blocks.get(die, block).bad {
                    continue;
                }
                let tag = self.nand.get_from_free_req_q();
                self.nand.select_low_level_req_q(
                    tag,
                    NandRequest {
                        req_type: ReqType::Nand,
                        req_code: ReqCode::Erase,
                        req_opt: ReqOpt {
                            data_buf_format: DataBufFormat::None,
                            nand_addr: NandAddrKind::Vsa,
                            nand_ecc: EccOpt::Off,
                            row_addr_dependency_check: RowAddrDependencyCheck::None,
                            block_space: BlockSpace::Main,
                        },
                        data_buf_addr: None,
                        nand_info: NandInfo::Vsa(VsaAddr { virtual_slice_addr: self.geo.vorg_to_vsa(die, block, 0), programmed_page_cnt: 0 }),
                    },
                );
            }
        }
        self.nand.sync_all_low_level_req_done();
    }

    /// Accessors used by GC/test harnesses that need direct map access
    /// beyond the upstream API (`spec.md` §6 names only the upstream API as
    /// host-facing; tests asserting invariants need the raw state).
    pub fn virtual_block(&self, die: u32, block: u32) -> &crate::virtual_block::VirtualBlock {
        self.virtual_blocks.get(die, block)
    }

    pub fn virtual_die(&self, die: u32) -> &crate::virtual_die::VirtualDie {
        self.dies.get(die)
    }

    pub fn phy_block(&self, die: u32, phy_block: u32) -> &crate::phy_block::PhysicalBlock {
        self.phy_blocks.get(die, phy_block)
    }

    pub fn reverse_map(&self, vsa: u32) -> u32 {
        self.virtual_slices.get(vsa)
    }

    pub fn gc_mut(&mut self) -> &mut G {
        &mut self.gc
    }

    pub fn logical_block_cursor(&self, lblk: u32) -> &crate::cursor::LogicalBlockCursor {
        self.cursors.get(lblk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::SimpleGc;
    use crate::geometry::tiny_geometry;
    use crate::nand::MemNand;

    fn boot() -> Translator<MemNand, SimpleGc> {
        let geo = tiny_geometry();
        let nand = MemNand::new(&geo, 16);
        let gc = SimpleGc::new(&geo);
        Translator::new(geo, nand, gc, BootAction::Normal, &|_, _| false)
    }

    #[test]
    fn e1_fresh_init_read_then_write_then_read() {
        let mut t = boot();
        assert_eq!(t.addr_trans_read(0).unwrap(), VSA_FAIL);
        let v0 = t.addr_trans_write(0);
        assert_eq!(t.addr_trans_read(0).unwrap(), v0);
    }

    #[test]
    fn e2_sequential_fill_of_logical_block_clears_cursor() {
        let mut t = boot();
        let spb = t.geo.slices_per_block();
        let mut vsas = Vec::new();
        for lsa in 0..spb {
            vsas.push(t.addr_trans_write(lsa));
        }
        let die = t.geo.vsa_to_vdie(vsas[0]);
        let block = t.geo.vsa_to_vblock(vsas[0]);
        for v in &vsas {
            assert_eq!(t.geo.vsa_to_vdie(*v), die);
            assert_eq!(t.geo.vsa_to_vblock(*v), block);
        }
        assert_eq!(t.logical_block_cursor(0).base_vsa, VSA_NONE);
    }

    #[test]
    fn e3_die_spread_channel_major() {
        let mut t = boot();
        let spb = t.geo.slices_per_block();
        let v0 = t.addr_trans_write(0);
        let v1 = t.addr_trans_write(spb * 4);
        let v2 = t.addr_trans_write(spb * 8);
        let v3 = t.addr_trans_write(spb * 12);
        let dies: std::collections::HashSet<u32> =
            [v0, v1, v2, v3].iter().map(|&v| t.geo.vsa_to_vdie(v)).collect();
        assert_eq!(dies.len(), 4);
    }

    #[test]
    fn e4_rewrite_invalidates_old_vsa() {
        let mut t = boot();
        let v0 = t.addr_trans_write(0);
        let v1 = t.addr_trans_write(0);
        assert_ne!(v0, v1);
        let die = t.geo.vsa_to_vdie(v0);
        let block = t.geo.vsa_to_vblock(v0);
        assert_eq!(t.virtual_block(die, block).invalid_slice_cnt, 1);
    }

    #[test]
    fn e6_bad_block_excluded_from_free_list() {
        let geo = tiny_geometry();
        let nand = MemNand::new(&geo, 16);
        let gc = SimpleGc::new(&geo);
        let t = Translator::new(geo, nand, gc, BootAction::Normal, &|die, pb| die == 0 && pb == 2);
        assert!(t.virtual_block(0, 2).bad);
        assert!(!t.virtual_block(0, 2).free);
        // tiny_geometry's one spare per LUN is already consumed remapping each
        // die's own BBT-storage block (always phy_block 0, forced bad before
        // RemapBadBlock runs); the test's injected bad block at (0, 2) then
        // has no spare left, so the deficit is 1 unresolved block * 4 dies *
        // MB_PER_BLOCK.
        assert_eq!(t.mb_per_bad_block_space(), 4);
    }
}
