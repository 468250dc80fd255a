//! Block/slice allocation (`spec.md` §4.6).
//!
//! These are free functions rather than methods on `Translator` so the GC
//! backend can call `find_free_virtual_slice_for_gc` without borrowing the
//! whole translator — the same "operate on the specific maps you need"
//! shape as `virtual_die::put_to_fb_list`/`get_from_fb_list`.

use log::{info, warn};

use crate::error::FtlError;
use crate::geometry::{Geometry, BLOCK_FAIL};
use crate::gc::GcBackend;
use crate::virtual_block::VirtualBlockMap;
use crate::virtual_die::{get_from_fb_list, FreeBlockMode, VirtualDieMap};

/// Round-robin cursor over (channel, way), advanced channel-major.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinCursor {
    target_ch: u32,
    target_way: u32,
}

/// Returns the die the cursor currently points at, then advances it:
/// channel first within `[0, USER_CHANNELS)`, wrapping to the next way
/// modulo `USER_WAYS` (`spec.md` §4.6).
pub fn find_die_for_free_slice_allocation(geo: &Geometry, cursor: &mut RoundRobinCursor) -> u32 {
    let target_die = geo.pcw_to_vdie(cursor.target_ch, cursor.target_way);

    if cursor.target_ch != geo.user_channels - 1 {
        cursor.target_ch += 1;
    } else {
        cursor.target_ch = 0;
        cursor.target_way = (cursor.target_way + 1) % geo.user_ways;
    }

    target_die
}

/// `sliceAllocationTargetDie` plus the round-robin state it is cached from.
/// The original caches the next target die eagerly in a scalar every time a
/// block/slice allocation completes, rather than recomputing it lazily; this
/// struct keeps that scalar and its cursor together so callers can't update
/// one without the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationTarget {
    pub die: u32,
    cursor: RoundRobinCursor,
}

impl AllocationTarget {
    pub fn new(geo: &Geometry) -> Self {
        let mut cursor = RoundRobinCursor::default();
        let die = find_die_for_free_slice_allocation(geo, &mut cursor);
        AllocationTarget { die, cursor }
    }

    fn advance(&mut self, geo: &Geometry) {
        self.die = find_die_for_free_slice_allocation(geo, &mut self.cursor);
    }
}

/// Block-level reservation: dequeue (or GC-produce) a block with zero
/// programmed pages and no block-level lock, reserve it for block-level
/// writes, and return its base VSA (`spec.md` §4.6 `FindFreeVirtualBlock`).
///
/// Returns [`FtlError::FreeBlockExhausted`] if the GC collaborator could not
/// recover a block either; `spec.md` §7 marks that condition fatal, so
/// callers that must honor that should `.expect()` it rather than try to
/// recover.
pub fn find_free_virtual_block(
    geo: &Geometry,
    die_map: &mut VirtualDieMap,
    blocks: &mut VirtualBlockMap,
    gc: &mut dyn GcBackend,
    target: &mut AllocationTarget,
) -> Result<u32, FtlError> {
    let die = target.die;
    let mut current_block = die_map.get(die).current_block;
    assert_ne!(current_block, BLOCK_FAIL, "current block for die {die} is BLOCK_FAIL");
    assert!(blocks.get(die, current_block).current_page.count() <= geo.user_pages_per_block as u16);

    while blocks.get(die, current_block).current_page.count() != 0 || blocks.get(die, current_block).current_page.is_locked() {
        let next = get_from_fb_list(die_map, blocks, die, FreeBlockMode::Normal, reserved_free_block_count(geo));
        if next != BLOCK_FAIL {
            current_block = next;
            die_map.get_mut(die).current_block = current_block;
            blocks.get_mut(die, current_block).current_page.reset();
        } else {
            warn!("allocator: free block short on die {die}, triggering GC");
            gc.garbage_collection(die_map, blocks, die)?;
            current_block = die_map.get(die).current_block;
            assert_ne!(current_block, BLOCK_FAIL, "GC failed to produce a current block for die {die}");
        }
        assert!(blocks.get(die, current_block).current_page.count() <= geo.user_pages_per_block as u16);
    }

    let base_vsa = geo.vorg_to_vsa(die, current_block, 0);
    blocks.get_mut(die, current_block).current_page.reset();
    blocks.get_mut(die, current_block).current_page.lock();

    target.advance(geo);

    info!("allocator: die {die} block {current_block} reserved for block-level write (VSA {base_vsa})");
    Ok(base_vsa)
}

/// Per-slice allocation on the round-robin target die (`spec.md` §4.6
/// `FindFreeVirtualSlice`); used for the slice-level path (GC copy-outs and
/// any partial-write fallback outside this core — `spec.md` §9's open
/// question on cursor interleaving).
pub fn find_free_virtual_slice(
    geo: &Geometry,
    die_map: &mut VirtualDieMap,
    blocks: &mut VirtualBlockMap,
    gc: &mut dyn GcBackend,
    target: &mut AllocationTarget,
) -> Result<u32, FtlError> {
    let die = target.die;
    let mut current_block = die_map.get(die).current_block;

    if blocks.get(die, current_block).current_page.count() == geo.user_pages_per_block as u16
        || blocks.get(die, current_block).current_page.is_locked()
    {
        let next = get_from_fb_list(die_map, blocks, die, FreeBlockMode::Normal, reserved_free_block_count(geo));
        if next != BLOCK_FAIL {
            current_block = next;
            die_map.get_mut(die).current_block = current_block;
        } else {
            gc.garbage_collection(die_map, blocks, die)?;
            current_block = die_map.get(die).current_block;

            if blocks.get(die, current_block).current_page.count() == geo.user_pages_per_block as u16
                || blocks.get(die, current_block).current_page.is_locked()
            {
                let retry = get_from_fb_list(die_map, blocks, die, FreeBlockMode::Normal, reserved_free_block_count(geo));
                assert_ne!(retry, BLOCK_FAIL, "no available block on die {die} after GC");
                current_block = retry;
                die_map.get_mut(die).current_block = current_block;
            }
        }
    }
    assert!(blocks.get(die, current_block).current_page.count() <= geo.user_pages_per_block as u16);

    let count = blocks.get(die, current_block).current_page.count();
    let vsa = geo.vorg_to_vsa(die, current_block, count as u32);
    blocks.get_mut(die, current_block).current_page.set_count(count + 1);

    target.advance(geo);
    Ok(vsa)
}

/// Per-slice allocation pinned to a specific die, for GC copy-outs
/// (`spec.md` §4.6 `FindFreeVirtualSliceForGc`). Does not advance the
/// round-robin cursor.
pub fn find_free_virtual_slice_for_gc(
    geo: &Geometry,
    die_map: &mut VirtualDieMap,
    blocks: &mut VirtualBlockMap,
    copy_die: u32,
    victim_block: u32,
) -> u32 {
    let die = copy_die;

    if victim_block == die_map.get(die).current_block {
        let next = get_from_fb_list(die_map, blocks, die, FreeBlockMode::Gc, reserved_free_block_count(geo));
        assert_ne!(next, BLOCK_FAIL, "no available block on die {die}");
        die_map.get_mut(die).current_block = next;
    }
    let mut current_block = die_map.get(die).current_block;

    if blocks.get(die, current_block).current_page.count() == geo.user_pages_per_block as u16
        || blocks.get(die, current_block).current_page.is_locked()
    {
        let next = get_from_fb_list(die_map, blocks, die, FreeBlockMode::Gc, reserved_free_block_count(geo));
        assert_ne!(next, BLOCK_FAIL, "no available block on die {die}");
        current_block = next;
        die_map.get_mut(die).current_block = current_block;
    }
    assert!(blocks.get(die, current_block).current_page.count() <= geo.user_pages_per_block as u16);

    let count = blocks.get(die, current_block).current_page.count();
    let vsa = geo.vorg_to_vsa(die, current_block, count as u32);
    blocks.get_mut(die, current_block).current_page.set_count(count + 1);
    vsa
}

/// Minimum free blocks per die GC must leave untouched so it never
/// self-starves (`spec.md` §4.5, §9 "GC recursion boundary").
///
/// Geometry-aware: when a die has no over-provisioning headroom at all
/// (`USER_DIES * USER_BLOCKS_PER_DIE == LOGICAL_BLOCKS_PER_SSD`, `spec.md`
/// §8's own worked example), reserving even one block would make the last
/// logical block per die unreachable by Normal-mode allocation on a fresh
/// SSD, forcing a GC pass with nothing yet invalidated to reclaim. With
/// headroom, a single reserved block is enough to keep GC from
/// self-starving.
pub fn reserved_free_block_count(geo: &Geometry) -> u32 {
    if geo.user_dies() * geo.user_blocks_per_die() > geo.logical_blocks_per_ssd() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tiny_geometry;

    #[test]
    fn round_robin_is_a_permutation() {
        let geo = tiny_geometry();
        let mut cursor = RoundRobinCursor::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..geo.user_dies() {
            seen.insert(find_die_for_free_slice_allocation(&geo, &mut cursor));
        }
        assert_eq!(seen.len(), geo.user_dies() as usize);
    }

    #[test]
    fn round_robin_is_channel_major() {
        let geo = tiny_geometry();
        let mut cursor = RoundRobinCursor::default();
        let first = find_die_for_free_slice_allocation(&geo, &mut cursor);
        let second = find_die_for_free_slice_allocation(&geo, &mut cursor);
        assert_eq!(geo.vdie_to_pway(first), geo.vdie_to_pway(second));
        assert_ne!(geo.vdie_to_pch(first), geo.vdie_to_pch(second));
    }

    #[test]
    fn allocation_target_advances_after_block_allocation() {
        use crate::gc::SimpleGc;
        use crate::virtual_block::VirtualBlockMap;
        use crate::virtual_die::{put_to_fb_list, VirtualDieMap};

        let geo = tiny_geometry();
        let mut die_map = VirtualDieMap::new(geo.user_dies());
        let mut blocks = VirtualBlockMap::new(geo.user_dies(), geo.user_blocks_per_die());
        for die in 0..geo.user_dies() {
            for block in 0..geo.user_blocks_per_die() {
                put_to_fb_list(&mut die_map, &mut blocks, die, block);
            }
            die_map.get_mut(die).current_block =
                get_from_fb_list(&mut die_map, &mut blocks, die, FreeBlockMode::Normal, reserved_free_block_count(&geo));
        }
        let mut gc = SimpleGc::new(&geo);
        let mut target = AllocationTarget::new(&geo);
        let first_die = target.die;

        find_free_virtual_block(&geo, &mut die_map, &mut blocks, &mut gc, &mut target).unwrap();

        assert_ne!(target.die, first_die);
    }
}
