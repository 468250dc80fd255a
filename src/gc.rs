//! Garbage-collection victim-list bookkeeping and the `GcBackend` collaborator
//! contract (`spec.md` §6 "GC collaborator", §9 "GC recursion boundary").
//!
//! Victim-selection policy itself is explicitly out of scope for this core
//! (`spec.md` §1); this module only keeps the victim list that a policy
//! consumes, plus [`SimpleGc`], a reference policy used by tests.

use log::debug;

use crate::error::FtlError;
use crate::geometry::{Geometry, BLOCK_FAIL};
use crate::virtual_block::VirtualBlockMap;
use crate::virtual_die::{get_from_fb_list, put_to_fb_list, FreeBlockMode, VirtualDieMap};

/// Per-die victim list: blocks with `invalidSliceCnt > 0`, kept as a plain
/// ranked list rather than an intrusive list like the free list, since
/// `spec.md` only requires idempotent insert/remove, not O(1) splice.
pub struct VictimList {
    /// `blocks[die]` holds `(block, invalid_slice_cnt)` pairs.
    blocks: Vec<Vec<(u32, u32)>>,
}

impl VictimList {
    pub fn new(user_dies: u32) -> Self {
        VictimList { blocks: (0..user_dies).map(|_| Vec::new()).collect() }
    }

    /// `SelectiveGetFromGcVictimList`: idempotent unlink.
    pub fn remove(&mut self, die: u32, block: u32) {
        self.blocks[die as usize].retain(|&(b, _)| b != block);
    }

    /// `PutToGcVictimList`: re-insert keyed by the current `invalidSliceCnt`.
    pub fn insert(&mut self, die: u32, block: u32, invalid_slice_cnt: u32) {
        self.remove(die, block);
        self.blocks[die as usize].push((block, invalid_slice_cnt));
    }

    /// The block with the highest `invalidSliceCnt` on `die`, if any.
    pub fn most_invalid(&self, die: u32) -> Option<u32> {
        self.blocks[die as usize].iter().max_by_key(|&&(_, cnt)| cnt).map(|&(b, _)| b)
    }

    pub fn contains(&self, die: u32, block: u32) -> bool {
        self.blocks[die as usize].iter().any(|&(b, _)| b == block)
    }

    pub fn len(&self, die: u32) -> usize {
        self.blocks[die as usize].len()
    }
}

/// The GC collaborator contract consumed by the allocator (`spec.md` §6, §9).
///
/// `garbage_collection` should reclaim at least one free block on `die` and
/// update `current_block` for that die. When it cannot — an empty victim
/// list, or the free list still empty after reclaiming — it returns
/// [`FtlError::FreeBlockExhausted`] rather than panicking, so the caller
/// (the allocator) decides whether that is fatal (`spec.md` §7: "Free-block
/// exhaustion (NORMAL) ... if GC cannot recover a block, fatal").
pub trait GcBackend {
    fn selective_get_from_gc_victim_list(&mut self, die: u32, block: u32);
    fn put_to_gc_victim_list(&mut self, die: u32, block: u32, invalid_slice_cnt: u32);
    fn garbage_collection(&mut self, die_map: &mut VirtualDieMap, blocks: &mut VirtualBlockMap, die: u32) -> Result<(), FtlError>;
}

/// A reference GC policy: reclaims the single most-invalid block on a die by
/// erasing it outright (no slice copy-out), just enough to exercise the
/// reserve/GC interplay of `spec.md` §4.5-§4.6 without pretending to be a
/// real victim-selection policy (`SPEC_FULL.md` §C).
pub struct SimpleGc {
    victims: VictimList,
}

impl SimpleGc {
    pub fn new(geo: &Geometry) -> Self {
        SimpleGc { victims: VictimList::new(geo.user_dies()) }
    }

    pub fn victims(&self) -> &VictimList {
        &self.victims
    }

    pub fn victims_mut(&mut self) -> &mut VictimList {
        &mut self.victims
    }
}

impl GcBackend for SimpleGc {
    fn selective_get_from_gc_victim_list(&mut self, die: u32, block: u32) {
        self.victims.remove(die, block);
    }

    fn put_to_gc_victim_list(&mut self, die: u32, block: u32, invalid_slice_cnt: u32) {
        self.victims.insert(die, block, invalid_slice_cnt);
    }

    fn garbage_collection(&mut self, die_map: &mut VirtualDieMap, blocks: &mut VirtualBlockMap, die: u32) -> Result<(), FtlError> {
        let victim = self.victims.most_invalid(die).ok_or(FtlError::FreeBlockExhausted { die })?;
        self.victims.remove(die, victim);

        let vb = blocks.get_mut(die, victim);
        vb.free = true;
        vb.erase_cnt += 1;
        vb.invalid_slice_cnt = 0;
        vb.current_page.reset();
        put_to_fb_list_no_double_count(die_map, blocks, die, victim);

        debug!("gc: die {die} reclaimed block {victim} as victim, reassigning current_block");
        let refreshed = get_from_fb_list(die_map, blocks, die, FreeBlockMode::Gc, 0);
        if refreshed == BLOCK_FAIL {
            return Err(FtlError::FreeBlockExhausted { die });
        }
        die_map.get_mut(die).current_block = refreshed;
        Ok(())
    }
}

/// `EraseBlock`'s enqueue step already calls `put_to_fb_list`, but
/// `garbage_collection` erases the victim itself and must enqueue it the
/// same way; kept as a private helper rather than calling into
/// `crate::translator` to avoid a dependency cycle between GC and the
/// translator that owns it.
fn put_to_fb_list_no_double_count(die_map: &mut VirtualDieMap, blocks: &mut VirtualBlockMap, die: u32, block: u32) {
    put_to_fb_list(die_map, blocks, die, block);
}
