//! Per-die state and free-list discipline (`spec.md` §3 `VirtualDie`, §4.4
//! `InitDieMap`/`InitCurrentBlockOfDieMap`, §4.5).

use log::{debug, trace};

use crate::geometry::BLOCK_FAIL;
use crate::geometry::BLOCK_NONE;
use crate::virtual_block::VirtualBlockMap;

/// Mode a free block is requested under (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeBlockMode {
    /// Refuses once `free_block_cnt <= reserved_free_block_count`, so GC
    /// always has room.
    Normal,
    /// May drain the list down to empty; only an empty list fails.
    Gc,
}

/// One die's free-block list head/tail/count plus its current write
/// target.
#[derive(Debug, Clone, Copy)]
pub struct VirtualDie {
    pub head_free_block: u32,
    pub tail_free_block: u32,
    pub free_block_cnt: u32,
    pub current_block: u32,
}

impl VirtualDie {
    fn new() -> Self {
        VirtualDie {
            head_free_block: BLOCK_NONE,
            tail_free_block: BLOCK_NONE,
            free_block_cnt: 0,
            current_block: BLOCK_NONE,
        }
    }
}

pub struct VirtualDieMap {
    dies: Vec<VirtualDie>,
}

impl VirtualDieMap {
    /// `spec.md` §4.4 `InitDieMap`: zero every die's free-list bookkeeping.
    /// `current_block` is left at `BLOCK_NONE` until
    /// `InitCurrentBlockOfDieMap` runs after `InitBlockMap` has populated
    /// the free lists.
    pub fn new(user_dies: u32) -> Self {
        VirtualDieMap { dies: (0..user_dies).map(|_| VirtualDie::new()).collect() }
    }

    #[inline]
    pub fn get(&self, die: u32) -> &VirtualDie {
        &self.dies[die as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, die: u32) -> &mut VirtualDie {
        &mut self.dies[die as usize]
    }

    pub fn dies(&self) -> u32 {
        self.dies.len() as u32
    }
}

/// `spec.md` §4.7 boot orchestration; named explicitly as its own step
/// since the original keeps it distinct from `InitBlockMap`'s free-list
/// population, even though both touch per-die free-list bookkeeping
/// (`SPEC_FULL.md` §E.1). Zeroes every die's free-list state; leaves
/// `current_block` untouched (`InitCurrentBlockOfDieMap` sets it later,
/// once `InitBlockMap` has something to pop).
pub fn init_die_map(die_map: &mut VirtualDieMap) {
    for die in 0..die_map.dies() {
        let d = die_map.get_mut(die);
        d.head_free_block = BLOCK_NONE;
        d.tail_free_block = BLOCK_NONE;
        d.free_block_cnt = 0;
    }
}

/// Append `block` at the tail of die `die`'s free list.
///
/// `spec.md` §4.5: O(1) splice via intrusive `prev_block`/`next_block`
/// indices stored directly in the `VirtualBlock` record (Design Notes: "a
/// target-language implementation should reimplement doubly-linked lists by
/// storing prev/next indices inside the block record").
pub fn put_to_fb_list(die_map: &mut VirtualDieMap, blocks: &mut VirtualBlockMap, die: u32, block: u32) {
    let die_state = die_map.get_mut(die);
    if die_state.tail_free_block != BLOCK_NONE {
        let tail = die_state.tail_free_block;
        blocks.get_mut(die, block).prev_block = tail;
        blocks.get_mut(die, block).next_block = BLOCK_NONE;
        blocks.get_mut(die, tail).next_block = block;
        die_state.tail_free_block = block;
    } else {
        blocks.get_mut(die, block).prev_block = BLOCK_NONE;
        blocks.get_mut(die, block).next_block = BLOCK_NONE;
        die_state.head_free_block = block;
        die_state.tail_free_block = block;
    }
    blocks.get_mut(die, block).free = true;
    die_map.get_mut(die).free_block_cnt += 1;
    trace!("die {die}: block {block} pushed to free list (count now {})", die_map.get(die).free_block_cnt);
}

/// Pop the head of die `die`'s free list, honoring `mode`'s starvation
/// rule. Returns `BLOCK_FAIL` on refusal/exhaustion.
pub fn get_from_fb_list(
    die_map: &mut VirtualDieMap,
    blocks: &mut VirtualBlockMap,
    die: u32,
    mode: FreeBlockMode,
    reserved_free_block_count: u32,
) -> u32 {
    let evicted = die_map.get(die).head_free_block;

    match mode {
        FreeBlockMode::Normal => {
            if die_map.get(die).free_block_cnt <= reserved_free_block_count {
                return BLOCK_FAIL;
            }
        }
        FreeBlockMode::Gc => {
            if evicted == BLOCK_NONE {
                return BLOCK_FAIL;
            }
        }
    }

    let next = blocks.get(die, evicted).next_block;
    if next != BLOCK_NONE {
        die_map.get_mut(die).head_free_block = next;
        blocks.get_mut(die, next).prev_block = BLOCK_NONE;
    } else {
        die_map.get_mut(die).head_free_block = BLOCK_NONE;
        die_map.get_mut(die).tail_free_block = BLOCK_NONE;
    }

    let evicted_block = blocks.get_mut(die, evicted);
    evicted_block.free = false;
    evicted_block.next_block = BLOCK_NONE;
    evicted_block.prev_block = BLOCK_NONE;
    die_map.get_mut(die).free_block_cnt -= 1;

    debug!("die {die}: block {evicted} popped from free list ({:?} mode, count now {})", mode, die_map.get(die).free_block_cnt);
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_die_map_zeroes_free_list_state() {
        let mut die_map = VirtualDieMap::new(1);
        let mut blocks = VirtualBlockMap::new(1, 2);
        put_to_fb_list(&mut die_map, &mut blocks, 0, 0);
        die_map.get_mut(0).current_block = 1;

        init_die_map(&mut die_map);

        assert_eq!(die_map.get(0).head_free_block, BLOCK_NONE);
        assert_eq!(die_map.get(0).tail_free_block, BLOCK_NONE);
        assert_eq!(die_map.get(0).free_block_cnt, 0);
        assert_eq!(die_map.get(0).current_block, 1, "init_die_map must not touch current_block");
    }

    #[test]
    fn fifo_order_and_links() {
        let mut die_map = VirtualDieMap::new(1);
        let mut blocks = VirtualBlockMap::new(1, 4);
        for b in 0..4 {
            put_to_fb_list(&mut die_map, &mut blocks, 0, b);
        }
        assert_eq!(die_map.get(0).free_block_cnt, 4);
        assert_eq!(die_map.get(0).head_free_block, 0);
        assert_eq!(die_map.get(0).tail_free_block, 3);

        for expect in 0..4 {
            let got = get_from_fb_list(&mut die_map, &mut blocks, 0, FreeBlockMode::Gc, 0);
            assert_eq!(got, expect);
            assert!(!blocks.get(0, got).free);
            assert_eq!(blocks.get(0, got).prev_block, BLOCK_NONE);
            assert_eq!(blocks.get(0, got).next_block, BLOCK_NONE);
        }
        assert_eq!(die_map.get(0).free_block_cnt, 0);
        assert_eq!(die_map.get(0).head_free_block, BLOCK_NONE);
        assert_eq!(die_map.get(0).tail_free_block, BLOCK_NONE);
    }

    #[test]
    fn normal_mode_refuses_at_reserve() {
        let mut die_map = VirtualDieMap::new(1);
        let mut blocks = VirtualBlockMap::new(1, 4);
        for b in 0..2 {
            put_to_fb_list(&mut die_map, &mut blocks, 0, b);
        }
        // reserve == 2, free_block_cnt == 2 -> refuse
        let got = get_from_fb_list(&mut die_map, &mut blocks, 0, FreeBlockMode::Normal, 2);
        assert_eq!(got, BLOCK_FAIL);
    }

    #[test]
    fn gc_mode_drains_to_empty() {
        let mut die_map = VirtualDieMap::new(1);
        let mut blocks = VirtualBlockMap::new(1, 1);
        put_to_fb_list(&mut die_map, &mut blocks, 0, 0);
        assert_eq!(get_from_fb_list(&mut die_map, &mut blocks, 0, FreeBlockMode::Gc, 10), 0);
        assert_eq!(get_from_fb_list(&mut die_map, &mut blocks, 0, FreeBlockMode::Gc, 10), BLOCK_FAIL);
    }
}
