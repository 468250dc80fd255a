//! End-to-end boot/read/write scenarios against a small 4-die geometry:
//! 2 channels x 2 ways, 4 user blocks/die + 1 spare, 4 pages/block,
//! 1 slice/page -> SLICES_PER_SSD = 64, SLICES_PER_BLOCK = 4,
//! LOGICAL_BLOCKS_PER_SSD = 16.

use std::collections::HashSet;

use ssd_ftl::gc::SimpleGc;
use ssd_ftl::geometry::{Geometry, VSA_FAIL, VSA_NONE};
use ssd_ftl::nand::MemNand;
use ssd_ftl::{BootAction, Translator};

fn small_geometry() -> Geometry {
    Geometry::new(2, 2, 1, 4, 5, 4, 1)
}

fn boot() -> Translator<MemNand, SimpleGc> {
    let _ = env_logger::builder().is_test(true).try_init();
    let geo = small_geometry();
    let nand = MemNand::new(&geo, 16);
    let gc = SimpleGc::new(&geo);
    Translator::new(geo, nand, gc, BootAction::Normal, &|_, _| false)
}

#[test]
fn e1_fresh_init() {
    let mut t = boot();
    assert_eq!(t.addr_trans_read(0).unwrap(), VSA_FAIL);
    let v0 = t.addr_trans_write(0);
    assert_eq!(t.addr_trans_read(0).unwrap(), v0);
}

#[test]
fn e2_sequential_fill_of_logical_block_clears_cursor() {
    let mut t = boot();
    let vsas: Vec<u32> = (0..4).map(|lsa| t.addr_trans_write(lsa)).collect();

    let die = t.geo.vsa_to_vdie(vsas[0]);
    let block = t.geo.vsa_to_vblock(vsas[0]);
    for (offset, &vsa) in vsas.iter().enumerate() {
        assert_eq!(t.geo.vsa_to_vdie(vsa), die);
        assert_eq!(t.geo.vsa_to_vblock(vsa), block);
        assert_eq!(t.geo.vsa_to_vpage(vsa), offset as u32);
    }

    assert_eq!(t.logical_block_cursor(0).base_vsa, VSA_NONE);
}

#[test]
fn e3_die_spread_channel_major() {
    let mut t = boot();
    let v0 = t.addr_trans_write(0);
    let v1 = t.addr_trans_write(4);
    let v2 = t.addr_trans_write(8);
    let v3 = t.addr_trans_write(12);

    let dies: HashSet<u32> = [v0, v1, v2, v3].iter().map(|&v| t.geo.vsa_to_vdie(v)).collect();
    assert_eq!(dies.len(), 4, "each of the four logical blocks must land on a distinct die");
}

#[test]
fn e4_rewrite_invalidates_and_victim_lists_once() {
    let mut t = boot();
    let v0 = t.addr_trans_write(0);
    let v1 = t.addr_trans_write(0);
    assert_ne!(v0, v1);

    let die = t.geo.vsa_to_vdie(v0);
    let block = t.geo.vsa_to_vblock(v0);
    assert_eq!(t.virtual_block(die, block).invalid_slice_cnt, 1);
    assert_eq!(t.gc_mut().victims().len(die), 1);
}

#[test]
fn e5_full_overwrite_then_erase() {
    let mut t = boot();
    let geo = small_geometry();

    for lsa in 0..geo.slices_per_ssd() {
        t.addr_trans_write(lsa);
    }
    for lsa in 0..geo.slices_per_ssd() {
        t.addr_trans_write(lsa);
    }

    // Writing every LSA twice invalidates every slice of every block the
    // first pass touched, since the second pass's writes land on freshly
    // allocated blocks rather than reusing them.
    let mut found_full = false;
    for die in 0..geo.user_dies() {
        for block in 0..geo.user_blocks_per_die() {
            let invalid_slice_cnt = t.virtual_block(die, block).invalid_slice_cnt;
            if invalid_slice_cnt != geo.slices_per_block() {
                continue;
            }
            found_full = true;
            assert!(t.gc_mut().victims().contains(die, block));

            t.erase_block(die, block);

            let erased = t.virtual_block(die, block);
            assert!(erased.free);
            assert_eq!(erased.erase_cnt, 1);
            assert_eq!(erased.invalid_slice_cnt, 0);
            for offset in 0..geo.slices_per_block() {
                let vsa = geo.vorg_to_vsa(die, block, offset);
                assert_eq!(t.reverse_map(vsa), ssd_ftl::geometry::LSA_NONE);
            }
        }
    }
    assert!(found_full, "expected at least one fully-invalidated user block after overwriting every LSA twice");
}

#[test]
fn e6_bad_block_remap_excludes_from_free_list() {
    let geo = small_geometry();
    let nand = MemNand::new(&geo, 16);
    let gc = SimpleGc::new(&geo);
    let t = Translator::new(geo, nand, gc, BootAction::Normal, &|die, pb| die == 0 && pb == 2);

    assert!(t.virtual_block(0, 2).bad);
    assert!(!t.virtual_block(0, 2).free);
    assert_ne!(t.virtual_die(0).head_free_block, 2);
    assert_ne!(t.virtual_die(0).tail_free_block, 2);
}
