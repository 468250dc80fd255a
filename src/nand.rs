//! Downstream NAND back-end contract (`spec.md` §5, §6) and an in-memory
//! simulation implementation used by tests.
//!
//! The real firmware's driver layer is out of scope for this core
//! (`spec.md` §1); `NandBackend` is the seam this crate draws in its place,
//! the same way the teacher keeps `driver::uart`/`driver::of` behind a trait
//! boundary from the portable allocator core (`SPEC_FULL.md` §A).

use log::trace;

use crate::geometry::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqType {
    Nand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqCode {
    Read,
    Write,
    Erase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBufFormat {
    None,
    Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NandAddrKind {
    PhyOrg,
    Vsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccOpt {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAddrDependencyCheck {
    None,
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSpace {
    Total,
    Main,
}

/// Request options (`spec.md` §6 `reqOpt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqOpt {
    pub data_buf_format: DataBufFormat,
    pub nand_addr: NandAddrKind,
    pub nand_ecc: EccOpt,
    pub row_addr_dependency_check: RowAddrDependencyCheck,
    pub block_space: BlockSpace,
}

/// Address payload when `nand_addr == PhyOrg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyOrgAddr {
    pub physical_ch: u32,
    pub physical_way: u32,
    pub physical_block: u32,
    pub physical_page: u32,
}

/// Address payload when `nand_addr == Vsa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VsaAddr {
    pub virtual_slice_addr: u32,
    pub programmed_page_cnt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NandInfo {
    PhyOrg(PhyOrgAddr),
    Vsa(VsaAddr),
}

/// One queued NAND request (`spec.md` §6). `data_buf_addr` is an opaque
/// buffer handle: the simulated backend copies real bytes through it; a
/// firmware backend would resolve it to a DMA-able physical address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NandRequest {
    pub req_type: ReqType,
    pub req_code: ReqCode,
    pub req_opt: ReqOpt,
    pub data_buf_addr: Option<Vec<u8>>,
    pub nand_info: NandInfo,
}

/// The downstream collaborator contract (`spec.md` §5): lease a slot,
/// submit it, and block until every submitted request completes.
/// Cancellation does not exist; every submitted request must complete or
/// its error surfaces through `sync_all_low_level_req_done`.
pub trait NandBackend {
    /// Lease a free request slot. A real backend's pool is finite;
    /// exhaustion without a sync is a programmer error (`spec.md` §5), so
    /// implementations may panic rather than return `Option`.
    fn get_from_free_req_q(&mut self) -> u32;

    /// Submit the leased slot's request for processing.
    fn select_low_level_req_q(&mut self, tag: u32, request: NandRequest);

    /// Block until every submitted request since the last sync completes.
    fn sync_all_low_level_req_done(&mut self);
}

/// An in-memory NAND simulation: physical pages are byte buffers indexed by
/// `(die, physical_block, physical_page)`. Requests submitted via
/// `select_low_level_req_q` execute synchronously and buffer only until
/// `sync_all_low_level_req_done`, mirroring the original's queue-then-sync
/// shape without modeling real asynchrony.
pub struct MemNand {
    geo: Geometry,
    /// `pages[die][physical_block][physical_page]`.
    pages: Vec<Vec<Vec<Vec<u8>>>>,
    bytes_per_page: usize,
    pending: Vec<NandRequest>,
    next_tag: u32,
}

impl MemNand {
    pub fn new(geo: &Geometry, bytes_per_page: usize) -> Self {
        let dies = geo.user_dies() as usize;
        let blocks = geo.total_blocks_per_die() as usize;
        let pages = geo.user_pages_per_block as usize;
        let pages_table = (0..dies)
            .map(|_| (0..blocks).map(|_| vec![vec![0xFFu8; bytes_per_page]; pages]).collect())
            .collect();
        MemNand { geo: *geo, pages: pages_table, bytes_per_page, pending: Vec::new(), next_tag: 0 }
    }

    pub fn read_page(&self, die: u32, phy_block: u32, phy_page: u32) -> &[u8] {
        &self.pages[die as usize][phy_block as usize][phy_page as usize]
    }

    fn execute(&mut self, req: NandRequest) {
        match (req.req_code, &req.nand_info) {
            (ReqCode::Read, NandInfo::PhyOrg(addr)) => {
                trace!("mem-nand: read ch{} way{} block{} page{}", addr.physical_ch, addr.physical_way, addr.physical_block, addr.physical_page);
            }
            (ReqCode::Write, NandInfo::PhyOrg(addr)) => {
                let die = self.geo.pcw_to_vdie(addr.physical_ch, addr.physical_way) as usize;
                if let Some(buf) = &req.data_buf_addr {
                    let page = &mut self.pages[die][addr.physical_block as usize][addr.physical_page as usize];
                    page[..buf.len().min(self.bytes_per_page)].copy_from_slice(&buf[..buf.len().min(self.bytes_per_page)]);
                }
            }
            (ReqCode::Erase, NandInfo::PhyOrg(addr)) => {
                let die = self.geo.pcw_to_vdie(addr.physical_ch, addr.physical_way) as usize;
                for page in &mut self.pages[die][addr.physical_block as usize] {
                    page.fill(0xFF);
                }
            }
            (ReqCode::Erase, NandInfo::Vsa(_)) => {
                // Erase-by-VSA is handled by the translator invalidating its
                // own metadata; the backing physical erase already happened
                // via the PhyOrg erase issued earlier in the same call.
            }
            _ => {}
        }
    }
}

impl NandBackend for MemNand {
    fn get_from_free_req_q(&mut self) -> u32 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    fn select_low_level_req_q(&mut self, _tag: u32, request: NandRequest) {
        self.pending.push(request);
    }

    fn sync_all_low_level_req_done(&mut self) {
        for req in std::mem::take(&mut self.pending) {
            self.execute(req);
        }
    }
}
