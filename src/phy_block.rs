//! Physical-block map and bad-block-table bookkeeping (`spec.md` §3, §4.2,
//! §4.3 data side — persistence itself lives in [`crate::bbt`]).

/// Health of one physical block, as stamped into the in-memory map and the
/// persisted bad-block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockHealth {
    Normal = 0,
    Bad = 1,
}

impl BlockHealth {
    #[inline]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlockHealth::Normal),
            1 => Some(BlockHealth::Bad),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_bad(self) -> bool {
        matches!(self, BlockHealth::Bad)
    }
}

/// One physical block's health and remap target.
///
/// Invariant (`spec.md` §3): at steady state, if `health` is `Bad`,
/// `remapped_phy_block` points at a non-bad physical block in the same die
/// and the same LUN zone; otherwise `remapped_phy_block == self index`.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalBlock {
    pub health: BlockHealth,
    pub remapped_phy_block: u32,
}

impl PhysicalBlock {
    fn new(index: u32) -> Self {
        PhysicalBlock {
            health: BlockHealth::Normal,
            remapped_phy_block: index,
        }
    }
}

/// Per-die bad-block-table bookkeeping: which physical block stores the
/// persisted table, and whether a grown-bad update is pending flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrownBadUpdate {
    None,
    Booked,
}

#[derive(Debug, Clone, Copy)]
pub struct BadBlockTableInfo {
    pub phy_block: u32,
    pub grown_bad_update: GrownBadUpdate,
}

impl BadBlockTableInfo {
    fn new() -> Self {
        BadBlockTableInfo { phy_block: 0, grown_bad_update: GrownBadUpdate::None }
    }
}

/// Per-die array of physical blocks plus the per-die BBT location, sized to
/// `total_blocks_per_die` at construction.
pub struct PhyBlockMap {
    /// `blocks[die][phy_block]`.
    blocks: Vec<Vec<PhysicalBlock>>,
    pub bbt_info: Vec<BadBlockTableInfo>,
    total_blocks_per_die: u32,
}

impl PhyBlockMap {
    /// Build a fresh map with every block remapped to itself and every
    /// die's BBT pointed at physical block 0 (`spec.md` §4.7
    /// `InitAddressMap`).
    pub fn new(user_dies: u32, total_blocks_per_die: u32) -> Self {
        let blocks = (0..user_dies)
            .map(|_| (0..total_blocks_per_die).map(PhysicalBlock::new).collect())
            .collect();
        let bbt_info = (0..user_dies).map(|_| BadBlockTableInfo::new()).collect();
        PhyBlockMap { blocks, bbt_info, total_blocks_per_die }
    }

    #[inline]
    pub fn get(&self, die: u32, phy_block: u32) -> &PhysicalBlock {
        &self.blocks[die as usize][phy_block as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, die: u32, phy_block: u32) -> &mut PhysicalBlock {
        &mut self.blocks[die as usize][phy_block as usize]
    }

    #[inline]
    pub fn total_blocks_per_die(&self) -> u32 {
        self.total_blocks_per_die
    }

    pub fn dies(&self) -> u32 {
        self.blocks.len() as u32
    }
}
