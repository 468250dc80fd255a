//! SSD flash-translation-layer core: logical-to-virtual slice address
//! translation, bad-block masking and persistence, and block/slice-level
//! allocation for NAND-backed storage.
//!
//! This crate models the host-facing translation core only — the NAND
//! driver, wear-leveling policy, and garbage-collection victim-selection
//! policy are collaborators reached through the [`nand::NandBackend`] and
//! [`gc::GcBackend`] traits rather than owned implementations.

pub mod allocator;
pub mod bbt;
pub mod cursor;
pub mod error;
pub mod gc;
pub mod geometry;
pub mod nand;
pub mod phy_block;
pub mod slice_map;
pub mod translator;
pub mod util;
pub mod virtual_block;
pub mod virtual_die;

pub use error::FtlError;
pub use geometry::Geometry;
pub use translator::{BootAction, Translator};
