//! VLAN allocation backend
//!
//! Hands out IEEE 802.1Q VLAN IDs from per-index VLAN databases, either a
//! requested static ID or the lowest free ID of a range.

mod backend;
mod database;
mod types;

pub use backend::VlanBackend;
pub use database::VlanDatabase;
pub use types::*;

/// Resource group served by the VLAN backend.
pub const GROUP: &str = "vlan.alloc.io";
/// API version of [`VlanAllocation`].
pub const VERSION: &str = "v1alpha1";
/// Kind name of [`VlanAllocation`].
pub const KIND: &str = "VLANAllocation";
