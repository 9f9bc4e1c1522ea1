//! IP address management backend.
//!
//! - [`rib`]: the [`Rib`] contract and the in-memory [`Table`]
//! - [`allocation`]: [`IpAllocation`] request/status and its derived views
//! - [`applicator`]: applies an allocation with an explicit prefix
//! - [`getter`]: resolves allocations by label selector
//! - [`watcher`]: change notifications to owners of invalidated routes
//! - [`backend`]: [`IpamBackend`], the [`alloc_common::AllocHandler`] for IP prefixes
//!
//! # Architecture
//!
//! Every network instance (index) owns one RIB seeded with its aggregate
//! prefixes. Allocations with an explicit prefix go through the applicator;
//! the rest are first looked up with the getter and, when nothing is held
//! yet, carved out of the first parent matching the request's selector.

pub mod allocation;
pub mod applicator;
pub mod backend;
pub mod getter;
pub mod rib;
pub mod watcher;

pub use allocation::{IpAllocation, IpAllocationSpec, IpAllocationStatus, PrefixInfo, PrefixKind};
pub use applicator::{ApplicatorConfig, PrefixApplicator};
pub use backend::{IpamBackend, NetworkInstance};
pub use getter::{Getter, GetterConfig};
pub use rib::{Rib, Route, Table};
pub use watcher::{Watcher, WatcherTable};

/// Resource group served by the IPAM backend.
pub const GROUP: &str = "ipam.alloc.io";
/// API version of [`IpAllocation`].
pub const VERSION: &str = "v1alpha1";
/// Kind name of [`IpAllocation`].
pub const KIND: &str = "IPAllocation";
