//! Value types shared by the allocation service.
//!
//! - [`IpPrefix`]: IP prefixes with containment and subnetting
//! - [`VlanId`] / [`VlanRange`]: IEEE 802.1Q VLAN identifiers
//! - [`Labels`], [`LabelSelector`], [`Selector`]: label sets and predicates

mod ip;
pub mod labels;
mod vlan;

pub use ip::{AddressFamily, IpPrefix};
pub use labels::{LabelSelector, LabelSelectorRequirement, Labels, Operator, Requirement, Selector};
pub use vlan::{VlanId, VlanRange};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid VLAN range: {0}")]
    InvalidVlanRange(String),

    #[error("invalid label key: {0}")]
    InvalidLabelKey(String),

    #[error("invalid label value: {0}")]
    InvalidLabelValue(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}
