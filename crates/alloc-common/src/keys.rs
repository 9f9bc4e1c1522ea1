//! Label keys attached to allocated resources.

/// Kind (as `kind.version.group`) of the allocating resource.
pub const GVK: &str = "alloc.io/gvk";
/// Name of the allocating resource.
pub const NSN_NAME: &str = "alloc.io/nsn-name";
/// Namespace of the allocating resource.
pub const NSN_NAMESPACE: &str = "alloc.io/nsn-namespace";
/// Kind of the resource owning the allocation.
pub const OWNER_GVK: &str = "alloc.io/owner-gvk";
pub const OWNER_NSN_NAME: &str = "alloc.io/owner-nsn-name";
pub const OWNER_NSN_NAMESPACE: &str = "alloc.io/owner-nsn-namespace";
/// Index (network instance or VLAN database) the resource was allocated from.
pub const INDEX: &str = "alloc.io/index";
/// Prefix kind of an IP allocation.
pub const PREFIX_KIND: &str = "alloc.io/prefix-kind";
/// Marks the gateway address of a network.
pub const GATEWAY: &str = "alloc.io/gateway";
/// Allocated VLAN identifier.
pub const VLAN_ID: &str = "alloc.io/vlan-id";
