//! Request and response messages of the allocation service.
//!
//! The messages are transport-agnostic: the group-specific allocation spec
//! (an IP allocation, a VLAN allocation, ...) travels as an opaque JSON
//! document that only the handler registered for the group decodes.

use crate::error::AllocResult;
use crate::keys;
use alloc_types::Labels;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group, version and kind of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty() && self.kind.is_empty()
    }

    /// Dotted `kind.version.group` form, usable as a label value.
    pub fn to_label_value(&self) -> String {
        format!("{}.{}.{}", self.kind, self.version, self.group)
    }

    /// Parses the `kind.version.group` label form.
    pub fn from_label_value(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, '.');
        let kind = parts.next().filter(|s| !s.is_empty())?;
        let version = parts.next()?;
        let group = parts.next()?;
        Some(Self::new(group, version, kind))
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Namespace and name of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of one managed address space or VLAN domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexRef {
    /// Resource group serving the index (e.g. `ipam.alloc.io`).
    pub group: String,
    #[serde(flatten)]
    pub nsn: NamespacedName,
}

impl IndexRef {
    pub fn new(group: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            nsn: NamespacedName::new(namespace, name),
        }
    }

    /// `namespace.name`, the form stored under [`keys::INDEX`].
    pub fn to_label_value(&self) -> String {
        format!("{}.{}", self.nsn.namespace, self.nsn.name)
    }
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.nsn)
    }
}

/// Identity of the allocating resource and its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Kind of the allocation; its group selects the handler.
    pub gvk: Gvk,
    /// The allocation resource itself.
    pub nsn: NamespacedName,
    #[serde(default)]
    pub owner_gvk: Gvk,
    #[serde(default)]
    pub owner_nsn: NamespacedName,
}

impl Header {
    pub fn new(gvk: Gvk, nsn: NamespacedName) -> Self {
        Self {
            gvk,
            nsn,
            owner_gvk: Gvk::default(),
            owner_nsn: NamespacedName::default(),
        }
    }

    pub fn with_owner(mut self, owner_gvk: Gvk, owner_nsn: NamespacedName) -> Self {
        self.owner_gvk = owner_gvk;
        self.owner_nsn = owner_nsn;
        self
    }

    /// Labels identifying the allocation and its owner.
    pub fn system_labels(&self) -> Labels {
        let mut labels = Labels::new();
        labels.insert(keys::GVK, self.gvk.to_label_value());
        labels.insert(keys::NSN_NAME, self.nsn.name.clone());
        labels.insert(keys::NSN_NAMESPACE, self.nsn.namespace.clone());
        if !self.owner_gvk.is_empty() {
            labels.insert(keys::OWNER_GVK, self.owner_gvk.to_label_value());
        }
        if !self.owner_nsn.is_empty() {
            labels.insert(keys::OWNER_NSN_NAME, self.owner_nsn.name.clone());
            labels.insert(keys::OWNER_NSN_NAMESPACE, self.owner_nsn.namespace.clone());
        }
        labels
    }
}

/// Outcome reported to watchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// The allocation must be re-evaluated by its owner.
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Allocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub header: Header,
    pub index: IndexRef,
    /// Group-specific allocation spec.
    pub spec: serde_json::Value,
}

impl Request {
    /// Builds a request from a typed spec.
    pub fn new(header: Header, index: IndexRef, spec: &impl Serialize) -> AllocResult<Self> {
        Ok(Self {
            header,
            index,
            spec: serde_json::to_value(spec)?,
        })
    }

    /// Resource group used for routing.
    pub fn group(&self) -> &str {
        &self.header.gvk.group
    }

    /// Decodes the spec.
    pub fn spec_as<T: DeserializeOwned>(&self) -> AllocResult<T> {
        Ok(serde_json::from_value(self.spec.clone())?)
    }
}

/// Allocation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub header: Header,
    pub index: IndexRef,
    pub spec: serde_json::Value,
    /// Group-specific allocation status.
    pub status: serde_json::Value,
    pub status_code: StatusCode,
}

impl Response {
    /// Builds a response echoing the request with the given status.
    pub fn for_request(req: &Request, status: &impl Serialize, code: StatusCode) -> AllocResult<Self> {
        Ok(Self {
            header: req.header.clone(),
            index: req.index.clone(),
            spec: req.spec.clone(),
            status: serde_json::to_value(status)?,
            status_code: code,
        })
    }

    /// Decodes the status.
    pub fn status_as<T: DeserializeOwned>(&self) -> AllocResult<T> {
        Ok(serde_json::from_value(self.status.clone())?)
    }
}

/// Subscription request for change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    /// Allocation kind; its group selects the handler.
    pub gvk: Gvk,
    /// Owner kind whose allocations should be streamed.
    pub owner_gvk: Gvk,
    pub index: IndexRef,
}

impl WatchRequest {
    pub fn group(&self) -> &str {
        &self.gvk.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Spec {
        prefix: String,
    }

    fn header() -> Header {
        Header::new(
            Gvk::new("ipam.alloc.io", "v1alpha1", "IPAllocation"),
            NamespacedName::new("default", "pod-1"),
        )
    }

    #[test]
    fn test_spec_round_trip_through_request() {
        let req = Request::new(
            header(),
            IndexRef::new("ipam.alloc.io", "default", "vpc-1"),
            &Spec {
                prefix: "10.0.0.1/24".into(),
            },
        )
        .unwrap();
        assert_eq!(req.group(), "ipam.alloc.io");
        let spec: Spec = req.spec_as().unwrap();
        assert_eq!(spec.prefix, "10.0.0.1/24");
    }

    #[test]
    fn test_index_label_value_keeps_namespace() {
        let a = IndexRef::new("ipam.alloc.io", "tenant-a", "vpc-1");
        let b = IndexRef::new("ipam.alloc.io", "tenant-b", "vpc-1");
        assert_eq!(a.to_label_value(), "tenant-a.vpc-1");
        assert_ne!(a.to_label_value(), b.to_label_value());
    }

    #[test]
    fn test_system_labels_skip_empty_owner() {
        let labels = header().system_labels();
        assert_eq!(labels.get(keys::NSN_NAME), Some("pod-1"));
        assert_eq!(labels.get(keys::GVK), Some("IPAllocation.v1alpha1.ipam.alloc.io"));
        assert!(!labels.contains_key(keys::OWNER_GVK));
        assert!(labels.validate().is_ok());

        let owned = header().with_owner(
            Gvk::new("workload.alloc.io", "v1", "Deployment"),
            NamespacedName::new("default", "web"),
        );
        let labels = owned.system_labels();
        assert_eq!(labels.get(keys::OWNER_NSN_NAME), Some("web"));
        assert_eq!(labels.get(keys::OWNER_GVK), Some("Deployment.v1.workload.alloc.io"));
    }

    #[test]
    fn test_gvk_label_value() {
        let gvk = Gvk::new("ipam.alloc.io", "v1alpha1", "IPAllocation");
        assert_eq!(Gvk::from_label_value(&gvk.to_label_value()), Some(gvk));
        assert_eq!(Gvk::from_label_value("system"), None);
    }

    #[test]
    fn test_index_display() {
        let index = IndexRef::new("vlan.alloc.io", "default", "dc1");
        assert_eq!(index.to_string(), "vlan.alloc.io:default/dc1");
    }
}
