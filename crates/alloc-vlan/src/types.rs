//! Type definitions for VLAN allocations

use alloc_common::condition::ConditionedStatus;
use alloc_common::{keys, AllocResult, Header, IndexRef, Request, Response, StatusCode};
use alloc_types::{Labels, VlanId, VlanRange};
use serde::{Deserialize, Serialize};

/// Desired VLAN allocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanAllocationSpec {
    /// Static VLAN ID; dynamic allocation when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<VlanId>,
    /// Restricts dynamic allocation to this range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<VlanRange>,
    /// User defined labels
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

impl VlanAllocationSpec {
    /// Static allocation of `vlan_id`
    pub fn with_id(vlan_id: VlanId) -> Self {
        Self {
            vlan_id: Some(vlan_id),
            ..Default::default()
        }
    }

    /// Dynamic allocation, optionally within `range`
    pub fn dynamic(range: Option<VlanRange>) -> Self {
        Self {
            range,
            ..Default::default()
        }
    }
}

/// Observed VLAN allocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlanAllocationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_vlan_id: Option<VlanId>,
    #[serde(flatten)]
    pub conditions: ConditionedStatus,
}

/// A VLAN allocation as seen by the VLAN backend
#[derive(Debug, Clone, PartialEq)]
pub struct VlanAllocation {
    pub header: Header,
    pub index: IndexRef,
    pub spec: VlanAllocationSpec,
    pub status: VlanAllocationStatus,
}

impl VlanAllocation {
    pub fn new(header: Header, index: IndexRef, spec: VlanAllocationSpec) -> Self {
        Self {
            header,
            index,
            spec,
            status: VlanAllocationStatus::default(),
        }
    }

    pub fn from_request(req: &Request) -> AllocResult<Self> {
        Ok(Self::new(req.header.clone(), req.index.clone(), req.spec_as()?))
    }

    pub fn to_request(&self) -> AllocResult<Request> {
        Request::new(self.header.clone(), self.index.clone(), &self.spec)
    }

    pub fn to_response(&self) -> AllocResult<Response> {
        let code = if self.status.allocated_vlan_id.is_some() {
            StatusCode::Valid
        } else {
            StatusCode::Unknown
        };
        Ok(Response {
            header: self.header.clone(),
            index: self.index.clone(),
            spec: serde_json::to_value(&self.spec)?,
            status: serde_json::to_value(&self.status)?,
            status_code: code,
        })
    }

    /// Labels recorded on the database entry for `vlan_id`
    pub fn full_labels(&self, vlan_id: VlanId) -> Labels {
        let mut labels = self.spec.labels.clone();
        labels.merge(&self.header.system_labels());
        labels.insert(keys::INDEX, self.index.to_label_value());
        labels.insert(keys::VLAN_ID, vlan_id.to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_common::{Gvk, NamespacedName};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_wire_form() {
        let spec = VlanAllocationSpec::with_id(VlanId::new(100).unwrap());
        assert_eq!(serde_json::to_string(&spec).unwrap(), r#"{"vlanId":100}"#);

        let spec: VlanAllocationSpec = serde_json::from_str(r#"{"range":{"start":10,"end":20}}"#).unwrap();
        assert_eq!(spec.range.unwrap().to_string(), "10-20");
        assert!(serde_json::from_str::<VlanAllocationSpec>(r#"{"vlanId":4095}"#).is_err());
    }

    #[test]
    fn test_full_labels() {
        let alloc = VlanAllocation::new(
            Header::new(
                Gvk::new("vlan.alloc.io", "v1alpha1", "VLANAllocation"),
                NamespacedName::new("default", "vl-1"),
            ),
            IndexRef::new("vlan.alloc.io", "default", "dc1"),
            VlanAllocationSpec::default(),
        );
        let labels = alloc.full_labels(VlanId::new(42).unwrap());
        assert_eq!(labels.get(keys::VLAN_ID), Some("42"));
        assert_eq!(labels.get(keys::INDEX), Some("default.dc1"));
        assert_eq!(labels.get(keys::NSN_NAME), Some("vl-1"));
    }
}
