//! VLAN database: the VLAN IDs claimed in one VLAN domain.

use alloc_common::{keys, AllocError, AllocResult, IndexRef};
use alloc_types::{Labels, VlanId, VlanRange};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Claimed VLAN IDs of one index, each with the labels of its holder.
#[derive(Debug, Clone)]
pub struct VlanDatabase {
    index: IndexRef,
    range: VlanRange,
    entries: BTreeMap<VlanId, Labels>,
}

fn same_holder(a: &Labels, b: &Labels) -> bool {
    [keys::GVK, keys::NSN_NAME, keys::NSN_NAMESPACE]
        .iter()
        .all(|k| a.get(k) == b.get(k))
}

impl VlanDatabase {
    pub fn new(index: IndexRef, range: VlanRange) -> Self {
        Self {
            index,
            range,
            entries: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> &IndexRef {
        &self.index
    }

    pub fn range(&self) -> VlanRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, vlan_id: VlanId) -> Option<&Labels> {
        self.entries.get(&vlan_id)
    }

    /// VLAN ID held by the resource identified by `holder`.
    pub fn held_by(&self, holder: &Labels) -> Option<VlanId> {
        self.entries
            .iter()
            .find(|(_, labels)| same_holder(labels, holder))
            .map(|(id, _)| *id)
    }

    /// Claims `vlan_id` for `holder`.
    ///
    /// Re-claiming an ID the holder already has refreshes its labels.
    pub fn claim(&mut self, vlan_id: VlanId, holder: Labels) -> AllocResult<()> {
        if !self.range.contains(vlan_id) {
            return Err(AllocError::invalid_request(format!(
                "VLAN {} outside range {} of index {}",
                vlan_id, self.range, self.index
            )));
        }
        if let Some(existing) = self.entries.get(&vlan_id) {
            if !same_holder(existing, &holder) {
                return Err(AllocError::invalid_request(format!(
                    "VLAN {} already allocated to {}/{}",
                    vlan_id,
                    existing.get(keys::NSN_NAMESPACE).unwrap_or_default(),
                    existing.get(keys::NSN_NAME).unwrap_or_default()
                )));
            }
        }
        debug!(index = %self.index, %vlan_id, "claim VLAN");
        self.entries.insert(vlan_id, holder);
        Ok(())
    }

    /// Lowest free VLAN ID within `range` (or the database range).
    pub fn first_free(&self, range: Option<VlanRange>) -> Option<VlanId> {
        let range = range.unwrap_or(self.range);
        range
            .iter()
            .filter(|id| self.range.contains(*id))
            .find(|id| !self.entries.contains_key(id))
    }

    /// Moves the database to `range`, dropping claims outside it.
    ///
    /// Returns the dropped VLAN IDs.
    pub fn resize(&mut self, range: VlanRange) -> Vec<VlanId> {
        let dropped: Vec<VlanId> = self
            .entries
            .keys()
            .filter(|id| !range.contains(**id))
            .copied()
            .collect();
        for id in &dropped {
            self.entries.remove(id);
        }
        self.range = range;
        dropped
    }

    /// Releases a single VLAN ID.
    pub fn release_id(&mut self, vlan_id: VlanId) -> Option<Labels> {
        self.entries.remove(&vlan_id)
    }

    /// Releases every VLAN ID held by `holder` and returns them.
    pub fn release(&mut self, holder: &Labels) -> Vec<VlanId> {
        let released: Vec<VlanId> = self
            .entries
            .iter()
            .filter(|(_, labels)| same_holder(labels, holder))
            .map(|(id, _)| *id)
            .collect();
        for id in &released {
            self.entries.remove(id);
            info!(index = %self.index, vlan_id = %id, "released VLAN");
        }
        released
    }
}
