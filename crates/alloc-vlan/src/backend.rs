//! VLAN backend: serves VLAN allocations out of per-index databases.

use crate::database::VlanDatabase;
use crate::types::VlanAllocation;
use alloc_common::{
    AllocError, AllocHandler, AllocResult, CallContext, IndexRef, Request, Response, WatchRequest,
    WatchStream,
};
use alloc_types::VlanRange;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// VlanBackend manages VLAN databases
///
/// Allocation flow:
/// 1. A holder that already has a VLAN gets it back, or moves to a new static
///    ID or into a requested range that excludes its current one
/// 2. Static requests claim the requested ID
/// 3. Dynamic requests claim the lowest free ID in the requested range
#[derive(Debug, Default)]
pub struct VlanBackend {
    databases: RwLock<HashMap<IndexRef, Arc<Mutex<VlanDatabase>>>>,
}

impl VlanBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the VLAN database; an existing database keeps its entries.
    #[instrument(skip(self))]
    pub fn create_index(&self, index: IndexRef, range: VlanRange) {
        let mut databases = self.databases.write();
        match databases.get(&index) {
            Some(db) if db.lock().range() == range => {
                debug!(%index, "VLAN database exists");
            }
            Some(db) => {
                let dropped = db.lock().resize(range);
                if !dropped.is_empty() {
                    warn!(%index, %range, dropped = ?dropped, "claims outside new range released");
                }
                info!(%index, %range, "VLAN database resized");
            }
            None => {
                databases.insert(
                    index.clone(),
                    Arc::new(Mutex::new(VlanDatabase::new(index.clone(), range))),
                );
                info!(%index, %range, "created VLAN database");
            }
        }
    }

    #[instrument(skip(self))]
    pub fn delete_index(&self, index: &IndexRef) {
        if self.databases.write().remove(index).is_some() {
            info!(%index, "deleted VLAN database");
        }
    }

    pub fn database(&self, index: &IndexRef) -> AllocResult<Arc<Mutex<VlanDatabase>>> {
        self.databases
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| AllocError::IndexNotFound {
                index: index.to_string(),
            })
    }

    pub fn indexes(&self) -> Vec<IndexRef> {
        let mut indexes: Vec<IndexRef> = self.databases.read().keys().cloned().collect();
        indexes.sort();
        indexes
    }

    fn allocate_in(db: &mut VlanDatabase, mut alloc: VlanAllocation) -> AllocResult<VlanAllocation> {
        let holder = alloc.header.system_labels();
        let held = db.held_by(&holder);

        let vlan_id = match (alloc.spec.vlan_id, held) {
            (Some(requested), Some(current)) if requested != current => {
                db.claim(requested, alloc.full_labels(requested))?;
                db.release_id(current);
                info!(from = %current, to = %requested, "VLAN moved");
                requested
            }
            (Some(requested), _) => {
                db.claim(requested, alloc.full_labels(requested))?;
                requested
            }
            (None, Some(current)) if alloc.spec.range.is_some_and(|r| !r.contains(current)) => {
                let id = db.first_free(alloc.spec.range).ok_or_else(|| AllocError::Exhausted {
                    index: db.index().to_string(),
                })?;
                db.claim(id, alloc.full_labels(id))?;
                db.release_id(current);
                info!(from = %current, to = %id, "VLAN moved into requested range");
                id
            }
            (None, Some(current)) => {
                db.claim(current, alloc.full_labels(current))?;
                current
            }
            (None, None) => {
                let id = db.first_free(alloc.spec.range).ok_or_else(|| AllocError::Exhausted {
                    index: db.index().to_string(),
                })?;
                db.claim(id, alloc.full_labels(id))?;
                id
            }
        };
        alloc.status.allocated_vlan_id = Some(vlan_id);
        Ok(alloc)
    }
}

#[async_trait]
impl AllocHandler for VlanBackend {
    #[instrument(skip(self, ctx, req), fields(nsn = %req.header.nsn, index = %req.index))]
    async fn get(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        ctx.run(async {
            let mut alloc = VlanAllocation::from_request(&req)?;
            let db = self.database(&alloc.index)?;
            alloc.status.allocated_vlan_id = db.lock().held_by(&alloc.header.system_labels());
            alloc.to_response()
        })
        .await
    }

    #[instrument(skip(self, ctx, req), fields(nsn = %req.header.nsn, index = %req.index))]
    async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        ctx.run(async {
            let alloc = VlanAllocation::from_request(&req)?;
            let db = self.database(&alloc.index)?;
            let alloc = Self::allocate_in(&mut db.lock(), alloc)?;
            alloc.to_response()
        })
        .await
    }

    #[instrument(skip(self, ctx, req), fields(nsn = %req.header.nsn, index = %req.index))]
    async fn deallocate(&self, ctx: &CallContext, req: Request) -> AllocResult<()> {
        ctx.run(async {
            let alloc = VlanAllocation::from_request(&req)?;
            let db = self.database(&alloc.index)?;
            let released = db.lock().release(&alloc.header.system_labels());
            debug!(count = released.len(), "deallocated");
            Ok(())
        })
        .await
    }

    /// VLAN claims are never invalidated by other allocations, so a watch
    /// only stays open until the caller goes away.
    async fn watch(&self, req: WatchRequest, stream: WatchStream) -> AllocResult<()> {
        debug!(owner_gvk = %req.owner_gvk, index = %req.index, "watch");
        stream.closed().await;
        Ok(())
    }
}
