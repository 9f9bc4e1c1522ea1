//! IPAM backend: one RIB per network instance behind the allocation service.

use crate::allocation::{IpAllocation, IpAllocationSpec, PrefixKind};
use crate::applicator::{ApplicatorConfig, PrefixApplicator};
use crate::getter::{Getter, GetterConfig};
use crate::rib::{Rib, Route, Table};
use crate::watcher::{Watcher, WatcherTable};
use alloc_common::{
    keys, AllocError, AllocHandler, AllocResult, CallContext, Gvk, Header, IndexRef, Request, Response,
    RibError, StatusCode, WatchRequest, WatchStream,
};
use alloc_types::{AddressFamily, IpPrefix};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Upper bound on candidate subnets examined per parent during dynamic allocation.
const MAX_CANDIDATES: u128 = 1 << 16;

/// Kind recorded on the aggregate routes seeded for an index.
pub const NETWORK_INSTANCE_KIND: &str = "NetworkInstance";

/// One managed address space.
#[derive(Debug)]
pub struct NetworkInstance {
    index: IndexRef,
    aggregates: RwLock<Vec<IpPrefix>>,
    rib: Table,
}

impl NetworkInstance {
    fn new(index: IndexRef) -> Self {
        Self {
            index,
            aggregates: RwLock::default(),
            rib: Table::new(),
        }
    }

    pub fn index(&self) -> &IndexRef {
        &self.index
    }

    pub fn aggregates(&self) -> Vec<IpPrefix> {
        self.aggregates.read().clone()
    }

    pub fn rib(&self) -> &dyn Rib {
        &self.rib
    }

    fn covers(&self, prefix: &IpPrefix) -> bool {
        self.aggregates.read().iter().any(|a| a.contains(prefix))
    }
}

/// Allocation handler for IP prefixes and addresses.
#[derive(Debug, Default)]
pub struct IpamBackend {
    instances: RwLock<HashMap<IndexRef, Arc<NetworkInstance>>>,
    watcher: Arc<WatcherTable>,
}

impl IpamBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watcher(&self) -> &Arc<WatcherTable> {
        &self.watcher
    }

    pub fn instance(&self, index: &IndexRef) -> AllocResult<Arc<NetworkInstance>> {
        self.instances
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| AllocError::IndexNotFound {
                index: index.to_string(),
            })
    }

    pub fn indexes(&self) -> Vec<IndexRef> {
        let mut indexes: Vec<IndexRef> = self.instances.read().keys().cloned().collect();
        indexes.sort();
        indexes
    }

    /// Creates the network instance and seeds its aggregate prefixes.
    ///
    /// Re-creating an existing index keeps its routes and re-applies the
    /// aggregates.
    #[instrument(skip(self, aggregates), fields(aggregates = aggregates.len()))]
    pub async fn create_index(&self, index: IndexRef, aggregates: Vec<IpPrefix>) -> AllocResult<()> {
        let instance = self
            .instances
            .write()
            .entry(index.clone())
            .or_insert_with(|| {
                info!(%index, "creating network instance");
                Arc::new(NetworkInstance::new(index.clone()))
            })
            .clone();
        // Existing routes survive; only the covering set is replaced.
        *instance.aggregates.write() = aggregates.clone();

        let header = Header::new(
            Gvk::new(index.group.clone(), "v1alpha1", NETWORK_INSTANCE_KIND),
            index.nsn.clone(),
        );
        for prefix in &aggregates {
            let alloc = IpAllocation::new(
                header.clone(),
                index.clone(),
                IpAllocationSpec::new(PrefixKind::Aggregate)
                    .with_prefix(prefix.to_string())
                    .with_create_prefix(true),
            );
            self.apply(&instance, alloc, true).await?;
        }
        Ok(())
    }

    /// Drops the network instance and every route in it.
    #[instrument(skip(self))]
    pub fn delete_index(&self, index: &IndexRef) {
        if self.instances.write().remove(index).is_some() {
            info!(%index, "deleted network instance");
        }
    }

    async fn apply(
        &self,
        instance: &NetworkInstance,
        alloc: IpAllocation,
        initializing: bool,
    ) -> AllocResult<IpAllocation> {
        let prefix_info = alloc
            .prefix_info()?
            .ok_or_else(|| AllocError::invalid_request("allocation has no prefix"))?;
        let watcher: &dyn Watcher = self.watcher.as_ref();
        PrefixApplicator::new(ApplicatorConfig {
            initializing,
            alloc,
            rib: instance.rib(),
            prefix_info,
            watcher,
        })
        .apply()
        .await
    }

    async fn allocate_static(
        &self,
        instance: &NetworkInstance,
        alloc: IpAllocation,
    ) -> AllocResult<IpAllocation> {
        if let Some(pi) = alloc.prefix_info()? {
            if alloc.kind() != PrefixKind::Aggregate && !instance.covers(&pi.subnet()) {
                return Err(AllocError::invalid_request(format!(
                    "prefix {} is not within any aggregate of index {}",
                    pi.prefix(),
                    instance.index
                )));
            }
        }
        self.apply(instance, alloc, false).await
    }

    async fn allocate_dynamic(
        &self,
        instance: &NetworkInstance,
        alloc: IpAllocation,
    ) -> AllocResult<IpAllocation> {
        let alloc = Getter::new(GetterConfig {
            alloc,
            rib: instance.rib(),
        })
        .resolve()?;
        if alloc.status.allocated_prefix.is_some() {
            debug!(alloc = %alloc, "allocation already present");
            return Ok(alloc);
        }

        let Some(selector) = alloc.alloc_selector()? else {
            return Err(AllocError::invalid_request(
                "allocation without prefix needs a selector",
            ));
        };
        let mut parents: Vec<Route> = instance
            .rib()
            .get_by_label(&selector)
            .into_iter()
            .filter(|r| can_carve_from(&alloc, r))
            .collect();
        parents.sort_by_key(|r| r.prefix());

        for parent in parents {
            let parent = parent.prefix();
            let new_len = match alloc.kind() {
                PrefixKind::Loopback => parent.family().max_len(),
                PrefixKind::Network if !alloc.create_prefix() => parent.family().max_len(),
                _ => alloc.spec.prefix_length.ok_or_else(|| {
                    AllocError::invalid_request(format!(
                        "dynamic {} allocation needs a prefix length",
                        alloc.kind()
                    ))
                })?,
            };
            let Some(candidate) = free_subnet(instance.rib(), &parent, new_len) else {
                continue;
            };
            let prefix = if alloc.is_network_address() {
                format!("{}/{}", candidate.addr(), parent.prefix_len())
            } else {
                candidate.to_string()
            };
            info!(alloc = %alloc, %parent, %prefix, "dynamic allocation");
            let mut alloc = alloc;
            alloc.spec.prefix = Some(prefix);
            return self.apply(instance, alloc, false).await;
        }

        Err(AllocError::Exhausted {
            index: instance.index.to_string(),
        })
    }
}

/// Whether `alloc` may be carved out of `parent`.
///
/// Prefixes come from aggregates and pools only. Addresses may also come
/// from a prefix of their own kind, never from another allocation's address.
fn can_carve_from(alloc: &IpAllocation, parent: &Route) -> bool {
    let Some(kind) = parent
        .labels()
        .get(keys::PREFIX_KIND)
        .and_then(|k| k.parse::<PrefixKind>().ok())
    else {
        return false;
    };
    match kind {
        PrefixKind::Aggregate | PrefixKind::Pool => true,
        kind => {
            let prefix = parent.prefix();
            !alloc.create_prefix()
                && kind == alloc.kind()
                && prefix.prefix_len() < prefix.family().max_len()
        }
    }
}

/// First subnet of `new_len` inside `parent` that overlaps no other route.
fn free_subnet(rib: &dyn Rib, parent: &IpPrefix, new_len: u8) -> Option<IpPrefix> {
    if new_len <= parent.prefix_len() {
        return None;
    }
    let taken: Vec<IpPrefix> = rib
        .routes()
        .into_iter()
        .map(|r| r.prefix())
        .filter(|p| p != parent && parent.contains(p))
        .map(|p| {
            if p.prefix_len() == parent.prefix_len() {
                p.address_prefix()
            } else {
                p.network()
            }
        })
        .collect();
    // The all-zeros address of an IPv4 subnet is not handed out.
    let skip = usize::from(
        parent.family() == AddressFamily::Ipv4
            && new_len == parent.family().max_len()
            && parent.prefix_len() < 31,
    );
    (0..MAX_CANDIDATES)
        .map_while(|i| parent.subnet(new_len, i))
        .skip(skip)
        .find(|c| !taken.iter().any(|t| t.contains(c) || c.contains(t)))
}

fn status_code(alloc: &IpAllocation) -> StatusCode {
    if alloc.status.allocated_prefix.is_some() {
        StatusCode::Valid
    } else {
        StatusCode::Unknown
    }
}

#[async_trait]
impl AllocHandler for IpamBackend {
    #[instrument(skip(self, ctx, req), fields(nsn = %req.header.nsn, index = %req.index))]
    async fn get(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        ctx.run(async {
            let alloc = IpAllocation::from_request(&req)?;
            let instance = self.instance(&alloc.index)?;
            let alloc = Getter::new(GetterConfig {
                alloc,
                rib: instance.rib(),
            })
            .resolve()?;
            alloc.to_response(status_code(&alloc))
        })
        .await
    }

    #[instrument(skip(self, ctx, req), fields(nsn = %req.header.nsn, index = %req.index))]
    async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        ctx.run(async {
            let alloc = IpAllocation::from_request(&req)?;
            let instance = self.instance(&alloc.index)?;
            let alloc = if alloc.spec.prefix.is_some() {
                self.allocate_static(&instance, alloc).await?
            } else {
                self.allocate_dynamic(&instance, alloc).await?
            };
            alloc.to_response(status_code(&alloc))
        })
        .await
    }

    #[instrument(skip(self, ctx, req), fields(nsn = %req.header.nsn, index = %req.index))]
    async fn deallocate(&self, ctx: &CallContext, req: Request) -> AllocResult<()> {
        ctx.run(async {
            let alloc = IpAllocation::from_request(&req)?;
            let instance = self.instance(&alloc.index)?;
            let selector = alloc.owner_selector()?;
            for route in instance.rib().get_by_label(&selector) {
                match instance.rib().delete(&route.prefix()) {
                    Ok(_) => debug!(prefix = %route.prefix(), "route released"),
                    Err(RibError::NotFound(_)) => {}
                    Err(e) => return Err(AllocError::rib_write("delete", route.prefix(), e)),
                }
            }
            Ok(())
        })
        .await
    }

    async fn watch(&self, req: WatchRequest, stream: WatchStream) -> AllocResult<()> {
        let id = self.watcher.add_watch(req, stream.clone());
        stream.closed().await;
        self.watcher.remove_watch(id);
        debug!(id, "watch ended");
        Ok(())
    }
}
