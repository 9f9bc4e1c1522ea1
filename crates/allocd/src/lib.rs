//! allocd: network resource allocation daemon.
//!
//! Wires the IPAM and VLAN backends behind a [`BackendRegistry`] and exposes
//! them through the group router ([`SubServer`]). Backends are reached over
//! the in-process [`LocalConnector`] at the addresses named in the
//! configuration.

pub mod config;
pub mod router;

pub use config::{BackendConfig, ConfigError, DaemonConfig, NetworkInstanceConfig, VlanDatabaseConfig};
pub use router::SubServer;

use alloc_common::{AllocHandler, AllocResult, CallContext};
use alloc_ipam::IpamBackend;
use alloc_proxy::{BackendRegistry, IndexReconciler, IndexResource, LocalConnector};
use alloc_vlan::VlanBackend;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The long-lived daemon state.
#[derive(Debug)]
pub struct Service {
    config: DaemonConfig,
    ipam: Arc<IpamBackend>,
    vlan: Arc<VlanBackend>,
    registry: Arc<BackendRegistry>,
    reconciler: IndexReconciler,
    router: Arc<SubServer>,
}

impl Service {
    pub fn new(config: DaemonConfig) -> Self {
        let ipam = Arc::new(IpamBackend::new());
        let vlan = Arc::new(VlanBackend::new());

        let connector = Arc::new(LocalConnector::new());
        for backend in &config.backends {
            match backend.group.as_str() {
                alloc_ipam::GROUP => connector.register(backend.target(), ipam.clone()),
                alloc_vlan::GROUP => connector.register(backend.target(), vlan.clone()),
                group => warn!(%group, target = %backend.target(), "no local backend for group"),
            }
        }

        let registry = Arc::new(BackendRegistry::new(connector, config.targets()));
        let reconciler = IndexReconciler::new(registry.clone());
        let routes: HashMap<String, Arc<dyn AllocHandler>> = config
            .backends
            .iter()
            .map(|b| (b.group.clone(), registry.clone() as Arc<dyn AllocHandler>))
            .collect();
        let router = Arc::new(SubServer::new().with_routes(routes));

        Self {
            config,
            ipam,
            vlan,
            registry,
            reconciler,
            router,
        }
    }

    /// Entry point for allocation calls.
    pub fn router(&self) -> &Arc<SubServer> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Call context carrying the configured deadline.
    pub fn context(&self) -> CallContext {
        match self.config.call_timeout() {
            Some(timeout) => CallContext::new().with_timeout(timeout),
            None => CallContext::new(),
        }
    }

    /// Creates the configured indexes in their backends and reconciles them.
    ///
    /// Returns the index resources with their conditions; an index whose
    /// reconcile asked for a requeue is reported and left not ready.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> AllocResult<Vec<IndexResource>> {
        for ni in &self.config.network_instances {
            self.ipam.create_index(ni.index(), ni.aggregates.clone()).await?;
        }
        for db in &self.config.vlan_databases {
            self.vlan.create_index(db.index(), db.range()?);
        }

        let indexes = self
            .config
            .network_instances
            .iter()
            .map(NetworkInstanceConfig::index)
            .chain(self.config.vlan_databases.iter().map(VlanDatabaseConfig::index));

        let mut resources = Vec::new();
        for index in indexes {
            let mut res = IndexResource::new(index);
            if self.reconciler.reconcile(&self.context(), &mut res).await.requeue {
                warn!(index = %res.index, "index not ready");
            }
            resources.push(res);
        }
        info!(count = resources.len(), "indexes initialized");
        Ok(resources)
    }

    /// Deletes the given indexes from the registry and their backends.
    #[instrument(skip(self, resources), fields(count = resources.len()))]
    pub async fn shutdown(&self, resources: &mut [IndexResource]) {
        for res in resources.iter_mut() {
            res.deleted = true;
            if self.reconciler.reconcile(&self.context(), res).await.requeue {
                warn!(index = %res.index, "index not released");
                continue;
            }
            match res.index.group.as_str() {
                alloc_ipam::GROUP => self.ipam.delete_index(&res.index),
                alloc_vlan::GROUP => self.vlan.delete_index(&res.index),
                _ => {}
            }
        }
        info!("shutdown complete");
    }
}
