//! Backend registry: one lazily connected backend per index.
//!
//! Lifecycle operations (`create_index`, `delete_index`) take the write lock
//! and connect or disconnect while holding it, so they are mutually
//! exclusive. Forwarded calls only take the read lock and never connect.

use crate::connector::{AllocClient, Connector, ServiceTarget};
use alloc_common::{
    AllocError, AllocHandler, AllocResult, CallContext, IndexRef, Request, Response, WatchRequest,
    WatchStream,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

struct RegistryEntry {
    target: ServiceTarget,
    client: Option<Arc<dyn AllocClient>>,
}

/// Index → backend connection cache.
pub struct BackendRegistry {
    connector: Arc<dyn Connector>,
    /// Backend address per resource group.
    targets: HashMap<String, ServiceTarget>,
    entries: RwLock<HashMap<IndexRef, RegistryEntry>>,
}

impl BackendRegistry {
    pub fn new(connector: Arc<dyn Connector>, targets: HashMap<String, ServiceTarget>) -> Self {
        Self {
            connector,
            targets,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn target_for(&self, index: &IndexRef) -> AllocResult<ServiceTarget> {
        self.targets
            .get(&index.group)
            .cloned()
            .ok_or_else(|| AllocError::no_route(index.group.clone()))
    }

    /// Ensures a connection to the backend serving `index`.
    ///
    /// A failed connect leaves the index registered without a connection.
    #[instrument(skip(self, ctx))]
    pub async fn create_index(&self, ctx: &CallContext, index: &IndexRef) -> AllocResult<()> {
        let target = self.target_for(index)?;
        let mut entries = self.entries.write().await;
        let entry = entries.entry(index.clone()).or_insert_with(|| RegistryEntry {
            target: target.clone(),
            client: None,
        });
        if entry.client.is_some() && entry.target == target {
            debug!(%index, "backend connection cached");
            return Ok(());
        }
        if let Some(stale) = entry.client.take() {
            warn!(%index, old = %entry.target, new = %target, "backend target changed");
            if let Err(e) = stale.close().await {
                warn!(%index, error = %e, "cannot close stale connection");
            }
        }
        entry.target = target.clone();

        match ctx.run(self.connector.connect(&target)).await {
            Ok(client) => {
                info!(%index, %target, "backend connected");
                entry.client = Some(client);
                Ok(())
            }
            Err(e) => {
                error!(%index, %target, error = %e, "cannot connect to backend");
                Err(wrap(index, e))
            }
        }
    }

    /// Closes and forgets the connection for `index`; unknown indexes are fine.
    #[instrument(skip(self, ctx))]
    pub async fn delete_index(&self, ctx: &CallContext, index: &IndexRef) -> AllocResult<()> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(index) else {
            debug!(%index, "index not registered");
            return Ok(());
        };
        if let Some(client) = entry.client.clone() {
            if let Err(e) = ctx.run(client.close()).await {
                error!(%index, error = %e, "cannot close backend connection");
                return Err(wrap(index, e));
            }
        }
        entries.remove(index);
        info!(%index, "backend connection removed");
        Ok(())
    }

    /// Cached connection for `index`.
    pub async fn client(&self, index: &IndexRef) -> AllocResult<Arc<dyn AllocClient>> {
        self.entries
            .read()
            .await
            .get(index)
            .and_then(|e| e.client.clone())
            .ok_or_else(|| AllocError::backend_unreachable(index))
    }

    /// True if a connection is cached for `index`.
    pub async fn is_connected(&self, index: &IndexRef) -> bool {
        self.client(index).await.is_ok()
    }

    pub async fn indexes(&self) -> Vec<IndexRef> {
        let mut indexes: Vec<IndexRef> = self.entries.read().await.keys().cloned().collect();
        indexes.sort();
        indexes
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

/// Adds the index to transport errors.
fn wrap(index: &IndexRef, err: AllocError) -> AllocError {
    match err {
        AllocError::Connection { message, .. } => AllocError::connection(index, message),
        other => other,
    }
}

/// Runs a forwarded call under a child of `ctx`. The child is cancelled once
/// the call is done, so work still pending behind it stops.
async fn forward<T, F>(
    ctx: &CallContext,
    index: &IndexRef,
    call: impl FnOnce(CallContext) -> F,
) -> AllocResult<T>
where
    F: Future<Output = AllocResult<T>>,
{
    let child = ctx.child();
    let result = ctx.run(call(child.clone())).await;
    child.cancel();
    result.map_err(|e| wrap(index, e))
}

#[async_trait]
impl AllocHandler for BackendRegistry {
    async fn get(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        let index = req.index.clone();
        let client = self.client(&index).await?;
        forward(ctx, &index, |ctx| async move { client.get(&ctx, req).await }).await
    }

    async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        let index = req.index.clone();
        let client = self.client(&index).await?;
        forward(ctx, &index, |ctx| async move { client.allocate(&ctx, req).await }).await
    }

    async fn deallocate(&self, ctx: &CallContext, req: Request) -> AllocResult<()> {
        let index = req.index.clone();
        let client = self.client(&index).await?;
        forward(ctx, &index, |ctx| async move { client.deallocate(&ctx, req).await }).await
    }

    async fn watch(&self, req: WatchRequest, stream: WatchStream) -> AllocResult<()> {
        let index = req.index.clone();
        let client = self.client(&index).await?;
        debug!(%index, owner_gvk = %req.owner_gvk, "forwarding watch");
        client.watch(req, stream).await.map_err(|e| wrap(&index, e))
    }
}
