//! Connections from the registry to allocation backends.

use alloc_common::{
    AllocError, AllocHandler, AllocResult, CallContext, Request, Response, WatchRequest,
    WatchStream,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Address of an allocation backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub host: String,
    pub port: u16,
}

impl ServiceTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An open connection to a backend.
#[async_trait]
pub trait AllocClient: AllocHandler {
    /// Tears the connection down. Calls made afterwards fail.
    async fn close(&self) -> AllocResult<()>;
}

/// Opens backend connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ServiceTarget) -> AllocResult<Arc<dyn AllocClient>>;
}

/// In-process transport: targets resolve to handlers registered in this process.
#[derive(Default)]
pub struct LocalConnector {
    handlers: RwLock<HashMap<ServiceTarget, Arc<dyn AllocHandler>>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `handler` reachable at `target`.
    pub fn register(&self, target: ServiceTarget, handler: Arc<dyn AllocHandler>) {
        info!(%target, "registered local backend");
        self.handlers.write().insert(target, handler);
    }

    /// Makes `target` unreachable for new connections.
    pub fn unregister(&self, target: &ServiceTarget) {
        if self.handlers.write().remove(target).is_some() {
            info!(%target, "unregistered local backend");
        }
    }
}

impl fmt::Debug for LocalConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<String> = self.handlers.read().keys().map(ToString::to_string).collect();
        f.debug_struct("LocalConnector").field("targets", &targets).finish()
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, target: &ServiceTarget) -> AllocResult<Arc<dyn AllocClient>> {
        let handler = self
            .handlers
            .read()
            .get(target)
            .cloned()
            .ok_or_else(|| AllocError::connection(target, "connection refused"))?;
        debug!(%target, "connected");
        Ok(Arc::new(LocalClient {
            target: target.clone(),
            handler,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Connection produced by [`LocalConnector`].
struct LocalClient {
    target: ServiceTarget,
    handler: Arc<dyn AllocHandler>,
    closed: AtomicBool,
}

impl LocalClient {
    fn check_open(&self) -> AllocResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AllocError::connection(&self.target, "connection closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl AllocHandler for LocalClient {
    async fn get(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        self.check_open()?;
        self.handler.get(ctx, req).await
    }

    async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        self.check_open()?;
        self.handler.allocate(ctx, req).await
    }

    async fn deallocate(&self, ctx: &CallContext, req: Request) -> AllocResult<()> {
        self.check_open()?;
        self.handler.deallocate(ctx, req).await
    }

    async fn watch(&self, req: WatchRequest, stream: WatchStream) -> AllocResult<()> {
        self.check_open()?;
        self.handler.watch(req, stream).await
    }
}

#[async_trait]
impl AllocClient for LocalClient {
    async fn close(&self) -> AllocResult<()> {
        self.closed.store(true, Ordering::Release);
        debug!(target = %self.target, "connection closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_target_display() {
        assert_eq!(ServiceTarget::new("ipam", 9999).to_string(), "ipam:9999");
    }

    #[tokio::test]
    async fn test_unknown_target_refused() {
        let connector = LocalConnector::new();
        let err = connector
            .connect(&ServiceTarget::new("nowhere", 1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AllocError::Connection { .. }));
    }
}
