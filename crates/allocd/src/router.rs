//! Group-based request router.
//!
//! Every request names its resource group in `header.gvk.group`; the router
//! looks the group up and forwards the call unchanged to the handler
//! registered for it.

use alloc_common::{
    AllocError, AllocHandler, AllocResult, CallContext, Request, Response, WatchRequest,
    WatchStream,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Routes allocation calls to per-group handlers.
#[derive(Default)]
pub struct SubServer {
    routes: RwLock<HashMap<String, Arc<dyn AllocHandler>>>,
}

impl SubServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `routes`, replacing handlers already registered for the same group.
    pub fn with_routes(self, routes: HashMap<String, Arc<dyn AllocHandler>>) -> Self {
        {
            let mut table = self.routes.write();
            for (group, handler) in routes {
                if table.insert(group.clone(), handler).is_some() {
                    info!(%group, "replaced route");
                } else {
                    debug!(%group, "added route");
                }
            }
        }
        self
    }

    /// Registered groups, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.routes.read().keys().cloned().collect();
        groups.sort();
        groups
    }

    fn handler(&self, group: &str) -> AllocResult<Arc<dyn AllocHandler>> {
        self.routes
            .read()
            .get(group)
            .cloned()
            .ok_or_else(|| AllocError::no_route(group))
    }
}

impl fmt::Debug for SubServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubServer")
            .field("groups", &self.groups())
            .finish()
    }
}

#[async_trait]
impl AllocHandler for SubServer {
    async fn get(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        let handler = self.handler(req.group())?;
        handler.get(ctx, req).await
    }

    async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
        let handler = self.handler(req.group())?;
        handler.allocate(ctx, req).await
    }

    async fn deallocate(&self, ctx: &CallContext, req: Request) -> AllocResult<()> {
        let handler = self.handler(req.group())?;
        handler.deallocate(ctx, req).await
    }

    async fn watch(&self, req: WatchRequest, stream: WatchStream) -> AllocResult<()> {
        let handler = self.handler(req.group())?;
        handler.watch(req, stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_common::{Gvk, Header, IndexRef, NamespacedName, StatusCode};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and answers with its own name in the status.
    struct Recorder {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AllocHandler for Recorder {
        async fn get(&self, _ctx: &CallContext, req: Request) -> AllocResult<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Response::for_request(&req, &self.name, StatusCode::Valid)
        }

        async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response> {
            self.get(ctx, req).await
        }

        async fn deallocate(&self, _ctx: &CallContext, _req: Request) -> AllocResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn watch(&self, _req: WatchRequest, _stream: WatchStream) -> AllocResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request(group: &str) -> Request {
        Request::new(
            Header::new(Gvk::new(group, "v1", "Alloc"), NamespacedName::new("default", "x")),
            IndexRef::new(group, "default", "idx"),
            &serde_json::json!({}),
        )
        .unwrap()
    }

    fn routes(handlers: &[(&str, Arc<Recorder>)]) -> HashMap<String, Arc<dyn AllocHandler>> {
        handlers
            .iter()
            .map(|(group, h)| (group.to_string(), h.clone() as Arc<dyn AllocHandler>))
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_by_group() {
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        let router = SubServer::new().with_routes(routes(&[("a", a.clone()), ("b", b.clone())]));
        let ctx = CallContext::new();

        let resp = router.allocate(&ctx, request("a")).await.unwrap();
        assert_eq!(resp.status, serde_json::json!("a"));
        let resp = router.get(&ctx, request("b")).await.unwrap();
        assert_eq!(resp.status, serde_json::json!("b"));
        router.deallocate(&ctx, request("b")).await.unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let a = Recorder::new("a");
        let router = SubServer::new().with_routes(routes(&[("a", a.clone())]));
        let err = router
            .allocate(&CallContext::new(), request("c"))
            .await
            .unwrap_err();
        match err {
            AllocError::NoRouteForGroup { group } => assert_eq!(group, "c"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_with_routes_overwrites() {
        let old = Recorder::new("old");
        let new = Recorder::new("new");
        let router = SubServer::new()
            .with_routes(routes(&[("a", old.clone())]))
            .with_routes(routes(&[("a", new.clone()), ("b", new.clone())]));
        assert_eq!(router.groups(), vec!["a".to_string(), "b".to_string()]);

        let resp = router.get(&CallContext::new(), request("a")).await.unwrap();
        assert_eq!(resp.status, serde_json::json!("new"));
        assert_eq!(old.calls.load(Ordering::SeqCst), 0);
    }
}
