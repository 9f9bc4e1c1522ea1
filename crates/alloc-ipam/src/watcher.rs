//! Change notifications for routes whose owner must re-evaluate them.

use crate::allocation::IpAllocationStatus;
use crate::rib::Route;
use alloc_common::{
    keys, Gvk, Header, NamespacedName, Response, StatusCode, WatchRequest, WatchStream,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Receives batches of routes that changed underneath their owner.
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn handle_update(&self, routes: Vec<Route>, code: StatusCode);
}

#[derive(Debug, Clone)]
struct Subscription {
    id: u64,
    req: WatchRequest,
    stream: WatchStream,
}

/// Watch subscriptions keyed by the owner kind they follow.
#[derive(Debug, Default)]
pub struct WatcherTable {
    next_id: AtomicU64,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl WatcherTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription and returns its id.
    pub fn add_watch(&self, req: WatchRequest, stream: WatchStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = req.owner_gvk.to_label_value();
        debug!(id, owner_gvk = %key, index = %req.index, "add watch");
        self.subscriptions
            .write()
            .entry(key)
            .or_default()
            .push(Subscription { id, req, stream });
        id
    }

    pub fn remove_watch(&self, id: u64) {
        let mut subscriptions = self.subscriptions.write();
        for subs in subscriptions.values_mut() {
            subs.retain(|s| s.id != id);
        }
        subscriptions.retain(|_, subs| !subs.is_empty());
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_all(&self, ids: &[u64]) {
        let mut subscriptions = self.subscriptions.write();
        for subs in subscriptions.values_mut() {
            subs.retain(|s| !ids.contains(&s.id));
        }
        subscriptions.retain(|_, subs| !subs.is_empty());
    }

    fn targets(&self, route: &Route) -> Vec<Subscription> {
        let Some(owner_gvk) = route.labels().get(keys::OWNER_GVK) else {
            return Vec::new();
        };
        let Some(index) = route.labels().get(keys::INDEX) else {
            return Vec::new();
        };
        self.subscriptions
            .read()
            .get(owner_gvk)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.req.index.to_label_value() == index)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Rebuilds the header of the allocation that created `route`.
fn header_from_route(route: &Route) -> Header {
    let labels = route.labels();
    let get = |key| labels.get(key).unwrap_or_default().to_string();
    Header::new(
        labels
            .get(keys::GVK)
            .and_then(Gvk::from_label_value)
            .unwrap_or_default(),
        NamespacedName::new(get(keys::NSN_NAMESPACE), get(keys::NSN_NAME)),
    )
    .with_owner(
        labels
            .get(keys::OWNER_GVK)
            .and_then(Gvk::from_label_value)
            .unwrap_or_default(),
        NamespacedName::new(get(keys::OWNER_NSN_NAMESPACE), get(keys::OWNER_NSN_NAME)),
    )
}

fn notification(sub: &Subscription, route: &Route, code: StatusCode) -> Option<Response> {
    let status = IpAllocationStatus {
        allocated_prefix: Some(route.prefix().to_string()),
        ..Default::default()
    };
    let spec = serde_json::to_value(route).ok()?;
    let status = serde_json::to_value(&status).ok()?;
    Some(Response {
        header: header_from_route(route),
        index: sub.req.index.clone(),
        spec,
        status,
        status_code: code,
    })
}

#[async_trait]
impl Watcher for WatcherTable {
    /// Never waits on a subscriber: one whose buffer is full or whose
    /// receiver is gone is dropped from the table.
    async fn handle_update(&self, routes: Vec<Route>, code: StatusCode) {
        let mut dropped = Vec::new();
        for route in &routes {
            for sub in self.targets(route) {
                if dropped.contains(&sub.id) {
                    continue;
                }
                let Some(resp) = notification(&sub, route, code) else {
                    warn!(prefix = %route.prefix(), "cannot encode watch notification");
                    continue;
                };
                if let Err(e) = sub.stream.try_send(resp) {
                    warn!(id = sub.id, index = %sub.req.index, error = %e, "dropping watch subscriber");
                    sub.stream.cancel();
                    dropped.push(sub.id);
                }
            }
        }
        if !dropped.is_empty() {
            self.remove_all(&dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_common::{watch_channel, IndexRef};
    use alloc_types::{IpPrefix, Labels};
    use pretty_assertions::assert_eq;

    fn owner() -> Gvk {
        Gvk::new("workload.alloc.io", "v1", "Deployment")
    }

    fn index(namespace: &str, name: &str) -> IndexRef {
        IndexRef::new("ipam.alloc.io", namespace, name)
    }

    fn watch_req(index: IndexRef) -> WatchRequest {
        WatchRequest {
            gvk: Gvk::new("ipam.alloc.io", "v1alpha1", "IPAllocation"),
            owner_gvk: owner(),
            index,
        }
    }

    fn route(prefix: &str, index: IndexRef) -> Route {
        let labels: Labels = [
            (keys::OWNER_GVK, owner().to_label_value()),
            (keys::INDEX, index.to_label_value()),
            (keys::NSN_NAME, "web-1".to_string()),
            (keys::NSN_NAMESPACE, "default".to_string()),
            (keys::GVK, "IPAllocation.v1alpha1.ipam.alloc.io".to_string()),
        ]
        .into_iter()
        .collect();
        Route::new(prefix.parse::<IpPrefix>().unwrap(), labels)
    }

    #[tokio::test]
    async fn test_update_reaches_matching_subscriber() {
        let table = WatcherTable::new();
        let (stream, mut rx) = watch_channel(8);
        table.add_watch(watch_req(index("default", "vpc-1")), stream);

        table
            .handle_update(
                vec![
                    route("10.0.0.5/32", index("default", "vpc-1")),
                    route("10.0.0.6/32", index("default", "vpc-2")),
                ],
                StatusCode::Unknown,
            )
            .await;

        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.header.nsn, NamespacedName::new("default", "web-1"));
        assert_eq!(resp.header.owner_gvk, owner());
        assert_eq!(resp.status_code, StatusCode::Unknown);
        let status: IpAllocationStatus = resp.status_as().unwrap();
        assert_eq!(status.allocated_prefix.as_deref(), Some("10.0.0.5/32"));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let table = WatcherTable::new();
        let (stream, rx) = watch_channel(8);
        table.add_watch(watch_req(index("default", "vpc-1")), stream);
        assert_eq!(table.len(), 1);
        drop(rx);
        table
            .handle_update(
                vec![route("10.0.0.5/32", index("default", "vpc-1"))],
                StatusCode::Unknown,
            )
            .await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_same_name_in_other_namespace_not_notified() {
        let table = WatcherTable::new();
        let (stream_a, mut rx_a) = watch_channel(8);
        let (stream_b, mut rx_b) = watch_channel(8);
        table.add_watch(watch_req(index("tenant-a", "vpc-1")), stream_a);
        table.add_watch(watch_req(index("tenant-b", "vpc-1")), stream_b);

        table
            .handle_update(
                vec![route("10.0.0.5/32", index("tenant-a", "vpc-1"))],
                StatusCode::Unknown,
            )
            .await;

        let resp = rx_a.try_recv().unwrap();
        assert_eq!(resp.index, index("tenant-a", "vpc-1"));
        assert!(rx_b.try_recv().is_none());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped_without_blocking() {
        let table = WatcherTable::new();
        let (slow, _slow_rx) = watch_channel(1);
        let (fast, mut fast_rx) = watch_channel(8);
        table.add_watch(watch_req(index("default", "vpc-1")), slow.clone());
        table.add_watch(watch_req(index("default", "vpc-1")), fast);

        let routes = ["10.0.0.5/32", "10.0.0.6/32", "10.0.0.7/32"]
            .into_iter()
            .map(|p| route(p, index("default", "vpc-1")))
            .collect();
        tokio::time::timeout(
            std::time::Duration::from_millis(100),
            table.handle_update(routes, StatusCode::Unknown),
        )
        .await
        .unwrap();

        assert!(slow.is_closed());
        assert_eq!(table.len(), 1);
        for _ in 0..3 {
            assert!(fast_rx.try_recv().is_some());
        }
    }

    #[test]
    fn test_remove_watch() {
        let table = WatcherTable::new();
        let (stream, _rx) = watch_channel(1);
        let id = table.add_watch(watch_req(index("default", "vpc-1")), stream);
        table.remove_watch(id);
        assert!(table.is_empty());
    }
}
