//! The allocation service surface and the per-call context.
//!
//! Every resource group (IPAM, VLAN, ...) is served by an [`AllocHandler`].
//! Backends, the backend registry and the request router all implement the
//! same trait, so a call can be forwarded through any number of hops.

use crate::error::{AllocError, AllocResult};
use crate::proto::{Request, Response, WatchRequest};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline carried by a single call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that is cancelled together with `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Derived context: cancelling the parent cancels the child, not the reverse.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            timeout: self.timeout,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `fut` until it completes, the context is cancelled or the
    /// deadline elapses, whichever comes first.
    pub async fn run<T, F>(&self, fut: F) -> AllocResult<T>
    where
        F: Future<Output = AllocResult<T>>,
    {
        if self.is_cancelled() {
            return Err(AllocError::Cancelled);
        }
        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AllocError::Cancelled),
                res = fut => res,
            }
        };
        match self.timeout {
            Some(after) => tokio::time::timeout(after, guarded)
                .await
                .map_err(|_| AllocError::Timeout { after })?,
            None => guarded.await,
        }
    }
}

/// Creates a watch subscription with room for `buffer` pending responses.
pub fn watch_channel(buffer: usize) -> (WatchStream, WatchReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    (
        WatchStream {
            tx,
            cancel: cancel.clone(),
        },
        WatchReceiver { rx, cancel },
    )
}

/// Sending half of a watch subscription, held by the serving side.
#[derive(Debug, Clone)]
pub struct WatchStream {
    tx: mpsc::Sender<Response>,
    cancel: CancellationToken,
}

impl WatchStream {
    /// Sends one notification, waiting for buffer space.
    pub async fn send(&self, resp: Response) -> AllocResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AllocError::Cancelled),
            res = self.tx.send(resp) => res.map_err(|_| AllocError::Cancelled),
        }
    }

    /// Sends one notification without waiting; a full buffer is an error.
    pub fn try_send(&self, resp: Response) -> AllocResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AllocError::Cancelled);
        }
        self.tx.try_send(resp).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => AllocError::invalid_request("watch buffer full"),
            mpsc::error::TrySendError::Closed(_) => AllocError::Cancelled,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once either side ends the subscription.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Receiving half of a watch subscription, held by the caller.
///
/// Dropping the receiver cancels the subscription.
#[derive(Debug)]
pub struct WatchReceiver {
    rx: mpsc::Receiver<Response>,
    cancel: CancellationToken,
}

impl WatchReceiver {
    /// Next notification, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Response> {
        tokio::select! {
            biased;
            resp = self.rx.recv() => resp,
            _ = self.cancel.cancelled() => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<Response> {
        self.rx.try_recv().ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WatchReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Allocation service for one or more resource groups.
#[async_trait]
pub trait AllocHandler: Send + Sync {
    /// Looks up an existing allocation without changing anything.
    async fn get(&self, ctx: &CallContext, req: Request) -> AllocResult<Response>;

    /// Claims (or re-claims) the resource described by the request.
    async fn allocate(&self, ctx: &CallContext, req: Request) -> AllocResult<Response>;

    /// Releases everything the requesting resource holds.
    async fn deallocate(&self, ctx: &CallContext, req: Request) -> AllocResult<()>;

    /// Streams change notifications until either side cancels.
    async fn watch(&self, req: WatchRequest, stream: WatchStream) -> AllocResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Gvk, Header, IndexRef, NamespacedName, StatusCode};
    use tokio_test::{assert_err, assert_ok};

    fn response() -> Response {
        let req = Request {
            header: Header::new(
                Gvk::new("ipam.alloc.io", "v1alpha1", "IPAllocation"),
                NamespacedName::new("default", "a"),
            ),
            index: IndexRef::new("ipam.alloc.io", "default", "vpc-1"),
            spec: serde_json::Value::Null,
        };
        Response::for_request(&req, &serde_json::Value::Null, StatusCode::Unknown).unwrap()
    }

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = CallContext::new();
        let value = assert_ok!(ctx.run(async { Ok(7) }).await);
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let ctx = CallContext::new();
        ctx.cancel();
        let res: AllocResult<()> = ctx.run(std::future::pending()).await;
        assert!(matches!(res, Err(AllocError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_parent_cancels_child() {
        let parent = CallContext::new();
        let child = parent.child();
        let task = tokio::spawn(async move { child.run::<(), _>(std::future::pending()).await });
        parent.cancel();
        let res = task.await.unwrap();
        assert!(matches!(res, Err(AllocError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let res: AllocResult<()> = ctx.run(std::future::pending()).await;
        assert!(matches!(res, Err(AllocError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_watch_delivers_in_order() {
        let (stream, mut rx) = watch_channel(4);
        assert_ok!(stream.send(response()).await);
        assert_ok!(stream.try_send(response()));
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropping_receiver_closes_stream() {
        let (stream, rx) = watch_channel(1);
        assert!(!stream.is_closed());
        drop(rx);
        assert!(stream.is_closed());
        stream.closed().await;
        assert_err!(stream.send(response()).await);
    }

    #[tokio::test]
    async fn test_server_cancel_ends_receiver() {
        let (stream, mut rx) = watch_channel(1);
        stream.cancel();
        assert!(rx.recv().await.is_none());
    }
}
