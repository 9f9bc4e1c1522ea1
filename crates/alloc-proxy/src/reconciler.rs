//! Per-index reconcile step of the index lifecycle.
//!
//! The control loop that watches index resources and schedules retries lives
//! outside this crate; it calls [`IndexReconciler::reconcile`] once per event
//! and persists the conditions written into the resource.

use crate::registry::BackendRegistry;
use alloc_common::condition::{self, ConditionedStatus};
use alloc_common::{CallContext, IndexRef};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Finalizer guarding index resources until their backend connection is gone.
pub const INDEX_FINALIZER: &str = "alloc.io/finalizer";

/// An index resource (network instance or VLAN database) as seen by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResource {
    pub index: IndexRef,
    /// Deletion was requested; the resource lingers while finalizers remain.
    pub deleted: bool,
    pub finalizers: Vec<String>,
    pub status: ConditionedStatus,
}

impl IndexResource {
    pub fn new(index: IndexRef) -> Self {
        Self {
            index,
            deleted: false,
            finalizers: Vec::new(),
            status: ConditionedStatus::default(),
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    fn add_finalizer(&mut self, finalizer: &str) {
        if !self.has_finalizer(finalizer) {
            self.finalizers.push(finalizer.to_string());
        }
    }

    fn remove_finalizer(&mut self, finalizer: &str) {
        self.finalizers.retain(|f| f != finalizer);
    }
}

/// What the control loop should do after a reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self { requeue: false }
    }

    pub fn requeue() -> Self {
        Self { requeue: true }
    }
}

/// Drives the registry from index resource events.
#[derive(Debug, Clone)]
pub struct IndexReconciler {
    registry: Arc<BackendRegistry>,
    finalizer: String,
}

impl IndexReconciler {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            finalizer: INDEX_FINALIZER.to_string(),
        }
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }

    #[instrument(skip(self, ctx, res), fields(index = %res.index, deleted = res.deleted))]
    pub async fn reconcile(&self, ctx: &CallContext, res: &mut IndexResource) -> ReconcileResult {
        if res.deleted {
            if let Err(e) = self.registry.delete_index(ctx, &res.index).await {
                error!(error = %e, "cannot delete index");
                res.status
                    .set_conditions([condition::reconcile_error(&e), condition::unknown()]);
                return ReconcileResult::requeue();
            }
            res.remove_finalizer(&self.finalizer);
            info!("index deleted");
            return ReconcileResult::done();
        }

        res.add_finalizer(&self.finalizer);

        if let Err(e) = self.registry.create_index(ctx, &res.index).await {
            error!(error = %e, "cannot initialize index");
            res.status.set_conditions([
                condition::reconcile_error(&e),
                condition::failed(e.to_string()),
            ]);
            return ReconcileResult::requeue();
        }

        res.status
            .set_conditions([condition::reconcile_success(), condition::ready()]);
        ReconcileResult::done()
    }
}
