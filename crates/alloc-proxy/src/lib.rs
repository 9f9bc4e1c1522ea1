//! Allocation proxy: routes allocation calls to the backend serving each index.
//!
//! - [`connector`]: [`Connector`]/[`AllocClient`] and the in-process [`LocalConnector`]
//! - [`registry`]: [`BackendRegistry`], the index → connection cache
//! - [`reconciler`]: [`IndexReconciler`], the per-index lifecycle step
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(BackendRegistry::new(connector, targets));
//! registry.create_index(&CallContext::new(), &index).await?;
//! let resp = registry.allocate(&CallContext::new(), req).await?;
//! ```

pub mod connector;
pub mod reconciler;
pub mod registry;

pub use connector::{AllocClient, Connector, LocalConnector, ServiceTarget};
pub use reconciler::{IndexReconciler, IndexResource, ReconcileResult, INDEX_FINALIZER};
pub use registry::BackendRegistry;
