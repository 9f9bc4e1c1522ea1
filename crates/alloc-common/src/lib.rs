//! Shared infrastructure for the allocation service.
//!
//! - [`proto`]: request, response and watch messages
//! - [`handler`]: the [`AllocHandler`] service trait, [`CallContext`] and watch streams
//! - [`condition`]: status conditions recorded by reconcilers
//! - [`error`]: error types for allocation operations
//! - [`keys`]: label keys attached to allocated resources
//!
//! # Example
//!
//! ```ignore
//! use alloc_common::{AllocHandler, CallContext, Request};
//!
//! async fn claim(handler: &dyn AllocHandler, req: Request) -> alloc_common::AllocResult<()> {
//!     let resp = handler.allocate(&CallContext::new(), req).await?;
//!     tracing::info!(status = %resp.status, "allocated");
//!     Ok(())
//! }
//! ```

pub mod condition;
pub mod error;
pub mod handler;
pub mod keys;
pub mod proto;

// Re-export commonly used items at crate root
pub use condition::{Condition, ConditionKind, ConditionStatus, ConditionedStatus};
pub use error::{AllocError, AllocResult, RibError};
pub use handler::{watch_channel, AllocHandler, CallContext, WatchReceiver, WatchStream};
pub use proto::{Gvk, Header, IndexRef, NamespacedName, Request, Response, StatusCode, WatchRequest};
