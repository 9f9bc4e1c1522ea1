//! Error types for allocation operations.
//!
//! All errors implement `std::error::Error` via `thiserror`. Benign outcomes
//! that callers are expected to swallow (a route that already exists) are a
//! distinct [`RibError`] kind rather than a message to match on.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Failures reported by a RIB write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RibError {
    /// A route with this exact prefix is already present.
    #[error("route {0} already exists")]
    AlreadyExists(String),

    /// No route with this exact prefix is present.
    #[error("route {0} not found")]
    NotFound(String),

    /// The RIB only holds prefixes of one address family.
    #[error("route {prefix} does not match address family {family}")]
    FamilyMismatch {
        /// The offending prefix.
        prefix: String,
        /// The family the RIB was created for.
        family: String,
    },
}

impl RibError {
    /// Returns true for the benign "already exists" outcome.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, RibError::AlreadyExists(_))
    }
}

/// Errors that can occur while serving allocation requests.
#[derive(Debug, Error)]
pub enum AllocError {
    /// A RIB insert/update/delete failed with something other than "already exists".
    #[error("cannot {operation} prefix {prefix}: {source}")]
    RibWrite {
        /// The RIB operation (add, set, delete).
        operation: &'static str,
        /// The prefix being written.
        prefix: String,
        /// The underlying RIB error.
        #[source]
        source: RibError,
    },

    /// A label selector could not be compiled.
    #[error("invalid label selector: {message}")]
    Selector {
        /// Error message.
        message: String,
    },

    /// No connection is cached for the target index.
    #[error("allocation backend for index {index} unreachable")]
    BackendUnreachable {
        /// The index the request targeted.
        index: String,
    },

    /// Transport failure while talking to a backend.
    #[error("connection error for index {index}: {message}")]
    Connection {
        /// The index the request targeted.
        index: String,
        /// Error message.
        message: String,
    },

    /// No handler is registered for the request's resource group.
    #[error("no route for resource group '{group}'")]
    NoRouteForGroup {
        /// The requested group.
        group: String,
    },

    /// The index (network instance or VLAN database) is not known to the backend.
    #[error("index {index} not found")]
    IndexNotFound {
        /// The missing index.
        index: String,
    },

    /// Nothing left to allocate in the index.
    #[error("no free resources left in index {index}")]
    Exhausted {
        /// The exhausted index.
        index: String,
    },

    /// The request is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Error message.
        message: String,
    },

    /// The caller canceled the operation.
    #[error("operation canceled")]
    Cancelled,

    /// The caller's deadline elapsed.
    #[error("operation timed out after {after:?}")]
    Timeout {
        /// The configured deadline.
        after: Duration,
    },

    /// Spec or status document could not be encoded/decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl AllocError {
    /// Creates a RIB write error.
    pub fn rib_write(operation: &'static str, prefix: impl ToString, source: RibError) -> Self {
        Self::RibWrite {
            operation,
            prefix: prefix.to_string(),
            source,
        }
    }

    /// Creates a selector error.
    pub fn selector(message: impl ToString) -> Self {
        Self::Selector {
            message: message.to_string(),
        }
    }

    /// Creates a backend unreachable error.
    pub fn backend_unreachable(index: impl ToString) -> Self {
        Self::BackendUnreachable {
            index: index.to_string(),
        }
    }

    /// Creates a connection error.
    pub fn connection(index: impl ToString, message: impl ToString) -> Self {
        Self::Connection {
            index: index.to_string(),
            message: message.to_string(),
        }
    }

    /// Creates a no-route error.
    pub fn no_route(group: impl Into<String>) -> Self {
        Self::NoRouteForGroup {
            group: group.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl ToString) -> Self {
        Self::InvalidRequest {
            message: message.to_string(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AllocError::BackendUnreachable { .. }
                | AllocError::Connection { .. }
                | AllocError::Timeout { .. }
                | AllocError::Cancelled
                | AllocError::IndexNotFound { .. }
        )
    }
}

impl From<alloc_types::ParseError> for AllocError {
    fn from(err: alloc_types::ParseError) -> Self {
        match err {
            alloc_types::ParseError::InvalidSelector(_)
            | alloc_types::ParseError::InvalidLabelKey(_)
            | alloc_types::ParseError::InvalidLabelValue(_) => AllocError::selector(err),
            other => AllocError::invalid_request(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_rib_write_wraps_source() {
        let err = AllocError::rib_write(
            "add",
            "10.0.0.0/24",
            RibError::FamilyMismatch {
                prefix: "10.0.0.0/24".into(),
                family: "ipv6".into(),
            },
        );
        assert!(err.to_string().starts_with("cannot add prefix 10.0.0.0/24"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_already_exists_is_distinguishable() {
        assert!(RibError::AlreadyExists("10.0.0.0/24".into()).is_already_exists());
        assert!(!RibError::NotFound("10.0.0.0/24".into()).is_already_exists());
    }

    #[test]
    fn test_backend_unreachable_display() {
        let err = AllocError::backend_unreachable("default/vpc-1");
        assert_eq!(
            err.to_string(),
            "allocation backend for index default/vpc-1 unreachable"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(AllocError::backend_unreachable("a").is_retryable());
        assert!(AllocError::Cancelled.is_retryable());
        assert!(!AllocError::no_route("ipam").is_retryable());
        assert!(!AllocError::selector("bad").is_retryable());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: AllocError = alloc_types::ParseError::InvalidLabelKey("-x".into()).into();
        assert!(matches!(err, AllocError::Selector { .. }));
        let err: AllocError = alloc_types::ParseError::InvalidIpPrefix("x".into()).into();
        assert!(matches!(err, AllocError::InvalidRequest { .. }));
    }
}
