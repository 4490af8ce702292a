//! Error types for hub request handling.
//!
//! Request-level failures are recovered locally and turned into an explicit
//! `error` reply for the requesting client. Only registry inconsistencies that
//! would break the single-primary invariant are fatal to the hub.

use thiserror::Error;

use crate::client::ClientId;
use crate::session::PositionalKind;

/// Errors produced while handling a client request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Positional array length disagrees with the current node or link count.
    #[error("{kind} update has {actual} entries, session has {expected}")]
    LengthMismatch {
        /// Which positional update was attempted.
        kind: PositionalKind,
        /// Current node or link count.
        expected: usize,
        /// Length of the supplied array.
        actual: usize,
    },

    /// An element carried an identity that is not the one stored at its index.
    #[error("{kind} update entry {index} does not match the stored identity")]
    IdentityMismatch {
        /// Which positional update was attempted.
        kind: PositionalKind,
        /// Index of the first offending element.
        index: usize,
    },

    /// Component name is empty or escapes the components directory.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// Static asset could not be read.
    #[error("missing asset {path}: {reason}")]
    MissingAsset {
        /// Relative asset path.
        path: String,
        /// Underlying read failure.
        reason: String,
    },

    /// Manifest exists but is not valid JSON.
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest {
        /// Relative manifest path.
        path: String,
        /// Parse failure.
        reason: String,
    },

    /// Target client has already closed.
    #[error("client {0} is no longer registered")]
    ClientVanished(ClientId),

    /// A second primary client tried to register.
    #[error("primary client {existing} is already registered")]
    DoublePrimary {
        /// The primary that is already live.
        existing: ClientId,
    },

    /// `hello` referenced a client id the hub never issued.
    #[error("unknown client id: {0}")]
    UnknownClient(String),

    /// A connection sent a request before identifying itself.
    #[error("connection must send hello before any other request")]
    HelloRequired,

    /// Inbound message could not be decoded into a request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The window/process launcher failed.
    #[error("launch failed: {0}")]
    Launch(String),

    /// A message or the session snapshot would not fit in one wire frame.
    #[error("{what} is {size} bytes, over the {limit} byte limit")]
    TooLarge {
        /// What was being encoded.
        what: String,
        /// Encoded size.
        size: usize,
        /// Largest size allowed.
        limit: usize,
    },
}

impl HubError {
    /// Whether this error must abort the hub instead of being replied to.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HubError::DoublePrimary { .. })
    }

    /// Stable machine-readable kind, used in `error` replies.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::LengthMismatch { .. } => "length-mismatch",
            HubError::IdentityMismatch { .. } => "identity-mismatch",
            HubError::UnknownComponent(_) => "unknown-component",
            HubError::MissingAsset { .. } => "missing-asset",
            HubError::InvalidManifest { .. } => "invalid-manifest",
            HubError::ClientVanished(_) => "client-vanished",
            HubError::DoublePrimary { .. } => "double-primary",
            HubError::UnknownClient(_) => "unknown-client",
            HubError::HelloRequired => "hello-required",
            HubError::MalformedRequest(_) => "malformed-request",
            HubError::Launch(_) => "launch-failed",
            HubError::TooLarge { .. } => "too-large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_double_primary_is_fatal() {
        let fatal = HubError::DoublePrimary {
            existing: ClientId::new("primary:1"),
        };
        assert!(fatal.is_fatal());

        let recoverable = HubError::LengthMismatch {
            kind: PositionalKind::NodeSelections,
            expected: 3,
            actual: 2,
        };
        assert!(!recoverable.is_fatal());
        assert!(!HubError::HelloRequired.is_fatal());
    }

    #[test]
    fn test_length_mismatch_message() {
        let err = HubError::LengthMismatch {
            kind: PositionalKind::LinkMst,
            expected: 2,
            actual: 5,
        };
        assert_eq!(err.to_string(), "link mst update has 5 entries, session has 2");
        assert_eq!(err.kind(), "length-mismatch");
    }
}
