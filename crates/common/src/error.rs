//! Common error types for the simple-netlink crates.

use std::fmt;

/// A specialized Result type for namespace and interface operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic classification of an errno reported by the kernel.
///
/// Idempotent operations decide what to swallow by matching on these kinds
/// instead of comparing raw numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelErrorKind {
    /// EEXIST (17)
    AlreadyExists,
    /// EADDRINUSE (98)
    InUse,
    /// ESRCH (3), ENOENT (2) or EADDRNOTAVAIL (99)
    NotFound,
    /// Any other errno, kept verbatim.
    Other(i32),
}

impl KernelErrorKind {
    /// Classify a positive errno value.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EEXIST => KernelErrorKind::AlreadyExists,
            libc::EADDRINUSE => KernelErrorKind::InUse,
            libc::ESRCH | libc::ENOENT | libc::EADDRNOTAVAIL => KernelErrorKind::NotFound,
            other => KernelErrorKind::Other(other),
        }
    }
}

impl fmt::Display for KernelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelErrorKind::AlreadyExists => write!(f, "already exists"),
            KernelErrorKind::InUse => write!(f, "already in use"),
            KernelErrorKind::NotFound => write!(f, "not found"),
            KernelErrorKind::Other(errno) => write!(f, "errno {}", errno),
        }
    }
}

/// Common error type for namespace and interface operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Kernel error during {operation}: {kind} (errno {errno})")]
    Kernel {
        kind: KernelErrorKind,
        errno: i32,
        operation: String,
    },

    #[error("{what} {name} not found in namespace {namespace}")]
    NotFound {
        what: &'static str,
        name: String,
        namespace: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Route cannot be classified: {0}")]
    UnclassifiedRoute(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new netlink error.
    pub fn netlink(msg: impl fmt::Display) -> Self {
        Error::Netlink(msg.to_string())
    }

    /// Create a kernel error from a positive errno value.
    pub fn kernel(errno: i32, operation: impl fmt::Display) -> Self {
        Error::Kernel {
            kind: KernelErrorKind::from_errno(errno),
            errno,
            operation: operation.to_string(),
        }
    }

    /// Create a new lookup failure.
    pub fn not_found(
        what: &'static str,
        name: impl fmt::Display,
        namespace: impl fmt::Display,
    ) -> Self {
        Error::NotFound {
            what,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }

    /// The kernel error kind, if this error came from the kernel.
    pub fn kernel_kind(&self) -> Option<KernelErrorKind> {
        match self {
            Error::Kernel { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this is a lookup failure (`NotFound`).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
