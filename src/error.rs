//! Error taxonomy for the tunnel lifecycle
//!
//! Validation and duplicate errors abort before any external effect.
//! Activation errors are rolled back by the orchestrator. Certificate
//! errors are non-fatal to an already-activated HTTP tunnel.

use thiserror::Error;

/// Errors raised by the registry persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed registry line {line_no}: {line:?}")]
    Malformed { line_no: usize, line: String },
}

/// Errors raised by tunnel lifecycle operations
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid subdomain {0:?}")]
    InvalidSubdomain(String),

    #[error("invalid origin IP {0:?}")]
    InvalidIp(String),

    #[error("tunnel for {0} already exists (delete it or use the update path)")]
    DuplicateTunnel(String),

    #[error("no tunnel configured for {0}")]
    UnknownTunnel(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("nginx configuration validation failed: {detail}")]
    Activation { detail: String },

    #[error("nginx reload failed: {detail}")]
    Reload { detail: String },

    #[error("certificate issuance failed for {subdomain}: {detail}")]
    Certificate { subdomain: String, detail: String },
}
