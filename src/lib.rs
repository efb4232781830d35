//! Tunnelctl - reverse-proxy tunnel lifecycle manager
//!
//! Provisions and tears down HTTP(S) tunnels: nginx site configs that
//! forward a subdomain's traffic to an origin server IP, with TLS
//! certificates issued through certbot. Provides:
//! - Flat-file registry of subdomain -> origin mappings
//! - Rendered nginx site documents with activation and rollback
//! - Certificate issuance/teardown through an injectable boundary
//! - An orchestrated add/update/delete lifecycle with compensation

pub mod certificate;
pub mod error;
pub mod nginx;
pub mod registry;
pub mod render;
pub mod tunnel;
pub mod validate;

pub use certificate::{CertbotClient, CertificateAuthority};
pub use error::{StorageError, TunnelError};
pub use nginx::{NginxRuntime, ProxyRuntime, SiteActivator};
pub use registry::{Registry, TunnelRecord};
pub use tunnel::{TunnelManager, TunnelState};
