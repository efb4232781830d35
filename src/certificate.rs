//! Certificate issuance boundary
//!
//! TLS certificates come from an external ACME client (certbot); this
//! module only models the two calls the lifecycle needs and hides the
//! process invocation behind a trait for testing.

use std::process::Command;
use tracing::{debug, info};

/// Boundary to the external certificate authority client.
pub trait CertificateAuthority {
    /// Request a certificate for exactly one subdomain, non-interactively.
    fn issue(&self, subdomain: &str, contact_email: &str) -> Result<(), String>;

    /// Remove all certificate material for a subdomain. Idempotent:
    /// a missing certificate is success, not an error.
    fn delete(&self, subdomain: &str) -> Result<(), String>;
}

/// Production client shelling out to certbot.
///
/// Issuance uses the nginx installer plugin, which also augments the
/// site document in place with the TLS listen block, certificate paths
/// and the HTTP to HTTPS redirect.
pub struct CertbotClient;

impl CertbotClient {
    fn run(args: &[&str]) -> Result<std::process::Output, String> {
        Command::new("certbot")
            .args(args)
            .output()
            .map_err(|e| format!("failed to run certbot: {e}"))
    }
}

impl CertificateAuthority for CertbotClient {
    fn issue(&self, subdomain: &str, contact_email: &str) -> Result<(), String> {
        debug!(subdomain, "Requesting certificate");

        let output = Self::run(&[
            "--nginx",
            "-d",
            subdomain,
            "-m",
            contact_email,
            "--non-interactive",
            "--agree-tos",
        ])?;

        if output.status.success() {
            info!(subdomain, "Certificate issued");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "certbot exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ))
        }
    }

    fn delete(&self, subdomain: &str) -> Result<(), String> {
        let output = Self::run(&["delete", "--cert-name", subdomain, "--non-interactive"])?;

        if output.status.success() {
            info!(subdomain, "Certificate deleted");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        // Nothing to delete counts as deleted
        if stderr.contains("No certificate found") {
            debug!(subdomain, "No certificate to delete");
            return Ok(());
        }

        Err(format!(
            "certbot delete exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ))
    }
}
