//! Site activation against a live nginx installation
//!
//! The activator owns the sites-available / sites-enabled directories
//! and drives the validate+reload cycle through a `ProxyRuntime`
//! boundary, so tests can substitute the running server with a fake.

use crate::error::TunnelError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Boundary to the running reverse-proxy process.
///
/// `validate` must never be skipped before `reload` when a new or
/// changed document was just written.
pub trait ProxyRuntime {
    /// Validate the full live configuration. Pass/fail with detail.
    fn validate(&self) -> Result<(), String>;

    /// Signal the running server to reload its configuration.
    fn reload(&self) -> Result<(), String>;
}

/// Production runtime: shells out to `nginx -t` and `systemctl reload`.
pub struct NginxRuntime;

impl NginxRuntime {
    fn run(program: &str, args: &[&str]) -> Result<(), String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| format!("failed to run {program}: {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "{program} exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ))
        }
    }
}

impl ProxyRuntime for NginxRuntime {
    fn validate(&self) -> Result<(), String> {
        Self::run("nginx", &["-t"])
    }

    fn reload(&self) -> Result<(), String> {
        Self::run("systemctl", &["reload", "nginx"])
    }
}

/// Applies rendered site documents to the nginx configuration tree.
pub struct SiteActivator<R: ProxyRuntime> {
    available_dir: PathBuf,
    enabled_dir: PathBuf,
    runtime: R,
}

impl<R: ProxyRuntime> SiteActivator<R> {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        available_dir: P,
        enabled_dir: Q,
        runtime: R,
    ) -> Self {
        Self {
            available_dir: available_dir.as_ref().to_path_buf(),
            enabled_dir: enabled_dir.as_ref().to_path_buf(),
            runtime,
        }
    }

    fn available_path(&self, subdomain: &str) -> PathBuf {
        self.available_dir.join(format!("{subdomain}.conf"))
    }

    fn enabled_path(&self, subdomain: &str) -> PathBuf {
        self.enabled_dir.join(format!("{subdomain}.conf"))
    }

    /// Current document for a subdomain, if one is installed.
    pub fn installed_document(&self, subdomain: &str) -> Option<String> {
        fs::read_to_string(self.available_path(subdomain)).ok()
    }

    /// Write and enable a site document, then validate and reload.
    ///
    /// On any failure the files just written are removed again so
    /// previously working sites are untouched.
    pub fn activate(&self, subdomain: &str, document: &str) -> Result<(), TunnelError> {
        if let Err(e) = self.install_site_files(subdomain, document) {
            self.remove_site_files(subdomain);
            return Err(TunnelError::Activation {
                detail: e.to_string(),
            });
        }

        debug!(subdomain, path = %self.available_path(subdomain).display(), "Site written and enabled");

        if let Err(detail) = self.runtime.validate() {
            self.remove_site_files(subdomain);
            return Err(TunnelError::Activation { detail });
        }

        if let Err(detail) = self.runtime.reload() {
            self.remove_site_files(subdomain);
            return Err(TunnelError::Reload { detail });
        }

        info!(subdomain, "Site activated");
        Ok(())
    }

    /// Disable and remove a site document. Idempotent: absent files are
    /// fine. A reload failure afterwards is reported, not escalated.
    pub fn deactivate(&self, subdomain: &str) {
        let enabled = self.enabled_path(subdomain);
        let available = self.available_path(subdomain);

        let removed = self.remove_site_files(subdomain);
        if removed {
            info!(subdomain, "Site deactivated");
        } else {
            debug!(subdomain, "No site files to deactivate");
        }

        if let Err(detail) = self.runtime.validate().and_then(|()| self.runtime.reload()) {
            warn!(
                subdomain,
                %detail,
                enabled = %enabled.display(),
                available = %available.display(),
                "Reload after deactivation failed"
            );
        }
    }

    /// Validate and reload without touching any files. Used after an
    /// external in-place change to a site document.
    pub fn reload(&self) -> Result<(), TunnelError> {
        self.runtime
            .validate()
            .map_err(|detail| TunnelError::Activation { detail })?;
        self.runtime
            .reload()
            .map_err(|detail| TunnelError::Reload { detail })
    }

    /// Write the available document and point the enabled link at it,
    /// replacing any stale link so re-activation is idempotent.
    fn install_site_files(&self, subdomain: &str, document: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.available_dir)?;
        fs::create_dir_all(&self.enabled_dir)?;

        let available = self.available_path(subdomain);
        let enabled = self.enabled_path(subdomain);

        fs::write(&available, document)?;

        if fs::symlink_metadata(&enabled).is_ok() {
            fs::remove_file(&enabled)?;
        }
        std::os::unix::fs::symlink(&available, &enabled)
    }

    /// Remove the enabled link and the available document if present.
    /// Returns whether anything was actually removed.
    fn remove_site_files(&self, subdomain: &str) -> bool {
        let mut removed = false;
        for path in [self.enabled_path(subdomain), self.available_path(subdomain)] {
            // symlink_metadata so a dangling link still counts as present
            if fs::symlink_metadata(&path).is_ok() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove site file");
                } else {
                    removed = true;
                }
            }
        }
        removed
    }
}
