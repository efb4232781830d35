//! Tunnel lifecycle orchestrator
//!
//! Drives a tunnel through Absent -> HttpConfigured -> Secured and back,
//! coordinating the registry, the renderer, the site activator and the
//! certificate client. Ordering rules:
//!
//! - activation failure is fatal and fully rolled back: never a registry
//!   entry without a live config, never an enabled config without an entry
//! - certificate failure is non-fatal: the HTTP tunnel stands and the
//!   entry is persisted, HTTPS is reported as unavailable
//! - teardown removes the registry entry even when the final reload
//!   fails; idempotent "not found" conditions are silent successes

use crate::certificate::CertificateAuthority;
use crate::error::TunnelError;
use crate::nginx::{ProxyRuntime, SiteActivator};
use crate::registry::{Registry, TunnelRecord};
use crate::render::render_site;
use crate::validate::{parse_origin_ip, validate_subdomain};
use tracing::{info, warn};

/// Where a tunnel ended up after a successful add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Serving HTTP; certificate issuance failed or was skipped.
    HttpConfigured,
    /// Serving HTTPS with an issued certificate.
    Secured,
}

/// The tunnel lifecycle state machine.
pub struct TunnelManager<R: ProxyRuntime, C: CertificateAuthority> {
    registry: Registry,
    activator: SiteActivator<R>,
    certs: C,
    contact_email: String,
}

impl<R: ProxyRuntime, C: CertificateAuthority> TunnelManager<R, C> {
    pub fn new(
        registry: Registry,
        activator: SiteActivator<R>,
        certs: C,
        contact_email: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            activator,
            certs,
            contact_email: contact_email.into(),
        }
    }

    /// Provision a new tunnel.
    ///
    /// Validates inputs and rejects duplicates before touching anything.
    /// The registry entry is persisted only once the HTTP site is live,
    /// then certificate issuance runs as the final, non-fatal step.
    pub fn add_tunnel(&mut self, subdomain: &str, ip: &str) -> Result<TunnelState, TunnelError> {
        validate_subdomain(subdomain)?;
        let origin_ip = parse_origin_ip(ip)?;

        if self.registry.contains(subdomain) {
            return Err(TunnelError::DuplicateTunnel(subdomain.to_string()));
        }

        let document = render_site(subdomain, origin_ip);
        self.activator.activate(subdomain, &document)?;

        self.registry.upsert(subdomain, origin_ip);
        if let Err(e) = self.registry.save() {
            // Never leave a live config without a persisted entry
            self.activator.deactivate(subdomain);
            self.registry.remove(subdomain);
            return Err(e.into());
        }

        info!(subdomain, origin = %origin_ip, "Tunnel configured for HTTP");

        match self.certs.issue(subdomain, &self.contact_email) {
            Ok(()) => {
                // The installer augmented the site document in place;
                // pick up the TLS block with a fresh validate+reload.
                if let Err(e) = self.activator.reload() {
                    warn!(subdomain, error = %e, "Reload after certificate install failed");
                }
                info!(subdomain, "Tunnel secured with TLS");
                Ok(TunnelState::Secured)
            }
            Err(detail) => {
                let err = TunnelError::Certificate {
                    subdomain: subdomain.to_string(),
                    detail,
                };
                warn!(error = %err, "HTTPS unavailable; tunnel serves HTTP only");
                Ok(TunnelState::HttpConfigured)
            }
        }
    }

    /// Change the origin IP of an existing tunnel.
    ///
    /// Rewrites the upstream target in the installed document and
    /// reloads; the certificate covers the subdomain, not the origin,
    /// so issuance is not re-run.
    pub fn update_tunnel(&mut self, subdomain: &str, ip: &str) -> Result<(), TunnelError> {
        validate_subdomain(subdomain)?;
        let new_ip = parse_origin_ip(ip)?;

        let old_ip = self
            .registry
            .get(subdomain)
            .ok_or_else(|| TunnelError::UnknownTunnel(subdomain.to_string()))?;

        // Patch the installed document rather than re-rendering, so a
        // certbot-augmented TLS block survives the IP change.
        let previous = self.activator.installed_document(subdomain);
        let document = match &previous {
            Some(doc) => doc.replace(
                &format!("proxy_pass https://{old_ip};"),
                &format!("proxy_pass https://{new_ip};"),
            ),
            None => render_site(subdomain, new_ip),
        };

        if let Err(e) = self.activator.activate(subdomain, &document) {
            // Activation rolled its files back; restore the old site so
            // the previously working tunnel keeps serving.
            if let Some(doc) = previous {
                if let Err(restore) = self.activator.activate(subdomain, &doc) {
                    warn!(subdomain, error = %restore, "Failed to restore previous site");
                }
            }
            return Err(e);
        }

        self.registry.upsert(subdomain, new_ip);
        if let Err(e) = self.registry.save() {
            // Keep the live config in step with the persisted registry:
            // put the old document and entry back before reporting
            self.registry.upsert(subdomain, old_ip);
            if let Some(doc) = previous {
                if let Err(restore) = self.activator.activate(subdomain, &doc) {
                    warn!(subdomain, error = %restore, "Failed to restore previous site");
                }
            }
            return Err(e.into());
        }

        info!(subdomain, origin = %new_ip, "Tunnel origin updated");
        Ok(())
    }

    /// Tear a tunnel down: disable the site, drop certificate material,
    /// remove and persist the registry entry.
    ///
    /// Idempotent: an unknown subdomain is a silent success, and the
    /// sweep still runs so orphan files from earlier failures are
    /// cleaned up. Caller-side confirmation is a precondition.
    pub fn delete_tunnel(&mut self, subdomain: &str) -> Result<(), TunnelError> {
        let existed = self.registry.contains(subdomain);

        self.activator.deactivate(subdomain);

        if let Err(detail) = self.certs.delete(subdomain) {
            warn!(subdomain, %detail, "Certificate cleanup failed");
        }

        if existed {
            self.registry.remove(subdomain);
            self.registry.save()?;
            info!(subdomain, "Tunnel removed");
        }

        Ok(())
    }

    /// All configured tunnels in stable (lexicographic) order.
    pub fn list_tunnels(&self) -> Vec<TunnelRecord> {
        self.registry.records()
    }

    /// Tear down every tunnel and delete the registry's backing file.
    ///
    /// The caller must gate this behind a stronger confirmation than
    /// single-tunnel deletion.
    pub fn remove_everything(&mut self) -> Result<(), TunnelError> {
        for record in self.registry.records() {
            self.activator.deactivate(&record.subdomain);
            if let Err(detail) = self.certs.delete(&record.subdomain) {
                warn!(subdomain = %record.subdomain, %detail, "Certificate cleanup failed");
            }
        }

        self.registry.purge()?;
        info!("All tunnels removed and registry cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    type CallLog = Rc<RefCell<Vec<String>>>;

    struct FakeRuntime {
        log: CallLog,
        /// Fail the validate call with this zero-based index, if any.
        fail_validate_on: Option<usize>,
    }

    impl ProxyRuntime for FakeRuntime {
        fn validate(&self) -> Result<(), String> {
            let idx = self
                .log
                .borrow()
                .iter()
                .filter(|c| c.as_str() == "validate")
                .count();
            self.log.borrow_mut().push("validate".into());
            if self.fail_validate_on == Some(idx) {
                Err("test failed".into())
            } else {
                Ok(())
            }
        }

        fn reload(&self) -> Result<(), String> {
            self.log.borrow_mut().push("reload".into());
            Ok(())
        }
    }

    struct FakeCerts {
        log: CallLog,
        fail_issue: bool,
    }

    impl CertificateAuthority for FakeCerts {
        fn issue(&self, subdomain: &str, _contact_email: &str) -> Result<(), String> {
            self.log.borrow_mut().push(format!("issue {subdomain}"));
            if self.fail_issue {
                Err("rate limited".into())
            } else {
                Ok(())
            }
        }

        fn delete(&self, subdomain: &str) -> Result<(), String> {
            self.log.borrow_mut().push(format!("delete {subdomain}"));
            Ok(())
        }
    }

    struct Harness {
        dir: TempDir,
        log: CallLog,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                log: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn manager(&self) -> TunnelManager<FakeRuntime, FakeCerts> {
            self.manager_with(None, false)
        }

        fn manager_with(
            &self,
            fail_validate_on: Option<usize>,
            fail_issue: bool,
        ) -> TunnelManager<FakeRuntime, FakeCerts> {
            let registry = Registry::load(self.registry_path()).unwrap();
            let activator = SiteActivator::new(
                self.available(),
                self.enabled(),
                FakeRuntime {
                    log: self.log.clone(),
                    fail_validate_on,
                },
            );
            let certs = FakeCerts {
                log: self.log.clone(),
                fail_issue,
            };
            TunnelManager::new(registry, activator, certs, "ops@example.com")
        }

        fn registry_path(&self) -> PathBuf {
            self.dir.path().join("tunnels.conf")
        }

        fn available(&self) -> PathBuf {
            self.dir.path().join("sites-available")
        }

        fn enabled(&self) -> PathBuf {
            self.dir.path().join("sites-enabled")
        }

        fn enabled_exists(&self, subdomain: &str) -> bool {
            std::fs::symlink_metadata(self.enabled().join(format!("{subdomain}.conf"))).is_ok()
        }

        fn available_exists(&self, subdomain: &str) -> bool {
            self.available().join(format!("{subdomain}.conf")).exists()
        }
    }

    fn dir_is_empty(path: &Path) -> bool {
        !path.exists() || std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[test]
    fn test_add_then_list_round_trip() {
        let h = Harness::new();
        let mut mgr = h.manager();

        let state = mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        assert_eq!(state, TunnelState::Secured);

        let records = mgr.list_tunnels();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subdomain, "a.example.com");
        assert_eq!(records[0].origin_ip, "10.0.0.5".parse::<std::net::Ipv4Addr>().unwrap());

        // On-disk registry decodes back to the same record
        let reloaded = Registry::load(h.registry_path()).unwrap();
        assert_eq!(reloaded.get("a.example.com"), Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn test_add_enables_site_and_issues_certificate() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();

        assert!(h.available_exists("a.example.com"));
        assert!(h.enabled_exists("a.example.com"));
        assert!(h.log.borrow().contains(&"issue a.example.com".to_string()));
    }

    #[test]
    fn test_duplicate_add_rejected_without_side_effects() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        let calls_before = h.log.borrow().len();

        let err = mgr.add_tunnel("a.example.com", "10.0.0.9").unwrap_err();
        assert!(matches!(err, TunnelError::DuplicateTunnel(_)));

        // No new boundary calls, registry and config untouched
        assert_eq!(h.log.borrow().len(), calls_before);
        assert_eq!(mgr.list_tunnels().len(), 1);
        assert_eq!(
            mgr.list_tunnels()[0].origin_ip,
            "10.0.0.5".parse::<std::net::Ipv4Addr>().unwrap()
        );
    }

    #[test]
    fn test_invalid_inputs_rejected_before_any_file_io() {
        let h = Harness::new();
        let mut mgr = h.manager();

        assert!(matches!(
            mgr.add_tunnel("-bad-.com", "10.0.0.5"),
            Err(TunnelError::InvalidSubdomain(_))
        ));
        assert!(matches!(
            mgr.add_tunnel("a.example.com", "999.1.1.1"),
            Err(TunnelError::InvalidIp(_))
        ));

        assert!(h.log.borrow().is_empty());
        assert!(dir_is_empty(&h.available()));
        assert!(dir_is_empty(&h.enabled()));
        assert!(mgr.list_tunnels().is_empty());
    }

    #[test]
    fn test_activation_failure_rolls_back_completely() {
        let h = Harness::new();
        let mut mgr = h.manager_with(Some(0), false);

        let err = mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap_err();
        assert!(matches!(err, TunnelError::Activation { .. }));

        assert!(mgr.list_tunnels().is_empty());
        assert!(!h.available_exists("a.example.com"));
        assert!(!h.enabled_exists("a.example.com"));

        // Nothing persisted, no certificate was requested
        assert!(Registry::load(h.registry_path()).unwrap().is_empty());
        assert!(!h.log.borrow().iter().any(|c| c.starts_with("issue")));
    }

    #[test]
    fn test_save_failure_deactivates_just_activated_site() {
        let h = Harness::new();
        // A directory squatting on the sibling temp path makes every
        // registry save fail
        std::fs::create_dir_all(h.registry_path().with_extension("tmp")).unwrap();
        let mut mgr = h.manager();

        let err = mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap_err();
        assert!(matches!(err, TunnelError::Storage(_)));

        // The site activated just before the failed save is gone again
        assert!(mgr.list_tunnels().is_empty());
        assert!(!h.available_exists("a.example.com"));
        assert!(!h.enabled_exists("a.example.com"));
        assert!(!h.registry_path().exists());
        assert!(!h.log.borrow().iter().any(|c| c.starts_with("issue")));
    }

    #[test]
    fn test_certificate_failure_is_non_fatal() {
        let h = Harness::new();
        let mut mgr = h.manager_with(None, true);

        let state = mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        assert_eq!(state, TunnelState::HttpConfigured);

        // Tunnel is listed, persisted, and the HTTP site stays enabled
        assert_eq!(mgr.list_tunnels().len(), 1);
        assert!(h.enabled_exists("a.example.com"));
        assert!(!Registry::load(h.registry_path()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_unknown_subdomain_is_silent_success() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        mgr.delete_tunnel("never.added.com").unwrap();

        assert_eq!(mgr.list_tunnels().len(), 1);
        assert_eq!(
            Registry::load(h.registry_path()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_delete_removes_all_provisioned_state() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        mgr.delete_tunnel("a.example.com").unwrap();

        assert!(mgr.list_tunnels().is_empty());
        assert!(!h.available_exists("a.example.com"));
        assert!(!h.enabled_exists("a.example.com"));
        assert!(h.log.borrow().contains(&"delete a.example.com".to_string()));
        assert!(Registry::load(h.registry_path()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        mgr.delete_tunnel("a.example.com").unwrap();
        mgr.delete_tunnel("a.example.com").unwrap();

        assert!(mgr.list_tunnels().is_empty());
    }

    #[test]
    fn test_update_changes_origin_without_reissuing() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        let issues_before = h
            .log
            .borrow()
            .iter()
            .filter(|c| c.starts_with("issue"))
            .count();

        mgr.update_tunnel("a.example.com", "10.0.0.9").unwrap();

        let records = mgr.list_tunnels();
        assert_eq!(records[0].origin_ip, "10.0.0.9".parse::<std::net::Ipv4Addr>().unwrap());

        let doc =
            std::fs::read_to_string(h.available().join("a.example.com.conf")).unwrap();
        assert!(doc.contains("proxy_pass https://10.0.0.9;"));
        assert!(!doc.contains("10.0.0.5"));

        let issues_after = h
            .log
            .borrow()
            .iter()
            .filter(|c| c.starts_with("issue"))
            .count();
        assert_eq!(issues_before, issues_after);
    }

    #[test]
    fn test_update_activation_failure_restores_previous_site() {
        let h = Harness::new();
        // Validate calls 0 and 1 belong to the add (activation, then the
        // post-certificate reload); call 2 is the update's activation
        let mut mgr = h.manager_with(Some(2), false);
        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();

        let err = mgr.update_tunnel("a.example.com", "10.0.0.9").unwrap_err();
        assert!(matches!(err, TunnelError::Activation { .. }));

        // The old document and link are back and still serve the old IP
        let doc =
            std::fs::read_to_string(h.available().join("a.example.com.conf")).unwrap();
        assert!(doc.contains("proxy_pass https://10.0.0.5;"));
        assert!(h.enabled_exists("a.example.com"));
        assert_eq!(
            mgr.list_tunnels()[0].origin_ip,
            "10.0.0.5".parse::<std::net::Ipv4Addr>().unwrap()
        );
        assert_eq!(
            Registry::load(h.registry_path()).unwrap().get("a.example.com"),
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_update_save_failure_restores_previous_site() {
        let h = Harness::new();
        let mut mgr = h.manager();
        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();

        // Break persistence only after the add has succeeded
        std::fs::create_dir_all(h.registry_path().with_extension("tmp")).unwrap();

        let err = mgr.update_tunnel("a.example.com", "10.0.0.9").unwrap_err();
        assert!(matches!(err, TunnelError::Storage(_)));

        // Live config and registry still agree on the old IP
        let doc =
            std::fs::read_to_string(h.available().join("a.example.com.conf")).unwrap();
        assert!(doc.contains("proxy_pass https://10.0.0.5;"));
        assert_eq!(
            mgr.list_tunnels()[0].origin_ip,
            "10.0.0.5".parse::<std::net::Ipv4Addr>().unwrap()
        );
        assert_eq!(
            Registry::load(h.registry_path()).unwrap().get("a.example.com"),
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_update_unknown_subdomain_fails() {
        let h = Harness::new();
        let mut mgr = h.manager();

        assert!(matches!(
            mgr.update_tunnel("a.example.com", "10.0.0.9"),
            Err(TunnelError::UnknownTunnel(_))
        ));
    }

    #[test]
    fn test_remove_everything_clears_registry_and_sites() {
        let h = Harness::new();
        let mut mgr = h.manager();

        mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap();
        mgr.add_tunnel("b.example.com", "10.0.0.6").unwrap();

        mgr.remove_everything().unwrap();

        assert!(mgr.list_tunnels().is_empty());
        assert!(dir_is_empty(&h.enabled()));
        assert!(dir_is_empty(&h.available()));
        assert!(!h.registry_path().exists());
        assert!(h.log.borrow().contains(&"delete a.example.com".to_string()));
        assert!(h.log.borrow().contains(&"delete b.example.com".to_string()));
    }

    #[test]
    fn test_full_lifecycle_scenario() {
        let h = Harness::new();
        let mut mgr = h.manager();

        // Add succeeds with HTTP and certificate
        assert_eq!(
            mgr.add_tunnel("a.example.com", "10.0.0.5").unwrap(),
            TunnelState::Secured
        );

        // Re-add with a new IP is rejected as a duplicate
        assert!(matches!(
            mgr.add_tunnel("a.example.com", "10.0.0.9"),
            Err(TunnelError::DuplicateTunnel(_))
        ));

        // Delete leaves nothing behind
        mgr.delete_tunnel("a.example.com").unwrap();
        assert!(mgr.list_tunnels().is_empty());
        assert!(dir_is_empty(&h.available()));
        assert!(dir_is_empty(&h.enabled()));
    }
}
