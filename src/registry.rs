//! Registry of configured tunnels
//!
//! Persistent store of subdomain -> origin IP records, backed by a flat
//! text file with one `subdomain=ip` line per record. The in-memory map
//! is the working copy; `save` rewrites the whole file atomically so the
//! on-disk registry always decodes to a complete mapping.

use crate::error::StorageError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Separator between subdomain and IP in the registry file.
/// Cannot occur inside a validated FQDN or a dotted quad.
const SEPARATOR: char = '=';

/// One provisioned tunnel: a public subdomain mapped to a private origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelRecord {
    pub subdomain: String,
    pub origin_ip: Ipv4Addr,
}

/// Persistent tunnel registry.
///
/// Keys are unique subdomains; a BTreeMap keeps listing order stable
/// (lexicographic). Mutations do not persist by themselves; callers
/// follow a save-after-mutate discipline.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    records: BTreeMap<String, Ipv4Addr>,
}

impl Registry {
    /// Load the registry from its backing file.
    ///
    /// An absent file yields an empty registry (the file is created on
    /// the first save). An existing file must decode line by line;
    /// any undecodable line is a `StorageError::Malformed`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut records = BTreeMap::new();

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            for (idx, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let (subdomain, ip) = Self::decode_line(line).ok_or_else(|| {
                    StorageError::Malformed {
                        line_no: idx + 1,
                        line: line.to_string(),
                    }
                })?;
                records.insert(subdomain, ip);
            }
            debug!(count = records.len(), path = %path.display(), "Registry loaded");
        } else {
            debug!(path = %path.display(), "Registry file absent, starting empty");
        }

        Ok(Self { path, records })
    }

    fn decode_line(line: &str) -> Option<(String, Ipv4Addr)> {
        let (subdomain, ip) = line.split_once(SEPARATOR)?;
        if subdomain.is_empty() {
            return None;
        }
        let ip: Ipv4Addr = ip.parse().ok()?;
        Some((subdomain.to_string(), ip))
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or overwrite the record for a subdomain. Does not persist.
    pub fn upsert(&mut self, subdomain: &str, ip: Ipv4Addr) {
        self.records.insert(subdomain.to_string(), ip);
    }

    /// Remove the record for a subdomain if present. Idempotent.
    pub fn remove(&mut self, subdomain: &str) {
        self.records.remove(subdomain);
    }

    /// O(1)-ish existence check used for duplicate-add rejection.
    pub fn contains(&self, subdomain: &str) -> bool {
        self.records.contains_key(subdomain)
    }

    /// Origin IP for a subdomain, if configured.
    pub fn get(&self, subdomain: &str) -> Option<Ipv4Addr> {
        self.records.get(subdomain).copied()
    }

    /// All records in lexicographic subdomain order.
    pub fn records(&self) -> Vec<TunnelRecord> {
        self.records
            .iter()
            .map(|(subdomain, ip)| TunnelRecord {
                subdomain: subdomain.clone(),
                origin_ip: *ip,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the full mapping to disk, replacing prior content.
    ///
    /// Writes to a sibling temp file and renames it into place so the
    /// registry file is never observed half-written.
    pub fn save(&self) -> Result<(), StorageError> {
        let mut out = String::new();
        for (subdomain, ip) in &self.records {
            out.push_str(subdomain);
            out.push(SEPARATOR);
            out.push_str(&ip.to_string());
            out.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, out)?;
        fs::rename(&tmp, &self.path)?;

        debug!(count = self.records.len(), path = %self.path.display(), "Registry saved");
        Ok(())
    }

    /// Remove every record and delete the backing file.
    ///
    /// Only used by full teardown; a missing file is not an error.
    pub fn purge(&mut self) -> Result<(), StorageError> {
        self.records.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
