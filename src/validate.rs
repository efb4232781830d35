//! Input validation for subdomains and origin IPs
//!
//! Everything here runs before any file or process is touched.

use crate::error::TunnelError;
use std::net::Ipv4Addr;

/// Validate a fully-qualified subdomain name.
///
/// Accepts lowercase/uppercase letters, digits and hyphens per label,
/// no leading/trailing hyphen, no empty labels, at least one dot, and
/// an alphabetic TLD of two or more characters.
pub fn validate_subdomain(subdomain: &str) -> Result<(), TunnelError> {
    let reject = || TunnelError::InvalidSubdomain(subdomain.to_string());

    if subdomain.is_empty() || subdomain.len() > 253 || !subdomain.contains('.') {
        return Err(reject());
    }

    let labels: Vec<&str> = subdomain.split('.').collect();
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err(reject());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(reject());
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(reject());
        }
    }

    // TLD-like suffix: alphabetic, at least two characters
    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(reject());
    }

    Ok(())
}

/// Parse an origin IP: four dot-separated octets, each in 0..=255.
pub fn parse_origin_ip(ip: &str) -> Result<Ipv4Addr, TunnelError> {
    let reject = || TunnelError::InvalidIp(ip.to_string());

    // Ipv4Addr::parse rejects out-of-range octets and non-quad forms,
    // but be explicit about the shape so "10.0.0.1 " and "10.0.1" fail
    // the same way.
    if ip.split('.').count() != 4 {
        return Err(reject());
    }
    ip.parse::<Ipv4Addr>().map_err(|_| reject())
}
