//! Site configuration renderer
//!
//! Pure mapping from a tunnel record to an nginx server block. No I/O;
//! input validation happens upstream.

use std::net::Ipv4Addr;

/// How long successful responses stay in the proxy cache.
const CACHE_OK: &str = "30m";
/// How long not-found responses stay in the proxy cache.
const CACHE_NOT_FOUND: &str = "1m";

/// Render the nginx server block for one tunnel.
///
/// Listens on port 80 dual-stack and forwards to the origin over HTTPS
/// regardless of the client-facing scheme. Certbot's nginx installer
/// later augments this document in place with the TLS listen block and
/// redirect; this renderer only ever produces the HTTP baseline.
pub fn render_site(subdomain: &str, origin_ip: Ipv4Addr) -> String {
    format!(
        "server {{\n\
         \x20   listen 80;\n\
         \x20   listen [::]:80;\n\
         \x20   server_name {subdomain};\n\
         \n\
         \x20   location / {{\n\
         \x20       proxy_pass https://{origin_ip};\n\
         \x20       proxy_ssl_server_name on;\n\
         \x20       proxy_set_header Host $host;\n\
         \x20       proxy_set_header X-Real-IP $remote_addr;\n\
         \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
         \x20       proxy_cache_valid 200 302 {CACHE_OK};\n\
         \x20       proxy_cache_valid 404 {CACHE_NOT_FOUND};\n\
         \x20   }}\n\
         }}\n"
    )
}
