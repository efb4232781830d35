//! Tunnelctl - interactive operator console
//!
//! Line-oriented menu for managing reverse-proxy tunnels: add, list and
//! delete, remove everything, exit. Scripted use goes through the
//! tunnelctl-admin binary instead.

use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tunnelctl::{
    CertbotClient, NginxRuntime, Registry, SiteActivator, TunnelManager, TunnelState,
};

/// Tunnelctl - manage reverse-proxy tunnels with automatic TLS
#[derive(Parser, Debug)]
#[command(name = "tunnelctl")]
#[command(author = "Tunnelctl Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Manage nginx reverse-proxy tunnels with automatic TLS")]
struct Args {
    /// Registry file path
    #[arg(long, env = "TUNNEL_REGISTRY", default_value = "/etc/tunnelctl/tunnels.conf")]
    registry: PathBuf,

    /// nginx sites-available directory
    #[arg(long, env = "SITES_AVAILABLE", default_value = "/etc/nginx/sites-available")]
    sites_available: PathBuf,

    /// nginx sites-enabled directory
    #[arg(long, env = "SITES_ENABLED", default_value = "/etc/nginx/sites-enabled")]
    sites_enabled: PathBuf,

    /// Contact email for certificate issuance
    #[arg(long, env = "CONTACT_EMAIL")]
    email: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Tunnelctl v1.0.0");
    info!("Registry: {}", args.registry.display());

    let registry = Registry::load(&args.registry)?;
    let activator = SiteActivator::new(&args.sites_available, &args.sites_enabled, NginxRuntime);
    let mut manager = TunnelManager::new(registry, activator, CertbotClient, &args.email);

    loop {
        println!();
        println!("1) Add tunnel");
        println!("2) List / delete tunnels");
        println!("3) Remove everything");
        println!("4) Exit");

        match prompt("> ")?.as_str() {
            "1" => add_tunnel(&mut manager)?,
            "2" => list_and_delete(&mut manager)?,
            "3" => remove_everything(&mut manager)?,
            "4" | "exit" | "q" => break,
            other => println!("Unknown choice: {other}"),
        }
    }

    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        // EOF behaves like exit
        return Ok("exit".to_string());
    }
    Ok(line.trim().to_string())
}

fn add_tunnel(
    manager: &mut TunnelManager<NginxRuntime, CertbotClient>,
) -> Result<()> {
    let subdomain = prompt("Subdomain (e.g. app.example.com): ")?;
    let ip = prompt("Origin server IP: ")?;

    match manager.add_tunnel(&subdomain, &ip) {
        Ok(TunnelState::Secured) => {
            println!("Tunnel {subdomain} -> {ip} is live over HTTPS");
        }
        Ok(TunnelState::HttpConfigured) => {
            println!("Tunnel {subdomain} -> {ip} is live over HTTP only (certificate issuance failed)");
        }
        Err(e) => eprintln!("Error: {e}"),
    }
    Ok(())
}

fn list_and_delete(
    manager: &mut TunnelManager<NginxRuntime, CertbotClient>,
) -> Result<()> {
    let records = manager.list_tunnels();

    if records.is_empty() {
        println!("No tunnels configured");
        return Ok(());
    }

    println!("{:<40} {:<15}", "SUBDOMAIN", "ORIGIN IP");
    println!("{}", "-".repeat(55));
    for record in &records {
        println!("{:<40} {:<15}", record.subdomain, record.origin_ip);
    }
    println!("\nTotal: {} tunnel(s)", records.len());

    let subdomain = prompt("Subdomain to delete (empty to go back): ")?;
    if subdomain.is_empty() {
        return Ok(());
    }

    let confirm = prompt(&format!("Delete tunnel {subdomain}? [y/N]: "))?;
    if confirm.eq_ignore_ascii_case("y") {
        match manager.delete_tunnel(&subdomain) {
            Ok(()) => println!("Tunnel {subdomain} removed"),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

fn remove_everything(
    manager: &mut TunnelManager<NginxRuntime, CertbotClient>,
) -> Result<()> {
    let count = manager.list_tunnels().len();
    println!("This removes all {count} tunnel(s), their certificates, and the registry file.");

    // Destructive enough to warrant two distinct confirmations
    if prompt("Continue? [yes/no]: ")? != "yes" {
        println!("Aborted");
        return Ok(());
    }
    if prompt("Type 'delete everything' to confirm: ")? != "delete everything" {
        println!("Aborted");
        return Ok(());
    }

    match manager.remove_everything() {
        Ok(()) => println!("All tunnels removed"),
        Err(e) => eprintln!("Error: {e}"),
    }
    Ok(())
}
