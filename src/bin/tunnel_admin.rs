//! CLI tool for scripted tunnel management
//!
//! Usage:
//!   tunnelctl-admin add <subdomain> <ip>
//!   tunnelctl-admin update <subdomain> <ip>
//!   tunnelctl-admin delete <subdomain>
//!   tunnelctl-admin list [--json]
//!   tunnelctl-admin remove-all --yes

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tunnelctl::{
    CertbotClient, NginxRuntime, Registry, SiteActivator, TunnelManager, TunnelState,
};

/// Scripted counterpart to the interactive tunnelctl console
#[derive(Parser, Debug)]
#[command(name = "tunnelctl-admin")]
#[command(author = "Tunnelctl Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Manage reverse-proxy tunnels non-interactively")]
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
    #[arg(long, env = "CONTACT_EMAIL", default_value = "")]
    email: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a new tunnel
    Add {
        /// Subdomain (e.g. app.example.com)
        subdomain: String,

        /// Origin server IPv4 address
        ip: String,
    },

    /// Change the origin IP of an existing tunnel
    Update {
        /// Subdomain
        subdomain: String,

        /// New origin server IPv4 address
        ip: String,
    },

    /// Tear down a tunnel
    Delete {
        /// Subdomain
        subdomain: String,
    },

    /// List all tunnels
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tear down every tunnel and delete the registry
    RemoveAll {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let registry = Registry::load(&args.registry)?;
    let activator = SiteActivator::new(&args.sites_available, &args.sites_enabled, NginxRuntime);
    let mut manager = TunnelManager::new(registry, activator, CertbotClient, &args.email);

    match args.command {
        Commands::Add { subdomain, ip } => match manager.add_tunnel(&subdomain, &ip) {
            Ok(TunnelState::Secured) => {
                println!("Added tunnel {subdomain} -> {ip} (HTTPS)");
            }
            Ok(TunnelState::HttpConfigured) => {
                println!("Added tunnel {subdomain} -> {ip} (HTTP only, certificate issuance failed)");
            }
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },

        Commands::Update { subdomain, ip } => {
            if let Err(e) = manager.update_tunnel(&subdomain, &ip) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
            println!("Updated tunnel {subdomain} -> {ip}");
        }

        Commands::Delete { subdomain } => {
            if let Err(e) = manager.delete_tunnel(&subdomain) {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
            println!("Deleted tunnel {subdomain}");
        }

        Commands::List { json } => {
            let records = manager.list_tunnels();

            if records.is_empty() {
                println!("No tunnels configured");
                return Ok(());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{:<40} {:<15}", "SUBDOMAIN", "ORIGIN IP");
                println!("{}", "-".repeat(55));

                for record in &records {
                    println!("{:<40} {:<15}", record.subdomain, record.origin_ip);
                }

                println!("\nTotal: {} tunnel(s)", records.len());
            }
        }

        Commands::RemoveAll { yes } => {
            if !yes {
                eprintln!("Refusing to remove everything without --yes");
                std::process::exit(1);
            }
            if let Err(e) = manager.remove_everything() {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
            println!("All tunnels removed");
        }
    }

    Ok(())
}
