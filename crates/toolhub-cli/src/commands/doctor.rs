//! Diagnostic command to check installation.

use std::path::Path;

use toolhub_core::{Config, TransportConfig};

use crate::output::spinner;
use crate::AppContext;

fn on_path(command: &str) -> bool {
    if Path::new(command).components().count() > 1 {
        return Path::new(command).exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}

pub async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Does not exist (defaults are in use)");
    }

    let data_dir = Config::data_dir();
    println!("Data directory: {:?}", data_dir);
    if data_dir.exists() {
        println!("  ✓ Exists");
    } else {
        println!("  ✗ Does not exist (created on first save)");
    }

    let validation = ctx.config.validate();
    for warning in validation.warnings() {
        println!("  ! {}: {}", warning.field, warning.message);
    }

    // Check descriptor store
    println!("\nDescriptor store:");
    match &ctx.store {
        Some(store) => {
            let path = store.path().map(|p| p.display().to_string()).unwrap_or_default();
            match store.count() {
                Ok(count) => println!("  ✓ {} ({} servers)", path, count),
                Err(e) => println!("  ✗ {}: {}", path, e),
            }
        }
        None => println!("  - disabled"),
    }

    // Check marketplace
    println!("\nMarketplace:");
    let market = ctx.registry.marketplace();
    if market.is_empty() {
        println!("  ✗ Catalog is empty");
    } else {
        println!("  ✓ {} entries", market.len());
    }
    for launcher in ["npx", "uvx"] {
        if on_path(launcher) {
            println!("  ✓ {} found", launcher);
        } else {
            println!("  ✗ {} not found (needed by some catalog entries)", launcher);
        }
    }

    // Check servers
    let servers = ctx.known_servers()?;
    println!("\nServers ({}):", servers.len());
    if servers.is_empty() {
        println!("  - none configured");
    }

    for descriptor in &servers {
        if let TransportConfig::Stdio { command, .. } = &descriptor.transport {
            if !on_path(command) {
                println!("  ✗ {}: command '{}' not found", descriptor.id, command);
                continue;
            }
        }

        let bar = spinner(format!("Checking {}...", descriptor.id));
        let result = ctx.registry.connect(descriptor.clone()).await;
        let ping = match &result {
            Ok(session) => Some(session.ping().await),
            Err(_) => None,
        };
        bar.finish_and_clear();

        match (result, ping) {
            (Ok(session), Some(Ok(rtt))) => {
                let caps = session.capabilities();
                println!(
                    "  ✓ {}: {} tools, ping {} ms",
                    descriptor.id,
                    caps.map_or(0, |c| c.tools().len()),
                    rtt.as_millis()
                );
            }
            (Ok(_), Some(Err(e))) => println!("  ✗ {}: connected but ping failed: {}", descriptor.id, e),
            (Err(e), _) => println!("  ✗ {}: {}", descriptor.id, e),
            (Ok(_), None) => {}
        }
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
