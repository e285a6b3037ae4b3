//! addonctl - inspect and manage the addons below a registry root

use addon_system::core::config::{CliArgs, Command, Config};
use addon_system::core::Logger;
use addon_system::registry::{QueryFilter, Registry};
use addon_system::{status, AddonUnit};

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match Config::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!(
        version = addon_system::VERSION,
        root = ?config.registry.root,
        backend = ?config.status.backend,
        "Starting addonctl"
    );

    let store = status::open(&config).context("Failed to open status store")?;
    let discovery = Registry::discover_with(
        &config.registry.root,
        config.registry.declaration_file.clone(),
        Arc::clone(&store),
    )
    .context("Failed to discover addons")?;

    for skipped in &discovery.report.skipped {
        warn!(path = ?skipped.path, error = %skipped.error, "Addon skipped");
    }
    for duplicate in &discovery.report.duplicates {
        warn!(error = %duplicate.to_error(), "Duplicate addon id");
    }
    let registry = discovery.into_registry();

    match args.command {
        Command::List => print_units(&registry.units()),
        Command::Query {
            author,
            name,
            description,
            enabled,
            ignore_case,
        } => {
            let filter = QueryFilter {
                author,
                name,
                description,
                enabled,
                ignore_case,
            };
            print_units(&registry.query(&filter));
        }
        Command::Show { id } => {
            let unit = registry.get(&id)?;
            let metadata = unit.metadata();
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            println!("path: {}", unit.path().display());
            println!("enabled: {}", unit.is_enabled());
        }
        Command::Enable { id } => {
            registry.enable(&id)?;
            println!("{} enabled", id);
        }
        Command::Disable { id } => {
            registry.disable(&id)?;
            println!("{} disabled", id);
        }
        Command::Verdict { id } => {
            let unit = registry.get(&id)?;
            match store.verdict(&id)? {
                Some(verdict) => {
                    println!("{}", serde_json::to_string_pretty(&verdict)?);
                    let current = if verdict.is_valid_for(&unit.depends()) {
                        "current"
                    } else {
                        "stale (depends changed since the check)"
                    };
                    println!("verdict is {}", current);
                }
                None => println!("no verdict recorded for {}", id),
            }
        }
    }

    Ok(())
}

fn print_units(units: &[Arc<AddonUnit>]) {
    if units.is_empty() {
        println!("no addons");
        return;
    }
    for unit in units {
        let metadata = unit.read_metadata();
        println!(
            "{:<20} {:<24} {:<10} {}",
            unit.id(),
            metadata.name,
            metadata.version.as_deref().unwrap_or("-"),
            if unit.is_enabled() { "enabled" } else { "disabled" }
        );
    }
}
