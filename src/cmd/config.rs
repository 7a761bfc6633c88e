//! Configuration view and validation commands: `claimsync config`.

use std::path::Path;

use anyhow::{Context, Result};

use claimsync::config::ClaimsyncConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    config: &ClaimsyncConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Loaded from {}", config_path.display());
            } else {
                println!(
                    "# No {} found, showing defaults and environment overrides",
                    config_path.display()
                );
            }
            println!();
            print!("{}", config.redacted().to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => cmd_config_init(config_path)?,
    }

    Ok(())
}

/// Write a default config file. An existing file is left untouched.
pub fn cmd_config_init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("{} already exists", config_path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }
    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let content = ClaimsyncConfig::default().to_toml()?;
    std::fs::write(config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created {}", config_path.display());
    println!();
    println!("You can now customize:");
    println!("  - [schedule] interval_minutes, pass_deadline_secs");
    println!("  - [thresholds] lock_ttl_minutes, max_retries");
    println!("  - [operators.tokens] operator id = bearer token");
    println!("Secrets can also come from CLAIMSYNC_PAYMENT_API_KEY and friends.");
    Ok(())
}
