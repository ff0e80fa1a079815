//! Project settings view and validation: `panelctl config`.

use anyhow::Result;
use std::path::Path;

use panelctl::config::{CONFIG_FILE, PanelConfig, PanelToml};

use super::super::ConfigCommands;

fn print_settings(toml: &PanelToml) {
    println!("[database]");
    println!("  path = \"{}\"", toml.database.path.display());
    println!();
    println!("[migrations]");
    println!("  dir = \"{}\"", toml.migrations.dir.display());
    println!();
    println!("[backend]");
    println!("  command = \"{}\"", toml.backend.command);
    if let Some(build) = &toml.backend.build_command {
        println!("  build_command = \"{}\"", build);
    }
    if let Some(dir) = &toml.backend.dir {
        println!("  dir = \"{}\"", dir.display());
    }
    println!();
    println!("[server]");
    println!("  api_prefix = \"{}\"", toml.server.api_prefix);
    println!("  proxy_timeout_secs = {}", toml.server.proxy_timeout_secs);
    println!("  shutdown_grace_secs = {}", toml.server.shutdown_grace_secs);
    println!("  deploy_file = \"{}\"", toml.server.deploy_file.display());
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = project_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found; using defaults.", CONFIG_FILE);
            }
            println!();

            // Effective values include PANEL_* overrides.
            let config = PanelConfig::new(project_dir.to_path_buf())?;
            print_settings(&config.toml);

            println!("Resolved paths:");
            println!("  database   = {}", config.database_path().display());
            println!("  migrations = {}", config.migrations_dir().display());
            println!("  deploy     = {}", config.deploy_file().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = PanelToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            PanelToml::default().save(&config_path)?;
            println!("Created {} at {}", CONFIG_FILE, config_path.display());
        }
    }

    Ok(())
}
