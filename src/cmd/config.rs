//! Configuration view and validation commands (`talio config`).

use anyhow::Result;
use talio::config::{CONFIG_DIR, CONFIG_FILE, TalioConfig, TalioToml};

use super::super::ConfigCommands;

fn print_sections(toml: &TalioToml) {
    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  db_path = \"{}\"", toml.server.db_path.display());
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();
    println!("[longpoll]");
    println!("  default_timeout_ms = {}", toml.longpoll.default_timeout_ms);
    println!("  max_timeout_ms = {}", toml.longpoll.max_timeout_ms);
    println!();
    println!("[security]");
    match &toml.security.admin_password {
        Some(_) => println!("  admin_password = <set>"),
        None => println!("  admin_password = <generated at start-up>"),
    }
    println!("  session_idle_secs = {}", toml.security.session_idle_secs);
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    if let Some(dir) = &toml.logging.log_dir {
        println!("  log_dir = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let talio_dir = project_dir.join(CONFIG_DIR);
    let config_path = talio_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Talio Configuration");
            println!("===================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No talio.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = TalioConfig::new(project_dir.to_path_buf())?;
            print_sections(&config.toml);

            // Effective values include env overrides
            println!("Effective values (with env overrides):");
            println!("  port = {}", config.port()?);
            println!("  db_path = \"{}\"", config.db_path().display());
            println!(
                "  admin_password = {}",
                if config.admin_password().is_some() {
                    "<set>"
                } else {
                    "<generated at start-up>"
                }
            );
            println!();

            if !config_path.exists() {
                println!("Run 'talio config init' to create a talio.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No talio.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = TalioToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("talio.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&talio_dir)?;
            TalioToml::default().save(&config_path)?;

            println!("Created talio.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, db_path, dev_mode");
            println!("  - [longpoll] default_timeout_ms, max_timeout_ms");
            println!("  - [security] admin_password, session_idle_secs");
            println!();
        }
    }

    Ok(())
}
