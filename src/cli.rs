// CLI module - command-line argument parsing and handlers
//
// Provides subcommands for configuration management:
// - config --show: Display effective configuration
// - config --path: Show config file path
// - config --reset: Write a fresh config template

use clap::{Parser, Subcommand};

use crate::config::{Config, VERSION};

/// Prysm - privacy-preserving query router for LLM providers
#[derive(Parser)]
#[command(name = "prysm")]
#[command(version = VERSION)]
#[command(about = "Privacy-preserving query router for LLM providers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Write a fresh config template (overwrites existing file)
        #[arg(long)]
        reset: bool,
    },
}

const CONFIG_TEMPLATE: &str = r#"# Prysm configuration
# Environment variables take precedence over this file.

# host = "127.0.0.1"
# port = 8000
# log_level = "info"
# redis_url = "redis://localhost:6379"
# redis_ttl_secs = 3600
# frontend_url = "http://localhost:3000"
# environment = "development"
# orchestration_model = "gpt-4o-mini"

[load_balancing]
# strategy = "round_robin"   # round_robin | random | weighted | performance | cost_optimized
# health_check_interval_secs = 60
# circuit_breaker_threshold = 5
# circuit_breaker_timeout_secs = 300

[pipeline]
# max_concurrent_requests = 10
# request_timeout_secs = 30
# max_fragment_size = 2000
"#;

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> bool {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { show, path, reset }) => {
            if path {
                match Config::config_path() {
                    Some(p) => println!("{}", p.display()),
                    None => eprintln!("no config directory available on this platform"),
                }
            }
            if reset {
                match Config::config_path() {
                    Some(p) => {
                        if let Some(parent) = p.parent() {
                            let _ = std::fs::create_dir_all(parent);
                        }
                        match std::fs::write(&p, CONFIG_TEMPLATE) {
                            Ok(()) => println!("wrote config template to {}", p.display()),
                            Err(e) => eprintln!("failed to write {}: {e}", p.display()),
                        }
                    }
                    None => eprintln!("no config directory available on this platform"),
                }
            }
            if show || (!path && !reset) {
                let config = Config::load();
                println!("{config:#?}");
            }
            true
        }
        None => false,
    }
}
