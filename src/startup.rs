// Startup module - displays banner and module loading status

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
}

/// Print the startup banner and module loading status before serving
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}Prysm{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Privacy-preserving query router for LLM providers{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}ok{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    let mark = |enabled: bool| if enabled { GREEN } else { YELLOW };
    let word = |enabled: bool| if enabled { "enabled" } else { "disabled" };

    let openai = config.providers.openai.is_some();
    let anthropic = config.providers.anthropic.is_some();
    let google = config.providers.google.is_some();
    let redis = config.redis_url.is_some();
    let enhancer = config.orchestration_key().is_some();

    println!("  {DIM}Providers{RESET}");
    println!("    openai     {}{}{RESET}", mark(openai), word(openai));
    println!("    anthropic  {}{}{RESET}", mark(anthropic), word(anthropic));
    println!("    google     {}{}{RESET}", mark(google), word(google));
    println!();
    println!("  {DIM}Modules{RESET}");
    println!(
        "    enhancer   {}{}{RESET} {DIM}({}){RESET}",
        mark(enhancer),
        word(enhancer),
        config.orchestration_model
    );
    println!(
        "    cache      {}{}{RESET}",
        mark(redis),
        if redis { "redis" } else { "in-memory" }
    );
    println!();
    println!(
        "  {DIM}Listening on{RESET} {BOLD}http://{}{RESET} {DIM}({}){RESET}",
        config.bind_addr, config.environment
    );
    println!();
}

/// Log the same information through tracing for headless environments
pub fn log_startup(config: &Config) {
    tracing::info!(
        version = VERSION,
        bind_addr = %config.bind_addr,
        environment = %config.environment,
        providers = config.providers.configured().len(),
        enhancer = config.orchestration_key().is_some(),
        redis = config.redis_url.is_some(),
        "starting prysm"
    );
    if !config.providers.any_configured() {
        tracing::warn!(
            "no provider API keys configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY or GOOGLE_API_KEY"
        );
    }
}
