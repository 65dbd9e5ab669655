//! Startup banner

use super::config::AppConfig;
use super::constants::APP_NAME;

/// Print the startup banner with the listening address
pub fn print(config: &AppConfig) {
    let version = env!("CARGO_PKG_VERSION");
    let url = format!("http://{}:{}", config.server.host, config.server.port);

    println!();
    println!("  {APP_NAME} v{version}");
    println!();
    println!("  API:        {url}/api/v1");
    println!("  Health:     {url}/api/v1/health");
    println!(
        "  Cache:      {}   Event log: {}",
        config.cache.backend, config.stream.backend
    );
    println!();
}
