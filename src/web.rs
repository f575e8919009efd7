#![cfg(not(tarpaulin_include))]

use dotenv::dotenv;
use log::error;
use std::path::PathBuf;
use std::process;

use valuation_desk::{app, config, logging};

/// Main entry point for the web application
///
/// Loads `.env`, reads the configuration and starts the HTTP server.
///
/// # Arguments
/// * An optional path to a configuration file; `Valuation.toml` in the
///   working directory is used otherwise
#[tokio::main]
async fn main() {
    dotenv().ok();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match config::load_configuration(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };
    logging::init_logger(&config.log_level);

    if let Err(err) = app::run(config).await {
        error!("Server stopped: {}", err);
        process::exit(1);
    }
}
