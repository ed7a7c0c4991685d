/// Main module for the LinkCheck service
///
/// Checks reachability of batches of URLs, queues re-checks on a persistent
/// task queue and serves PDF reports over HTTP.
use clap::Parser;
use linkcheck::{config::Config, controller::Controller, logger};
use std::path::PathBuf;

/// Define command line arguments using clap
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "LINKCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configured one
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let conf = match Config::new(cli.config.as_ref()) {
        Ok(conf) => conf,
        Err(e) => {
            eprintln!("Failed to initialize configuration: {:?}", e);
            std::process::exit(1);
        }
    };
    let conf = match cli.port {
        Some(port) => conf.with_port(port),
        None => conf,
    };

    let logger = logger::init(&conf.log);
    tracing::debug!("Config path: {:?}", cli.config);

    if let Err(e) = Controller::new(conf).start().await {
        tracing::error!("{:?}", e);
        drop(logger);
        std::process::exit(1);
    }
}
