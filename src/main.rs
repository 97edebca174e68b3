use clap::Parser;
use log::{error, info};
use pcap_sorter::configuration::config::{Config, DEFAULT_CONFIG_FILE};
use pcap_sorter::configuration::LogLevel;
use pcap_sorter::controller::controller_handler::Controller;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pcap-sorter")]
#[command(version)]
#[command(about = "Watches an inbox for capture files, then organizes, analyzes and archives them")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PCAP_SORTER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Overrides `log_level` from the configuration file
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Overrides `database_path` from the configuration file
    #[arg(long, env = "PCAP_SORTER_DB")]
    database_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Get command-line arguments
    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Unable to import configuration from {}: {}",
                args.config.display(),
                e
            );
            std::process::exit(1);
        }
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(path) = args.database_path {
        config.database_path = path;
    }

    // RUST_LOG, when set, takes precedence over the configured level
    env_logger::Builder::new()
        .filter_level(config.log_level.to_level_filter())
        .parse_default_env()
        .format_target(false)
        .init();

    info!("pcap-sorter v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration imported from {}", args.config.display());

    let mut controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    let result = tokio::spawn(async move {
        info!("Spawning the controller");
        controller.run().await
    });

    match result.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Error occured in the controller process: {}, exiting...", e);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Error joining at the end of execution: {:?}", e);
            std::process::exit(1);
        }
    }
}
