//! smsfeed CLI
//!
//! Local entry point: watch the live feed, run a single fetch, or check
//! configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use smsfeed::{
    config::load_config,
    error::Result,
    models::{Config, FeedEvent, Platform},
    pipeline::Monitor,
    services::classify,
};

/// smsfeed - Live SMS Portal Feed
#[derive(Parser, Debug)]
#[command(
    name = "smsfeed",
    version,
    about = "Polls a live SMS portal and streams classified messages"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "smsfeed.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll continuously and print events as JSON lines until Ctrl-C
    Watch {
        /// Only print records of this platform
        #[arg(long)]
        platform: Option<Platform>,
    },

    /// Run one fetch cycle and print the accepted records
    Fetch {
        /// Maximum records to print
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Classify a message body
    Classify {
        /// Message text
        text: String,

        /// Sender id
        #[arg(long, default_value = "")]
        sid: String,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging from the verbosity flag or the configured level.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        Config::load(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };
    init_logging(&level);

    match cli.command {
        Command::Watch { platform } => {
            let config = load_config(&cli.config)?;
            let monitor = Monitor::new(&config)?;
            let mut subscription = monitor.hub().subscribe();

            log::info!("Live SMS monitor starting...");
            monitor.start();

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        log::info!("Interrupted, stopping monitor...");
                        break;
                    }
                    event = subscription.next() => match event {
                        Some(FeedEvent::RecordAccepted { record })
                            if platform.is_some_and(|p| p != record.platform) => {}
                        Some(event) => print_json(&event)?,
                        None => break,
                    },
                }
            }

            monitor.stop();
            print_json(&monitor.hub().statistics())?;
        }

        Command::Fetch { limit } => {
            let config = load_config(&cli.config)?;
            let monitor = Monitor::new(&config)?;

            let report = monitor.refresh().await?;
            log::info!(
                "Accepted {} record(s): {} facebook, {} whatsapp, {} instagram",
                report.accepted,
                report.breakdown.facebook,
                report.breakdown.whatsapp,
                report.breakdown.instagram
            );

            for record in report.records.iter().take(limit) {
                print_json(record)?;
            }
        }

        Command::Classify { text, sid } => {
            println!("{}", classify(&sid, &text, ""));
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = load_config(&cli.config) {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }
    }

    Ok(())
}
