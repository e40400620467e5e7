//! Make a fake LIFX light to allow the Logitech Pop to send web requests.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use pop_http_rs::{Config, Server};

#[derive(Parser)]
#[command(name = "pop-http-rs")]
#[command(
    about = "Make a fake LIFX light to allow the Logitech Pop to send web requests",
    long_about = None
)]
struct Cli {
    /// Increase verbosity level (repeat for more detail)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Path to the configuration TOML file to use
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let levels = [
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
    ];
    let level = levels[usize::from(cli.verbosity).min(levels.len() - 1)];
    env_logger::Builder::new().filter_level(level).init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };

    let mut server = match Server::bind(config).await {
        Ok(server) => server,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
