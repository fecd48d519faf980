#![forbid(unsafe_code)]

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tt_server::{Cli, run};

fn install_panic_logger() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            panic = %info,
            "thread panicked"
        );
        default_hook(info);
    }));
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
    install_panic_logger();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "tree server failed");
            ExitCode::FAILURE
        }
    }
}
