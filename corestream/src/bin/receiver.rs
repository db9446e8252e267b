//! `corestream-receiver` — runs the receiver-host half of a session.

use std::path::PathBuf;

use clap::Parser;

use corestream::config::SessionConfig;
use corestream::session::ReceiverSession;

/// Receives the reduced and augmentation payloads for one session and
/// hands completed steps to the downstream processor.
#[derive(Debug, Parser)]
#[command(name = "corestream-receiver", version)]
struct Args {
    /// Path to the session config JSON file.
    #[arg(long)]
    config: PathBuf,

    /// Override `output_root` from the config file.
    #[arg(long)]
    output_root: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match SessionConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(e.exit_code());
        }
    };
    if let Some(output_root) = args.output_root {
        config.output_root = output_root;
    }

    let session = ReceiverSession::new(config);
    match session.run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "receiver session failed");
            std::process::exit(e.exit_code());
        }
    }
}
