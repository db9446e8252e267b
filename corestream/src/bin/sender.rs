//! `corestream-sender` — runs the sender-host half of a session.

use std::path::PathBuf;

use clap::Parser;

use corestream::config::SessionConfig;
use corestream::session::SenderSession;

/// Streams the reduced and augmentation payloads for one session.
#[derive(Debug, Parser)]
#[command(name = "corestream-sender", version)]
struct Args {
    /// Path to the session config JSON file.
    #[arg(long)]
    config: PathBuf,

    /// Override `num_steps` from the config file.
    #[arg(long)]
    num_steps: Option<u64>,
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
    if let Some(num_steps) = args.num_steps {
        config.num_steps = num_steps;
    }

    let session = SenderSession::new(config);
    match session.run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "sender session failed");
            std::process::exit(e.exit_code());
        }
    }
}
