use std::sync::Arc;

use clap::Parser;
use thiserror::Error;

use crate::api::server::AppState;
use crate::util::env::{Config, EnvErr};
use crate::util::telemetry::{Telemetry, TelemetryErr};

mod api;
mod args;
mod auth;
mod constants;
mod media;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Telemetry(#[from] TelemetryErr),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = args::Cli::parse();

    let mut config = Config::from_env(cli.env_file.as_deref())?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }

    let telemetry = Telemetry::new(&config)?.register();
    tracing::info!(?config, "starting canva thumbnail relay");

    let state = Arc::new(AppState::from_config(&config));
    let served = api::server::serve(state, config.server_port).await;

    telemetry.shutdown();
    Ok(served?)
}
