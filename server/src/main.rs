//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! termgate server binary
//!
//! Loads the configuration, installs logging and runs the engine with the
//! built-in lobby door until Ctrl-C.

mod cli;
mod door;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, ConfigSource};
use std::sync::Arc;
use termgate_service::Engine;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, source) = cli::load_config(&cli.config)?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "Loaded configuration"),
        ConfigSource::Defaults => info!(
            path = %cli.config.display(),
            "Configuration file not found, using defaults"
        ),
    }
    if cli.check {
        info!("Configuration is valid");
        return Ok(());
    }

    let mut engine = Engine::bind(config, Arc::new(door::Lobby))
        .await
        .context("failed to start engine")?;
    engine.run().await.context("engine stopped abnormally")?;
    Ok(())
}
