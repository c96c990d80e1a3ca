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

//! Command line and configuration file loading

use anyhow::{Context, anyhow};
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use termgate_service::{EngineConfig, ListenerConfig};

/// termgate - multi-protocol terminal server
#[derive(Debug, Parser)]
#[command(name = "termgate", version, about = "Multi-protocol terminal server")]
pub struct Cli {
    /// Configuration file; built-in defaults are used when it does not exist
    #[arg(short = 'c', long = "config", default_value = "termgate.toml", value_name = "FILE")]
    pub config: PathBuf,

    /// Log filter, overriding the configuration file (RUST_LOG still wins)
    #[arg(long = "log-level", value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long = "check")]
    pub check: bool,
}

/// Where the running configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file
    File(PathBuf),
    /// The file was absent
    Defaults,
}

/// Load and validate the configuration at `path`
pub fn load_config(path: &Path) -> anyhow::Result<(EngineConfig, ConfigSource)> {
    let (config, source) = match std::fs::read_to_string(path) {
        Ok(text) => {
            let config: EngineConfig = toml::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            (config, ConfigSource::File(path.to_path_buf()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => (
            EngineConfig::default().with_listener(ListenerConfig::default()),
            ConfigSource::Defaults,
        ),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;
    Ok((config, source))
}
