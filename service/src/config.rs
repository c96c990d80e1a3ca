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

//! Engine configuration
//!
//! Every type derives `Deserialize` with per-field defaults so a partial TOML
//! file is enough, and offers `with_*` builders for programmatic use.
//!
//! ```
//! use termgate_service::{EngineConfig, ListenerConfig, ProtocolKind};
//! use std::time::Duration;
//!
//! let config = EngineConfig::default()
//!     .with_listener(ListenerConfig::new(ProtocolKind::Telnet, "127.0.0.1:2323".parse().unwrap()))
//!     .with_session_timeout(Duration::from_secs(300));
//! assert!(config.validate().is_ok());
//! ```

use crate::types::ProtocolKind;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Listening sockets, one per protocol endpoint
    #[serde(default = "default_listeners")]
    pub listeners: Vec<ListenerConfig>,

    /// Reactor tick interval
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Default idle timeout for new sessions
    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub session_timeout: Duration,

    /// Depth of each per-session pipe
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Inputs queued behind a full pipe before the session is dropped as stalled
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,

    /// Undelivered client bytes at which the engine stops reading the socket
    #[serde(default = "default_input_limit")]
    pub input_limit: usize,

    /// Root directory of the key-value stores
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Protocol negotiation limits and defaults
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Ban list and failed-login throttling
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listeners() -> Vec<ListenerConfig> {
    vec![ListenerConfig::default()]
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(20)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_channel_capacity() -> usize {
    256
}

fn default_backlog_limit() -> usize {
    1024
}

fn default_input_limit() -> usize {
    64 * 1024
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            poll_interval: default_poll_interval(),
            session_timeout: default_session_timeout(),
            channel_capacity: default_channel_capacity(),
            backlog_limit: default_backlog_limit(),
            input_limit: default_input_limit(),
            data_dir: default_data_dir(),
            negotiation: NegotiationConfig::default(),
            admission: AdmissionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn with_listener(mut self, listener: ListenerConfig) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Set the reactor tick interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the default session idle timeout
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the per-session pipe depth
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set how far a session may fall behind and how much client input is buffered for it
    pub fn with_flow_limits(mut self, backlog: usize, input_bytes: usize) -> Self {
        self.backlog_limit = backlog;
        self.input_limit = input_bytes;
        self
    }

    /// Set the key-value store root
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Replace the negotiation settings
    pub fn with_negotiation(mut self, negotiation: NegotiationConfig) -> Self {
        self.negotiation = negotiation;
        self
    }

    /// Replace the admission settings
    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.listeners.is_empty() {
            return Err("at least one listener must be configured".to_string());
        }
        for listener in &self.listeners {
            if listener.max_connections == 0 {
                return Err(format!(
                    "listener {} must allow at least one connection",
                    listener.bind_address
                ));
            }
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }
        if self.session_timeout.is_zero() {
            return Err("session_timeout must be greater than 0".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than 0".to_string());
        }
        if self.backlog_limit == 0 || self.input_limit == 0 {
            return Err("backlog_limit and input_limit must be greater than 0".to_string());
        }
        self.negotiation.validate()?;
        self.admission.validate()?;
        Ok(())
    }
}

/// One listening socket
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Protocol spoken on this socket
    pub kind: ProtocolKind,

    /// Address to bind
    pub bind_address: SocketAddr,

    /// Simultaneous client limit; excess connections are closed unanswered
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    60
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            kind: ProtocolKind::Telnet,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 2323)),
            max_connections: default_max_connections(),
        }
    }
}

impl ListenerConfig {
    /// Create a listener configuration with the default connection limit
    pub fn new(kind: ProtocolKind, bind_address: SocketAddr) -> Self {
        Self {
            kind,
            bind_address,
            max_connections: default_max_connections(),
        }
    }

    /// Set the connection limit
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// Limits and fallbacks for the per-connection handshake
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NegotiationConfig {
    /// How long to wait for the peer to answer any negotiation at all
    #[serde(with = "humantime_serde", default = "default_any_reply_timeout")]
    pub any_reply_timeout: Duration,

    /// Ceiling for each negotiated feature (environment, terminal type, window size)
    #[serde(with = "humantime_serde", default = "default_stage_timeout")]
    pub stage_timeout: Duration,

    /// How often the handshake task re-checks negotiation state
    #[serde(with = "humantime_serde", default = "default_negotiation_poll")]
    pub poll_interval: Duration,

    /// TERM used when the peer does not report one
    #[serde(default = "default_term")]
    pub default_term: String,

    /// LINES used when the peer does not report a window size
    #[serde(default = "default_lines")]
    pub default_lines: u16,

    /// COLUMNS used when the peer does not report a window size
    #[serde(default = "default_columns")]
    pub default_columns: u16,

    /// Largest accepted subnegotiation payload
    #[serde(default = "default_max_subnegotiation")]
    pub max_subnegotiation: usize,
}

fn default_any_reply_timeout() -> Duration {
    Duration::from_millis(2500)
}

fn default_stage_timeout() -> Duration {
    Duration::from_millis(3500)
}

fn default_negotiation_poll() -> Duration {
    Duration::from_millis(50)
}

fn default_term() -> String {
    "ansi".to_string()
}

fn default_lines() -> u16 {
    24
}

fn default_columns() -> u16 {
    80
}

fn default_max_subnegotiation() -> usize {
    termgate_telnetcodec::DEFAULT_MAX_SUBNEGOTIATION
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            any_reply_timeout: default_any_reply_timeout(),
            stage_timeout: default_stage_timeout(),
            poll_interval: default_negotiation_poll(),
            default_term: default_term(),
            default_lines: default_lines(),
            default_columns: default_columns(),
            max_subnegotiation: default_max_subnegotiation(),
        }
    }
}

impl NegotiationConfig {
    /// Set the any-reply and per-stage timeouts
    pub fn with_timeouts(mut self, any_reply: Duration, stage: Duration) -> Self {
        self.any_reply_timeout = any_reply;
        self.stage_timeout = stage;
        self
    }

    /// Set the handshake polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the fallback terminal type
    pub fn with_default_term(mut self, term: impl Into<String>) -> Self {
        self.default_term = term.into();
        self
    }

    /// Set the fallback terminal size
    pub fn with_default_size(mut self, columns: u16, lines: u16) -> Self {
        self.default_columns = columns;
        self.default_lines = lines;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("negotiation.poll_interval must be greater than 0".to_string());
        }
        if self.default_lines == 0 || self.default_columns == 0 {
            return Err("default terminal size must be non-zero".to_string());
        }
        if self.max_subnegotiation == 0 {
            return Err("max_subnegotiation must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Ban list and failed-login throttling
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Sliding window over which failed logins are counted
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,

    /// Failures within the window that trigger a ban
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    /// Length of a first ban; each repeat offence doubles it
    #[serde(with = "humantime_serde", default = "default_initial_ban")]
    pub initial_ban: Duration,

    /// Upper bound on ban length
    #[serde(with = "humantime_serde", default = "default_max_ban")]
    pub max_ban: Duration,

    /// Addresses that are always refused
    #[serde(default)]
    pub banned: Vec<IpAddr>,
}

fn default_window() -> Duration {
    Duration::from_secs(300)
}

fn default_max_failures() -> usize {
    5
}

fn default_initial_ban() -> Duration {
    Duration::from_secs(60)
}

fn default_max_ban() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            max_failures: default_max_failures(),
            initial_ban: default_initial_ban(),
            max_ban: default_max_ban(),
            banned: Vec::new(),
        }
    }
}

impl AdmissionConfig {
    /// Set the failure window and threshold
    pub fn with_threshold(mut self, window: Duration, max_failures: usize) -> Self {
        self.window = window;
        self.max_failures = max_failures;
        self
    }

    /// Set the first and maximum ban lengths
    pub fn with_ban_lengths(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_ban = initial;
        self.max_ban = max;
        self
    }

    /// Add a permanently banned address
    pub fn with_banned(mut self, ip: IpAddr) -> Self {
        self.banned.push(ip);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_failures == 0 {
            return Err("admission.max_failures must be greater than 0".to_string());
        }
        if self.initial_ban > self.max_ban {
            return Err("admission.initial_ban must not exceed admission.max_ban".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_listener() {
        let config = EngineConfig::default();
        assert!(config.validate().is_err());

        let config = config.with_listener(ListenerConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.negotiation.any_reply_timeout, Duration::from_millis(2500));
        assert_eq!(config.negotiation.stage_timeout, Duration::from_millis(3500));
        assert_eq!(config.listeners[0].max_connections, 60);
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig::default()
            .with_listener(ListenerConfig::default().with_max_connections(0));
        assert!(config.validate().is_err());

        let config = EngineConfig::default()
            .with_listener(ListenerConfig::default())
            .with_channel_capacity(0);
        assert!(config.validate().is_err());

        let config = EngineConfig::default()
            .with_listener(ListenerConfig::default())
            .with_flow_limits(0, 1024);
        assert!(config.validate().is_err());

        let config = EngineConfig::default()
            .with_listener(ListenerConfig::default())
            .with_admission(AdmissionConfig::default().with_ban_lengths(
                Duration::from_secs(10),
                Duration::from_secs(5),
            ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder_chaining() {
        let config = EngineConfig::new()
            .with_listener(ListenerConfig::new(
                ProtocolKind::Rlogin,
                "127.0.0.1:5513".parse().unwrap(),
            ))
            .with_poll_interval(Duration::from_millis(5))
            .with_session_timeout(Duration::from_secs(30))
            .with_data_dir("/tmp/kv")
            .with_negotiation(NegotiationConfig::default().with_default_term("vt100"));

        assert_eq!(config.listeners[0].kind, ProtocolKind::Rlogin);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/kv"));
        assert_eq!(config.negotiation.default_term, "vt100");
    }
}
