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

//! Core types shared by clients, sessions and the reactor

use crate::encoding::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

/// Wire protocol spoken by a listener and its clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// RFC 854 telnet with option negotiation
    Telnet,
    /// RFC 1282 rlogin
    Rlogin,
}

impl ProtocolKind {
    /// Lowercase protocol name, as used in session ids and the environment
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Telnet => "telnet",
            ProtocolKind::Rlogin => "rlogin",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session identifier: `"{kind}-{ip}:{port}"`
///
/// Derived from the accepted socket, so it is unique among live sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Build the id for a client of `kind` connected from `peer`
    pub fn new(kind: ProtocolKind, peer: SocketAddr) -> Self {
        Self(format!("{}-{}:{}", kind, peer.ip(), peer.port()))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-listener connection counter (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Environment variable names with engine-defined meaning
pub mod env {
    /// Terminal type
    pub const TERM: &str = "TERM";
    /// Terminal height in rows
    pub const LINES: &str = "LINES";
    /// Terminal width in columns
    pub const COLUMNS: &str = "COLUMNS";
    /// Output character encoding (`utf8` or `cp437`)
    pub const ENCODING: &str = "encoding";
    /// Protocol the client connected with
    pub const KIND: &str = "kind";
    /// Remote user name, when the protocol supplies one
    pub const USER: &str = "USER";
}

/// Terminal environment negotiated for a client and handed to its session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Set a variable, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Set a variable only if it is absent
    pub fn set_default(&mut self, name: &str, value: impl Into<String>) {
        self.0.entry(name.to_string()).or_insert_with(|| value.into());
    }

    /// Check whether a variable is present
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Terminal type, if known
    pub fn term(&self) -> Option<&str> {
        self.get(env::TERM)
    }

    /// Terminal height, if known and numeric
    pub fn lines(&self) -> Option<u16> {
        self.get(env::LINES).and_then(|v| v.trim().parse().ok())
    }

    /// Terminal width, if known and numeric
    pub fn columns(&self) -> Option<u16> {
        self.get(env::COLUMNS).and_then(|v| v.trim().parse().ok())
    }

    /// Output encoding; `utf8` unless set otherwise
    pub fn encoding(&self) -> Encoding {
        self.get(env::ENCODING)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Record the terminal size
    pub fn set_size(&mut self, columns: u16, lines: u16) {
        self.set(env::COLUMNS, columns.to_string());
        self.set(env::LINES, lines.to_string());
    }

    /// Iterate over all variables in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let peer: SocketAddr = "10.0.0.7:4242".parse().unwrap();
        let id = SessionId::new(ProtocolKind::Telnet, peer);
        assert_eq!(id.to_string(), "telnet-10.0.0.7:4242");
        assert_eq!(SessionId::new(ProtocolKind::Rlogin, peer).as_str(), "rlogin-10.0.0.7:4242");
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
    }

    #[test]
    fn test_environment_typed_getters() {
        let mut environ = Environment::new();
        environ.set(env::TERM, "xterm");
        environ.set_size(132, 43);
        environ.set(env::ENCODING, "cp437");
        assert_eq!(environ.term(), Some("xterm"));
        assert_eq!(environ.columns(), Some(132));
        assert_eq!(environ.lines(), Some(43));
        assert_eq!(environ.encoding(), Encoding::Cp437);

        environ.set_default(env::TERM, "ansi");
        assert_eq!(environ.term(), Some("xterm"));
    }

    #[test]
    fn test_environment_serializes_as_map() {
        let mut environ = Environment::new();
        environ.set(env::KIND, "telnet");
        assert_eq!(serde_json::to_string(&environ).unwrap(), r#"{"kind":"telnet"}"#);
    }
}
