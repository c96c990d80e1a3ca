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

//! Error types for the session engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type for key-value store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Engine error types
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O error from a listener or client socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error from the telnet codec
    #[error("Protocol error: {0}")]
    Protocol(#[from] termgate_telnetcodec::CodecError),

    /// The peer closed the connection or the client was deactivated
    #[error("Client disconnected")]
    Disconnected,

    /// The session's pipe to the engine has been closed
    #[error("Session closed")]
    SessionClosed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// A listener refused a connection because it is full
    #[error("Maximum connections ({0}) reached")]
    CapacityExceeded(usize),

    /// The peer address is banned
    #[error("Peer {0} is banned")]
    Banned(std::net::IpAddr),

    /// Error raised by the key-value store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Check if the error means the client connection is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            EngineError::Disconnected | EngineError::SessionClosed | EngineError::Io(_)
        )
    }

    /// Check if the error came from the protocol layer
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, EngineError::Protocol(_))
    }
}

/// Key-value store error types
///
/// The `Display` text is what a session receives as the payload of an
/// `exception` reply.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file or a value could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The key is not present and no default was supplied
    #[error("KeyError: {0}")]
    KeyNotFound(String),

    /// The method is not part of the store's catalogue
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The arguments do not match the method's signature
    #[error("Bad arguments for {method}: {reason}")]
    BadArguments {
        /// Method name
        method: String,
        /// What was wrong
        reason: String,
    },

    /// A call made through the proxy failed; carries the engine's error text
    #[error("{0}")]
    Remote(String),
}
