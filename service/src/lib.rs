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

//! Termgate terminal server engine
//!
//! A multi-protocol terminal server: telnet and rlogin listeners feed a
//! single non-blocking reactor, every negotiated connection gets its own
//! session task running application code, and sessions coordinate through
//! the engine with routed events, named locks and a key-value store.
//!
//! # Architecture
//!
//! ```text
//! Engine (reactor)
//!     ↓ per listener
//! Server ── Protocol ──→ Client + Connect (handshake task)
//!     ↓ on success
//! SessionRegistry ──→ session task (SessionScript + SessionContext)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use termgate_service::{Engine, EngineConfig, ListenerConfig, ProtocolKind};
//! use termgate_service::{Result, SessionContext, SessionScript};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl SessionScript for Hello {
//!     async fn run(&self, ctx: &mut SessionContext) -> Result<()> {
//!         ctx.write("What is your name? ").await?;
//!         let name = ctx.read_line(true).await?;
//!         ctx.write(format!("Hello, {name}!\r\n")).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = EngineConfig::default().with_listener(ListenerConfig::new(
//!         ProtocolKind::Telnet,
//!         "0.0.0.0:2323".parse().unwrap(),
//!     ));
//!     let mut engine = Engine::bind(config, Arc::new(Hello)).await?;
//!     engine.run().await
//! }
//! ```

mod admission;
mod client;
mod config;
mod connect;
mod encoding;
mod engine;
mod error;
mod kv;
mod lock;
mod message;
mod metrics;
mod registry;
mod rlogin;
mod server;
mod session;
mod telnet;
mod types;

pub use admission::{AdmissionPolicy, AllowAll, FailedLoginThrottle};
pub use client::{Client, ClientIo};
pub use config::{AdmissionConfig, EngineConfig, ListenerConfig, NegotiationConfig};
pub use connect::Connect;
pub use encoding::Encoding;
pub use engine::Engine;
pub use error::{EngineError, Result, StoreError, StoreResult};
pub use kv::{KvLocks, KvMethod, KvOutcome, KvProxy, KvTable, TableLock};
pub use lock::{LockHolder, LockManager};
pub use message::{
    DbReply, KvCommand, LockMethod, LogLevel, LogRecord, SessionInput, SessionMessage,
};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use registry::{SessionEntry, SessionRegistry};
pub use rlogin::{RloginClient, RloginConnect, RloginProtocol};
pub use server::{Accepted, Protocol, Server};
pub use session::{
    DbProxy, LineEditor, SessionContext, SessionHandle, SessionInfo, SessionScript,
    spawn as spawn_session,
};
pub use telnet::{TelnetClient, TelnetConnect, TelnetProtocol};
pub use types::{ConnectionId, Environment, ProtocolKind, SessionId, env};
