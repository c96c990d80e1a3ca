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

//! Messages exchanged between the reactor and sessions
//!
//! A session talks to the engine with [`SessionMessage`]s on its outbound pipe
//! and hears back through [`SessionInput`]s on its inbound pipe. The message
//! set is closed; event names a script invents travel as
//! [`SessionMessage::Other`] and [`SessionInput::Event`].

use crate::encoding::Encoding;
use crate::types::SessionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Severity of a session log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error
    Error,
    /// Warning
    Warn,
    /// Informational
    Info,
    /// Debugging detail
    Debug,
    /// Very verbose detail
    Trace,
}

/// A log record raised inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Severity
    pub level: LogLevel,
    /// Originating component inside the session
    #[serde(default)]
    pub target: String,
    /// Message text
    pub message: String,
}

/// A key-value call issued by a session
#[derive(Debug, Clone, PartialEq)]
pub struct KvCommand {
    /// Store namespace; one directory per schema
    pub schema: String,
    /// Table within the schema; one file per table
    pub table: String,
    /// Method name from the store catalogue
    pub method: String,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Reply as a start/items/end stream instead of a single value
    pub streaming: bool,
}

/// Named-lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMethod {
    /// Take the lock
    Acquire,
    /// Give the lock up
    Release,
}

/// Session to engine message
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// The session is finished; tear it down
    Exit,
    /// Forward a log record to the engine's log sink
    Logger(LogRecord),
    /// Text for the terminal; `None` uses the client's negotiated encoding
    Output {
        /// Text to display
        text: String,
        /// Encoding override
        encoding: Option<Encoding>,
    },
    /// Tear down another session
    RemoteDisconnect(SessionId),
    /// Deliver an event to one other session
    Route {
        /// Receiving session
        target: SessionId,
        /// Event name as the receiver will see it
        event: String,
        /// Event payload
        payload: Value,
    },
    /// Deliver an event to every other session
    Global {
        /// Event name as the receivers will see it
        event: String,
        /// Event payload
        payload: Value,
    },
    /// Change this session's idle timeout
    SetTimeout(Duration),
    /// Key-value call
    Db(KvCommand),
    /// Named-lock call
    Lock {
        /// Lock name
        name: String,
        /// Acquire or release
        method: LockMethod,
        /// Take the lock over from a live holder after this long
        stale_after: Option<Duration>,
    },
    /// Authentication failed for this session's peer
    LoginFailed,
    /// Any event name outside the catalogue
    Other {
        /// Event name
        event: String,
        /// Event payload
        payload: Value,
    },
}

impl SessionMessage {
    /// Wire-level event name
    pub fn event_name(&self) -> String {
        match self {
            SessionMessage::Exit => "exit".to_string(),
            SessionMessage::Logger(_) => "logger".to_string(),
            SessionMessage::Output { .. } => "output".to_string(),
            SessionMessage::RemoteDisconnect(_) => "remote-disconnect".to_string(),
            SessionMessage::Route { .. } => "route".to_string(),
            SessionMessage::Global { .. } => "global".to_string(),
            SessionMessage::SetTimeout(_) => "set-timeout".to_string(),
            SessionMessage::Db(command) if command.streaming => format!("db={}", command.schema),
            SessionMessage::Db(command) => format!("db-{}", command.schema),
            SessionMessage::Lock { name, .. } => format!("lock-{name}"),
            SessionMessage::LoginFailed => "login-failed".to_string(),
            SessionMessage::Other { event, .. } => event.clone(),
        }
    }

    /// Build a message from an `(event, payload)` pair
    ///
    /// Names are matched exactly, except `db-`, `db=` and `lock-`, which are
    /// prefixes carrying the schema or lock name. A known name with a payload
    /// of the wrong shape becomes [`SessionMessage::Other`] so the engine logs
    /// it instead of failing.
    pub fn from_event(event: &str, payload: Value) -> SessionMessage {
        match parse_event(event, &payload) {
            Some(message) => message,
            None => SessionMessage::Other {
                event: event.to_string(),
                payload,
            },
        }
    }
}

fn parse_event(event: &str, payload: &Value) -> Option<SessionMessage> {
    if let Some(schema) = event.strip_prefix("db-") {
        return parse_db(schema, payload, false);
    }
    if let Some(schema) = event.strip_prefix("db=") {
        return parse_db(schema, payload, true);
    }
    if let Some(name) = event.strip_prefix("lock-") {
        let (method, stale) = match payload {
            Value::Array(items) => (items.first()?, items.get(1)),
            method => (method, None),
        };
        let method = serde_json::from_value(method.clone()).ok()?;
        let stale_after = stale
            .and_then(Value::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        return Some(SessionMessage::Lock {
            name: name.to_string(),
            method,
            stale_after,
        });
    }
    match event {
        "exit" => Some(SessionMessage::Exit),
        "logger" => serde_json::from_value(payload.clone())
            .ok()
            .map(SessionMessage::Logger),
        "output" => {
            let (text, encoding): (String, Option<Encoding>) = match payload {
                Value::String(text) => (text.clone(), None),
                Value::Array(items) => (
                    items.first()?.as_str()?.to_string(),
                    items.get(1).and_then(Value::as_str).and_then(|e| e.parse().ok()),
                ),
                _ => return None,
            };
            Some(SessionMessage::Output { text, encoding })
        }
        "remote-disconnect" => Some(SessionMessage::RemoteDisconnect(SessionId::from(
            payload.as_str()?,
        ))),
        "route" => {
            let items = payload.as_array()?;
            let target = SessionId::from(items.first()?.as_str()?);
            let event = items.get(1)?.as_str()?.to_string();
            Some(SessionMessage::Route {
                target,
                event,
                payload: rest(&items[2..]),
            })
        }
        "global" => {
            let items = payload.as_array()?;
            let event = items.first()?.as_str()?.to_string();
            Some(SessionMessage::Global {
                event,
                payload: rest(&items[1..]),
            })
        }
        "set-timeout" => {
            let secs = payload.as_f64()?;
            Duration::try_from_secs_f64(secs)
                .ok()
                .map(SessionMessage::SetTimeout)
        }
        "login-failed" => Some(SessionMessage::LoginFailed),
        _ => None,
    }
}

fn parse_db(schema: &str, payload: &Value, streaming: bool) -> Option<SessionMessage> {
    let items = payload.as_array()?;
    let table = items.first()?.as_str()?.to_string();
    let method = items.get(1)?.as_str()?.to_string();
    let args = match items.get(2) {
        Some(Value::Array(args)) => args.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    };
    Some(SessionMessage::Db(KvCommand {
        schema: schema.to_string(),
        table,
        method,
        args,
        streaming,
    }))
}

/// Trailing payload items: none is `null`, one is itself, more are an array
fn rest(items: &[Value]) -> Value {
    match items {
        [] => Value::Null,
        [single] => single.clone(),
        many => Value::Array(many.to_vec()),
    }
}

/// Reply to a key-value call
#[derive(Debug, Clone, PartialEq)]
pub enum DbReply {
    /// Result of a single-value call
    Value(Value),
    /// A stream of items follows
    StreamStart,
    /// One streamed item
    Item(Value),
    /// The stream is complete
    StreamEnd,
    /// The call failed; carries the error text
    Exception(String),
}

/// Engine to session message
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Keyboard bytes from the client
    Input(Bytes),
    /// An event routed or broadcast by another session
    Event {
        /// Event name
        name: String,
        /// Event payload
        payload: Value,
    },
    /// The terminal was resized
    Refresh {
        /// New width
        columns: u16,
        /// New height
        rows: u16,
    },
    /// Reply to a key-value call on `schema`
    Db {
        /// Schema the call was made on
        schema: String,
        /// The reply
        reply: DbReply,
    },
    /// Reply to a lock acquire
    Lock {
        /// Lock name
        name: String,
        /// Whether the lock is now held by this session
        granted: bool,
    },
}

impl fmt::Display for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionInput::Input(bytes) => write!(f, "input({} bytes)", bytes.len()),
            SessionInput::Event { name, .. } => write!(f, "{name}"),
            SessionInput::Refresh { columns, rows } => write!(f, "refresh({columns}x{rows})"),
            SessionInput::Db { schema, .. } => write!(f, "db-{schema}"),
            SessionInput::Lock { name, .. } => write!(f, "lock-{name}"),
        }
    }
}
