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

//! Session tasks and the scripting API
//!
//! Every negotiated client gets one session: a task running a
//! [`SessionScript`] against a [`SessionContext`]. The context is the
//! session's whole view of the world. Its terminal writes, log records and
//! coordination requests travel to the reactor over one bounded channel, and
//! keyboard input, events and replies arrive over another.

use crate::config::EngineConfig;
use crate::encoding::Encoding;
use crate::error::{EngineError, Result, StoreError};
use crate::kv::{KvLocks, TableLock};
use crate::message::{
    DbReply, KvCommand, LockMethod, LogLevel, LogRecord, SessionInput, SessionMessage,
};
use crate::types::{Environment, ProtocolKind, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

/// Application logic run for each connected user
#[async_trait]
pub trait SessionScript: Send + Sync + 'static {
    /// Run the session; returning ends it
    async fn run(&self, ctx: &mut SessionContext) -> Result<()>;
}

/// Identity of a session at startup
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Protocol the client connected with
    pub kind: ProtocolKind,
    /// Client address
    pub peer: SocketAddr,
    /// Negotiated environment
    pub environment: Environment,
}

/// Engine-side ends of a session's pipes
#[derive(Debug)]
pub struct SessionHandle {
    /// Engine to session
    pub input: mpsc::Sender<SessionInput>,
    /// Session to engine
    pub output: mpsc::Receiver<SessionMessage>,
    /// The session task
    pub task: JoinHandle<()>,
}

/// Start a session task
pub fn spawn(
    script: Arc<dyn SessionScript>,
    info: SessionInfo,
    config: Arc<EngineConfig>,
    kv_locks: KvLocks,
) -> SessionHandle {
    let (input_tx, input_rx) = mpsc::channel(config.channel_capacity);
    let (output_tx, output_rx) = mpsc::channel(config.channel_capacity);
    let span = info_span!("session", session_id = %info.id);
    let ctx = SessionContext {
        id: info.id,
        kind: info.kind,
        peer: info.peer,
        environment: info.environment,
        config,
        inbound: input_rx,
        outbound: output_tx,
        stash: VecDeque::new(),
        kv_locks,
    };
    let task = tokio::spawn(run_script(script, ctx).instrument(span));
    SessionHandle {
        input: input_tx,
        output: output_rx,
        task,
    }
}

async fn run_script(script: Arc<dyn SessionScript>, mut ctx: SessionContext) {
    debug!("Session started");
    match script.run(&mut ctx).await {
        Ok(()) => debug!("Session script finished"),
        Err(e) if e.is_disconnect() => debug!(error = %e, "Session ended by disconnect"),
        Err(e) => error!(error = %e, "Session script failed"),
    }
    if ctx.outbound.send(SessionMessage::Exit).await.is_err() {
        debug!("Engine already closed the session");
    }
}

/// A session's connection to the engine
pub struct SessionContext {
    id: SessionId,
    kind: ProtocolKind,
    peer: SocketAddr,
    environment: Environment,
    config: Arc<EngineConfig>,
    inbound: mpsc::Receiver<SessionInput>,
    outbound: mpsc::Sender<SessionMessage>,
    /// Inbound messages set aside by filtered reads, in arrival order
    stash: VecDeque<SessionInput>,
    kv_locks: KvLocks,
}

impl SessionContext {
    /// This session's id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Protocol the client connected with
    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Client address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Negotiated environment, with the size kept current by resize events
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Engine configuration snapshot
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Output encoding of the client
    pub fn encoding(&self) -> Encoding {
        self.environment.encoding()
    }

    /// Terminal size as `(columns, rows)`
    pub fn terminal_size(&self) -> (u16, u16) {
        (
            self.environment.columns().unwrap_or(self.config.negotiation.default_columns),
            self.environment.lines().unwrap_or(self.config.negotiation.default_lines),
        )
    }

    /// Send a raw message to the engine
    pub async fn send(&self, message: SessionMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| EngineError::SessionClosed)
    }

    /// Send an `(event, payload)` pair by its wire name
    ///
    /// Catalogue names such as `"set-timeout"`, `"route"` or `"db-users"`
    /// act as their typed counterparts; any other name reaches the engine as
    /// an unknown event, which is logged and otherwise ignored.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.send(SessionMessage::from_event(event, payload)).await
    }

    /// Write text to the terminal in the client's encoding
    pub async fn write(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionMessage::Output {
            text: text.into(),
            encoding: None,
        })
        .await
    }

    /// Write text to the terminal in an explicit encoding
    pub async fn write_encoded(&self, text: impl Into<String>, encoding: Encoding) -> Result<()> {
        self.send(SessionMessage::Output {
            text: text.into(),
            encoding: Some(encoding),
        })
        .await
    }

    async fn next_inbound(&mut self) -> Result<SessionInput> {
        let event = self.inbound.recv().await.ok_or(EngineError::SessionClosed)?;
        if let SessionInput::Refresh { columns, rows } = &event {
            self.environment.set_size(*columns, *rows);
        }
        Ok(event)
    }

    /// Next inbound message of any kind
    pub async fn recv(&mut self) -> Result<SessionInput> {
        match self.stash.pop_front() {
            Some(event) => Ok(event),
            None => self.next_inbound().await,
        }
    }

    /// Next inbound message `accept` matches
    ///
    /// Messages it rejects are kept, in order, for later reads.
    pub async fn read_event(
        &mut self,
        mut accept: impl FnMut(&SessionInput) -> bool + Send,
    ) -> Result<SessionInput> {
        if let Some(index) = self.stash.iter().position(&mut accept) {
            if let Some(event) = self.stash.remove(index) {
                return Ok(event);
            }
        }
        loop {
            let event = self.next_inbound().await?;
            if accept(&event) {
                return Ok(event);
            }
            self.stash.push_back(event);
        }
    }

    /// Like [`read_event`](Self::read_event), giving up after `timeout`
    pub async fn read_event_timeout(
        &mut self,
        accept: impl FnMut(&SessionInput) -> bool + Send,
        timeout: Duration,
    ) -> Result<Option<SessionInput>> {
        match tokio::time::timeout(timeout, self.read_event(accept)).await {
            Ok(event) => event.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Next chunk of keyboard input
    pub async fn read_input(&mut self) -> Result<Bytes> {
        match self
            .read_event(|event| matches!(event, SessionInput::Input(_)))
            .await?
        {
            SessionInput::Input(bytes) => Ok(bytes),
            _ => Err(EngineError::Other("unexpected inbound message".to_string())),
        }
    }

    /// Read one line of input with basic editing
    ///
    /// See [`LineEditor`] for the keys understood. With `echo` set, typed
    /// characters are written back to the terminal. Bytes after the line
    /// terminator stay queued for the next read.
    pub async fn read_line(&mut self, echo: bool) -> Result<String> {
        let encoding = self.encoding();
        let mut editor = LineEditor::new();
        loop {
            let bytes = self.read_input().await?;
            let (echoed, finished) = editor.feed(&bytes, encoding);
            if echo && !echoed.is_empty() {
                self.write(echoed).await?;
            }
            if let Some((line, rest)) = finished {
                if !rest.is_empty() {
                    self.stash.push_front(SessionInput::Input(rest));
                }
                return Ok(line);
            }
        }
    }

    /// Take the named lock; returns whether it was granted
    pub async fn acquire_lock(&mut self, name: &str, stale_after: Option<Duration>) -> Result<bool> {
        self.send(SessionMessage::Lock {
            name: name.to_string(),
            method: LockMethod::Acquire,
            stale_after,
        })
        .await?;
        let reply = self
            .read_event(|event| matches!(event, SessionInput::Lock { name: n, .. } if n == name))
            .await?;
        Ok(matches!(reply, SessionInput::Lock { granted: true, .. }))
    }

    /// Give the named lock up
    pub async fn release_lock(&self, name: &str) -> Result<()> {
        self.send(SessionMessage::Lock {
            name: name.to_string(),
            method: LockMethod::Release,
            stale_after: None,
        })
        .await
    }

    /// Key-value access to `schema`
    pub fn db(&mut self, schema: impl Into<String>) -> DbProxy<'_> {
        DbProxy {
            ctx: self,
            schema: schema.into(),
        }
    }

    /// Deliver `event` to one other session
    pub async fn route(&self, target: &SessionId, event: impl Into<String>, payload: Value) -> Result<()> {
        self.send(SessionMessage::Route {
            target: target.clone(),
            event: event.into(),
            payload,
        })
        .await
    }

    /// Deliver `event` to every other session
    pub async fn broadcast(&self, event: impl Into<String>, payload: Value) -> Result<()> {
        self.send(SessionMessage::Global {
            event: event.into(),
            payload,
        })
        .await
    }

    /// Change this session's idle timeout
    pub async fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.send(SessionMessage::SetTimeout(timeout)).await
    }

    /// Disconnect another session
    pub async fn disconnect(&self, target: &SessionId) -> Result<()> {
        self.send(SessionMessage::RemoteDisconnect(target.clone())).await
    }

    /// Report a failed login for this client's address
    pub async fn login_failed(&self) -> Result<()> {
        self.send(SessionMessage::LoginFailed).await
    }

    /// Emit a log record through the engine's log sink
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        self.send(SessionMessage::Logger(LogRecord {
            level,
            target: "session".to_string(),
            message: message.into(),
        }))
        .await
    }

    /// End the session
    pub async fn exit(&self) -> Result<()> {
        self.send(SessionMessage::Exit).await
    }
}

/// Incremental line editing over raw keyboard bytes
///
/// Backspace and DEL erase one character, Ctrl-U the whole line, CR or LF
/// (CR LF counts once) finishes it. Other control bytes are dropped.
#[derive(Debug, Default)]
pub struct LineEditor {
    line: Vec<u8>,
    partial: Vec<u8>,
}

impl LineEditor {
    /// Create an empty editor
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `bytes`
    ///
    /// Returns the text to echo and, once a terminator is seen, the finished
    /// line together with the bytes that followed it. The editor is empty
    /// again after a line finishes.
    pub fn feed(&mut self, bytes: &Bytes, encoding: Encoding) -> (String, Option<(String, Bytes)>) {
        let mut echoed = String::new();
        for (index, &byte) in bytes.iter().enumerate() {
            match byte {
                b'\r' | b'\n' => {
                    let mut rest = bytes.slice(index + 1..);
                    if byte == b'\r' && rest.first() == Some(&b'\n') {
                        rest = rest.slice(1..);
                    }
                    echoed.push_str("\r\n");
                    let line = encoding.decode(&std::mem::take(&mut self.line));
                    self.partial.clear();
                    return (echoed, Some((line, rest)));
                }
                0x08 | 0x7F => {
                    if self.erase(encoding) {
                        echoed.push_str("\x08 \x08");
                    }
                }
                0x15 => {
                    while self.erase(encoding) {
                        echoed.push_str("\x08 \x08");
                    }
                }
                byte if byte >= 0x20 => {
                    self.line.push(byte);
                    if encoding == Encoding::Utf8 && !byte.is_ascii() {
                        self.partial.push(byte);
                        if let Ok(text) = std::str::from_utf8(&self.partial) {
                            echoed.push_str(text);
                            self.partial.clear();
                        }
                    } else {
                        echoed.push_str(&encoding.decode(&[byte]));
                    }
                }
                _ => {}
            }
        }
        (echoed, None)
    }

    /// Line typed so far
    pub fn pending(&self) -> &[u8] {
        &self.line
    }

    fn erase(&mut self, encoding: Encoding) -> bool {
        self.partial.clear();
        let Some(last) = self.line.pop() else {
            return false;
        };
        if encoding == Encoding::Utf8 && !last.is_ascii() {
            // drop continuation bytes back to the lead byte
            let mut byte = last;
            while byte & 0xC0 == 0x80 {
                match self.line.pop() {
                    Some(previous) => byte = previous,
                    None => break,
                }
            }
        }
        true
    }
}

/// Key-value calls on one schema
///
/// Each call waits for its complete reply before returning, so a streamed
/// call is always drained to its end marker.
pub struct DbProxy<'a> {
    ctx: &'a mut SessionContext,
    schema: String,
}

impl DbProxy<'_> {
    /// Schema this proxy addresses
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn request(&mut self, table: &str, method: &str, args: Vec<Value>, streaming: bool) -> Result<()> {
        self.ctx
            .send(SessionMessage::Db(KvCommand {
                schema: self.schema.clone(),
                table: table.to_string(),
                method: method.to_string(),
                args,
                streaming,
            }))
            .await
    }

    async fn next_reply(&mut self) -> Result<DbReply> {
        let schema = self.schema.clone();
        let event = self
            .ctx
            .read_event(|event| matches!(event, SessionInput::Db { schema: s, .. } if *s == schema))
            .await?;
        match event {
            SessionInput::Db { reply, .. } => Ok(reply),
            _ => Err(EngineError::Other("unexpected inbound message".to_string())),
        }
    }

    /// Single-value call
    pub async fn call(&mut self, table: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        self.request(table, method, args, false).await?;
        loop {
            match self.next_reply().await? {
                DbReply::Value(value) => return Ok(value),
                DbReply::Exception(message) => return Err(StoreError::Remote(message).into()),
                other => warn!(schema = %self.schema, ?other, "Discarding stray reply"),
            }
        }
    }

    /// Streamed call, collected to the end marker
    pub async fn stream(&mut self, table: &str, method: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        self.request(table, method, args, true).await?;
        let mut items = Vec::new();
        let mut started = false;
        loop {
            match self.next_reply().await? {
                DbReply::StreamStart => started = true,
                DbReply::Item(item) if started => items.push(item),
                DbReply::StreamEnd if started => return Ok(items),
                DbReply::Exception(message) => return Err(StoreError::Remote(message).into()),
                other => warn!(schema = %self.schema, ?other, "Discarding stray reply"),
            }
        }
    }

    /// `get(key, default)`
    pub async fn get(&mut self, table: &str, key: &str, default: Value) -> Result<Value> {
        self.call(table, "get", vec![Value::from(key), default]).await
    }

    /// `set(key, value)`
    pub async fn set(&mut self, table: &str, key: &str, value: Value) -> Result<()> {
        self.call(table, "set", vec![Value::from(key), value]).await.map(drop)
    }

    /// `contains(key)`
    pub async fn contains(&mut self, table: &str, key: &str) -> Result<bool> {
        Ok(self.call(table, "contains", vec![Value::from(key)]).await?.as_bool() == Some(true))
    }

    /// Streamed key listing
    pub async fn keys(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .stream(table, "iterkeys", Vec::new())
            .await?
            .into_iter()
            .filter_map(|key| key.as_str().map(str::to_string))
            .collect())
    }

    /// Exclusive use of `table` across several calls, released on drop
    pub async fn lock(&self, table: &str) -> TableLock {
        self.ctx.kv_locks.lock(&self.schema, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl SessionScript for Echo {
        async fn run(&self, ctx: &mut SessionContext) -> Result<()> {
            ctx.write("name? ").await?;
            let name = ctx.read_line(true).await?;
            ctx.write(format!("hello {name}")).await?;
            let granted = ctx.acquire_lock("room", None).await?;
            ctx.write(format!("lock {granted}")).await?;
            let value = ctx.db("bbs").call("users", "get", vec![json!(name)]).await?;
            ctx.write(format!("value {value}")).await?;
            Ok(())
        }
    }

    fn info() -> SessionInfo {
        let mut environment = Environment::new();
        environment.set_size(100, 30);
        SessionInfo {
            id: SessionId::from("telnet-127.0.0.1:9"),
            kind: ProtocolKind::Telnet,
            peer: "127.0.0.1:9".parse().unwrap(),
            environment,
        }
    }

    async fn expect_output(handle: &mut SessionHandle) -> String {
        match handle.output.recv().await {
            Some(SessionMessage::Output { text, .. }) => text,
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_script_round_trip() {
        let config = Arc::new(EngineConfig::default());
        let mut handle = spawn(Arc::new(Echo), info(), config, KvLocks::new());

        assert_eq!(expect_output(&mut handle).await, "name? ");
        handle.input.send(SessionInput::Input(Bytes::from_static(b"bx\x08ob\r\n"))).await.unwrap();
        let mut echoed = String::new();
        loop {
            let text = expect_output(&mut handle).await;
            if text.starts_with("hello") {
                assert_eq!(text, "hello bob");
                break;
            }
            echoed.push_str(&text);
        }
        assert_eq!(echoed, "bx\x08 \x08ob\r\n");

        assert_eq!(
            handle.output.recv().await,
            Some(SessionMessage::Lock {
                name: "room".into(),
                method: LockMethod::Acquire,
                stale_after: None,
            })
        );
        // an unrelated event arrives before the lock reply and must not be lost
        handle
            .input
            .send(SessionInput::Event { name: "chat".into(), payload: json!("hi") })
            .await
            .unwrap();
        handle
            .input
            .send(SessionInput::Lock { name: "room".into(), granted: true })
            .await
            .unwrap();
        assert_eq!(expect_output(&mut handle).await, "lock true");

        let Some(SessionMessage::Db(command)) = handle.output.recv().await else {
            panic!("expected db command");
        };
        assert_eq!(command.method, "get");
        assert!(!command.streaming);
        handle
            .input
            .send(SessionInput::Db { schema: "bbs".into(), reply: DbReply::Value(json!(7)) })
            .await
            .unwrap();
        assert_eq!(expect_output(&mut handle).await, "value 7");
        assert_eq!(handle.output.recv().await, Some(SessionMessage::Exit));
        handle.task.await.unwrap();
    }

    struct Streamer;

    #[async_trait]
    impl SessionScript for Streamer {
        async fn run(&self, ctx: &mut SessionContext) -> Result<()> {
            let keys = ctx.db("bbs").keys("users").await?;
            ctx.write(keys.join(",")).await?;
            let err = ctx.db("bbs").call("users", "pop", vec![json!("x")]).await.unwrap_err();
            ctx.write(err.to_string()).await?;
            let event = ctx.recv().await?;
            ctx.write(event.to_string()).await?;
            let (columns, rows) = ctx.terminal_size();
            ctx.write(format!("{columns}x{rows}")).await
        }
    }

    #[tokio::test]
    async fn test_stream_drains_and_keeps_other_events() {
        let config = Arc::new(EngineConfig::default());
        let mut handle = spawn(Arc::new(Streamer), info(), config, KvLocks::new());
        let Some(SessionMessage::Db(command)) = handle.output.recv().await else {
            panic!("expected db command");
        };
        assert!(command.streaming);
        let db = |reply| SessionInput::Db { schema: "bbs".into(), reply };
        for input in [
            db(DbReply::StreamStart),
            SessionInput::Refresh { columns: 132, rows: 43 },
            db(DbReply::Item(json!("amy"))),
            db(DbReply::Item(json!("bob"))),
            db(DbReply::StreamEnd),
        ] {
            handle.input.send(input).await.unwrap();
        }
        assert_eq!(expect_output(&mut handle).await, "amy,bob");

        assert!(matches!(handle.output.recv().await, Some(SessionMessage::Db(_))));
        handle.input.send(db(DbReply::Exception("KeyError: x".into()))).await.unwrap();
        assert_eq!(expect_output(&mut handle).await, "Store error: KeyError: x");

        assert_eq!(expect_output(&mut handle).await, "refresh(132x43)");
        assert_eq!(expect_output(&mut handle).await, "132x43");
    }

    #[test]
    fn test_line_editor_keys() {
        let mut editor = LineEditor::new();
        let (echoed, finished) = editor.feed(&Bytes::from_static(b"ab\x7fc"), Encoding::Utf8);
        assert_eq!(echoed, "ab\x08 \x08c");
        assert!(finished.is_none());
        assert_eq!(editor.pending(), b"ac");

        let (_, finished) = editor.feed(&Bytes::from_static(b"\x15xy\r\nnext"), Encoding::Utf8);
        let (line, rest) = finished.unwrap();
        assert_eq!(line, "xy");
        assert_eq!(&rest[..], b"next");
        assert!(editor.pending().is_empty());
    }

    #[test]
    fn test_line_editor_multibyte() {
        let mut editor = LineEditor::new();
        let (echoed, _) = editor.feed(&Bytes::from("né".as_bytes().to_vec()), Encoding::Utf8);
        assert_eq!(echoed, "né");
        editor.feed(&Bytes::from_static(b"\x08"), Encoding::Utf8);
        assert_eq!(editor.pending(), b"n");

        let mut editor = LineEditor::new();
        let (echoed, finished) = editor.feed(&Bytes::from_static(b"\xe9\r"), Encoding::Cp437);
        assert_eq!(echoed, "Θ\r\n");
        assert_eq!(finished.unwrap().0, "Θ");
    }

    #[tokio::test]
    async fn test_closed_inbound_ends_session() {
        let config = Arc::new(EngineConfig::default());
        let mut handle = spawn(Arc::new(Echo), info(), config, KvLocks::new());
        assert_eq!(expect_output(&mut handle).await, "name? ");
        let SessionHandle { input, mut output, task } = handle;
        drop(input);
        assert_eq!(output.recv().await, Some(SessionMessage::Exit));
        task.await.unwrap();
    }
}
