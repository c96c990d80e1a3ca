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

//! Session registry
//!
//! The reactor's table of running sessions, keyed by [`SessionId`]. Each
//! entry pairs the client with the engine-side ends of the session's pipes
//! and a backlog of inputs that did not fit in the inbound pipe yet.

use crate::client::Client;
use crate::message::{SessionInput, SessionMessage};
use crate::session::SessionHandle;
use crate::types::SessionId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// One running session
#[derive(Debug)]
pub struct SessionEntry {
    /// The connected client
    pub client: Arc<dyn Client>,
    /// Engine to session
    pub input: mpsc::Sender<SessionInput>,
    /// Session to engine
    pub output: mpsc::Receiver<SessionMessage>,
    /// Idle limit for this session
    pub timeout: Duration,
    /// The session task
    pub task: JoinHandle<()>,
    /// When the session started
    pub started: Instant,
    /// Inputs waiting for room in the inbound pipe, oldest first
    backlog: VecDeque<SessionInput>,
}

impl SessionEntry {
    /// Pair a client with its freshly spawned session
    pub fn new(client: Arc<dyn Client>, handle: SessionHandle, timeout: Duration) -> Self {
        Self {
            client,
            input: handle.input,
            output: handle.output,
            timeout,
            task: handle.task,
            started: Instant::now(),
            backlog: VecDeque::new(),
        }
    }

    /// Queue `input` behind anything already waiting, then send what fits
    ///
    /// Returns false once the session has stopped listening.
    pub fn queue_input(&mut self, input: SessionInput) -> bool {
        self.backlog.push_back(input);
        self.flush_backlog()
    }

    /// Send waiting inputs in order until the pipe is full
    ///
    /// Returns false once the session has stopped listening; the backlog is
    /// discarded then.
    pub fn flush_backlog(&mut self) -> bool {
        while let Some(input) = self.backlog.pop_front() {
            match self.input.try_send(input) {
                Ok(()) => {}
                Err(TrySendError::Full(input)) => {
                    self.backlog.push_front(input);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return false;
                }
            }
        }
        true
    }

    /// Inputs still waiting for the session
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Close both pipes and stop the task
    ///
    /// Messages the session had already queued are discarded.
    fn shutdown(mut self) -> Arc<dyn Client> {
        self.output.close();
        while self.output.try_recv().is_ok() {}
        drop(self.input);
        self.task.abort();
        self.client
    }
}

/// Running sessions by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; refused when the id is already taken
    pub fn insert(&mut self, id: SessionId, entry: SessionEntry) -> std::result::Result<(), SessionEntry> {
        if self.sessions.contains_key(&id) {
            return Err(entry);
        }
        self.sessions.insert(id, entry);
        Ok(())
    }

    /// Tear a session down
    ///
    /// The entry leaves the table first, then its pipes close, then the task
    /// is stopped and finally the client is deactivated. Returns how long the
    /// session ran, or `None` if it was not registered.
    pub fn remove(&mut self, id: &SessionId) -> Option<Duration> {
        let entry = self.sessions.remove(id)?;
        let lifetime = entry.started.elapsed();
        let client = entry.shutdown();
        client.deactivate();
        debug!(session_id = %id, ?lifetime, "Session torn down");
        Some(lifetime)
    }

    /// Look a session up
    pub fn get(&self, id: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(id)
    }

    /// Look a session up mutably
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionEntry> {
        self.sessions.get_mut(id)
    }

    /// Whether a session is registered
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Snapshot of the registered ids
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All sessions
    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &SessionEntry)> {
        self.sessions.iter()
    }

    /// All sessions, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SessionId, &mut SessionEntry)> {
        self.sessions.iter_mut()
    }

    /// Tear every session down, returning how long each one ran
    pub fn clear(&mut self) -> Vec<(SessionId, Duration)> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.remove(&id).map(|lifetime| (id, lifetime)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientIo;
    use crate::encoding::Encoding;
    use crate::error::Result;
    use crate::types::ProtocolKind;
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug)]
    struct RawClient(ClientIo);

    impl Client for RawClient {
        fn io(&self) -> &ClientIo {
            &self.0
        }

        fn receive(&self, bytes: &[u8]) -> Result<()> {
            self.0.push_input(bytes);
            Ok(())
        }

        fn send_text(&self, text: &str, encoding: Encoding) -> Result<()> {
            self.0.push_output(&encoding.encode(text));
            Ok(())
        }
    }

    async fn entry() -> (SessionEntry, mpsc::Receiver<SessionInput>, mpsc::Sender<SessionMessage>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _remote = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let client = Arc::new(RawClient(ClientIo::new(ProtocolKind::Telnet, stream, peer)));
        let (input_tx, input_rx) = mpsc::channel(4);
        let (output_tx, output_rx) = mpsc::channel(4);
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = SessionHandle {
            input: input_tx,
            output: output_rx,
            task,
        };
        (SessionEntry::new(client, handle, Duration::from_secs(60)), input_rx, output_tx)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate() {
        let mut registry = SessionRegistry::new();
        let id = SessionId::from("telnet-127.0.0.1:1");
        let (first, _rx1, _tx1) = entry().await;
        let (second, _rx2, _tx2) = entry().await;
        assert!(registry.insert(id.clone(), first).is_ok());
        assert!(registry.insert(id.clone(), second).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_closes_everything() {
        let mut registry = SessionRegistry::new();
        let id = SessionId::from("telnet-127.0.0.1:1");
        let (entry, mut input_rx, output_tx) = entry().await;
        let client = entry.client.clone();
        output_tx.send(SessionMessage::Exit).await.unwrap();
        registry.insert(id.clone(), entry).unwrap();

        assert!(registry.remove(&id).is_some());
        assert!(!registry.contains(&id));
        assert!(input_rx.recv().await.is_none());
        assert!(output_tx.send(SessionMessage::Exit).await.is_err());
        assert!(!client.is_active());
        assert!(registry.remove(&id).is_none());
    }

    fn event(n: u64) -> SessionInput {
        SessionInput::Event {
            name: "chat".into(),
            payload: serde_json::Value::from(n),
        }
    }

    #[tokio::test]
    async fn test_backlog_keeps_order_past_a_full_pipe() {
        let (mut entry, mut input_rx, _output_tx) = entry().await;
        for n in 0..6 {
            assert!(entry.queue_input(event(n)));
        }
        // the pipe holds four; the rest wait in the backlog
        assert_eq!(entry.backlog_len(), 2);
        for n in 0..4 {
            assert_eq!(input_rx.recv().await, Some(event(n)));
        }
        assert!(entry.queue_input(event(6)));
        assert_eq!(entry.backlog_len(), 0);
        for n in 4..7 {
            assert_eq!(input_rx.recv().await, Some(event(n)));
        }

        drop(input_rx);
        assert!(!entry.queue_input(event(7)));
        assert_eq!(entry.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_clear_reports_every_session() {
        let mut registry = SessionRegistry::new();
        let (first, _rx1, _tx1) = entry().await;
        let (second, _rx2, _tx2) = entry().await;
        let first_client = first.client.clone();
        registry.insert(SessionId::from("telnet-127.0.0.1:1"), first).unwrap();
        registry.insert(SessionId::from("telnet-127.0.0.1:2"), second).unwrap();

        let mut ended: Vec<SessionId> = registry.clear().into_iter().map(|(id, _)| id).collect();
        ended.sort();
        assert_eq!(
            ended,
            vec![SessionId::from("telnet-127.0.0.1:1"), SessionId::from("telnet-127.0.0.1:2")]
        );
        assert!(registry.is_empty());
        assert!(!first_client.is_active());
    }
}
