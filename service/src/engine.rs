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

//! The reactor
//!
//! [`Engine`] owns every listener, the session registry, the named lock
//! table and the key-value proxy. It runs as one loop ticking every
//! `poll_interval`; each tick does a bounded amount of non-blocking work:
//!
//! 1. reap dead clients and finished handshakes, starting sessions for the
//!    clients that negotiated successfully
//! 2. accept waiting connections
//! 3. read every client socket
//! 4. drain and dispatch session messages, then collect finished key-value
//!    replies
//! 5. flush client output
//! 6. deliver queued inputs, resize events and client input to sessions,
//!    then enforce idle timeouts
//!
//! Handshakes and key-value commands run as separate tasks and never hold
//! the loop up. Nothing grows without bound when a session stops reading:
//! a client whose undelivered input reaches `input_limit` is not read, so
//! TCP pushes back on the peer, and a session whose backlog of events passes
//! `backlog_limit` is closed.

use crate::admission::{AdmissionPolicy, FailedLoginThrottle};
use crate::client::Client;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::kv::{KvLocks, KvProxy};
use crate::lock::LockManager;
use crate::message::{DbReply, LockMethod, LogLevel, LogRecord, SessionInput, SessionMessage};
use crate::metrics::EngineMetrics;
use crate::registry::{SessionEntry, SessionRegistry};
use crate::rlogin::RloginProtocol;
use crate::server::{Accepted, Protocol, Server};
use crate::session::{self, SessionInfo, SessionScript};
use crate::telnet::TelnetProtocol;
use crate::types::{ProtocolKind, SessionId};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::{self, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Why a session is being torn down
#[derive(Debug, Clone, Copy)]
enum Teardown {
    Exit,
    Disconnected,
    Remote,
    Idle,
    Stalled,
}

/// The terminal server engine
pub struct Engine {
    config: Arc<EngineConfig>,
    servers: Vec<Server>,
    registry: SessionRegistry,
    locks: LockManager,
    kv: KvProxy,
    kv_locks: KvLocks,
    admission: Arc<dyn AdmissionPolicy>,
    script: Arc<dyn SessionScript>,
    connects: JoinSet<Result<()>>,
    negotiating: HashMap<task::Id, Arc<dyn Client>>,
    kv_tasks: JoinSet<(SessionId, String, Vec<DbReply>)>,
    metrics: Arc<EngineMetrics>,
}

impl Engine {
    /// Validate `config` and bind every listener it names
    pub async fn bind(config: EngineConfig, script: Arc<dyn SessionScript>) -> Result<Self> {
        config.validate().map_err(EngineError::Config)?;
        let mut servers = Vec::with_capacity(config.listeners.len());
        for listener in &config.listeners {
            let protocol: Arc<dyn Protocol> = match listener.kind {
                ProtocolKind::Telnet => Arc::new(TelnetProtocol),
                ProtocolKind::Rlogin => Arc::new(RloginProtocol),
            };
            servers.push(Server::bind(listener, protocol).await?);
        }
        let admission: Arc<dyn AdmissionPolicy> =
            Arc::new(FailedLoginThrottle::new(&config.admission));
        Ok(Self {
            kv: KvProxy::new(&config.data_dir),
            config: Arc::new(config),
            servers,
            registry: SessionRegistry::new(),
            locks: LockManager::new(),
            kv_locks: KvLocks::new(),
            admission,
            script,
            connects: JoinSet::new(),
            negotiating: HashMap::new(),
            kv_tasks: JoinSet::new(),
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    /// Replace the admission policy
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionPolicy>) -> Self {
        self.admission = admission;
        self
    }

    /// Bound address of each listener, in configuration order
    pub fn local_addrs(&self) -> Vec<(ProtocolKind, SocketAddr)> {
        self.servers
            .iter()
            .map(|server| (server.kind(), server.local_addr()))
            .collect()
    }

    /// Engine counters
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Configuration the engine runs with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ids of the running sessions
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.registry.ids()
    }

    /// Run until Ctrl-C
    pub async fn run(&mut self) -> Result<()> {
        let mut failed = None;
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                failed = Some(e);
            }
        })
        .await;
        match failed {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Run until `shutdown` completes, then close every client
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(listeners = self.servers.len(), "Engine running");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => self.tick(),
            }
        }
        self.shutdown();
    }

    /// One pass of the loop
    pub fn tick(&mut self) {
        self.reap();
        self.accept();
        self.read_clients();
        self.drain_sessions();
        self.collect_kv_replies();
        self.flush_clients();
        self.flush_backlogs();
        self.deliver_input();
        self.enforce_idle();
    }

    /// Close every client and stop every task
    pub fn shutdown(&mut self) {
        for (id, lifetime) in self.registry.clear() {
            self.metrics.session_ended(lifetime);
            info!(session_id = %id, ?lifetime, "Session closed for shutdown");
        }
        for server in &mut self.servers {
            server.deactivate_all();
        }
        self.connects.abort_all();
        self.negotiating.clear();
        self.kv_tasks.abort_all();
        info!("Engine stopped");
    }

    fn reap(&mut self) {
        for server in &mut self.servers {
            server.reap();
        }
        while let Some(finished) = self.connects.try_join_next_with_id() {
            let (task_id, result) = match finished {
                Ok((task_id, result)) => (task_id, result),
                Err(e) => {
                    error!(error = %e, "Negotiation task failed");
                    (e.id(), Err(EngineError::Other(e.to_string())))
                }
            };
            let Some(client) = self.negotiating.remove(&task_id) else {
                continue;
            };
            match result {
                Ok(()) if client.is_active() => self.start_session(client),
                Ok(()) => debug!(session_id = %client.session_id(), "Client left during negotiation"),
                Err(e) => {
                    if e.is_protocol_error() {
                        self.metrics.protocol_error();
                    }
                    self.metrics.negotiation_failed();
                    warn!(session_id = %client.session_id(), error = %e, "Negotiation failed");
                    client.deactivate();
                }
            }
        }
    }

    fn accept(&mut self) {
        for server in &mut self.servers {
            while let Some(accepted) = server.accept(&*self.admission, &self.config.negotiation) {
                match accepted {
                    Accepted::Client(client, connect) => {
                        let handle = self.connects.spawn(connect.negotiate());
                        self.negotiating.insert(handle.id(), client);
                    }
                    Accepted::Rejected { peer, reason } => {
                        info!(peer_addr = %peer, reason = %reason, "Connection refused");
                    }
                }
            }
        }
    }

    fn start_session(&mut self, client: Arc<dyn Client>) {
        let id = client.session_id().clone();
        // the session starts with the size already in its environment
        let _ = client.take_resize();
        let info = SessionInfo {
            id: id.clone(),
            kind: client.io().kind(),
            peer: client.io().peer(),
            environment: client.environment(),
        };
        let handle = session::spawn(
            self.script.clone(),
            info,
            self.config.clone(),
            self.kv_locks.clone(),
        );
        let entry = SessionEntry::new(client, handle, self.config.session_timeout);
        match self.registry.insert(id.clone(), entry) {
            Ok(()) => {
                self.metrics.session_started();
                info!(session_id = %id, "Session started");
            }
            Err(entry) => {
                error!(session_id = %id, "Session id already registered");
                entry.task.abort();
                entry.client.deactivate();
            }
        }
    }

    fn end_session(&mut self, id: &SessionId, reason: Teardown) {
        if let Some(lifetime) = self.registry.remove(id) {
            self.metrics.session_ended(lifetime);
            info!(session_id = %id, ?reason, ?lifetime, "Session ended");
        }
    }

    /// Tear down whatever owns `client`: its session, or just the client
    /// while it is still negotiating
    fn drop_client(&mut self, client: &Arc<dyn Client>, reason: Teardown) {
        let id = client.session_id().clone();
        if self.registry.contains(&id) {
            self.end_session(&id, reason);
        } else {
            client.deactivate();
        }
    }

    fn read_clients(&mut self) {
        let mut dead = Vec::new();
        for client in self.servers.iter().flat_map(|server| server.clients()) {
            if !client.is_active() {
                continue;
            }
            if client.io().pending_input() >= self.config.input_limit {
                trace!(session_id = %client.session_id(), "Input backlog full, not reading");
                continue;
            }
            match client.socket_recv() {
                Ok(0) => {}
                Ok(count) => self.metrics.bytes_received(count as u64),
                Err(e) => {
                    if e.is_protocol_error() {
                        self.metrics.protocol_error();
                        warn!(session_id = %client.session_id(), error = %e, "Protocol violation, closing");
                    } else {
                        debug!(session_id = %client.session_id(), error = %e, "Client disconnected");
                    }
                    dead.push(client.clone());
                }
            }
        }
        for client in dead {
            self.drop_client(&client, Teardown::Disconnected);
        }
    }

    fn drain_sessions(&mut self) {
        let budget = self.config.channel_capacity;
        for id in self.registry.ids() {
            for _ in 0..budget {
                let Some(entry) = self.registry.get_mut(&id) else {
                    break;
                };
                match entry.output.try_recv() {
                    Ok(message) => self.dispatch(&id, message),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.end_session(&id, Teardown::Exit);
                        break;
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, id: &SessionId, message: SessionMessage) {
        trace!(session_id = %id, event = %message.event_name(), "Dispatching");
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        match message {
            SessionMessage::Exit => self.end_session(id, Teardown::Exit),
            SessionMessage::Logger(record) => emit_log(id, &record),
            SessionMessage::Output { text, encoding } => {
                let encoding = encoding.unwrap_or_else(|| entry.client.environment().encoding());
                if let Err(e) = entry.client.send_text(&text, encoding) {
                    debug!(session_id = %id, error = %e, "Output to closed client");
                    self.end_session(id, Teardown::Disconnected);
                }
            }
            SessionMessage::RemoteDisconnect(target) => {
                info!(session_id = %id, target = %target, "Remote disconnect");
                self.end_session(&target, Teardown::Remote);
            }
            SessionMessage::Route {
                target,
                event,
                payload,
            } => {
                if self.notify(&target, SessionInput::Event { name: event, payload }) {
                    self.metrics.message_routed();
                } else {
                    debug!(session_id = %id, target = %target, "Route target is gone");
                }
            }
            SessionMessage::Global { event, payload } => {
                for target in self.registry.ids() {
                    if target == *id {
                        continue;
                    }
                    let input = SessionInput::Event {
                        name: event.clone(),
                        payload: payload.clone(),
                    };
                    if self.notify(&target, input) {
                        self.metrics.message_routed();
                    }
                }
            }
            SessionMessage::SetTimeout(timeout) => {
                debug!(session_id = %id, ?timeout, "Idle timeout changed");
                entry.timeout = timeout;
            }
            SessionMessage::Db(command) => {
                let kv = self.kv.clone();
                let id = id.clone();
                self.kv_tasks.spawn_blocking(move || {
                    let replies = kv.replies(&command);
                    (id, command.schema, replies)
                });
            }
            SessionMessage::Lock {
                name,
                method: LockMethod::Acquire,
                stale_after,
            } => {
                let registry = &self.registry;
                let granted = self
                    .locks
                    .acquire(&name, id, stale_after, |holder| registry.contains(holder));
                self.reply(id, SessionInput::Lock { name, granted });
            }
            SessionMessage::Lock {
                name,
                method: LockMethod::Release,
                ..
            } => {
                self.locks.release(&name, id);
            }
            SessionMessage::LoginFailed => {
                let peer = entry.client.io().peer();
                warn!(session_id = %id, peer_addr = %peer, "Login failed");
                self.metrics.login_failed();
                self.admission.record_failure(peer.ip());
            }
            SessionMessage::Other { event, .. } => {
                error!(session_id = %id, event = %event, "Unknown session event");
            }
        }
    }

    /// Queue a reply the session is waiting for; false if the session is gone
    fn reply(&mut self, target: &SessionId, input: SessionInput) -> bool {
        self.registry
            .get_mut(target)
            .is_some_and(|entry| entry.queue_input(input))
    }

    /// Queue an event the session did not ask for
    ///
    /// A session that lets more than `backlog_limit` of these pile up is
    /// closed as stalled.
    fn notify(&mut self, target: &SessionId, input: SessionInput) -> bool {
        let Some(entry) = self.registry.get_mut(target) else {
            return false;
        };
        if !entry.queue_input(input) {
            return false;
        }
        let backlog = entry.backlog_len();
        if backlog > self.config.backlog_limit {
            warn!(session_id = %target, backlog, "Session stopped reading, closing");
            self.end_session(target, Teardown::Stalled);
        }
        true
    }

    fn collect_kv_replies(&mut self) {
        while let Some(finished) = self.kv_tasks.try_join_next() {
            let (id, schema, replies) = match finished {
                Ok(finished) => finished,
                Err(e) => {
                    error!(error = %e, "Key-value task failed");
                    continue;
                }
            };
            for reply in replies {
                let input = SessionInput::Db {
                    schema: schema.clone(),
                    reply,
                };
                if !self.reply(&id, input) {
                    debug!(session_id = %id, "Session went away before the reply");
                    break;
                }
            }
        }
    }

    fn flush_clients(&mut self) {
        let mut dead = Vec::new();
        for client in self.servers.iter().flat_map(|server| server.clients()) {
            if !client.is_active() || !client.send_ready() {
                continue;
            }
            match client.send() {
                Ok(count) => self.metrics.bytes_sent(count as u64),
                Err(e) => {
                    debug!(session_id = %client.session_id(), error = %e, "Flush failed");
                    dead.push(client.clone());
                }
            }
        }
        for client in dead {
            self.drop_client(&client, Teardown::Disconnected);
        }
    }

    fn flush_backlogs(&mut self) {
        for (id, entry) in self.registry.iter_mut() {
            if !entry.flush_backlog() {
                trace!(session_id = %id, "Session stopped listening");
            }
        }
    }

    fn deliver_input(&mut self) {
        for id in self.registry.ids() {
            let resize = match self.registry.get(&id) {
                Some(entry) => entry.client.take_resize(),
                None => continue,
            };
            if let Some((columns, rows)) = resize {
                debug!(session_id = %id, columns, rows, "Terminal resized");
                self.notify(&id, SessionInput::Refresh { columns, rows });
            }
            let Some(entry) = self.registry.get(&id) else {
                continue;
            };
            // keystrokes wait until queued events have gone through
            if entry.backlog_len() > 0 {
                continue;
            }
            let Some(bytes) = entry.client.io().take_input() else {
                continue;
            };
            match entry.input.try_send(SessionInput::Input(bytes)) {
                Ok(()) => {}
                Err(TrySendError::Full(SessionInput::Input(bytes))) => {
                    // keep it for the next tick, ahead of anything read since
                    entry.client.io().unread_input(bytes);
                }
                Err(_) => {}
            }
        }
    }

    fn enforce_idle(&mut self) {
        let idle: Vec<SessionId> = self
            .registry
            .iter()
            .filter(|(_, entry)| entry.client.idle() > entry.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in idle {
            self.metrics.idle_timeout();
            self.end_session(&id, Teardown::Idle);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("servers", &self.servers)
            .field("sessions", &self.registry.len())
            .field("negotiating", &self.negotiating.len())
            .field("locks", &self.locks.len())
            .finish()
    }
}

fn emit_log(id: &SessionId, record: &LogRecord) {
    let target = record.target.as_str();
    let message = record.message.as_str();
    match record.level {
        LogLevel::Error => error!(session_id = %id, log_target = target, "{message}"),
        LogLevel::Warn => warn!(session_id = %id, log_target = target, "{message}"),
        LogLevel::Info => info!(session_id = %id, log_target = target, "{message}"),
        LogLevel::Debug => debug!(session_id = %id, log_target = target, "{message}"),
        LogLevel::Trace => trace!(session_id = %id, log_target = target, "{message}"),
    }
}
