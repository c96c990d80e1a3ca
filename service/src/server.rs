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

//! Listening side of the connection lifecycle contract
//!
//! A [`Server`] owns one listening socket and the clients accepted on it. The
//! reactor polls it once per tick: reap dead clients, then accept whatever is
//! waiting, subject to the capacity limit and the admission policy.

use crate::admission::AdmissionPolicy;
use crate::client::Client;
use crate::config::{ListenerConfig, NegotiationConfig};
use crate::connect::Connect;
use crate::error::{EngineError, Result};
use crate::types::{ConnectionId, ProtocolKind};
use futures::FutureExt;
use metrics::counter;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Protocol factory: turns an accepted socket into a client and its handshake
pub trait Protocol: Send + Sync {
    /// Protocol spoken by clients this factory builds
    fn kind(&self) -> ProtocolKind;

    /// Build the client and handshake for an admitted socket
    fn accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        negotiation: &NegotiationConfig,
    ) -> (Arc<dyn Client>, Box<dyn Connect>);
}

/// Outcome of one accept attempt
pub enum Accepted {
    /// A new client whose handshake should be started
    Client(Arc<dyn Client>, Box<dyn Connect>),
    /// A socket was accepted and closed unanswered
    Rejected {
        /// Refused peer
        peer: SocketAddr,
        /// [`EngineError::CapacityExceeded`] or [`EngineError::Banned`]
        reason: EngineError,
    },
}

/// A listening socket and its clients
pub struct Server {
    protocol: Arc<dyn Protocol>,
    listener: TcpListener,
    local_addr: SocketAddr,
    max_connections: usize,
    clients: HashMap<ConnectionId, Arc<dyn Client>>,
    next_id: u64,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(config: &ListenerConfig, protocol: Arc<dyn Protocol>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        info!(kind = %protocol.kind(), %local_addr, max_connections = config.max_connections, "Listening");
        Ok(Self {
            protocol,
            listener,
            local_addr,
            max_connections: config.max_connections,
            clients: HashMap::new(),
            next_id: 1,
        })
    }

    /// Protocol spoken on this listener
    pub fn kind(&self) -> ProtocolKind {
        self.protocol.kind()
    }

    /// Actual bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether the connection limit has been reached
    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_connections
    }

    /// Live clients
    pub fn clients(&self) -> impl Iterator<Item = &Arc<dyn Client>> {
        self.clients.values()
    }

    /// Drop clients that are no longer active; returns how many were removed
    pub fn reap(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|id, client| {
            let keep = client.is_active();
            if !keep {
                debug!(connection_id = %id, session_id = %client.session_id(), "Reaped client");
            }
            keep
        });
        before - self.clients.len()
    }

    /// Accept one pending connection without waiting
    ///
    /// Capacity is checked first, then the admission policy; a refused
    /// socket is closed before any protocol state exists for it. Returns
    /// `None` when nothing is waiting.
    pub fn accept(
        &mut self,
        admission: &dyn AdmissionPolicy,
        negotiation: &NegotiationConfig,
    ) -> Option<Accepted> {
        let (stream, peer) = match self.listener.accept().now_or_never()? {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(local_addr = %self.local_addr, error = %e, "Failed to accept connection");
                return None;
            }
        };

        if self.is_full() {
            warn!(
                peer_addr = %peer,
                max_connections = self.max_connections,
                "Connection limit reached, closing"
            );
            counter!("termgate.connections.rejected", "reason" => "capacity").increment(1);
            drop(stream);
            return Some(Accepted::Rejected {
                peer,
                reason: EngineError::CapacityExceeded(self.max_connections),
            });
        }
        if !admission.admit(peer.ip()) {
            counter!("termgate.connections.rejected", "reason" => "banned").increment(1);
            drop(stream);
            return Some(Accepted::Rejected {
                peer,
                reason: EngineError::Banned(peer.ip()),
            });
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let (client, connect) = self.protocol.accept(stream, peer, negotiation);
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        info!(connection_id = %id, peer_addr = %peer, session_id = %client.session_id(), "Accepted connection");
        counter!("termgate.connections.accepted", "kind" => self.kind().as_str()).increment(1);
        self.clients.insert(id, client.clone());
        Some(Accepted::Client(client, connect))
    }

    /// Deactivate every client
    pub fn deactivate_all(&mut self) {
        for client in self.clients.values() {
            client.deactivate();
        }
        self.clients.clear();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("kind", &self.kind())
            .field("local_addr", &self.local_addr)
            .field("clients", &self.clients.len())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
