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

//! Client side of the connection lifecycle contract
//!
//! A [`Client`] owns one accepted socket together with its inbound and
//! outbound byte queues and the environment negotiated for it. All socket
//! access is non-blocking so the reactor can drive every client from a single
//! loop; protocols only supply the byte transformations.

use crate::encoding::Encoding;
use crate::error::{EngineError, Result};
use crate::types::{Environment, ProtocolKind, SessionId, env};
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Bytes read from a socket per `try_read` call
const READ_CHUNK: usize = 4096;

/// Reads attempted per `socket_recv`, so one busy peer cannot starve a tick
const MAX_READS_PER_TICK: usize = 16;

/// Protocol-independent socket, queues and environment of a client
pub struct ClientIo {
    id: SessionId,
    kind: ProtocolKind,
    peer: SocketAddr,
    active: AtomicBool,
    stream: Mutex<Option<TcpStream>>,
    queues: Mutex<Queues>,
    environment: Mutex<Environment>,
}

struct Queues {
    recv: BytesMut,
    send: BytesMut,
    last_input: Instant,
}

impl ClientIo {
    /// Wrap an accepted stream
    pub fn new(kind: ProtocolKind, stream: TcpStream, peer: SocketAddr) -> Self {
        let mut environment = Environment::new();
        environment.set(env::KIND, kind.as_str());
        Self {
            id: SessionId::new(kind, peer),
            kind,
            peer,
            active: AtomicBool::new(true),
            stream: Mutex::new(Some(stream)),
            queues: Mutex::new(Queues {
                recv: BytesMut::new(),
                send: BytesMut::new(),
                last_input: Instant::now(),
            }),
            environment: Mutex::new(environment),
        }
    }

    /// Session id derived from the peer address
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Protocol of the listener that accepted this client
    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the socket is still open
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the client inactive and close the socket
    ///
    /// Idempotent. Queued output that was not flushed is discarded.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(session_id = %self.id, "Deactivating client");
        }
        self.stream.lock().take();
    }

    /// Read whatever the socket has without waiting
    ///
    /// Returns `Ok(None)` when no data is available, and `Disconnected` on a
    /// zero-length read, a hard socket error or an already closed client.
    pub fn read_socket(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let guard = self.stream.lock();
        let Some(stream) = guard.as_ref() else {
            return Err(EngineError::Disconnected);
        };
        match stream.try_read(buf) {
            Ok(0) => Err(EngineError::Disconnected),
            Ok(n) => {
                self.queues.lock().last_input = Instant::now();
                Ok(Some(n))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "Socket read failed");
                Err(EngineError::Disconnected)
            }
        }
    }

    /// Write as much queued output as the socket accepts right now
    ///
    /// Exactly the bytes the OS took are removed from the queue; the rest stay
    /// queued for the next tick.
    pub fn flush(&self) -> Result<usize> {
        let guard = self.stream.lock();
        let Some(stream) = guard.as_ref() else {
            return Err(EngineError::Disconnected);
        };
        let mut queues = self.queues.lock();
        let mut written = 0;
        while !queues.send.is_empty() {
            match stream.try_write(&queues.send) {
                Ok(0) => return Err(EngineError::Disconnected),
                Ok(n) => {
                    queues.send.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(session_id = %self.id, error = %e, "Socket write failed");
                    return Err(EngineError::Disconnected);
                }
            }
        }
        if written > 0 {
            trace!(session_id = %self.id, written, remaining = queues.send.len(), "Flushed output");
        }
        Ok(written)
    }

    /// Append bytes destined for the session
    pub fn push_input(&self, bytes: &[u8]) {
        self.queues.lock().recv.extend_from_slice(bytes);
    }

    /// Take every byte queued for the session
    pub fn take_input(&self) -> Option<Bytes> {
        let mut queues = self.queues.lock();
        if queues.recv.is_empty() {
            None
        } else {
            Some(queues.recv.split().freeze())
        }
    }

    /// Put undelivered input back in front of anything that arrived since
    pub fn unread_input(&self, bytes: Bytes) {
        let mut queues = self.queues.lock();
        let mut restored = BytesMut::with_capacity(bytes.len() + queues.recv.len());
        restored.extend_from_slice(&bytes);
        restored.extend_from_slice(&queues.recv);
        queues.recv = restored;
    }

    /// Append wire-ready bytes to the send queue
    pub fn push_output(&self, bytes: &[u8]) {
        self.queues.lock().send.extend_from_slice(bytes);
    }

    /// Bytes waiting for the session
    pub fn pending_input(&self) -> usize {
        self.queues.lock().recv.len()
    }

    /// Whether input is waiting for the session
    pub fn has_input(&self) -> bool {
        !self.queues.lock().recv.is_empty()
    }

    /// Whether output is waiting for the socket
    pub fn has_output(&self) -> bool {
        !self.queues.lock().send.is_empty()
    }

    /// Time since the peer last sent anything
    pub fn idle(&self) -> Duration {
        self.queues.lock().last_input.elapsed()
    }

    /// Snapshot of the environment
    pub fn environment(&self) -> Environment {
        self.environment.lock().clone()
    }

    /// Mutate the environment in place
    pub fn update_environment<R>(&self, f: impl FnOnce(&mut Environment) -> R) -> R {
        f(&mut self.environment.lock())
    }
}

impl fmt::Debug for ClientIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIo")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// A connected peer as seen by the reactor
///
/// Implementors provide the protocol-specific decoding of inbound bytes and
/// encoding of outbound text; everything else is supplied on top of
/// [`ClientIo`].
pub trait Client: Send + Sync + fmt::Debug {
    /// Socket, queues and environment
    fn io(&self) -> &ClientIo;

    /// Decode freshly read socket bytes
    ///
    /// Application data is appended with [`ClientIo::push_input`], protocol
    /// replies with [`ClientIo::push_output`]. An error closes the connection.
    fn receive(&self, bytes: &[u8]) -> Result<()>;

    /// Encode and queue text for the peer
    fn send_text(&self, text: &str, encoding: Encoding) -> Result<()>;

    /// Window size reported since the last call, as `(columns, rows)`
    fn take_resize(&self) -> Option<(u16, u16)> {
        None
    }

    /// Session id of this client
    fn session_id(&self) -> &SessionId {
        self.io().id()
    }

    /// Whether the socket is still open
    fn is_active(&self) -> bool {
        self.io().is_active()
    }

    /// Close the socket
    fn deactivate(&self) {
        self.io().deactivate();
    }

    /// Whether decoded input is waiting for the session
    fn recv_ready(&self) -> bool {
        self.io().has_input()
    }

    /// Whether encoded output is waiting for the socket
    fn send_ready(&self) -> bool {
        self.io().has_output()
    }

    /// Read and decode everything currently available on the socket
    fn socket_recv(&self) -> Result<usize> {
        let mut buf = [0u8; READ_CHUNK];
        let mut total = 0;
        for _ in 0..MAX_READS_PER_TICK {
            match self.io().read_socket(&mut buf)? {
                Some(n) => {
                    self.receive(&buf[..n])?;
                    total += n;
                    if n < buf.len() {
                        break;
                    }
                }
                None => break,
            }
        }
        Ok(total)
    }

    /// Flush queued output to the socket
    fn send(&self) -> Result<usize> {
        self.io().flush()
    }

    /// Time since the peer last sent anything
    fn idle(&self) -> Duration {
        self.io().idle()
    }

    /// Snapshot of the negotiated environment
    fn environment(&self) -> Environment {
        self.io().environment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (ClientIo, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (ClientIo::new(ProtocolKind::Telnet, stream, peer), remote)
    }

    async fn read_until_some(io: &ClientIo, buf: &mut [u8]) -> Result<usize> {
        for _ in 0..100 {
            if let Some(n) = io.read_socket(buf)? {
                return Ok(n);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no data arrived");
    }

    #[tokio::test]
    async fn test_read_reports_disconnect_on_eof() {
        let (io, mut remote) = pair().await;
        let mut buf = [0u8; 16];
        assert!(io.read_socket(&mut buf).unwrap().is_none());

        remote.write_all(b"hi").await.unwrap();
        assert_eq!(read_until_some(&io, &mut buf).await.unwrap(), 2);

        drop(remote);
        let err = read_until_some(&io, &mut buf).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_flush_sends_queued_output() {
        let (io, mut remote) = pair().await;
        io.push_output(b"hello");
        assert!(io.has_output());
        assert_eq!(io.flush().unwrap(), 5);
        assert!(!io.has_output());

        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_unread_keeps_arrival_order() {
        let (io, _remote) = pair().await;
        io.push_input(b"abc");
        let taken = io.take_input().unwrap();
        io.push_input(b"def");
        io.unread_input(taken);
        assert_eq!(&io.take_input().unwrap()[..], b"abcdef");
        assert!(io.take_input().is_none());
    }

    #[tokio::test]
    async fn test_deactivate_closes_socket() {
        let (io, mut remote) = pair().await;
        assert_eq!(io.environment().get(env::KIND), Some("telnet"));
        io.deactivate();
        assert!(!io.is_active());
        assert!(io.flush().unwrap_err().is_disconnect());

        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }
}
