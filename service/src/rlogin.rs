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

//! Rlogin protocol (RFC 1282)
//!
//! The peer opens with `\0 client-user \0 server-user \0 terminal/speed \0`
//! and we acknowledge with a single `\0`. After that the stream is 8-bit clean
//! except for in-band window-size reports:
//! `FF FF 's' 's' rows cols xpixels ypixels`, each field a big-endian `u16`.

use crate::client::{Client, ClientIo};
use crate::config::NegotiationConfig;
use crate::connect::{Connect, wait_for};
use crate::encoding::Encoding;
use crate::error::{EngineError, Result};
use crate::server::Protocol;
use crate::types::{ProtocolKind, env};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

/// Marker opening an in-band window-size report
const WINDOW_MAGIC: [u8; 4] = [0xFF, 0xFF, b's', b's'];

/// Length of a complete window-size report
const WINDOW_REPORT_LEN: usize = 12;

/// NUL-terminated fields in the opening handshake, counting the leading NUL
const HANDSHAKE_FIELDS: usize = 4;

/// Longest handshake accepted before the connection is dropped
const MAX_HANDSHAKE: usize = 1024;

/// Factory for rlogin clients
#[derive(Debug, Default, Clone, Copy)]
pub struct RloginProtocol;

impl Protocol for RloginProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Rlogin
    }

    fn accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        negotiation: &NegotiationConfig,
    ) -> (Arc<dyn Client>, Box<dyn Connect>) {
        let client = Arc::new(RloginClient::new(stream, peer));
        let connect = RloginConnect {
            client: client.clone(),
            config: negotiation.clone(),
        };
        (client, Box::new(connect))
    }
}

/// An rlogin peer
pub struct RloginClient {
    io: ClientIo,
    state: Mutex<RloginState>,
}

#[derive(Default)]
struct RloginState {
    /// Handshake bytes until all fields have arrived
    handshake: Vec<u8>,
    established: bool,
    /// Possible start of a window-size report split across reads
    carry: Vec<u8>,
    resize: Option<(u16, u16)>,
}

impl RloginClient {
    /// Wrap an accepted stream
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            io: ClientIo::new(ProtocolKind::Rlogin, stream, peer),
            state: Mutex::new(RloginState::default()),
        }
    }

    /// Whether the opening handshake has completed
    pub fn is_established(&self) -> bool {
        self.state.lock().established
    }

    /// Fill in defaults and pick the output encoding
    pub fn finish(&self, config: &NegotiationConfig) {
        self.state.lock().resize = None;
        self.io.update_environment(|environment| {
            environment.set_default(env::TERM, config.default_term.clone());
            environment.set_default(env::LINES, config.default_lines.to_string());
            environment.set_default(env::COLUMNS, config.default_columns.to_string());
            // the stream is 8-bit clean, so UTF-8 is always safe
            environment.set(env::ENCODING, Encoding::Utf8.as_str());
        });
    }

    /// Consume handshake bytes; returns the data that followed the handshake
    fn accept_handshake<'a>(&self, state: &mut RloginState, bytes: &'a [u8]) -> Result<&'a [u8]> {
        let mut seen = state.handshake.iter().filter(|&&b| b == 0).count();
        for (index, &byte) in bytes.iter().enumerate() {
            if state.handshake.is_empty() && byte != 0 {
                warn!(session_id = %self.io.id(), "Rlogin handshake did not start with NUL");
                return Err(EngineError::Other("malformed rlogin handshake".to_string()));
            }
            state.handshake.push(byte);
            if byte == 0 {
                seen += 1;
                if seen == HANDSHAKE_FIELDS {
                    self.establish(state);
                    return Ok(&bytes[index + 1..]);
                }
            }
            if state.handshake.len() > MAX_HANDSHAKE {
                return Err(EngineError::Other("rlogin handshake too long".to_string()));
            }
        }
        Ok(&[])
    }

    fn establish(&self, state: &mut RloginState) {
        let handshake = std::mem::take(&mut state.handshake);
        let mut fields = handshake[1..]
            .split(|&b| b == 0)
            .map(|field| String::from_utf8_lossy(field).into_owned());
        let client_user = fields.next().unwrap_or_default();
        let server_user = fields.next().unwrap_or_default();
        let terminal = fields.next().unwrap_or_default();
        let term = terminal.split('/').next().unwrap_or_default().to_ascii_lowercase();

        debug!(
            session_id = %self.io.id(),
            client_user = %client_user,
            server_user = %server_user,
            terminal = %terminal,
            "Rlogin handshake"
        );
        self.io.update_environment(|environment| {
            if !server_user.is_empty() {
                environment.set(env::USER, server_user);
            }
            if !term.is_empty() {
                environment.set(env::TERM, term);
            }
        });
        self.io.push_output(&[0]);
        state.established = true;
    }

    /// Split window-size reports out of the data stream
    fn filter_data(&self, state: &mut RloginState, bytes: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut state.carry);
        buf.extend_from_slice(bytes);
        let mut data = Vec::with_capacity(buf.len());
        let mut index = 0;
        while index < buf.len() {
            let rest = &buf[index..];
            if rest[0] == WINDOW_MAGIC[0] {
                let prefix = rest.len().min(WINDOW_MAGIC.len());
                if rest[..prefix] == WINDOW_MAGIC[..prefix] {
                    if rest.len() < WINDOW_REPORT_LEN {
                        state.carry = rest.to_vec();
                        break;
                    }
                    let rows = u16::from_be_bytes([rest[4], rest[5]]);
                    let cols = u16::from_be_bytes([rest[6], rest[7]]);
                    debug!(session_id = %self.io.id(), cols, rows, "Window size");
                    if cols > 0 && rows > 0 {
                        self.io
                            .update_environment(|environment| environment.set_size(cols, rows));
                        state.resize = Some((cols, rows));
                    }
                    index += WINDOW_REPORT_LEN;
                    continue;
                }
            }
            data.push(rest[0]);
            index += 1;
        }
        data
    }
}

impl Client for RloginClient {
    fn io(&self) -> &ClientIo {
        &self.io
    }

    fn receive(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let bytes = if state.established {
            bytes
        } else {
            self.accept_handshake(&mut state, bytes)?
        };
        if bytes.is_empty() {
            return Ok(());
        }
        let data = self.filter_data(&mut state, bytes);
        if !data.is_empty() {
            self.io.push_input(&data);
        }
        Ok(())
    }

    fn send_text(&self, text: &str, encoding: Encoding) -> Result<()> {
        self.io.push_output(&encoding.encode(text));
        Ok(())
    }

    fn take_resize(&self) -> Option<(u16, u16)> {
        self.state.lock().resize.take()
    }
}

impl fmt::Debug for RloginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RloginClient").field("io", &self.io).finish_non_exhaustive()
    }
}

/// Rlogin handshake: wait for the opening fields, then settle defaults
pub struct RloginConnect {
    client: Arc<RloginClient>,
    config: NegotiationConfig,
}

#[async_trait]
impl Connect for RloginConnect {
    #[instrument(skip(self), fields(session_id = %self.client.session_id()))]
    async fn negotiate(self: Box<Self>) -> Result<()> {
        let client = &*self.client;
        let established = wait_for(client, self.config.stage_timeout, self.config.poll_interval, || {
            client.is_established()
        })
        .await?;
        if !established {
            debug!("Rlogin handshake timed out");
            return Err(EngineError::Timeout);
        }
        client.finish(&self.config);
        let environment = client.environment();
        info!(
            term = environment.term().unwrap_or_default(),
            user = environment.get(env::USER).unwrap_or_default(),
            "Rlogin handshake complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn client() -> (Arc<RloginClient>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (Arc::new(RloginClient::new(stream, peer)), remote)
    }

    #[tokio::test]
    async fn test_handshake_populates_environment() {
        let (client, mut remote) = client().await;
        client.receive(b"\0alice\0bob\0VT100/9600\0hi").unwrap();
        assert!(client.is_established());

        let environment = client.environment();
        assert_eq!(environment.get(env::USER), Some("bob"));
        assert_eq!(environment.term(), Some("vt100"));
        assert_eq!(&client.io().take_input().unwrap()[..], b"hi");

        client.send().unwrap();
        let mut ack = [0xAAu8; 1];
        remote.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [0]);
    }

    #[tokio::test]
    async fn test_handshake_split_across_reads() {
        let (client, _remote) = client().await;
        client.receive(b"\0ali").unwrap();
        assert!(!client.is_established());
        client.receive(b"ce\0bob\0xterm/38400").unwrap();
        assert!(!client.is_established());
        client.receive(b"\0").unwrap();
        assert!(client.is_established());
        assert!(client.io().take_input().is_none());
    }

    #[tokio::test]
    async fn test_handshake_must_start_with_nul() {
        let (client, _remote) = client().await;
        assert!(client.receive(b"alice\0").is_err());
    }

    #[tokio::test]
    async fn test_window_report_is_filtered() {
        let (client, _remote) = client().await;
        client.receive(b"\0a\0b\0ansi/9600\0").unwrap();
        let mut report = vec![b'x'];
        report.extend_from_slice(&WINDOW_MAGIC);
        report.extend_from_slice(&[0, 50, 0, 132, 0, 0]);
        client.receive(&report).unwrap();
        // the last two bytes of the report arrive with the next read
        client.receive(&[0, 0, b'y']).unwrap();

        assert_eq!(&client.io().take_input().unwrap()[..], b"xy");
        assert_eq!(client.take_resize(), Some((132, 50)));
        let environment = client.environment();
        assert_eq!(environment.columns(), Some(132));
        assert_eq!(environment.lines(), Some(50));
    }

    #[tokio::test]
    async fn test_negotiate_times_out_without_handshake() {
        let (client, _remote) = client().await;
        let config = NegotiationConfig::default()
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(5));
        let connect = Box::new(RloginConnect {
            client: client.clone(),
            config,
        });
        assert!(matches!(connect.negotiate().await, Err(EngineError::Timeout)));
    }

    #[tokio::test]
    async fn test_negotiate_fills_defaults() {
        let (client, _remote) = client().await;
        client.receive(b"\0a\0b\0\0").unwrap();
        let connect = Box::new(RloginConnect {
            client: client.clone(),
            config: NegotiationConfig::default(),
        });
        connect.negotiate().await.unwrap();
        let environment = client.environment();
        assert_eq!(environment.term(), Some("ansi"));
        assert_eq!(environment.encoding(), Encoding::Utf8);
    }
}
