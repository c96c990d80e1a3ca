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

//! Telnet protocol: client decoding over the telnet codec and the
//! option-negotiation handshake

use crate::client::{Client, ClientIo};
use crate::config::NegotiationConfig;
use crate::connect::{Connect, wait_for};
use crate::encoding::Encoding;
use crate::error::{EngineError, Result};
use crate::server::Protocol;
use crate::types::{ProtocolKind, env};
use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use termgate_telnetcodec::environ::EnvironCommand;
use termgate_telnetcodec::ttype::TerminalType;
use termgate_telnetcodec::{
    Offer, TelnetArgument, TelnetCodec, TelnetEvent, TelnetOption, consts,
};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, instrument, trace};

/// Control code delivered for telnet Erase Line (Ctrl-U)
const ERASE_LINE: u8 = 0x15;

/// Control code delivered for telnet Interrupt Process (Ctrl-C)
const INTERRUPT: u8 = 0x03;

/// Options requested from every new peer, in order
const BANNER_WILL: [TelnetOption; 3] = [
    TelnetOption::Echo,
    TelnetOption::SuppressGoAhead,
    TelnetOption::TransmitBinary,
];
const BANNER_DO: [TelnetOption; 5] = [
    TelnetOption::SuppressGoAhead,
    TelnetOption::TransmitBinary,
    TelnetOption::TTYPE,
    TelnetOption::NAWS,
    TelnetOption::NewEnvironment,
];

/// Features the handshake waits for, one stage each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Environment,
    TerminalType,
    WindowSize,
}

impl Stage {
    fn option(self) -> TelnetOption {
        match self {
            Stage::Environment => TelnetOption::NewEnvironment,
            Stage::TerminalType => TelnetOption::TTYPE,
            Stage::WindowSize => TelnetOption::NAWS,
        }
    }
}

/// Factory for telnet clients
#[derive(Debug, Default, Clone, Copy)]
pub struct TelnetProtocol;

impl Protocol for TelnetProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Telnet
    }

    fn accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        negotiation: &NegotiationConfig,
    ) -> (Arc<dyn Client>, Box<dyn Connect>) {
        let client = Arc::new(TelnetClient::new(stream, peer, negotiation));
        let connect = TelnetConnect {
            client: client.clone(),
            config: negotiation.clone(),
        };
        (client, Box::new(connect))
    }
}

/// A telnet peer
pub struct TelnetClient {
    io: ClientIo,
    state: Mutex<TelnetState>,
}

struct TelnetState {
    codec: TelnetCodec,
    /// Previous data byte was CR, so a following NUL is padding
    after_cr: bool,
    /// The peer has answered at least one negotiation
    replied: bool,
    terminal_reported: bool,
    environment_reported: bool,
    window_reported: bool,
    resize: Option<(u16, u16)>,
}

impl TelnetClient {
    /// Wrap an accepted stream
    pub fn new(stream: TcpStream, peer: SocketAddr, negotiation: &NegotiationConfig) -> Self {
        Self {
            io: ClientIo::new(ProtocolKind::Telnet, stream, peer),
            state: Mutex::new(TelnetState {
                codec: TelnetCodec::with_max_subnegotiation(negotiation.max_subnegotiation),
                after_cr: false,
                replied: false,
                terminal_reported: false,
                environment_reported: false,
                window_reported: false,
                resize: None,
            }),
        }
    }

    /// Queue the opening option requests
    pub fn begin(&self) {
        let mut state = self.state.lock();
        for option in BANNER_WILL {
            state.codec.request_will(option);
        }
        for option in BANNER_DO {
            state.codec.request_do(option);
        }
        let requests = state.codec.take_responses();
        self.io.push_output(&requests);
    }

    /// Whether the peer has answered any negotiation yet
    pub fn has_replied(&self) -> bool {
        self.state.lock().replied
    }

    /// Whether we are performing `option`
    pub fn local_enabled(&self, option: TelnetOption) -> bool {
        self.state.lock().codec.is_enabled_local(option)
    }

    /// Whether the peer is performing `option`
    pub fn remote_enabled(&self, option: TelnetOption) -> bool {
        self.state.lock().codec.is_enabled_remote(option)
    }

    fn stage_settled(&self, stage: Stage) -> bool {
        let state = self.state.lock();
        if state.codec.options().get(stage.option()).remote == Offer::Refused {
            return true;
        }
        match stage {
            Stage::Environment => state.environment_reported,
            Stage::TerminalType => state.terminal_reported,
            Stage::WindowSize => state.window_reported,
        }
    }

    /// Fill in defaults and pick the output encoding
    ///
    /// ANSI-family terminals that did not agree to binary transmission get
    /// CP437; everyone else gets UTF-8.
    pub fn finish(&self, config: &NegotiationConfig) {
        let binary = self.local_enabled(TelnetOption::TransmitBinary);
        // Window size was reported during the handshake; no refresh is owed.
        self.state.lock().resize = None;
        self.io.update_environment(|environment| {
            environment.set_default(env::TERM, config.default_term.clone());
            environment.set_default(env::LINES, config.default_lines.to_string());
            environment.set_default(env::COLUMNS, config.default_columns.to_string());
            let ansi = environment
                .term()
                .is_some_and(|term| term.to_ascii_lowercase().starts_with("ansi"));
            let encoding = if ansi && !binary {
                Encoding::Cp437
            } else {
                Encoding::Utf8
            };
            environment.set(env::ENCODING, encoding.as_str());
        });
    }

    fn handle_event(&self, state: &mut TelnetState, event: TelnetEvent, data: &mut Vec<u8>) {
        let after_cr = std::mem::replace(&mut state.after_cr, false);
        match event {
            TelnetEvent::Data(consts::NUL) if after_cr => {}
            TelnetEvent::Data(byte) => {
                state.after_cr = byte == consts::CR;
                data.push(byte);
            }
            TelnetEvent::EraseCharacter => data.push(consts::BS),
            TelnetEvent::EraseLine => data.push(ERASE_LINE),
            TelnetEvent::Interrupt => data.push(INTERRUPT),
            TelnetEvent::AreYouThere => {
                debug!(session_id = %self.io.id(), "Answered are-you-there");
            }
            TelnetEvent::OptionStatus(option, side, enabled) => {
                state.replied = true;
                debug!(session_id = %self.io.id(), %option, %side, enabled, "Option changed");
            }
            TelnetEvent::Subnegotiate(argument) => {
                state.replied = true;
                self.handle_argument(state, argument);
            }
            TelnetEvent::Command(code) => {
                trace!(session_id = %self.io.id(), code, "Ignoring telnet command");
            }
        }
    }

    fn handle_argument(&self, state: &mut TelnetState, argument: TelnetArgument) {
        match argument {
            TelnetArgument::NAWSWindowSize(size) => {
                debug!(session_id = %self.io.id(), cols = size.cols, rows = size.rows, "Window size");
                if size.cols > 0 && size.rows > 0 {
                    self.io
                        .update_environment(|environment| environment.set_size(size.cols, size.rows));
                    state.resize = Some((size.cols, size.rows));
                }
                state.window_reported = true;
            }
            TelnetArgument::TerminalType(TerminalType::Is(name)) => {
                debug!(session_id = %self.io.id(), term = %name, "Terminal type");
                if !name.is_empty() {
                    self.io.update_environment(|environment| {
                        environment.set(env::TERM, name.to_ascii_lowercase());
                    });
                }
                state.terminal_reported = true;
            }
            TelnetArgument::Environ(environ)
                if environ.command != EnvironCommand::Send =>
            {
                let terminal_reported = state.terminal_reported;
                let window_reported = state.window_reported;
                self.io.update_environment(|environment| {
                    for (name, value) in environ.values() {
                        let owned = match name {
                            env::TERM => terminal_reported,
                            env::LINES | env::COLUMNS => window_reported,
                            _ => false,
                        };
                        if !owned && !value.is_empty() {
                            environment.set(name, value);
                        }
                    }
                });
                state.environment_reported = true;
            }
            other => {
                trace!(session_id = %self.io.id(), %other, "Ignoring subnegotiation");
            }
        }
    }
}

impl Client for TelnetClient {
    fn io(&self) -> &ClientIo {
        &self.io
    }

    fn receive(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let mut src = BytesMut::from(bytes);
        let mut data = Vec::with_capacity(bytes.len());
        while let Some(event) = state.codec.decode(&mut src)? {
            self.handle_event(&mut state, event, &mut data);
        }
        let replies = state.codec.take_responses();
        if !replies.is_empty() {
            self.io.push_output(&replies);
        }
        if !data.is_empty() {
            self.io.push_input(&data);
        }
        Ok(())
    }

    fn send_text(&self, text: &str, encoding: Encoding) -> Result<()> {
        let bytes = encoding.encode(text);
        let mut out = BytesMut::with_capacity(bytes.len() + 8);
        self.state.lock().codec.encode(&bytes[..], &mut out)?;
        self.io.push_output(&out);
        Ok(())
    }

    fn take_resize(&self) -> Option<(u16, u16)> {
        self.state.lock().resize.take()
    }
}

impl fmt::Debug for TelnetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelnetClient").field("io", &self.io).finish_non_exhaustive()
    }
}

/// Telnet handshake
///
/// Sends the option banner, waits for the peer to answer anything at all,
/// then gives each of environment, terminal type and window size its own
/// deadline before settling on defaults.
pub struct TelnetConnect {
    client: Arc<TelnetClient>,
    config: NegotiationConfig,
}

#[async_trait]
impl Connect for TelnetConnect {
    #[instrument(skip(self), fields(session_id = %self.client.session_id()))]
    async fn negotiate(self: Box<Self>) -> Result<()> {
        let client = &*self.client;
        let config = &self.config;
        client.begin();

        let replied = wait_for(client, config.any_reply_timeout, config.poll_interval, || {
            client.has_replied()
        })
        .await?;

        if replied {
            for stage in [Stage::Environment, Stage::TerminalType, Stage::WindowSize] {
                let settled = wait_for(client, config.stage_timeout, config.poll_interval, || {
                    client.stage_settled(stage)
                })
                .await?;
                if !settled {
                    debug!(?stage, "Negotiation stage timed out");
                }
            }
        } else {
            debug!("Peer did not negotiate, using defaults");
        }

        if !client.is_active() {
            return Err(EngineError::Disconnected);
        }
        client.finish(config);
        let environment = client.environment();
        info!(
            term = environment.term().unwrap_or_default(),
            columns = environment.columns().unwrap_or_default(),
            lines = environment.lines().unwrap_or_default(),
            encoding = %environment.encoding(),
            "Telnet negotiation complete"
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

    async fn client() -> (Arc<TelnetClient>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let client = TelnetClient::new(stream, peer, &NegotiationConfig::default());
        (Arc::new(client), remote)
    }

    async fn wire(client: &TelnetClient, remote: &mut TcpStream, expected: usize) -> Vec<u8> {
        client.send().unwrap();
        let mut buf = vec![0u8; expected];
        remote.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_terminal_type_sets_term() {
        let (client, _remote) = client().await;
        let mut reply = vec![consts::IAC, consts::SB, consts::option::TTYPE, 0];
        reply.extend_from_slice(b"XTERM\0");
        reply.extend_from_slice(&[consts::IAC, consts::SE]);
        client.receive(&reply).unwrap();
        assert_eq!(client.environment().term(), Some("xterm"));
        assert!(client.has_replied());
        assert!(client.stage_settled(Stage::TerminalType));
    }

    #[tokio::test]
    async fn test_editing_commands_become_control_codes() {
        let (client, _remote) = client().await;
        client
            .receive(&[
                b'a',
                consts::IAC,
                consts::EC,
                consts::IAC,
                consts::EL,
                consts::IAC,
                consts::IP,
                consts::CR,
                consts::NUL,
                consts::CR,
                consts::LF,
            ])
            .unwrap();
        let input = client.io().take_input().unwrap();
        assert_eq!(&input[..], &[b'a', 0x08, 0x15, 0x03, b'\r', b'\r', b'\n']);
    }

    #[tokio::test]
    async fn test_will_echo_is_fatal_without_reply() {
        let (client, _remote) = client().await;
        let err = client
            .receive(&[consts::IAC, consts::WILL, consts::option::ECHO])
            .unwrap_err();
        assert!(err.is_protocol_error());
        assert!(!client.send_ready());
    }

    #[tokio::test]
    async fn test_window_size_updates_environment_and_resize() {
        let (client, _remote) = client().await;
        client
            .receive(&[consts::IAC, consts::SB, consts::option::NAWS, 0, 132, 0, 43, consts::IAC, consts::SE])
            .unwrap();
        let environment = client.environment();
        assert_eq!(environment.columns(), Some(132));
        assert_eq!(environment.lines(), Some(43));
        assert_eq!(client.take_resize(), Some((132, 43)));
        assert_eq!(client.take_resize(), None);
    }

    #[tokio::test]
    async fn test_are_you_there_is_answered() {
        let (client, mut remote) = client().await;
        client.receive(&[consts::IAC, consts::AYT]).unwrap();
        let bytes = wire(&client, &mut remote, termgate_telnetcodec::AYT_REPLY.len()).await;
        assert_eq!(bytes, termgate_telnetcodec::AYT_REPLY);
    }

    #[tokio::test]
    async fn test_send_text_escapes_iac() {
        let (client, mut remote) = client().await;
        // NBSP is 0xFF in code page 437
        client.send_text("a\u{a0}b", Encoding::Cp437).unwrap();
        let bytes = wire(&client, &mut remote, 4).await;
        assert_eq!(bytes, vec![b'a', consts::IAC, consts::IAC, b'b']);
    }

    #[tokio::test]
    async fn test_finish_picks_cp437_for_ansi_without_binary() {
        let (client, _remote) = client().await;
        client.finish(&NegotiationConfig::default());
        let environment = client.environment();
        assert_eq!(environment.term(), Some("ansi"));
        assert_eq!(environment.lines(), Some(24));
        assert_eq!(environment.columns(), Some(80));
        assert_eq!(environment.encoding(), Encoding::Cp437);
    }

    #[tokio::test]
    async fn test_finish_picks_utf8_with_binary() {
        let (client, _remote) = client().await;
        client.begin();
        client
            .receive(&[consts::IAC, consts::DO, consts::option::BINARY])
            .unwrap();
        client.finish(&NegotiationConfig::default());
        assert_eq!(client.environment().encoding(), Encoding::Utf8);
    }

    #[tokio::test]
    async fn test_negotiate_falls_back_to_defaults_when_silent() {
        let (client, _remote) = client().await;
        let config = NegotiationConfig::default()
            .with_timeouts(Duration::from_millis(50), Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5));
        let connect = Box::new(TelnetConnect {
            client: client.clone(),
            config,
        });
        connect.negotiate().await.unwrap();
        assert_eq!(client.environment().term(), Some("ansi"));
        assert!(client.send_ready(), "banner should be queued");
    }

    #[tokio::test]
    async fn test_negotiate_fails_when_client_goes_away() {
        let (client, _remote) = client().await;
        client.deactivate();
        let connect = Box::new(TelnetConnect {
            client: client.clone(),
            config: NegotiationConfig::default(),
        });
        assert!(connect.negotiate().await.unwrap_err().is_disconnect());
    }
}
