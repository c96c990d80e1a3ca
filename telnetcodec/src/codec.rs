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

use super::{CodecError, TelnetEvent, TelnetFrame, TelnetOption, consts};
use crate::args::TelnetArgument;
use crate::args::status::StatusArgument;
use crate::options::{TelnetOptions, TelnetSide};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

/// Default bound on a buffered subnegotiation payload.
pub const DEFAULT_MAX_SUBNEGOTIATION: usize = 65534;

/// Reply to `IAC AYT`.
pub const AYT_REPLY: &[u8] = b"\r\n[Yes]\r\n";

/// A codec for the Telnet protocol that also runs the option negotiator.
///
/// Decoding yields [`TelnetEvent`]s. Negotiation replies, `AYT` answers and
/// `STATUS` reports are not returned as events; they are appended to an
/// internal response queue the transport drains with [`TelnetCodec::take_responses`].
pub struct TelnetCodec {
    decoder_buffer: BytesMut,
    decoder_state: DecoderState,
    options: TelnetOptions,
    responses: BytesMut,
    max_subnegotiation: usize,
}

impl TelnetCodec {
    /// Creates a new `TelnetCodec` with the default subnegotiation bound.
    ///
    /// # Example
    /// ```
    /// use termgate_telnetcodec::TelnetCodec;
    ///
    /// let codec = TelnetCodec::new();
    /// assert!(!codec.has_pending_responses());
    /// ```
    pub fn new() -> TelnetCodec {
        TelnetCodec::default()
    }

    /// Creates a codec that rejects subnegotiations longer than `limit` bytes.
    pub fn with_max_subnegotiation(limit: usize) -> TelnetCodec {
        TelnetCodec {
            max_subnegotiation: limit,
            ..TelnetCodec::default()
        }
    }

    /// The option table.
    pub fn options(&self) -> &TelnetOptions {
        &self.options
    }

    /// Checks if a specific Telnet option is enabled locally.
    pub fn is_enabled_local(&self, option: TelnetOption) -> bool {
        self.options.local_enabled(option)
    }

    /// Checks if a specific Telnet option is enabled on the remote side.
    pub fn is_enabled_remote(&self, option: TelnetOption) -> bool {
        self.options.remote_enabled(option)
    }

    /// Offer to perform `option`, queueing `IAC WILL` unless already offered.
    pub fn request_will(&mut self, option: TelnetOption) {
        if let Some(frame) = self.options.request_will(option) {
            self.queue(frame);
        }
    }

    /// Ask the peer to perform `option`, queueing `IAC DO` unless already asked.
    pub fn request_do(&mut self, option: TelnetOption) {
        if let Some(frame) = self.options.request_do(option) {
            self.queue(frame);
        }
    }

    /// Queue an arbitrary frame on the response queue.
    pub fn queue(&mut self, frame: TelnetFrame) {
        trace!(%frame, "queue");
        if let Err(err) = frame.encode(&mut self.responses) {
            warn!(%err, "failed to encode telnet frame");
        }
    }

    /// Whether replies are waiting to be written.
    pub fn has_pending_responses(&self) -> bool {
        !self.responses.is_empty()
    }

    /// Take every queued reply byte, leaving the queue empty.
    pub fn take_responses(&mut self) -> BytesMut {
        self.responses.split()
    }

    fn negotiate(
        &mut self,
        frame: TelnetFrame,
        option: TelnetOption,
        side: TelnetSide,
    ) -> Result<Option<TelnetEvent>, CodecError> {
        debug!(%frame, "received negotiation");
        let outcome = self.options.handle_received(frame)?;
        for reply in outcome.replies {
            self.queue(reply);
        }
        Ok(outcome
            .changed
            .map(|enabled| TelnetEvent::OptionStatus(option, side, enabled)))
    }

    fn push_subnegotiation(&mut self, option: u8, byte: u8) -> Result<(), CodecError> {
        if self.decoder_buffer.len() >= self.max_subnegotiation {
            self.decoder_buffer.clear();
            self.decoder_state = DecoderState::NormalData;
            return Err(CodecError::SubnegotiationOverflow {
                option,
                limit: self.max_subnegotiation,
            });
        }
        self.decoder_buffer.put_u8(byte);
        Ok(())
    }

    fn finish_subnegotiation(&mut self, option: u8) -> Result<Option<TelnetEvent>, CodecError> {
        let option = TelnetOption::from_u8(option);
        let payload = self.decoder_buffer.split();
        match TelnetArgument::decode(option, &payload) {
            Ok(TelnetArgument::Status(StatusArgument::Send)) => {
                let report = StatusArgument::Is(self.options.enabled());
                self.queue(TelnetFrame::Subnegotiate(TelnetArgument::Status(report)));
                Ok(Some(TelnetEvent::Subnegotiate(TelnetArgument::Status(
                    StatusArgument::Send,
                ))))
            }
            Ok(argument) => Ok(Some(TelnetEvent::Subnegotiate(argument))),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(%err, "ignoring malformed subnegotiation");
                Ok(None)
            }
        }
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        TelnetCodec {
            decoder_buffer: BytesMut::new(),
            decoder_state: DecoderState::NormalData,
            options: TelnetOptions::default(),
            responses: BytesMut::new(),
            max_subnegotiation: DEFAULT_MAX_SUBNEGOTIATION,
        }
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetEvent;
    type Error = CodecError;

    /// Decodes bytes from `src` into the next `TelnetEvent`.
    ///
    /// The decoder consumes one byte at a time and keeps its position in
    /// `decoder_state` across calls, so commands split across reads decode
    /// correctly. Negotiation commands that do not change any option state
    /// produce no event.
    ///
    /// # Errors
    /// Fatal protocol violations: a peer `WILL ECHO`, a subnegotiation longer than
    /// the configured bound, or a malformed window size.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetEvent>, Self::Error> {
        while src.remaining() > 0 {
            let byte = src.get_u8();
            match (self.decoder_state, byte) {
                (DecoderState::NormalData, consts::IAC) => {
                    self.decoder_state = DecoderState::InterpretAsCommand;
                }
                (DecoderState::NormalData, _) => {
                    return Ok(Some(TelnetEvent::Data(byte)));
                }
                (DecoderState::InterpretAsCommand, consts::IP) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::Interrupt));
                }
                (DecoderState::InterpretAsCommand, consts::AYT) => {
                    self.decoder_state = DecoderState::NormalData;
                    self.responses.extend_from_slice(AYT_REPLY);
                    return Ok(Some(TelnetEvent::AreYouThere));
                }
                (DecoderState::InterpretAsCommand, consts::EC) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::EraseCharacter));
                }
                (DecoderState::InterpretAsCommand, consts::EL) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::EraseLine));
                }
                (DecoderState::InterpretAsCommand, consts::IAC) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::Data(consts::IAC)));
                }
                (DecoderState::InterpretAsCommand, consts::DO) => {
                    self.decoder_state = DecoderState::NegotiateDo;
                }
                (DecoderState::InterpretAsCommand, consts::DONT) => {
                    self.decoder_state = DecoderState::NegotiateDont;
                }
                (DecoderState::InterpretAsCommand, consts::WILL) => {
                    self.decoder_state = DecoderState::NegotiateWill;
                }
                (DecoderState::InterpretAsCommand, consts::WONT) => {
                    self.decoder_state = DecoderState::NegotiateWont;
                }
                (DecoderState::InterpretAsCommand, consts::SB) => {
                    self.decoder_state = DecoderState::Subnegotiate;
                }
                (DecoderState::InterpretAsCommand, _) => {
                    // NOP, DM, BRK, AO, GA, EOR and anything unassigned
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetEvent::Command(byte)));
                }
                (DecoderState::NegotiateDo, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Do(option), option, TelnetSide::Local)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateDont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Dont(option), option, TelnetSide::Local)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWill, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Will(option), option, TelnetSide::Remote)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::NegotiateWont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    let option = TelnetOption::from_u8(byte);
                    if let Some(event) =
                        self.negotiate(TelnetFrame::Wont(option), option, TelnetSide::Remote)?
                    {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::Subnegotiate, _) => {
                    self.decoder_buffer.clear();
                    self.decoder_state = DecoderState::SubnegotiateArgument(byte);
                }
                (DecoderState::SubnegotiateArgument(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgumentIAC(option);
                }
                (DecoderState::SubnegotiateArgument(option), _) => {
                    self.push_subnegotiation(option, byte)?;
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                    self.push_subnegotiation(option, consts::IAC)?;
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    if let Some(event) = self.finish_subnegotiation(option)? {
                        return Ok(Some(event));
                    }
                }
                (DecoderState::SubnegotiateArgumentIAC(_), _) => {
                    self.decoder_state = DecoderState::NormalData;
                    self.decoder_buffer.clear();
                    warn!(command = byte, "subnegotiation aborted by stray command");
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<TelnetFrame> for TelnetCodec {
    type Error = CodecError;

    fn encode(&mut self, item: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

impl Encoder<&[u8]> for TelnetCodec {
    type Error = CodecError;

    /// Encodes application data, doubling every IAC byte.
    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        crate::args::write_escaped(&mut dst.writer(), item)?;
        Ok(())
    }
}

///
/// Internal state of the Telnet decoder.
///
#[derive(Clone, Copy, Debug)]
enum DecoderState {
    /// Normal Data
    NormalData,
    /// Received IAC, Next byte is Command
    InterpretAsCommand,
    /// Received DO Command, Next Byte is the option
    NegotiateDo,
    /// Received DONT Command, Next Byte is the option
    NegotiateDont,
    /// Received WILL Command, Next Byte is the option
    NegotiateWill,
    /// Received WONT Command, Next Byte is the option
    NegotiateWont,
    /// Received Subnegotiate Command, Next Byte is the option
    Subnegotiate,
    /// Received Subnegotiate Option, Next Bytes are arguments
    SubnegotiateArgument(u8),
    /// Received IAC during Subnegotiation, Next Byte is command
    SubnegotiateArgumentIAC(u8),
}
