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

//! # Termgate Telnet Codec
//!
//! A byte-oriented Telnet (RFC 854) codec and option negotiator for use with
//! `tokio_util::codec`. It negotiates only the option subset needed for a coherent
//! terminal (echo, SGA, binary, NAWS, TTYPE, NEW_ENVIRON, STATUS) and refuses
//! everything else once.
//!
//! ## Core Components
//!
//! ### [`TelnetCodec`]
//!
//! Implements [`Decoder`](tokio_util::codec::Decoder) producing [`TelnetEvent`]s and
//! [`Encoder`](tokio_util::codec::Encoder) for [`TelnetFrame`]s and raw data. Replies the
//! negotiator owes the peer are queued inside the codec; drain them with
//! [`TelnetCodec::take_responses`] and write them before application output.
//!
//! ### [`TelnetOptions`]
//!
//! The per-connection option table. Each option has a tri-state offer on each side
//! (`unknown`, `enabled`, `refused`) plus a pending flag for requests we initiated.
//!
//! ### [`TelnetArgument`]
//!
//! Typed subnegotiation payloads: [`naws::WindowSize`], [`ttype::TerminalType`],
//! [`environ::EnvironArgument`] and [`status::StatusArgument`].
//!
//! ## Usage Example
//!
//! ```rust
//! use termgate_telnetcodec::{TelnetCodec, TelnetEvent, TelnetOption, TelnetSide};
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut codec = TelnetCodec::new();
//! let mut input = BytesMut::from(&b"A\xFF\xFB\x1F"[..]); // Data + WILL NAWS
//! assert_eq!(codec.decode(&mut input).unwrap(), Some(TelnetEvent::Data(b'A')));
//! assert_eq!(
//!     codec.decode(&mut input).unwrap(),
//!     Some(TelnetEvent::OptionStatus(TelnetOption::NAWS, TelnetSide::Remote, true))
//! );
//! // IAC DO NAWS is waiting to be written
//! assert_eq!(&codec.take_responses()[..], b"\xFF\xFD\x1F");
//! ```
//!
//! ## Error Handling
//!
//! [`CodecError::is_fatal`] separates protocol violations that must close the
//! connection (peer `WILL ECHO`, oversized subnegotiation, malformed NAWS) from
//! malformed optional payloads, which are logged and skipped.
//!
//! ## Related RFCs
//!
//! - RFC 854: Telnet Protocol Specification
//! - RFC 856: Telnet Binary Transmission
//! - RFC 857: Telnet Echo Option
//! - RFC 858: Telnet Suppress Go Ahead Option
//! - RFC 859: Telnet Status Option
//! - RFC 1073: Telnet Window Size Option
//! - RFC 1091: Telnet Terminal-Type Option
//! - RFC 1572: Telnet Environment Option

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod args;
mod codec;
pub mod consts;
mod event;
mod frame;
mod options;
mod result;

pub use self::args::{TelnetArgument, environ, naws, status, ttype};
pub use self::codec::{AYT_REPLY, DEFAULT_MAX_SUBNEGOTIATION, TelnetCodec};
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::options::{
    ENVIRON_REQUEST, Negotiated, Offer, OptionState, TelnetOption, TelnetOptions, TelnetSide,
};
pub use self::result::{CodecError, CodecResult, SubnegotiationErrorKind};

#[cfg(test)]
mod tests {
    use super::{TelnetCodec, TelnetEvent, TelnetFrame, TelnetOption, consts};
    use crate::options::TelnetSide;
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn telnet_decode() {
        let mut codec = TelnetCodec::new();
        let mut input_buffer = BytesMut::from("login\r\n");
        let expected_output: Vec<TelnetEvent> =
            b"login\r\n".iter().map(|b| TelnetEvent::Data(*b)).collect();
        let mut actual_output = Vec::new();
        while let Some(event) = codec.decode(&mut input_buffer).unwrap() {
            actual_output.push(event)
        }
        assert_eq!(expected_output, actual_output, "telnet_decode didn't match");
    }

    #[test]
    fn telnet_encode() {
        let mut codec = TelnetCodec::new();
        let mut actual_output = BytesMut::with_capacity(20);
        for byte in b"Raw\xFF\r\n" {
            codec.encode(TelnetFrame::Data(*byte), &mut actual_output).unwrap();
        }
        assert_eq!(&actual_output[..], b"Raw\xFF\xFF\r\n");
    }

    #[test]
    fn decode_iac_activation() {
        let mut codec = TelnetCodec::new();
        let mut input_buffer = BytesMut::from(
            &[
                b'L',
                consts::IAC,
                consts::DO,
                consts::option::BINARY,
                b'P',
                consts::IAC,
                consts::WILL,
                consts::option::BINARY,
                b'H',
            ][..],
        );
        let expected_output = vec![
            TelnetEvent::Data(b'L'),
            TelnetEvent::OptionStatus(TelnetOption::TransmitBinary, TelnetSide::Local, true),
            TelnetEvent::Data(b'P'),
            TelnetEvent::OptionStatus(TelnetOption::TransmitBinary, TelnetSide::Remote, true),
            TelnetEvent::Data(b'H'),
        ];
        let mut actual_output = Vec::new();
        while let Some(event) = codec.decode(&mut input_buffer).unwrap() {
            actual_output.push(event)
        }
        assert_eq!(expected_output, actual_output);
        assert_eq!(
            &codec.take_responses()[..],
            &[
                consts::IAC,
                consts::WILL,
                consts::option::BINARY,
                consts::IAC,
                consts::DO,
                consts::option::BINARY
            ]
        );
    }
}
