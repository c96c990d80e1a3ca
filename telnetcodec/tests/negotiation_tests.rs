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

//! End-to-end negotiation behaviour of the codec as a server would drive it.

use bytes::BytesMut;
use proptest::prelude::*;
use termgate_telnetcodec::ttype::TerminalType;
use termgate_telnetcodec::{
    CodecError, Offer, TelnetArgument, TelnetCodec, TelnetEvent, TelnetFrame, TelnetOption,
    consts,
};
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// Helper Functions
// ============================================================================

fn decode_all(codec: &mut TelnetCodec, bytes: &[u8]) -> Result<Vec<TelnetEvent>, CodecError> {
    let mut buffer = BytesMut::from(bytes);
    let mut events = Vec::new();
    while let Some(event) = codec.decode(&mut buffer)? {
        events.push(event);
    }
    Ok(events)
}

fn data_of(events: &[TelnetEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            TelnetEvent::Data(byte) => Some(*byte),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn terminal_type_exchange() {
    let mut server = TelnetCodec::new();

    decode_all(&mut server, &[consts::IAC, consts::WILL, consts::option::TTYPE]).unwrap();
    let mut expected = BytesMut::new();
    expected.extend_from_slice(&[consts::IAC, consts::DO, consts::option::TTYPE]);
    TelnetFrame::Subnegotiate(TelnetArgument::TerminalType(TerminalType::Send))
        .encode(&mut expected)
        .unwrap();
    assert_eq!(server.take_responses(), expected);

    let mut reply = vec![consts::IAC, consts::SB, consts::option::TTYPE, consts::option::ttype::IS];
    reply.extend_from_slice(b"xterm\0");
    reply.extend_from_slice(&[consts::IAC, consts::SE]);
    let events = decode_all(&mut server, &reply).unwrap();
    assert_eq!(
        events,
        vec![TelnetEvent::Subnegotiate(TelnetArgument::TerminalType(
            TerminalType::Is("xterm".into())
        ))]
    );
}

#[test]
fn will_echo_disconnects_without_reply() {
    let mut server = TelnetCodec::new();
    let err = decode_all(&mut server, &[consts::IAC, consts::WILL, consts::option::ECHO])
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(!server.has_pending_responses());
}

#[test]
fn unknown_will_twice_is_refused_once() {
    let mut server = TelnetCodec::new();
    let offer = [consts::IAC, consts::WILL, 77, consts::IAC, consts::WILL, 77];
    decode_all(&mut server, &offer).unwrap();
    assert_eq!(&server.take_responses()[..], &[consts::IAC, consts::DONT, 77]);
    assert_eq!(
        server.options().get(TelnetOption::Unknown(77)).remote,
        Offer::Refused
    );
}

#[test]
fn data_around_negotiation_keeps_order() {
    let mut server = TelnetCodec::new();
    let mut input = b"ab".to_vec();
    input.extend_from_slice(&[consts::IAC, consts::DO, consts::option::SGA]);
    input.extend_from_slice(b"cd");
    input.extend_from_slice(&[consts::IAC, consts::NOP]);
    input.extend_from_slice(b"e");
    let events = decode_all(&mut server, &input).unwrap();
    assert_eq!(data_of(&events), b"abcde".to_vec());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn escaping_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = TelnetCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(&data[..], &mut wire).unwrap();
        let events = decode_all(&mut codec, &wire).unwrap();
        prop_assert_eq!(data_of(&events), data);
    }

    #[test]
    fn unknown_payload_round_trip(
        option in 100u8..200,
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = TelnetFrame::Subnegotiate(TelnetArgument::Unknown(
            TelnetOption::Unknown(option),
            BytesMut::from(&payload[..]),
        ));
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).unwrap();
        let mut codec = TelnetCodec::new();
        let events = decode_all(&mut codec, &wire).unwrap();
        prop_assert_eq!(events.len(), 1);
        match &events[0] {
            TelnetEvent::Subnegotiate(TelnetArgument::Unknown(decoded_option, decoded)) => {
                prop_assert_eq!(*decoded_option, TelnetOption::Unknown(option));
                prop_assert_eq!(&decoded[..], &payload[..]);
            }
            other => prop_assert!(false, "unexpected event {:?}", other),
        }
    }
}
