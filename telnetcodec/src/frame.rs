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

use crate::args::TelnetArgument;
use crate::{CodecResult, TelnetOption, consts};
use bytes::{BufMut, BytesMut};

///
/// A single unit on the Telnet wire.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TelnetFrame {
    /// Telnet Data Byte
    Data(u8),
    /// No Operation
    NoOperation,
    /// End of urgent Data Stream
    DataMark,
    /// Operator pressed the Break key or the Attention key.
    Break,
    /// Interrupt current process.
    InterruptProcess,
    /// Cancel output from the current process.
    AbortOutput,
    /// Request acknowledgment.
    AreYouThere,
    /// Request that the operator erase the previous character.
    EraseCharacter,
    /// Request that the operator erase the previous line.
    EraseLine,
    /// End of input for half-duplex connections.
    GoAhead,
    /// End of Record
    EndOfRecord,
    /// Request the other side perform an option
    Do(TelnetOption),
    /// Request the other side stop performing an option
    Dont(TelnetOption),
    /// Offer to perform an option
    Will(TelnetOption),
    /// Refuse to perform an option
    Wont(TelnetOption),
    /// Subnegotiation Payload
    Subnegotiate(TelnetArgument),
}

impl TelnetFrame {
    /// Append the wire form of this frame to `dst`.
    ///
    /// Data bytes equal to IAC and IAC bytes inside subnegotiation payloads are doubled.
    pub fn encode(&self, dst: &mut BytesMut) -> CodecResult<()> {
        match self {
            TelnetFrame::Data(byte) => {
                dst.reserve(2);
                if *byte == consts::IAC {
                    dst.put_u8(consts::IAC);
                }
                dst.put_u8(*byte);
            }
            TelnetFrame::NoOperation => put_command(dst, consts::NOP),
            TelnetFrame::DataMark => put_command(dst, consts::DM),
            TelnetFrame::Break => put_command(dst, consts::BRK),
            TelnetFrame::InterruptProcess => put_command(dst, consts::IP),
            TelnetFrame::AbortOutput => put_command(dst, consts::AO),
            TelnetFrame::AreYouThere => put_command(dst, consts::AYT),
            TelnetFrame::EraseCharacter => put_command(dst, consts::EC),
            TelnetFrame::EraseLine => put_command(dst, consts::EL),
            TelnetFrame::GoAhead => put_command(dst, consts::GA),
            TelnetFrame::EndOfRecord => put_command(dst, consts::EOR),
            TelnetFrame::Do(option) => put_negotiation(dst, consts::DO, *option),
            TelnetFrame::Dont(option) => put_negotiation(dst, consts::DONT, *option),
            TelnetFrame::Will(option) => put_negotiation(dst, consts::WILL, *option),
            TelnetFrame::Wont(option) => put_negotiation(dst, consts::WONT, *option),
            TelnetFrame::Subnegotiate(argument) => {
                dst.reserve(5 + argument.len());
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SB);
                dst.put_u8(argument.option().to_u8());
                argument.encode(dst)?;
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SE);
            }
        }
        Ok(())
    }
}

fn put_command(dst: &mut BytesMut, command: u8) {
    dst.reserve(2);
    dst.put_u8(consts::IAC);
    dst.put_u8(command);
}

fn put_negotiation(dst: &mut BytesMut, verb: u8, option: TelnetOption) {
    dst.reserve(3);
    dst.put_u8(consts::IAC);
    dst.put_u8(verb);
    dst.put_u8(option.to_u8());
}

impl std::fmt::Display for TelnetFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetFrame::Data(byte) => write!(f, "Data(0x{byte:02X})"),
            TelnetFrame::Do(option) => write!(f, "DO {option}"),
            TelnetFrame::Dont(option) => write!(f, "DONT {option}"),
            TelnetFrame::Will(option) => write!(f, "WILL {option}"),
            TelnetFrame::Wont(option) => write!(f, "WONT {option}"),
            TelnetFrame::Subnegotiate(argument) => write!(f, "SB {argument}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ttype::TerminalType;

    fn encoded(frame: TelnetFrame) -> Vec<u8> {
        let mut dst = BytesMut::new();
        frame.encode(&mut dst).unwrap();
        dst.to_vec()
    }

    #[test]
    fn data_iac_is_doubled() {
        assert_eq!(encoded(TelnetFrame::Data(0xFF)), vec![0xFF, 0xFF]);
        assert_eq!(encoded(TelnetFrame::Data(b'a')), vec![b'a']);
    }

    #[test]
    fn negotiation_is_three_bytes() {
        assert_eq!(
            encoded(TelnetFrame::Do(TelnetOption::TTYPE)),
            vec![consts::IAC, consts::DO, consts::option::TTYPE]
        );
        assert_eq!(
            encoded(TelnetFrame::Wont(TelnetOption::Unknown(99))),
            vec![consts::IAC, consts::WONT, 99]
        );
    }

    #[test]
    fn ttype_send_wire_form() {
        assert_eq!(
            encoded(TelnetFrame::Subnegotiate(TelnetArgument::TerminalType(
                TerminalType::Send
            ))),
            vec![
                consts::IAC,
                consts::SB,
                consts::option::TTYPE,
                consts::option::ttype::SEND,
                consts::IAC,
                consts::SE
            ]
        );
    }
}
