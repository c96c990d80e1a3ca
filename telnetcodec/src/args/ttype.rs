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

//! Terminal Type
//!
//! <https://tools.ietf.org/html/rfc1091>

use crate::args::write_escaped;
use crate::{CodecError, CodecResult, SubnegotiationErrorKind, consts};
use byteorder::WriteBytesExt;

/// Terminal type subnegotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalType {
    /// `SEND`: ask the peer for its terminal type
    Send,
    /// `IS <name>`: the peer's terminal type
    Is(String),
}

impl TerminalType {
    /// Encoded length before IAC escaping.
    pub fn len(&self) -> usize {
        match self {
            TerminalType::Send => 1,
            TerminalType::Is(name) => 1 + name.len(),
        }
    }

    /// Always false; the command byte is mandatory.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Writes the payload, escaping IAC.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        match self {
            TerminalType::Send => {
                writer.write_u8(consts::option::ttype::SEND)?;
                Ok(1)
            }
            TerminalType::Is(name) => {
                writer.write_u8(consts::option::ttype::IS)?;
                Ok(1 + write_escaped(writer, name.as_bytes())?)
            }
        }
    }

    /// Parses an unescaped payload. Trailing NULs and whitespace are stripped from names.
    pub fn decode(src: &[u8]) -> CodecResult<TerminalType> {
        let Some((&command, rest)) = src.split_first() else {
            return Err(CodecError::SubnegotiationError {
                option: Some(consts::option::TTYPE),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 1,
                    available: 0,
                },
            });
        };
        match command {
            consts::option::ttype::SEND => Ok(TerminalType::Send),
            consts::option::ttype::IS => {
                let name = String::from_utf8_lossy(rest);
                let name = name.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
                Ok(TerminalType::Is(name.to_string()))
            }
            other => Err(CodecError::SubnegotiationError {
                option: Some(consts::option::TTYPE),
                reason: SubnegotiationErrorKind::InvalidCommand {
                    command: other,
                    expected: Some(vec![
                        consts::option::ttype::IS,
                        consts::option::ttype::SEND,
                    ]),
                },
            }),
        }
    }
}

impl std::fmt::Display for TerminalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalType::Send => write!(f, "SEND"),
            TerminalType::Is(name) => write!(f, "IS {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_strips_trailing_nul() {
        assert_eq!(
            TerminalType::decode(b"\x00xterm\x00").unwrap(),
            TerminalType::Is("xterm".into())
        );
    }

    #[test]
    fn bad_command_is_not_fatal() {
        let err = TerminalType::decode(&[7, b'x']).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn is_round_trips() {
        let mut out = Vec::new();
        TerminalType::Is("ANSI".into()).write(&mut out).unwrap();
        assert_eq!(TerminalType::decode(&out).unwrap(), TerminalType::Is("ANSI".into()));
    }
}
