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

//! Telnet Option Status
//!
//! <https://tools.ietf.org/html/rfc859>
//!
//! A peer sends `SEND`; we answer `IS` followed by `WILL <opt>` for every option
//! we perform and `DO <opt>` for every option the peer performs.

use crate::args::write_escaped;
use crate::options::TelnetSide;
use crate::{CodecError, CodecResult, SubnegotiationErrorKind, TelnetOption, consts};

/// Status subnegotiation payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusArgument {
    /// SEND - Request status information
    Send,
    /// IS - Enabled options and the side performing each
    Is(Vec<(TelnetOption, TelnetSide)>),
}

impl StatusArgument {
    /// Encoded length before IAC escaping.
    pub fn len(&self) -> usize {
        match self {
            StatusArgument::Send => 1,
            StatusArgument::Is(options) => 1 + options.len() * 2,
        }
    }

    /// Always false; the command byte is mandatory.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Writer for StatusArgument
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        match self {
            StatusArgument::Send => write_escaped(writer, &[consts::option::status::SEND]),
            StatusArgument::Is(options) => {
                let mut raw = Vec::with_capacity(self.len());
                raw.push(consts::option::status::IS);
                for (option, side) in options {
                    raw.push(match side {
                        TelnetSide::Local => consts::WILL,
                        TelnetSide::Remote => consts::DO,
                    });
                    raw.push(option.to_u8());
                    // SE inside a status list is doubled
                    if option.to_u8() == consts::SE {
                        raw.push(consts::SE);
                    }
                }
                write_escaped(writer, &raw)
            }
        }
    }

    /// Parses an unescaped payload.
    pub fn decode(src: &[u8]) -> CodecResult<StatusArgument> {
        let invalid = |command: u8| CodecError::SubnegotiationError {
            option: Some(consts::option::STATUS),
            reason: SubnegotiationErrorKind::InvalidCommand {
                command,
                expected: Some(vec![consts::option::status::IS, consts::option::status::SEND]),
            },
        };
        match src.split_first() {
            Some((&consts::option::status::SEND, _)) => Ok(StatusArgument::Send),
            Some((&consts::option::status::IS, rest)) => {
                let mut options = Vec::new();
                for pair in rest.chunks(2) {
                    match pair {
                        [consts::WILL, option] => {
                            options.push((TelnetOption::from_u8(*option), TelnetSide::Local))
                        }
                        [consts::DO, option] => {
                            options.push((TelnetOption::from_u8(*option), TelnetSide::Remote))
                        }
                        [consts::WONT, _] | [consts::DONT, _] => {}
                        [verb, ..] => return Err(invalid(*verb)),
                        [] => {}
                    }
                }
                Ok(StatusArgument::Is(options))
            }
            Some((&other, _)) => Err(invalid(other)),
            None => Err(CodecError::SubnegotiationError {
                option: Some(consts::option::STATUS),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 1,
                    available: 0,
                },
            }),
        }
    }
}

impl std::fmt::Display for StatusArgument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusArgument::Send => write!(f, "SEND"),
            StatusArgument::Is(options) => {
                write!(f, "IS")?;
                for (option, side) in options {
                    write!(f, " {option}/{side}")?;
                }
                Ok(())
            }
        }
    }
}
