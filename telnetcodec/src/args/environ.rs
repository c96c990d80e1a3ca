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

//! New Environment
//!
//! <https://tools.ietf.org/html/rfc1572>
//!
//! Variable lists are sequences of `VAR|USERVAR name [VALUE value]`, where
//! `ESC` quotes the next byte so names and values may contain marker bytes.

use crate::args::write_escaped;
use crate::{CodecError, CodecResult, SubnegotiationErrorKind, consts};
use byteorder::WriteBytesExt;

use consts::option::environ;

/// Subnegotiation command byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironCommand {
    /// Full variable list reply
    Is,
    /// Request for the listed variables
    Send,
    /// Unsolicited update
    Info,
}

impl EnvironCommand {
    fn from_byte(byte: u8) -> CodecResult<Self> {
        match byte {
            environ::IS => Ok(EnvironCommand::Is),
            environ::SEND => Ok(EnvironCommand::Send),
            environ::INFO => Ok(EnvironCommand::Info),
            other => Err(CodecError::SubnegotiationError {
                option: Some(consts::option::NEW_ENVIRONMENT),
                reason: SubnegotiationErrorKind::InvalidCommand {
                    command: other,
                    expected: Some(vec![environ::IS, environ::SEND, environ::INFO]),
                },
            }),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            EnvironCommand::Is => environ::IS,
            EnvironCommand::Send => environ::SEND,
            EnvironCommand::Info => environ::INFO,
        }
    }
}

/// Well-known or user-defined variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvVarKind {
    /// `VAR`
    Var,
    /// `USERVAR`
    UserVar,
}

/// One variable entry. `value` is `None` in requests and for undefined variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvVar {
    /// Marker the name was introduced with
    pub kind: EnvVarKind,
    /// Variable name
    pub name: String,
    /// Variable value, if one was sent
    pub value: Option<String>,
}

/// A `NEW_ENVIRON` subnegotiation payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironArgument {
    /// Command byte
    pub command: EnvironCommand,
    /// Variables in wire order
    pub variables: Vec<EnvVar>,
}

impl EnvironArgument {
    /// A `SEND` request for the given variable names.
    pub fn send(names: &[&str]) -> Self {
        EnvironArgument {
            command: EnvironCommand::Send,
            variables: names
                .iter()
                .map(|name| EnvVar {
                    kind: EnvVarKind::Var,
                    name: name.to_string(),
                    value: None,
                })
                .collect(),
        }
    }

    /// Variables that carried a value, as `(name, value)` pairs.
    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .filter_map(|var| var.value.as_deref().map(|value| (var.name.as_str(), value)))
    }

    /// Encoded length before IAC escaping.
    pub fn len(&self) -> usize {
        1 + self
            .variables
            .iter()
            .map(|var| {
                1 + quoted_len(&var.name) + var.value.as_ref().map_or(0, |v| 1 + quoted_len(v))
            })
            .sum::<usize>()
    }

    /// Always false; the command byte is mandatory.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Writes the payload, quoting marker bytes with `ESC` and escaping IAC.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        let mut raw = Vec::with_capacity(self.len());
        raw.write_u8(self.command.to_byte())?;
        for var in &self.variables {
            raw.write_u8(match var.kind {
                EnvVarKind::Var => environ::VAR,
                EnvVarKind::UserVar => environ::USERVAR,
            })?;
            quote_into(&mut raw, &var.name);
            if let Some(value) = &var.value {
                raw.write_u8(environ::VALUE)?;
                quote_into(&mut raw, value);
            }
        }
        write_escaped(writer, &raw)
    }

    /// Parses an unescaped payload.
    pub fn decode(src: &[u8]) -> CodecResult<EnvironArgument> {
        let Some((&command, rest)) = src.split_first() else {
            return Err(CodecError::SubnegotiationError {
                option: Some(consts::option::NEW_ENVIRONMENT),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 1,
                    available: 0,
                },
            });
        };
        let command = EnvironCommand::from_byte(command)?;

        let mut variables: Vec<EnvVar> = Vec::new();
        let mut field: Vec<u8> = Vec::new();
        let mut in_value = false;
        let mut bytes = rest.iter();
        let mut current: Option<EnvVarKind> = None;

        while let Some(&byte) = bytes.next() {
            match byte {
                environ::VAR | environ::USERVAR => {
                    finish(&mut variables, current, &mut field, in_value);
                    current = Some(if byte == environ::VAR {
                        EnvVarKind::Var
                    } else {
                        EnvVarKind::UserVar
                    });
                    in_value = false;
                }
                environ::VALUE => {
                    if current.is_none() {
                        return Err(CodecError::SubnegotiationError {
                            option: Some(consts::option::NEW_ENVIRONMENT),
                            reason: SubnegotiationErrorKind::UnexpectedData {
                                reason: "VALUE before any variable name".into(),
                            },
                        });
                    }
                    finish(&mut variables, current, &mut field, in_value);
                    in_value = true;
                }
                environ::ESC => {
                    if let Some(&quoted) = bytes.next() {
                        field.push(quoted);
                    }
                }
                other => field.push(other),
            }
        }
        finish(&mut variables, current, &mut field, in_value);

        Ok(EnvironArgument { command, variables })
    }
}

fn finish(variables: &mut Vec<EnvVar>, kind: Option<EnvVarKind>, field: &mut Vec<u8>, in_value: bool) {
    let Some(kind) = kind else {
        return;
    };
    let text = String::from_utf8_lossy(field).into_owned();
    field.clear();
    if in_value {
        if let Some(last) = variables.last_mut() {
            last.value = Some(text);
        }
    } else {
        variables.push(EnvVar {
            kind,
            name: text,
            value: None,
        });
    }
}

fn needs_quote(byte: u8) -> bool {
    matches!(
        byte,
        environ::VAR | environ::VALUE | environ::ESC | environ::USERVAR
    )
}

fn quoted_len(text: &str) -> usize {
    text.len() + text.bytes().filter(|b| needs_quote(*b)).count()
}

fn quote_into(raw: &mut Vec<u8>, text: &str) {
    for byte in text.bytes() {
        if needs_quote(byte) {
            raw.push(environ::ESC);
        }
        raw.push(byte);
    }
}

impl std::fmt::Display for EnvironArgument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.command)?;
        for var in &self.variables {
            match &var.value {
                Some(value) => write!(f, " {}={}", var.name, value)?,
                None => write!(f, " {}", var.name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_is_reply() {
        let payload = b"\x00\x00TERM\x01vt100\x03COLORTERM\x01truecolor\x00USER";
        let arg = EnvironArgument::decode(payload).unwrap();
        assert_eq!(arg.command, EnvironCommand::Is);
        let values: Vec<(&str, &str)> = arg.values().collect();
        assert_eq!(values, vec![("TERM", "vt100"), ("COLORTERM", "truecolor")]);
        assert_eq!(arg.variables[2].name, "USER");
        assert_eq!(arg.variables[2].value, None);
        assert_eq!(arg.variables[1].kind, EnvVarKind::UserVar);
    }

    #[test]
    fn esc_quotes_marker_bytes() {
        let payload = b"\x00\x00A\x01x\x02\x01y";
        let arg = EnvironArgument::decode(payload).unwrap();
        assert_eq!(arg.variables[0].value.as_deref(), Some("x\x01y"));
    }

    #[test]
    fn send_request_round_trips() {
        let request = EnvironArgument::send(&["TERM", "LINES"]);
        let mut out = Vec::new();
        request.write(&mut out).unwrap();
        assert_eq!(out, b"\x01\x00TERM\x00LINES".to_vec());
        assert_eq!(EnvironArgument::decode(&out).unwrap(), request);
    }

    #[test]
    fn value_without_name_is_rejected() {
        let err = EnvironArgument::decode(b"\x00\x01oops").unwrap_err();
        assert!(!err.is_fatal());
    }
}
