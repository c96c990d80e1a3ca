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

use crate::args::environ::EnvironArgument;
use crate::args::naws::WindowSize;
use crate::args::status::StatusArgument;
use crate::args::ttype::TerminalType;
use crate::result::CodecResult;
use crate::{TelnetOption, consts};
use bytes::{BufMut, BytesMut};
use std::fmt::Formatter;

pub mod environ;
pub mod naws;
pub mod status;
pub mod ttype;

///
/// Telnet Subnegotiation Argument
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetArgument {
    /// A subnegotiation for the window size, where the first value is the width
    /// and the second value is the height. The values are in characters.
    NAWSWindowSize(WindowSize),
    /// Terminal type request or reply.
    TerminalType(TerminalType),
    /// New environment request or variable list.
    Environ(EnvironArgument),
    /// Option status request or report.
    Status(StatusArgument),
    /// A subnegotiation for an option we do not interpret.
    Unknown(TelnetOption, BytesMut),
}

impl TelnetArgument {
    /// Parse the unescaped payload of `IAC SB <option> ... IAC SE`.
    ///
    /// # Errors
    ///
    /// Returns the argument's own parse error. Callers decide whether it is fatal
    /// with [`crate::CodecError::is_fatal`].
    pub fn decode(option: TelnetOption, payload: &[u8]) -> CodecResult<TelnetArgument> {
        match option {
            TelnetOption::NAWS => Ok(TelnetArgument::NAWSWindowSize(WindowSize::decode(
                payload,
            )?)),
            TelnetOption::TTYPE => Ok(TelnetArgument::TerminalType(TerminalType::decode(
                payload,
            )?)),
            TelnetOption::NewEnvironment => Ok(TelnetArgument::Environ(EnvironArgument::decode(
                payload,
            )?)),
            TelnetOption::Status => Ok(TelnetArgument::Status(StatusArgument::decode(payload)?)),
            _ => Ok(TelnetArgument::Unknown(option, BytesMut::from(payload))),
        }
    }

    /// Returns an upper bound on the encoded byte length of this argument.
    pub fn len(&self) -> usize {
        match self {
            TelnetArgument::NAWSWindowSize(inner) => inner.len(),
            TelnetArgument::TerminalType(inner) => inner.len(),
            TelnetArgument::Environ(inner) => inner.len(),
            TelnetArgument::Status(inner) => inner.len(),
            TelnetArgument::Unknown(_option, inner) => inner.len() * 2,
        }
    }

    /// Returns true when the argument carries no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes this `TelnetArgument` to a `BufMut` buffer, escaping IAC.
    pub fn encode<T: BufMut>(&self, dst: &mut T) -> CodecResult<usize> {
        Ok(self.write(&mut dst.writer())?)
    }

    /// Writes this `TelnetArgument` to a `std::io::Write` writer, escaping IAC.
    ///
    /// Returns the number of bytes written.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        match self {
            TelnetArgument::NAWSWindowSize(inner) => inner.write(writer),
            TelnetArgument::TerminalType(inner) => inner.write(writer),
            TelnetArgument::Environ(inner) => inner.write(writer),
            TelnetArgument::Status(inner) => inner.write(writer),
            TelnetArgument::Unknown(_option, payload) => write_escaped(writer, payload),
        }
    }

    /// Returns the `TelnetOption` associated with this argument.
    pub fn option(&self) -> TelnetOption {
        match self {
            TelnetArgument::NAWSWindowSize(_) => TelnetOption::NAWS,
            TelnetArgument::TerminalType(_) => TelnetOption::TTYPE,
            TelnetArgument::Environ(_) => TelnetOption::NewEnvironment,
            TelnetArgument::Status(_) => TelnetOption::Status,
            TelnetArgument::Unknown(option, _) => *option,
        }
    }
}

impl std::fmt::Display for TelnetArgument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetArgument::NAWSWindowSize(v) => write!(f, "NAWS{v}"),
            TelnetArgument::TerminalType(v) => write!(f, "TTYPE({v})"),
            TelnetArgument::Environ(v) => write!(f, "NEW_ENVIRON({v})"),
            TelnetArgument::Status(v) => write!(f, "STATUS({v})"),
            TelnetArgument::Unknown(o, v) => write!(f, "{o}-{v:?}"),
        }
    }
}

/// Write `bytes` doubling every IAC. Returns the number of bytes written.
pub(crate) fn write_escaped<W: std::io::Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<usize> {
    let mut written = 0;
    for chunk in bytes.split_inclusive(|b| *b == consts::IAC) {
        writer.write_all(chunk)?;
        written += chunk.len();
        if chunk.last() == Some(&consts::IAC) {
            writer.write_all(&[consts::IAC])?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_every_iac() {
        let mut out = Vec::new();
        let written = write_escaped(&mut out, &[1, 0xFF, 2, 0xFF, 0xFF]).unwrap();
        assert_eq!(out, vec![1, 0xFF, 0xFF, 2, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(written, out.len());
    }

    #[test]
    fn unknown_options_keep_raw_payload() {
        let arg = TelnetArgument::decode(TelnetOption::Unknown(201), b"Core.Hello {}").unwrap();
        assert_eq!(arg.option(), TelnetOption::Unknown(201));
        assert!(matches!(arg, TelnetArgument::Unknown(_, ref p) if &p[..] == b"Core.Hello {}"));
    }

    #[test]
    fn naws_payload_decodes_to_window_size() {
        let arg = TelnetArgument::decode(TelnetOption::NAWS, &[0, 132, 0, 43]).unwrap();
        assert_eq!(arg, TelnetArgument::NAWSWindowSize(WindowSize::new(132, 43)));
    }
}
