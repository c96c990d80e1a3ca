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

//! Negotiate About Window Size
//!

use crate::args::write_escaped;
use crate::{CodecError, CodecResult, SubnegotiationErrorKind, consts};
use byteorder::{BigEndian, ByteOrder};

/// Represents the Negotiate About Window Size (NAWS) option data.
///
/// # Format
/// The window size is encoded as four bytes in big-endian format:
/// - 2 bytes for columns (width)
/// - 2 bytes for rows (height)
///
/// # Example
/// ```
/// use termgate_telnetcodec::naws::WindowSize;
///
/// let size = WindowSize::new(80, 24);
/// assert_eq!(size.cols, 80);
/// assert_eq!(size.rows, 24);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    /// The number of columns (characters) in the terminal window
    pub cols: u16,
    /// The number of rows (lines) in the terminal window
    pub rows: u16,
}

impl WindowSize {
    /// Creates a new `WindowSize` with the specified columns and rows.
    pub fn new(cols: u16, rows: u16) -> Self {
        WindowSize { cols, rows }
    }

    /// Returns the encoded length of this `WindowSize` in bytes, IAC escapes included.
    pub fn len(&self) -> usize {
        4 + self.raw().iter().filter(|b| **b == consts::IAC).count()
    }

    /// Always false; a window size has a fixed payload.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn raw(&self) -> [u8; 4] {
        let mut raw = [0u8; 4];
        BigEndian::write_u16(&mut raw[0..2], self.cols);
        BigEndian::write_u16(&mut raw[2..4], self.rows);
        raw
    }

    /// Writes this `WindowSize` big-endian, doubling any IAC byte.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        write_escaped(writer, &self.raw())
    }

    /// Decodes a `WindowSize` from an unescaped payload of exactly four bytes.
    ///
    /// # Errors
    /// Returns `CodecError::SubnegotiationError` for any other length. A malformed
    /// window size is a protocol violation and [`CodecError::is_fatal`] reports it so.
    ///
    /// # Example
    /// ```
    /// use termgate_telnetcodec::naws::WindowSize;
    ///
    /// let size = WindowSize::decode(&[0x00, 0x50, 0x00, 0x18]).unwrap();
    /// assert_eq!(size, WindowSize::new(80, 24));
    /// ```
    pub fn decode(src: &[u8]) -> CodecResult<WindowSize> {
        match src.len() {
            4 => Ok(WindowSize {
                cols: BigEndian::read_u16(&src[0..2]),
                rows: BigEndian::read_u16(&src[2..4]),
            }),
            n if n < 4 => Err(CodecError::SubnegotiationError {
                option: Some(consts::option::NAWS),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 4,
                    available: n,
                },
            }),
            n => Err(CodecError::SubnegotiationError {
                option: Some(consts::option::NAWS),
                reason: SubnegotiationErrorKind::UnexpectedData {
                    reason: format!("{} trailing bytes after window size", n - 4),
                },
            }),
        }
    }
}

impl Default for WindowSize {
    /// A standard 80x24 terminal.
    fn default() -> Self {
        WindowSize { cols: 80, rows: 24 }
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.cols, self.rows)
    }
}
