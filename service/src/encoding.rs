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

//! Output character encodings
//!
//! Sessions write text; the engine encodes it for the wire according to the
//! client's negotiated encoding before the protocol layer escapes it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Replacement byte for characters the target encoding cannot represent
pub const REPLACEMENT: u8 = b'?';

/// Code page 437, bytes 0x80 through 0xFF
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// Character encoding used for a client's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8, the default
    #[default]
    Utf8,
    /// IBM PC code page 437, for ANSI terminals without 8-bit binary mode
    Cp437,
}

impl Encoding {
    /// Encode text for the wire, substituting `?` for unmappable characters
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Cp437 => text.chars().map(cp437_byte).collect(),
        }
    }

    /// Decode bytes received from the client
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Cp437 => bytes
                .iter()
                .map(|&b| {
                    if b < 0x80 {
                        char::from(b)
                    } else {
                        CP437_HIGH[usize::from(b - 0x80)]
                    }
                })
                .collect(),
        }
    }

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Cp437 => "cp437",
        }
    }
}

fn cp437_byte(ch: char) -> u8 {
    if ch.is_ascii() {
        return ch as u8;
    }
    CP437_HIGH
        .iter()
        .position(|&c| c == ch)
        .and_then(|i| u8::try_from(i + 0x80).ok())
        .unwrap_or(REPLACEMENT)
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "cp437" | "ibm437" => Ok(Encoding::Cp437),
            other => Err(format!("unknown encoding '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        assert_eq!(Encoding::Utf8.encode("héllo ░"), "héllo ░".as_bytes());
    }

    #[test]
    fn cp437_maps_box_drawing() {
        assert_eq!(Encoding::Cp437.encode("╔═╗"), vec![0xC9, 0xCD, 0xBB]);
        assert_eq!(Encoding::Cp437.encode("Ç"), vec![0x80]);
    }

    #[test]
    fn cp437_replaces_unmappable() {
        assert_eq!(Encoding::Cp437.encode("a€b"), b"a?b".to_vec());
    }

    #[test]
    fn cp437_decode_inverts_encode() {
        let text = "░▒▓ ß";
        assert_eq!(Encoding::Cp437.decode(&Encoding::Cp437.encode(text)), text);
    }

    #[test]
    fn parse_names() {
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("cp437".parse::<Encoding>().unwrap(), Encoding::Cp437);
        assert!("latin1".parse::<Encoding>().is_err());
    }
}
