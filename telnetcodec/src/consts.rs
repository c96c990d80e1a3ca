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

//! Telnet byte values (RFC 854 and option RFCs)

/// Null
pub const NUL: u8 = 0x00;
/// Backspace
pub const BS: u8 = 0x08;
/// Line Feed
pub const LF: u8 = 0x0A;
/// Carriage Return
pub const CR: u8 = 0x0D;
/// Ctrl-C, delivered in place of Interrupt Process
pub const ETX: u8 = 0x03;
/// Ctrl-U, delivered in place of Erase Line
pub const NAK: u8 = 0x15;

/// End of Record
pub const EOR: u8 = 239;
/// End of Subnegotiation
pub const SE: u8 = 240;
/// No Operation
pub const NOP: u8 = 241;
/// Data Mark
pub const DM: u8 = 242;
/// Break
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
pub const GA: u8 = 249;
/// Subnegotiation Begin
pub const SB: u8 = 250;
/// WILL
pub const WILL: u8 = 251;
/// WONT
pub const WONT: u8 = 252;
/// DO
pub const DO: u8 = 253;
/// DONT
pub const DONT: u8 = 254;
/// Interpret As Command
pub const IAC: u8 = 255;

/// Option codes
pub mod option {
    /// Binary Transmission (RFC 856)
    pub const BINARY: u8 = 0;
    /// Echo (RFC 857)
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead (RFC 858)
    pub const SGA: u8 = 3;
    /// Status (RFC 859)
    pub const STATUS: u8 = 5;
    /// Timing Mark (RFC 860)
    pub const TM: u8 = 6;
    /// Terminal Type (RFC 1091)
    pub const TTYPE: u8 = 24;
    /// End of Record (RFC 885)
    pub const EOR: u8 = 25;
    /// Negotiate About Window Size (RFC 1073)
    pub const NAWS: u8 = 31;
    /// Terminal Speed (RFC 1079)
    pub const TSPEED: u8 = 32;
    /// Remote Flow Control (RFC 1372)
    pub const LFLOW: u8 = 33;
    /// Linemode (RFC 1184)
    pub const LINEMODE: u8 = 34;
    /// X Display Location (RFC 1096)
    pub const XDISPLOC: u8 = 35;
    /// Environment (RFC 1408)
    pub const OLD_ENVIRONMENT: u8 = 36;
    /// Authentication (RFC 2941)
    pub const AUTHENTICATION: u8 = 37;
    /// Encryption (RFC 2946)
    pub const ENCRYPTION: u8 = 38;
    /// New Environment (RFC 1572)
    pub const NEW_ENVIRONMENT: u8 = 39;
    /// Charset (RFC 2066)
    pub const CHARSET: u8 = 42;
    /// MUD Client Compression Protocol v2
    pub const COMPRESS2: u8 = 86;
    /// Generic MUD Communication Protocol
    pub const GMCP: u8 = 201;

    /// Terminal Type subnegotiation commands
    pub mod ttype {
        /// IS
        pub const IS: u8 = 0;
        /// SEND
        pub const SEND: u8 = 1;
    }

    /// New Environment subnegotiation commands and markers
    pub mod environ {
        /// IS
        pub const IS: u8 = 0;
        /// SEND
        pub const SEND: u8 = 1;
        /// INFO
        pub const INFO: u8 = 2;
        /// VAR
        pub const VAR: u8 = 0;
        /// VALUE
        pub const VALUE: u8 = 1;
        /// ESC
        pub const ESC: u8 = 2;
        /// USERVAR
        pub const USERVAR: u8 = 3;
    }

    /// Status subnegotiation commands
    pub mod status {
        /// IS
        pub const IS: u8 = 0;
        /// SEND
        pub const SEND: u8 = 1;
    }
}
