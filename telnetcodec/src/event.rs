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

//! What the decoder hands upward once negotiation traffic is absorbed

use super::TelnetOption;
use crate::args::TelnetArgument;
use crate::options::TelnetSide;

/// One decoded unit of client input.
///
/// `DO`/`DONT`/`WILL`/`WONT` never surface here; the codec answers them and
/// reports only the settled state through `OptionStatus`.
#[derive(Clone, Debug, PartialEq)]
pub enum TelnetEvent {
    /// A data byte, with `IAC IAC` already collapsed
    Data(u8),
    /// `IAC EC`
    EraseCharacter,
    /// `IAC EL`
    EraseLine,
    /// `IAC IP`
    Interrupt,
    /// `IAC AYT`, already answered on the response queue
    AreYouThere,
    /// Any other two-byte command, carried by its code
    Command(u8),
    /// An option came on or went off for `side`
    OptionStatus(TelnetOption, TelnetSide, bool),
    /// A complete, parsed subnegotiation
    Subnegotiate(TelnetArgument),
}
