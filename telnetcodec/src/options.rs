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
use crate::args::environ::EnvironArgument;
use crate::args::ttype::TerminalType;
use crate::{CodecError, CodecResult, TelnetFrame, consts};
use std::collections::HashMap;
use std::fmt::Formatter;

///
/// [Telnet Terminal Options](https://www.iana.org/assignments/telnet-options/telnet-options.xhtml)
///
/// Only the options the negotiator has an opinion about are named; every other
/// code is carried as [`TelnetOption::Unknown`] and refused.
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum TelnetOption {
    /// [`consts::option::BINARY`] Telnet Binary Transmission [RFC856](https://tools.ietf.org/html/rfc856)
    TransmitBinary,
    /// [`consts::option::ECHO`] Telnet Echo Option [RFC857](https://tools.ietf.org/html/rfc857)
    Echo,
    /// [`consts::option::SGA`] Telnet Suppress Go Ahead Option [RFC858](https://tools.ietf.org/html/rfc858)
    SuppressGoAhead,
    /// [`consts::option::STATUS`] Telnet Status Option [RFC859](https://tools.ietf.org/html/rfc859)
    Status,
    /// [`consts::option::TM`] Telnet Timing Mark Option [RFC860](https://tools.ietf.org/html/rfc860)
    TimingMark,
    /// [`consts::option::TTYPE`] Telnet Terminal-Type Option [RFC1091](https://tools.ietf.org/html/rfc1091)
    TTYPE,
    /// [`consts::option::EOR`] Telnet End of Record Option [RFC885](https://tools.ietf.org/html/rfc885)
    EOR,
    /// [`consts::option::NAWS`] Telnet Window Size Option [RFC1073](https://tools.ietf.org/html/rfc1073)
    NAWS,
    /// [`consts::option::TSPEED`] Telnet Terminal Speed Option [RFC1079](https://tools.ietf.org/html/rfc1079)
    TSPEED,
    /// [`consts::option::LFLOW`] Telnet Remote Flow Control Option [RFC1372](https://tools.ietf.org/html/rfc1372)
    LFLOW,
    /// [`consts::option::LINEMODE`] Telnet Linemode Option [RFC1184](https://tools.ietf.org/html/rfc1184)
    Linemode,
    /// [`consts::option::XDISPLOC`] Telnet X Display Location Option [RFC1096](https://tools.ietf.org/html/rfc1096)
    XDISPLOC,
    /// [`consts::option::OLD_ENVIRONMENT`] Telnet Environment Option [RFC1408](https://tools.ietf.org/html/rfc1408)
    Environment,
    /// [`consts::option::NEW_ENVIRONMENT`] Telnet Environment Option [RFC1572](https://tools.ietf.org/html/rfc1572)
    NewEnvironment,
    /// [`consts::option::CHARSET`] Telnet Charset Option [RFC2066](https://tools.ietf.org/html/rfc2066)
    Charset,
    /// Any other option code
    Unknown(u8),
}

impl TelnetOption {
    /// Converts a `TelnetOption` into its wire byte.
    pub fn to_u8(&self) -> u8 {
        match self {
            TelnetOption::TransmitBinary => consts::option::BINARY,
            TelnetOption::Echo => consts::option::ECHO,
            TelnetOption::SuppressGoAhead => consts::option::SGA,
            TelnetOption::Status => consts::option::STATUS,
            TelnetOption::TimingMark => consts::option::TM,
            TelnetOption::TTYPE => consts::option::TTYPE,
            TelnetOption::EOR => consts::option::EOR,
            TelnetOption::NAWS => consts::option::NAWS,
            TelnetOption::TSPEED => consts::option::TSPEED,
            TelnetOption::LFLOW => consts::option::LFLOW,
            TelnetOption::Linemode => consts::option::LINEMODE,
            TelnetOption::XDISPLOC => consts::option::XDISPLOC,
            TelnetOption::Environment => consts::option::OLD_ENVIRONMENT,
            TelnetOption::NewEnvironment => consts::option::NEW_ENVIRONMENT,
            TelnetOption::Charset => consts::option::CHARSET,
            TelnetOption::Unknown(byte) => *byte,
        }
    }

    /// Converts a wire byte into a `TelnetOption`.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            consts::option::BINARY => TelnetOption::TransmitBinary,
            consts::option::ECHO => TelnetOption::Echo,
            consts::option::SGA => TelnetOption::SuppressGoAhead,
            consts::option::STATUS => TelnetOption::Status,
            consts::option::TM => TelnetOption::TimingMark,
            consts::option::TTYPE => TelnetOption::TTYPE,
            consts::option::EOR => TelnetOption::EOR,
            consts::option::NAWS => TelnetOption::NAWS,
            consts::option::TSPEED => TelnetOption::TSPEED,
            consts::option::LFLOW => TelnetOption::LFLOW,
            consts::option::LINEMODE => TelnetOption::Linemode,
            consts::option::XDISPLOC => TelnetOption::XDISPLOC,
            consts::option::OLD_ENVIRONMENT => TelnetOption::Environment,
            consts::option::NEW_ENVIRONMENT => TelnetOption::NewEnvironment,
            consts::option::CHARSET => TelnetOption::Charset,
            byte => TelnetOption::Unknown(byte),
        }
    }

    /// Whether we agree to perform this option when the peer sends `DO`.
    pub fn supported_local(&self) -> bool {
        matches!(
            self,
            TelnetOption::Echo
                | TelnetOption::SuppressGoAhead
                | TelnetOption::TransmitBinary
                | TelnetOption::Status
        )
    }

    /// Whether we agree to let the peer perform this option when it sends `WILL`.
    pub fn supported_remote(&self) -> bool {
        matches!(
            self,
            TelnetOption::TransmitBinary
                | TelnetOption::SuppressGoAhead
                | TelnetOption::NAWS
                | TelnetOption::TTYPE
                | TelnetOption::NewEnvironment
        )
    }
}

impl std::fmt::Display for TelnetOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetOption::TransmitBinary => write!(f, "TransmitBinary"),
            TelnetOption::Echo => write!(f, "Echo"),
            TelnetOption::SuppressGoAhead => write!(f, "SuppressGoAhead"),
            TelnetOption::Status => write!(f, "Status"),
            TelnetOption::TimingMark => write!(f, "TimingMark"),
            TelnetOption::TTYPE => write!(f, "TTYPE"),
            TelnetOption::EOR => write!(f, "EOR"),
            TelnetOption::NAWS => write!(f, "NAWS"),
            TelnetOption::TSPEED => write!(f, "TSPEED"),
            TelnetOption::LFLOW => write!(f, "LFLOW"),
            TelnetOption::Linemode => write!(f, "Linemode"),
            TelnetOption::XDISPLOC => write!(f, "XDISPLOC"),
            TelnetOption::Environment => write!(f, "Environment"),
            TelnetOption::NewEnvironment => write!(f, "NewEnvironment"),
            TelnetOption::Charset => write!(f, "Charset"),
            TelnetOption::Unknown(option) => write!(f, "Unknown({option})"),
        }
    }
}

impl From<u8> for TelnetOption {
    fn from(byte: u8) -> Self {
        Self::from_u8(byte)
    }
}

impl From<TelnetOption> for u8 {
    fn from(option: TelnetOption) -> Self {
        option.to_u8()
    }
}

/// Which end of the connection performs an option.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelnetSide {
    /// The local side of the Telnet connection (what we do)
    Local,
    /// The remote side of the Telnet connection (what the peer does)
    Remote,
}

impl std::fmt::Display for TelnetSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TelnetSide::Local => write!(f, "Local"),
            TelnetSide::Remote => write!(f, "Remote"),
        }
    }
}

/// Tri-state offer status for one side of one option.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Offer {
    /// Never negotiated
    #[default]
    Unknown,
    /// Agreed on
    Enabled,
    /// Refused or turned off; never renegotiated by us
    Refused,
}

impl std::fmt::Display for Offer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Offer::Unknown => write!(f, "unknown"),
            Offer::Enabled => write!(f, "enabled"),
            Offer::Refused => write!(f, "refused"),
        }
    }
}

/// Negotiation record for one option.
///
/// `local_pending`/`remote_pending` mark a `WILL`/`DO` we sent and are still
/// waiting to hear answered; the answer is then an acknowledgement and gets no reply.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OptionState {
    /// Whether we perform the option
    pub local: Offer,
    /// Whether the peer performs the option
    pub remote: Offer,
    /// We sent `WILL` and await `DO`/`DONT`
    pub local_pending: bool,
    /// We sent `DO` and await `WILL`/`WONT`
    pub remote_pending: bool,
}

/// The effect of one received negotiation command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Negotiated {
    /// Frames to send back, in order
    pub replies: Vec<TelnetFrame>,
    /// `Some(enabled)` when the option's state on the affected side changed
    pub changed: Option<bool>,
}

impl Negotiated {
    fn unchanged() -> Self {
        Negotiated::default()
    }

    fn changed(enabled: bool) -> Self {
        Negotiated {
            replies: Vec::new(),
            changed: Some(enabled),
        }
    }

    fn reply(mut self, frame: TelnetFrame) -> Self {
        self.replies.push(frame);
        self
    }
}

/// Environment variables requested from a peer that accepts `NEW_ENVIRON`.
pub const ENVIRON_REQUEST: &[&str] = &[
    "USER",
    "TERM",
    "SHELL",
    "COLUMNS",
    "LINES",
    "LC_CTYPE",
    "LC_ALL",
    "LANG",
    "XTERM_LOCALE",
    "DISPLAY",
    "SSH_CLIENT",
    "SSH_CONNECTION",
    "SSH_TTY",
    "HOME",
    "HOSTNAME",
    "PWD",
    "MAIL",
    "EDITOR",
    "LOGNAME",
];

/// Per-connection option table.
///
/// Entries are created lazily on first reference. The refusal policy is
/// conservative: anything not in [`TelnetOption::supported_local`] or
/// [`TelnetOption::supported_remote`] is refused the first time it is seen
/// and never answered again.
#[derive(Clone, Debug, Default)]
pub struct TelnetOptions {
    state: HashMap<TelnetOption, OptionState>,
}

impl TelnetOptions {
    /// Current record for an option, without creating it.
    pub fn get(&self, option: TelnetOption) -> OptionState {
        self.state.get(&option).copied().unwrap_or_default()
    }

    fn entry(&mut self, option: TelnetOption) -> &mut OptionState {
        self.state.entry(option).or_default()
    }

    /// Whether we are performing the option.
    pub fn local_enabled(&self, option: TelnetOption) -> bool {
        self.get(option).local == Offer::Enabled
    }

    /// Whether the peer is performing the option.
    pub fn remote_enabled(&self, option: TelnetOption) -> bool {
        self.get(option).remote == Offer::Enabled
    }

    /// Whether the option has been settled one way or the other on the given side.
    pub fn is_settled(&self, option: TelnetOption, side: TelnetSide) -> bool {
        let state = self.get(option);
        match side {
            TelnetSide::Local => state.local != Offer::Unknown && !state.local_pending,
            TelnetSide::Remote => state.remote != Offer::Unknown && !state.remote_pending,
        }
    }

    /// Every enabled option with the sides it is enabled on, in option order.
    pub fn enabled(&self) -> Vec<(TelnetOption, TelnetSide)> {
        let mut enabled: Vec<(TelnetOption, TelnetSide)> = self
            .state
            .iter()
            .flat_map(|(option, state)| {
                let local = (state.local == Offer::Enabled).then_some((*option, TelnetSide::Local));
                let remote =
                    (state.remote == Offer::Enabled).then_some((*option, TelnetSide::Remote));
                local.into_iter().chain(remote)
            })
            .collect();
        enabled.sort_by_key(|(option, side)| (option.to_u8(), *side == TelnetSide::Remote));
        enabled
    }

    /// Offer to perform an option (`WILL`). Returns the frame to send, if any.
    pub fn request_will(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let state = self.entry(option);
        if state.local == Offer::Enabled || state.local_pending {
            return None;
        }
        state.local_pending = true;
        Some(TelnetFrame::Will(option))
    }

    /// Ask the peer to perform an option (`DO`). Returns the frame to send, if any.
    pub fn request_do(&mut self, option: TelnetOption) -> Option<TelnetFrame> {
        let state = self.entry(option);
        if state.remote == Offer::Enabled || state.remote_pending {
            return None;
        }
        state.remote_pending = true;
        Some(TelnetFrame::Do(option))
    }

    /// Apply a received negotiation frame and compute the replies.
    ///
    /// # Errors
    ///
    /// [`CodecError::RefusedOption`] for a peer `WILL ECHO`, and
    /// [`CodecError::NegotiationError`] for frames that are not negotiation commands.
    pub fn handle_received(&mut self, frame: TelnetFrame) -> CodecResult<Negotiated> {
        match frame {
            TelnetFrame::Do(option) => Ok(self.recv_do(option)),
            TelnetFrame::Dont(option) => Ok(self.recv_dont(option)),
            TelnetFrame::Will(option) => self.recv_will(option),
            TelnetFrame::Wont(option) => Ok(self.recv_wont(option)),
            _ => Err(CodecError::NegotiationError {
                reason: "Unsupported frame type".into(),
                frame_type: Some(format!("{:?}", frame)),
            }),
        }
    }

    fn recv_do(&mut self, option: TelnetOption) -> Negotiated {
        let supported = option.supported_local();
        let state = self.entry(option);
        let pending = std::mem::take(&mut state.local_pending);
        if !supported {
            if state.local == Offer::Refused {
                return Negotiated::unchanged();
            }
            state.local = Offer::Refused;
            return Negotiated::unchanged().reply(TelnetFrame::Wont(option));
        }
        if state.local == Offer::Enabled {
            return Negotiated::unchanged();
        }
        state.local = Offer::Enabled;
        let outcome = Negotiated::changed(true);
        if pending {
            outcome
        } else {
            outcome.reply(TelnetFrame::Will(option))
        }
    }

    fn recv_dont(&mut self, option: TelnetOption) -> Negotiated {
        let state = self.entry(option);
        let pending = std::mem::take(&mut state.local_pending);
        match state.local {
            Offer::Enabled => {
                state.local = Offer::Refused;
                Negotiated::changed(false).reply(TelnetFrame::Wont(option))
            }
            Offer::Unknown => {
                state.local = Offer::Refused;
                if pending {
                    Negotiated::changed(false)
                } else {
                    Negotiated::unchanged()
                }
            }
            Offer::Refused => Negotiated::unchanged(),
        }
    }

    fn recv_will(&mut self, option: TelnetOption) -> CodecResult<Negotiated> {
        if option == TelnetOption::Echo {
            return Err(CodecError::RefusedOption {
                option: option.to_u8(),
            });
        }
        let supported = option.supported_remote();
        let state = self.entry(option);
        let pending = std::mem::take(&mut state.remote_pending);
        if !supported {
            if state.remote == Offer::Refused {
                return Ok(Negotiated::unchanged());
            }
            state.remote = Offer::Refused;
            return Ok(Negotiated::unchanged().reply(TelnetFrame::Dont(option)));
        }
        if state.remote == Offer::Enabled {
            return Ok(Negotiated::unchanged());
        }
        state.remote = Offer::Enabled;
        let mut outcome = Negotiated::changed(true);
        if !pending {
            outcome = outcome.reply(TelnetFrame::Do(option));
        }
        match option {
            TelnetOption::TTYPE => {
                outcome = outcome.reply(TelnetFrame::Subnegotiate(TelnetArgument::TerminalType(
                    TerminalType::Send,
                )));
            }
            TelnetOption::NewEnvironment => {
                outcome = outcome.reply(TelnetFrame::Subnegotiate(TelnetArgument::Environ(
                    EnvironArgument::send(ENVIRON_REQUEST),
                )));
            }
            _ => {}
        }
        Ok(outcome)
    }

    fn recv_wont(&mut self, option: TelnetOption) -> Negotiated {
        let state = self.entry(option);
        let pending = std::mem::take(&mut state.remote_pending);
        match state.remote {
            Offer::Enabled => {
                state.remote = Offer::Refused;
                Negotiated::changed(false).reply(TelnetFrame::Dont(option))
            }
            Offer::Unknown => {
                state.remote = Offer::Refused;
                if pending {
                    Negotiated::changed(false)
                } else {
                    Negotiated::unchanged()
                }
            }
            Offer::Refused => Negotiated::unchanged(),
        }
    }
}
