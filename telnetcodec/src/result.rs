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

/// Result Type for Codec Operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Ways decoding or negotiating a telnet stream can fail
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The underlying stream failed
    #[error("I/O error during {operation}: {kind:?}")]
    IOError {
        /// The kind of I/O error that occurred
        kind: std::io::ErrorKind,
        /// Description of the operation that failed
        operation: String,
    },

    /// A frame that cannot drive option negotiation was handed to the negotiator
    #[error("negotiation error{}: {reason}", frame_label(.frame_type))]
    NegotiationError {
        /// Description of what went wrong during negotiation
        reason: String,
        /// The frame type that caused the error, if available
        frame_type: Option<String>,
    },

    /// The peer offered an option the negotiator refuses by closing the connection.
    ///
    /// Raised for `WILL ECHO` from the peer: a client that insists on local echo
    /// cannot render a server-driven terminal.
    #[error("peer offered refused option {option}")]
    RefusedOption {
        /// The offending option code
        option: u8,
    },

    /// A subnegotiation payload did not parse
    #[error("subnegotiation error{}: {reason}", option_label(.option))]
    SubnegotiationError {
        /// The telnet option being subnegotiated
        option: Option<u8>,
        /// Specific reason for the failure
        reason: SubnegotiationErrorKind,
    },

    /// A subnegotiation grew past the configured buffer limit before `IAC SE`.
    #[error("subnegotiation for option {option} exceeded {limit} bytes")]
    SubnegotiationOverflow {
        /// The telnet option being subnegotiated
        option: u8,
        /// The configured limit in bytes
        limit: usize,
    },
}

impl CodecError {
    /// Whether this error must terminate the connection.
    ///
    /// Malformed optional payloads degrade to a logged refusal; only bound
    /// violations, malformed window sizes, and refused options are fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            CodecError::IOError { .. }
            | CodecError::RefusedOption { .. }
            | CodecError::SubnegotiationOverflow { .. } => true,
            CodecError::SubnegotiationError { option, .. } => {
                *option == Some(crate::consts::option::NAWS)
            }
            CodecError::NegotiationError { .. } => false,
        }
    }
}

/// Why a subnegotiation payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubnegotiationErrorKind {
    /// The payload ended early
    #[error("insufficient data (required: {required}, available: {available})")]
    InsufficientData {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// The leading command byte is not one this option defines
    #[error("invalid command 0x{command:02X}{}", expected_label(.expected))]
    InvalidCommand {
        /// The invalid command byte
        command: u8,
        /// Expected command bytes, if known
        expected: Option<Vec<u8>>,
    },

    /// Bytes were present where the option allows none
    #[error("unexpected data: {reason}")]
    UnexpectedData {
        /// Description of why the data is unexpected
        reason: String,
    },
}

fn frame_label(frame_type: &Option<String>) -> String {
    frame_type.as_ref().map(|frame| format!(" ({frame})")).unwrap_or_default()
}

fn option_label(option: &Option<u8>) -> String {
    option.map(|option| format!(" for option {option}")).unwrap_or_default()
}

fn expected_label(expected: &Option<Vec<u8>>) -> String {
    expected
        .as_ref()
        .map(|codes| format!(" (expected one of: {codes:?})"))
        .unwrap_or_default()
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        CodecError::IOError {
            kind: err.kind(),
            operation: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts;

    #[test]
    fn naws_errors_are_fatal_other_payloads_are_not() {
        let naws = CodecError::SubnegotiationError {
            option: Some(consts::option::NAWS),
            reason: SubnegotiationErrorKind::InsufficientData {
                required: 4,
                available: 3,
            },
        };
        let ttype = CodecError::SubnegotiationError {
            option: Some(consts::option::TTYPE),
            reason: SubnegotiationErrorKind::UnexpectedData {
                reason: "empty".into(),
            },
        };
        assert!(naws.is_fatal());
        assert!(!ttype.is_fatal());
        assert!(CodecError::RefusedOption { option: 1 }.is_fatal());
    }

    #[test]
    fn overflow_display() {
        let err = CodecError::SubnegotiationOverflow {
            option: 24,
            limit: 16,
        };
        assert_eq!(err.to_string(), "subnegotiation for option 24 exceeded 16 bytes");
    }

    #[test]
    fn messages_include_optional_context() {
        let bad_status = CodecError::SubnegotiationError {
            option: Some(consts::option::STATUS),
            reason: SubnegotiationErrorKind::InvalidCommand {
                command: 7,
                expected: Some(vec![0, 1]),
            },
        };
        assert_eq!(
            bad_status.to_string(),
            "subnegotiation error for option 5: invalid command 0x07 (expected one of: [0, 1])"
        );
        let bare = CodecError::NegotiationError {
            reason: "not a negotiation frame".into(),
            frame_type: None,
        };
        assert_eq!(bare.to_string(), "negotiation error: not a negotiation frame");
        let io: CodecError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(io.is_fatal());
    }
}
