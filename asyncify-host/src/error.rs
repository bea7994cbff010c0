// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Host error types
//!
//! Every failure inside the host is one of the kinds below. None of them
//! crosses the boundary as-is: [`HostError::to_boundary`] flattens them into a
//! [`BoundaryError`] carrying a stable numeric [`ErrorCode`] and a reason.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;

/// Malformed boundary data (bad oneof, bad encoding, undecodable message)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("value has neither an inline payload nor a pointer")]
    UnsetValue,

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("malformed {message}: {reason}")]
    Malformed {
        message: &'static str,
        reason: String,
    },
}

/// A reference that does not fit inside the guest's linear memory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pointer {offset:#x}+{len} exceeds guest memory of {bounds} bytes")]
pub struct BoundsError {
    pub offset: u32,
    pub len: u32,
    pub bounds: usize,
}

/// The individual bound a validator checks, named after the schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    IntMin,
    IntMax,
    DoubleMin,
    DoubleMax,
    StringMin,
    StringMax,
    StringPrefix,
    StringSuffix,
    StringRegex,
    MediaMime,
    MediaFileSize,
    MediaDpi,
    MediaResolution,
    MediaFormats,
}

impl Constraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Constraint::IntMin => "Int.min",
            Constraint::IntMax => "Int.max",
            Constraint::DoubleMin => "Double.min",
            Constraint::DoubleMax => "Double.max",
            Constraint::StringMin => "String.min",
            Constraint::StringMax => "String.max",
            Constraint::StringPrefix => "String.prefix",
            Constraint::StringSuffix => "String.suffix",
            Constraint::StringRegex => "String.regex",
            Constraint::MediaMime => "Media.mime",
            Constraint::MediaFileSize => "Media.fileSize",
            Constraint::MediaDpi => "Media.dpi",
            Constraint::MediaResolution => "Media.resolution",
            Constraint::MediaFormats => "Media.formats",
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument validation failures. Fail-fast: only the first violation is kept.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("argument '{argument}' is required")]
    MissingRequired { argument: String },

    #[error("argument '{argument}' is not a valid {expected}: {reason}")]
    TypeMismatch {
        argument: String,
        expected: &'static str,
        reason: String,
    },

    #[error("argument '{argument}': {constraint} violated ({detail})")]
    OutOfRange {
        argument: String,
        constraint: Constraint,
        detail: String,
    },

    #[error("argument '{argument}': {constraint} does not match ({detail})")]
    PatternMismatch {
        argument: String,
        constraint: Constraint,
        detail: String,
    },

    #[error("argument '{argument}': unsupported format ({detail})")]
    UnsupportedFormat { argument: String, detail: String },
}

impl ValidationError {
    /// Name of the offending argument, if the error is tied to one
    pub fn argument(&self) -> Option<&str> {
        match self {
            ValidationError::Arity { .. } => None,
            ValidationError::MissingRequired { argument }
            | ValidationError::TypeMismatch { argument, .. }
            | ValidationError::OutOfRange { argument, .. }
            | ValidationError::PatternMismatch { argument, .. }
            | ValidationError::UnsupportedFormat { argument, .. } => Some(argument),
        }
    }

    /// The violated bound, for range and pattern failures
    pub fn constraint(&self) -> Option<Constraint> {
        match self {
            ValidationError::OutOfRange { constraint, .. }
            | ValidationError::PatternMismatch { constraint, .. } => Some(*constraint),
            _ => None,
        }
    }
}

/// Call routing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("capability '{0}' completes asynchronously but the call has no callback")]
    CallbackRequired(String),
}

/// Failure reported by a capability implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ExecutionError {
    pub reason: String,
}

impl ExecutionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<String> for ExecutionError {
    fn from(reason: String) -> Self {
        Self { reason }
    }
}

impl From<&str> for ExecutionError {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

/// Errors that can occur inside the host runtime
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("bounds error: {0}")]
    Bounds(#[from] BoundsError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("stale completion for future {index}")]
    StaleCompletion { index: u32 },

    #[error("future index space exhausted (limit {limit})")]
    IndexExhausted { limit: u32 },

    #[error("guest unavailable: {0}")]
    GuestUnavailable(String),
}

impl HostError {
    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            HostError::Protocol(ProtocolError::UnsetValue) => ErrorCode::InvalidValue,
            HostError::Protocol(ProtocolError::InvalidUtf8(_)) => ErrorCode::InvalidUtf8,
            HostError::Protocol(ProtocolError::Malformed { .. }) => ErrorCode::MalformedMessage,
            HostError::Bounds(_) => ErrorCode::OutOfBounds,
            HostError::Validation(e) => match e {
                ValidationError::Arity { .. } => ErrorCode::Arity,
                ValidationError::MissingRequired { .. } => ErrorCode::MissingRequired,
                ValidationError::TypeMismatch { .. } => ErrorCode::TypeMismatch,
                ValidationError::OutOfRange { .. } => ErrorCode::OutOfRange,
                ValidationError::PatternMismatch { .. } => ErrorCode::PatternMismatch,
                ValidationError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            },
            HostError::Dispatch(DispatchError::UnknownCapability(_)) => {
                ErrorCode::UnknownCapability
            }
            HostError::Dispatch(DispatchError::CallbackRequired(_)) => ErrorCode::CallbackRequired,
            HostError::Execution(_) => ErrorCode::Execution,
            HostError::StaleCompletion { .. } => ErrorCode::StaleCompletion,
            HostError::IndexExhausted { .. } => ErrorCode::IndexExhausted,
            HostError::GuestUnavailable(_) => ErrorCode::GuestUnavailable,
        }
    }

    /// Fatal errors end the affected guest instance (never the host process)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HostError::IndexExhausted { .. } | HostError::GuestUnavailable(_)
        )
    }

    /// Flatten into the only representation allowed to cross the boundary
    pub fn to_boundary(&self) -> BoundaryError {
        BoundaryError {
            code: self.code().as_i32(),
            reason: self.to_string(),
        }
    }
}

/// Stable numeric codes. Values are part of the guest contract; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidValue = 1001,
    InvalidUtf8 = 1002,
    MalformedMessage = 1003,
    OutOfBounds = 1101,
    Arity = 2001,
    MissingRequired = 2002,
    TypeMismatch = 2003,
    OutOfRange = 2004,
    PatternMismatch = 2005,
    UnsupportedFormat = 2006,
    UnknownCapability = 3001,
    CallbackRequired = 3002,
    Execution = 4001,
    StaleCompletion = 5001,
    IndexExhausted = 6001,
    GuestUnavailable = 6002,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            1001 => ErrorCode::InvalidValue,
            1002 => ErrorCode::InvalidUtf8,
            1003 => ErrorCode::MalformedMessage,
            1101 => ErrorCode::OutOfBounds,
            2001 => ErrorCode::Arity,
            2002 => ErrorCode::MissingRequired,
            2003 => ErrorCode::TypeMismatch,
            2004 => ErrorCode::OutOfRange,
            2005 => ErrorCode::PatternMismatch,
            2006 => ErrorCode::UnsupportedFormat,
            3001 => ErrorCode::UnknownCapability,
            3002 => ErrorCode::CallbackRequired,
            4001 => ErrorCode::Execution,
            5001 => ErrorCode::StaleCompletion,
            6001 => ErrorCode::IndexExhausted,
            6002 => ErrorCode::GuestUnavailable,
            _ => return None,
        };
        Some(code)
    }
}

/// `Error{code, reason}` as the guest sees it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[error("[{code}] {reason}")]
pub struct BoundaryError {
    pub code: i32,
    pub reason: String,
}

impl BoundaryError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_i32(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_i32(self.code)
    }
}

impl From<&HostError> for BoundaryError {
    fn from(e: &HostError) -> Self {
        e.to_boundary()
    }
}

impl From<HostError> for BoundaryError {
    fn from(e: HostError) -> Self {
        e.to_boundary()
    }
}

impl From<prost::DecodeError> for HostError {
    fn from(e: prost::DecodeError) -> Self {
        HostError::Protocol(ProtocolError::Malformed {
            message: "message",
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_reason_cites_bound() {
        let err = HostError::from(ValidationError::OutOfRange {
            argument: "level".into(),
            constraint: Constraint::IntMax,
            detail: "150 > 100".into(),
        });
        let boundary = err.to_boundary();
        assert_eq!(boundary.kind(), Some(ErrorCode::OutOfRange));
        assert!(boundary.reason.contains("Int.max"));
        assert!(boundary.reason.contains("level"));
    }

    #[test]
    fn test_codes_round_trip() {
        for code in [
            ErrorCode::InvalidValue,
            ErrorCode::OutOfBounds,
            ErrorCode::UnsupportedFormat,
            ErrorCode::StaleCompletion,
            ErrorCode::GuestUnavailable,
        ] {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(ErrorCode::from_i32(0), None);
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(HostError::IndexExhausted { limit: 3 }.is_fatal());
        assert!(HostError::GuestUnavailable("trap".into()).is_fatal());
        assert!(!HostError::StaleCompletion { index: 1 }.is_fatal());
        assert!(!HostError::from(ProtocolError::UnsetValue).is_fatal());
    }
}
