use std::error::Error;
use std::fmt::{Display, Formatter};

/// Status codes carried by watch stream errors. The numeric values follow the
/// canonical gRPC status space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchErrorCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl WatchErrorCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        let code = match code {
            0 => WatchErrorCode::Ok,
            1 => WatchErrorCode::Cancelled,
            2 => WatchErrorCode::Unknown,
            3 => WatchErrorCode::InvalidArgument,
            4 => WatchErrorCode::DeadlineExceeded,
            5 => WatchErrorCode::NotFound,
            6 => WatchErrorCode::AlreadyExists,
            7 => WatchErrorCode::PermissionDenied,
            8 => WatchErrorCode::ResourceExhausted,
            9 => WatchErrorCode::FailedPrecondition,
            10 => WatchErrorCode::Aborted,
            11 => WatchErrorCode::OutOfRange,
            12 => WatchErrorCode::Unimplemented,
            13 => WatchErrorCode::Internal,
            14 => WatchErrorCode::Unavailable,
            15 => WatchErrorCode::DataLoss,
            16 => WatchErrorCode::Unauthenticated,
            _ => return None,
        };
        Some(code)
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            WatchErrorCode::Ok => 0,
            WatchErrorCode::Cancelled => 1,
            WatchErrorCode::Unknown => 2,
            WatchErrorCode::InvalidArgument => 3,
            WatchErrorCode::DeadlineExceeded => 4,
            WatchErrorCode::NotFound => 5,
            WatchErrorCode::AlreadyExists => 6,
            WatchErrorCode::PermissionDenied => 7,
            WatchErrorCode::ResourceExhausted => 8,
            WatchErrorCode::FailedPrecondition => 9,
            WatchErrorCode::Aborted => 10,
            WatchErrorCode::OutOfRange => 11,
            WatchErrorCode::Unimplemented => 12,
            WatchErrorCode::Internal => 13,
            WatchErrorCode::Unavailable => 14,
            WatchErrorCode::DataLoss => 15,
            WatchErrorCode::Unauthenticated => 16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatchErrorCode::Ok => "watch/ok",
            WatchErrorCode::Cancelled => "watch/cancelled",
            WatchErrorCode::Unknown => "watch/unknown",
            WatchErrorCode::InvalidArgument => "watch/invalid-argument",
            WatchErrorCode::DeadlineExceeded => "watch/deadline-exceeded",
            WatchErrorCode::NotFound => "watch/not-found",
            WatchErrorCode::AlreadyExists => "watch/already-exists",
            WatchErrorCode::PermissionDenied => "watch/permission-denied",
            WatchErrorCode::ResourceExhausted => "watch/resource-exhausted",
            WatchErrorCode::FailedPrecondition => "watch/failed-precondition",
            WatchErrorCode::Aborted => "watch/aborted",
            WatchErrorCode::OutOfRange => "watch/out-of-range",
            WatchErrorCode::Unimplemented => "watch/unimplemented",
            WatchErrorCode::Internal => "watch/internal",
            WatchErrorCode::Unavailable => "watch/unavailable",
            WatchErrorCode::DataLoss => "watch/data-loss",
            WatchErrorCode::Unauthenticated => "watch/unauthenticated",
        }
    }
}

/// Error surfaced by the watch machinery.
///
/// Transport errors may arrive without a status code; `code` is `None` in that
/// case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchError {
    code: Option<WatchErrorCode>,
    message: String,
}

impl WatchError {
    pub fn new(code: WatchErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn without_code(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Builds an error from a raw status code. Codes outside the known space
    /// are kept as uncoded errors.
    pub fn from_status(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: WatchErrorCode::from_i32(code),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<WatchErrorCode> {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.map(|code| code.as_str()).unwrap_or("watch/no-code")
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` when the stream must not be re-opened after this error.
    ///
    /// Uncoded errors count as retryable.
    pub fn is_permanent(&self) -> bool {
        match self.code {
            None => false,
            Some(
                WatchErrorCode::Aborted
                | WatchErrorCode::Cancelled
                | WatchErrorCode::Unknown
                | WatchErrorCode::DeadlineExceeded
                | WatchErrorCode::ResourceExhausted
                | WatchErrorCode::Internal
                | WatchErrorCode::Unavailable
                | WatchErrorCode::Unauthenticated,
            ) => false,
            Some(_) => true,
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        self.code == Some(WatchErrorCode::ResourceExhausted)
    }
}

impl Display for WatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for WatchError {}

pub type WatchResult<T> = Result<T, WatchError>;

pub fn invalid_argument(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::Internal, message)
}

pub fn not_found(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::NotFound, message)
}

pub fn already_exists(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::AlreadyExists, message)
}

pub fn unknown(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::Unknown, message)
}

pub fn unavailable(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::Unavailable, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::ResourceExhausted, message)
}

pub fn cancelled(message: impl Into<String>) -> WatchError {
    WatchError::new(WatchErrorCode::Cancelled, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_through_i32() {
        for raw in 0..=16 {
            let code = WatchErrorCode::from_i32(raw).unwrap();
            assert_eq!(code.as_i32(), raw);
        }
        assert!(WatchErrorCode::from_i32(-1).is_none());
        assert!(WatchErrorCode::from_i32(17).is_none());
    }

    #[test]
    fn transient_codes_are_retryable() {
        assert!(!unavailable("down").is_permanent());
        assert!(!resource_exhausted("quota").is_permanent());
        assert!(!WatchError::new(WatchErrorCode::Unauthenticated, "token").is_permanent());
        assert!(!WatchError::new(WatchErrorCode::Aborted, "aborted").is_permanent());
    }

    #[test]
    fn other_codes_are_permanent() {
        assert!(invalid_argument("bad").is_permanent());
        assert!(WatchError::new(WatchErrorCode::PermissionDenied, "denied").is_permanent());
        assert!(not_found("missing").is_permanent());
    }

    #[test]
    fn uncoded_errors_are_retryable() {
        let err = WatchError::from_status(-1, "socket reset");
        assert_eq!(err.code(), None);
        assert_eq!(err.code_str(), "watch/no-code");
        assert!(!err.is_permanent());
    }

    #[test]
    fn display_includes_code() {
        let err = unavailable("backend offline");
        assert_eq!(err.to_string(), "backend offline (watch/unavailable)");
    }
}
