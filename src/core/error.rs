/*!
Error handling for the PQ-DTLS protocol.

Errors fall into three classes: configuration errors raised while building a
context, fatal errors that close a session, and recoverable errors that drop
a single record and count against the session's failure budget.
Cryptographic variants carry no secret-dependent detail.
*/

use std::fmt;
use std::io;
use thiserror::Error;

use crate::core::message::types::AlertDescription;

/// Result type for the PQ-DTLS protocol
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the PQ-DTLS protocol
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid context configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handshake did not complete in time
    #[error("Handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// No cipher suite is supported by both peers
    #[error("No common cipher suite")]
    NoCommonCipherSuite,

    /// Peer Finished message did not verify
    #[error("Handshake verification failed")]
    HandshakeVerificationFailed,

    /// Server selected a lower version without the downgrade sentinel
    #[error("Protocol downgrade detected")]
    DowngradeDetected,

    /// Peer certificate rejected by the verify policy
    #[error("Peer certificate rejected: {0}")]
    CertificateRejected(String),

    /// Unsupported or unacceptable protocol version
    #[error("Unsupported protocol version: {0:#06x}")]
    UnsupportedVersion(u16),

    /// Record failed AEAD authentication
    #[error("Record authentication failed")]
    AuthenticationFailed,

    /// Record was already seen or fell out of the replay window
    #[error("Replayed record (epoch {epoch}, sequence {sequence})")]
    ReplayedRecord {
        epoch: u16,
        sequence: u64,
    },

    /// Record or message framing is invalid
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Key exchange error (limited details for security)
    #[error("Key exchange failed: {0}")]
    KeyExchange(#[source] KeyExchangeError),

    /// Too many recoverable failures on one session
    #[error("Failure budget exceeded after {0} dropped records")]
    FailureBudgetExceeded(u32),

    /// Peer sent a fatal alert
    #[error("Fatal alert received: {0}")]
    FatalAlert(AlertDescription),

    /// Session closed
    #[error("Session closed")]
    SessionClosed,

    /// Session not in the state an operation requires
    #[error("Session not in correct state: expected {expected}, but was {actual}")]
    InvalidState {
        expected: String,
        actual: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Key exchange errors with limited details to prevent leaking information
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeError {
    /// Key generation failed
    #[error("key generation failed")]
    KeyGenError,

    /// Peer public key could not be used
    #[error("encapsulation failed")]
    EncapsulationError,

    /// Ciphertext or private key could not be used
    #[error("decapsulation failed")]
    DecapsulationError,
}

/// Copyable error discriminant delivered through session events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Config,
    HandshakeTimeout,
    NoCommonCipherSuite,
    HandshakeVerificationFailed,
    DowngradeDetected,
    CertificateRejected,
    UnsupportedVersion,
    AuthenticationFailed,
    ReplayedRecord,
    MalformedRecord,
    KeyGenError,
    EncapsulationError,
    DecapsulationError,
    FailureBudgetExceeded,
    FatalAlert,
    SessionClosed,
    InvalidState,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// Get the discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Config,
            Error::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            Error::NoCommonCipherSuite => ErrorKind::NoCommonCipherSuite,
            Error::HandshakeVerificationFailed => ErrorKind::HandshakeVerificationFailed,
            Error::DowngradeDetected => ErrorKind::DowngradeDetected,
            Error::CertificateRejected(_) => ErrorKind::CertificateRejected,
            Error::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Error::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            Error::ReplayedRecord { .. } => ErrorKind::ReplayedRecord,
            Error::MalformedRecord(_) => ErrorKind::MalformedRecord,
            Error::KeyExchange(KeyExchangeError::KeyGenError) => ErrorKind::KeyGenError,
            Error::KeyExchange(KeyExchangeError::EncapsulationError) => ErrorKind::EncapsulationError,
            Error::KeyExchange(KeyExchangeError::DecapsulationError) => ErrorKind::DecapsulationError,
            Error::FailureBudgetExceeded(_) => ErrorKind::FailureBudgetExceeded,
            Error::FatalAlert(_) => ErrorKind::FatalAlert,
            Error::SessionClosed => ErrorKind::SessionClosed,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error only drops the offending record
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailed | Error::ReplayedRecord { .. } | Error::MalformedRecord(_)
        )
    }

    /// Whether the error terminates the session
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::HandshakeTimeout(_)
            | Error::NoCommonCipherSuite
            | Error::HandshakeVerificationFailed
            | Error::DowngradeDetected
            | Error::CertificateRejected(_)
            | Error::UnsupportedVersion(_)
            | Error::KeyExchange(_)
            | Error::FailureBudgetExceeded(_)
            | Error::FatalAlert(_)
            | Error::Internal(_) => true,
            _ => false,
        }
    }

    /// The alert sent to the peer when this error aborts a session
    pub fn alert_description(&self) -> AlertDescription {
        match self {
            Error::HandshakeVerificationFailed => AlertDescription::DecryptError,
            Error::NoCommonCipherSuite => AlertDescription::HandshakeFailure,
            Error::DowngradeDetected => AlertDescription::InappropriateFallback,
            Error::CertificateRejected(_) => AlertDescription::BadCertificate,
            Error::UnsupportedVersion(_) => AlertDescription::ProtocolVersion,
            Error::KeyExchange(_) => AlertDescription::IllegalParameter,
            Error::MalformedRecord(_) | Error::FailureBudgetExceeded(_) => {
                AlertDescription::DecodeError
            }
            Error::AuthenticationFailed => AlertDescription::BadRecordMac,
            _ => AlertDescription::InternalError,
        }
    }
}

impl From<KeyExchangeError> for Error {
    fn from(error: KeyExchangeError) -> Self {
        Error::KeyExchange(error)
    }
}

/// Create a malformed record error
#[macro_export]
macro_rules! malformed_err {
    ($msg:expr) => {
        Err($crate::core::error::Error::MalformedRecord($msg.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        Err($crate::core::error::Error::MalformedRecord(format!($fmt, $($arg)*)))
    };
}

/// Create a configuration error
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        Err($crate::core::error::Error::Config($msg.to_string()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        Err($crate::core::error::Error::Config(format!($fmt, $($arg)*)))
    };
}

/// Create a key exchange error
#[macro_export]
macro_rules! key_exchange_err {
    ($err:expr) => {
        Err($crate::core::error::Error::KeyExchange($err))
    };
}

/// Create an invalid state error
#[macro_export]
macro_rules! invalid_state_err {
    ($expected:expr, $actual:expr) => {
        Err($crate::core::error::Error::InvalidState {
            expected: $expected.to_string(),
            actual: $actual.to_string(),
        })
    };
}

/// Convert from Error to io::Error (for socket-style callers)
impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(io_error) => io_error,
            Error::Config(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            Error::HandshakeTimeout(ms) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("Handshake timed out after {} ms", ms),
            ),
            Error::SessionClosed => io::Error::new(io::ErrorKind::NotConnected, "Session closed"),
            Error::InvalidState { expected, actual } => io::Error::new(
                io::ErrorKind::NotConnected,
                format!("Invalid state: expected {}, but was {}", expected, actual),
            ),
            Error::NoCommonCipherSuite
            | Error::DowngradeDetected
            | Error::CertificateRejected(_)
            | Error::HandshakeVerificationFailed
            | Error::FatalAlert(_) => {
                io::Error::new(io::ErrorKind::ConnectionRefused, error.to_string())
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
