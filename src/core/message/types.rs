/*!
Message types for the PQ-DTLS protocol.

This module defines record content types, handshake message types and
alert codes exchanged in the protocol.
*/

use std::fmt;

/// Record content types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Change cipher spec record
    ChangeCipherSpec = 20,
    /// Alert record
    Alert = 21,
    /// Handshake record
    Handshake = 22,
    /// Application data record
    ApplicationData = 23,
}

impl ContentType {
    /// Convert a u8 value to a ContentType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }

    /// Get the u8 value of this ContentType
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::ChangeCipherSpec => write!(f, "ChangeCipherSpec"),
            ContentType::Alert => write!(f, "Alert"),
            ContentType::Handshake => write!(f, "Handshake"),
            ContentType::ApplicationData => write!(f, "ApplicationData"),
        }
    }
}

/// Handshake message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    /// Convert a u8 value to a HandshakeType
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            11 => Some(HandshakeType::Certificate),
            12 => Some(HandshakeType::ServerKeyExchange),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            _ => None,
        }
    }

    /// Get the u8 value of this HandshakeType
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Alert severity
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    /// Convert a u8 value to an AlertLevel
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AlertLevel::Warning),
            2 => Some(AlertLevel::Fatal),
            _ => None,
        }
    }
}

/// Alert descriptions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    HandshakeFailure = 40,
    BadCertificate = 42,
    IllegalParameter = 47,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InternalError = 80,
    InappropriateFallback = 86,
    /// Any description this implementation does not name
    Unknown = 255,
}

impl AlertDescription {
    /// Convert a u8 value to an AlertDescription
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => AlertDescription::CloseNotify,
            10 => AlertDescription::UnexpectedMessage,
            20 => AlertDescription::BadRecordMac,
            40 => AlertDescription::HandshakeFailure,
            42 => AlertDescription::BadCertificate,
            47 => AlertDescription::IllegalParameter,
            50 => AlertDescription::DecodeError,
            51 => AlertDescription::DecryptError,
            70 => AlertDescription::ProtocolVersion,
            80 => AlertDescription::InternalError,
            86 => AlertDescription::InappropriateFallback,
            _ => AlertDescription::Unknown,
        }
    }

    /// Get the u8 value of this AlertDescription
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Alert message body (2 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    /// Fatal alert with the given description
    pub fn fatal(description: AlertDescription) -> Self {
        Self { level: AlertLevel::Fatal, description }
    }

    /// Orderly shutdown notification
    pub fn close_notify() -> Self {
        Self { level: AlertLevel::Warning, description: AlertDescription::CloseNotify }
    }

    /// Encode the alert body
    pub fn to_bytes(self) -> [u8; 2] {
        [self.level as u8, self.description.as_u8()]
    }

    /// Parse an alert body
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 2 {
            return None;
        }
        Some(Self {
            level: AlertLevel::from_u8(bytes[0])?,
            description: AlertDescription::from_u8(bytes[1]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_conversion() {
        assert_eq!(ContentType::from_u8(20), Some(ContentType::ChangeCipherSpec));
        assert_eq!(ContentType::from_u8(21), Some(ContentType::Alert));
        assert_eq!(ContentType::from_u8(22), Some(ContentType::Handshake));
        assert_eq!(ContentType::from_u8(23), Some(ContentType::ApplicationData));
        assert_eq!(ContentType::from_u8(24), None);

        assert_eq!(ContentType::ApplicationData.as_u8(), 23);
    }

    #[test]
    fn test_handshake_type_conversion() {
        assert_eq!(HandshakeType::from_u8(1), Some(HandshakeType::ClientHello));
        assert_eq!(HandshakeType::from_u8(12), Some(HandshakeType::ServerKeyExchange));
        assert_eq!(HandshakeType::from_u8(20), Some(HandshakeType::Finished));
        assert_eq!(HandshakeType::from_u8(3), None);
    }

    #[test]
    fn test_alert_codec() {
        let alert = Alert::fatal(AlertDescription::DecryptError);
        assert_eq!(alert.to_bytes(), [2, 51]);
        assert_eq!(Alert::from_bytes(&[2, 51]), Some(alert));
        assert_eq!(Alert::from_bytes(&[9, 0]), None);
        assert_eq!(Alert::from_bytes(&[1]), None);
        assert_eq!(AlertDescription::from_u8(99), AlertDescription::Unknown);
    }
}
