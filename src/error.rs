use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a [`crate::transport::Transport`] implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("device discovery failed: {0}")]
    Discovery(String),

    #[error("GATT server connection failed: {0}")]
    Connection(String),

    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("characteristic read failed: {0}")]
    Read(String),

    #[error("characteristic write failed: {0}")]
    Write(String),

    #[error("notification subscription failed: {0}")]
    Subscribe(String),

    #[error("bluetooth error: {0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NegotiationError {
    #[error("GATT server is not connected")]
    LinkNotConnected,

    #[error("a required GATT service was not found: {missing:?}")]
    RequiredServiceUnavailable { missing: Vec<Uuid> },
}

/// Step of the connect sequence an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Availability,
    Discovery,
    ServerConnect,
    ServiceNegotiation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Availability => "availability check",
            Stage::Discovery => "discovery",
            Stage::ServerConnect => "server connect",
            Stage::ServiceNegotiation => "service negotiation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Bluetooth is not available")]
    BluetoothUnavailable,

    #[error("discovery stage failed")]
    DiscoveryFailed(#[source] TransportError),

    #[error("server connect stage failed")]
    ServerConnectionFailed(#[source] TransportError),

    #[error("service negotiation stage failed")]
    Negotiation(#[source] NegotiationError),
}

impl ConnectError {
    pub fn stage(&self) -> Stage {
        match self {
            ConnectError::BluetoothUnavailable => Stage::Availability,
            ConnectError::DiscoveryFailed(_) => Stage::Discovery,
            ConnectError::ServerConnectionFailed(_) => Stage::ServerConnect,
            ConnectError::Negotiation(_) => Stage::ServiceNegotiation,
        }
    }
}

/// Diagnostic detail behind [`IntervalError::ReadFailed`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntervalFault {
    #[error("value not found")]
    ValueUnavailable,

    #[error("invalid length of {0} bytes, expected 2 bytes")]
    MalformedLength(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntervalError {
    #[error("interval characteristic is not connected")]
    NotConnected,

    #[error("failed to read interval value: {0}")]
    ReadFailed(#[source] IntervalFault),

    #[error("failed to convert {0} to a 16-bit unsigned integer")]
    Encoding(i64),

    #[error("characteristic write error: {0}")]
    CharacteristicWrite(#[source] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("failed to start ECG stream: {0}")]
    StartFailed(#[source] TransportError),
}

/// Reason a single notification frame was dropped. Never ends the stream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid ECG frame: length of {0} bytes")]
    TooShort(usize),

    #[error("ECG data received but interval is unknown")]
    UnknownInterval,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connect_error_carries_stage_and_cause() {
        let err = ConnectError::ServerConnectionFailed(TransportError::Connection(
            "timed out".to_string(),
        ));
        assert_eq!(err.stage(), Stage::ServerConnect);
        assert_eq!(err.to_string(), "server connect stage failed");
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("GATT server connection failed: timed out".to_string())
        );
        assert_eq!(
            format!("{:#}", anyhow::Error::new(err)),
            "server connect stage failed: GATT server connection failed: timed out"
        );

        let err = ConnectError::Negotiation(NegotiationError::LinkNotConnected);
        assert_eq!(err.stage(), Stage::ServiceNegotiation);
        assert_eq!(err.stage().to_string(), "service negotiation");
    }

    #[test]
    fn test_interval_error_display() {
        let err = IntervalError::ReadFailed(IntervalFault::MalformedLength(1));
        assert_eq!(
            err.to_string(),
            "failed to read interval value: invalid length of 1 bytes, expected 2 bytes"
        );

        let err = IntervalError::Encoding(70_000);
        assert_eq!(
            err.to_string(),
            "failed to convert 70000 to a 16-bit unsigned integer"
        );
    }
}
