use core::fmt;

use serde::{Deserialize, Serialize};

/// Classified anomaly published to observers.
///
/// Emitted once per occurrence; de-duplication is left to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorEvent {
    /// Device unreachable, handshake failed or link lost
    ConnectionError,
    /// Reply could not be decoded, or carried implausible data
    DataParsingError,
    /// An operation deadline passed while the device stayed reachable
    TimeoutError,
    /// Anything unexpected, with a diagnostic message
    GenericError(String),
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionError => write!(f, "Connection error"),
            Self::DataParsingError => write!(f, "Data parsing error"),
            Self::TimeoutError => write!(f, "Timeout error"),
            Self::GenericError(message) => write!(f, "Error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_wire_shape() {
        assert_eq!(
            serde_json::to_string(&ErrorEvent::ConnectionError).unwrap(),
            "{\"kind\":\"CONNECTION_ERROR\"}"
        );
        assert_eq!(
            serde_json::to_string(&ErrorEvent::GenericError("boom".into())).unwrap(),
            "{\"kind\":\"GENERIC_ERROR\",\"message\":\"boom\"}"
        );
    }
}
