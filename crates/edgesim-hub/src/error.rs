//! Error types for edgesim-hub crate

use edgesim_core::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the IoT Hub transport
#[derive(Debug, Error)]
pub enum HubError {
    /// Connection string is missing a field or malformed
    #[error("Invalid connection string: {0}")]
    ConnectionString(String),

    /// Shared access key is not valid base64
    #[error("Invalid shared access key: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    /// Token signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Request could not be handed to the MQTT event loop
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Network or protocol error while connecting
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Hub rejected the connection
    #[error("Connection refused: {0}")]
    Refused(String),

    /// The event loop stopped after the connection was established
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No CONNACK within the connect timeout
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    /// Check if this error happened while establishing the connection
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            HubError::Connection(_) | HubError::Refused(_) | HubError::Timeout(_)
        )
    }
}

/// Result type for IoT Hub operations
pub type HubResult<T> = Result<T, HubError>;

impl From<HubError> for ClientError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Serialization(e) => ClientError::SerializationError(e),
            e if e.is_connect_error() => ClientError::Connection(e.to_string()),
            e @ (HubError::Client(_) | HubError::ConnectionLost(_)) => {
                ClientError::Send(e.to_string())
            }
            e => ClientError::Other(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_connect_error() {
        assert!(HubError::Refused("NotAuthorized".to_string()).is_connect_error());
        assert!(HubError::Timeout(Duration::from_secs(10)).is_connect_error());
        assert!(!HubError::ConnectionLost("reset".to_string()).is_connect_error());
        assert!(!HubError::Config("bad".to_string()).is_connect_error());
    }

    #[test]
    fn test_into_client_error() {
        let err: ClientError = HubError::ConnectionLost("reset by peer".to_string()).into();
        assert!(matches!(err, ClientError::Send(ref m) if m.contains("reset by peer")));

        let err: ClientError = HubError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, ClientError::Connection(_)));

        let err: ClientError = HubError::ConnectionString("missing HostName".to_string()).into();
        assert!(matches!(err, ClientError::Other(_)));
    }
}
