use thiserror::Error;

/// Errors talking to the purchase server.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Purchase server unreachable: {message}")]
    Unreachable { message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Purchase server returned HTTP {status}")]
    Status { status: u16 },

    #[error("Malformed response: {message}")]
    Decode { message: String },

    #[error("Client configuration error: {message}")]
    Configuration { message: String },
}

impl ClientError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Status { status }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The server answered, but with a failure.
    pub fn is_server_side(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Decode { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::status(status.as_u16())
        } else {
            Self::unreachable(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ClientError::status(503).to_string(),
            "Purchase server returned HTTP 503"
        );
        assert_eq!(
            ClientError::unreachable("connection refused").to_string(),
            "Purchase server unreachable: connection refused"
        );
    }

    #[test]
    fn test_server_side_classification() {
        assert!(ClientError::status(500).is_server_side());
        assert!(ClientError::decode("eof").is_server_side());
        assert!(!ClientError::Timeout.is_server_side());
        assert!(!ClientError::unreachable("dns").is_server_side());
    }
}
