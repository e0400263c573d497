use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Domain errors
    #[error("Invalid level: {level} (valid range 1..={max})")]
    InvalidLevel { level: u16, max: u16 },

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_display() {
        let error = Error::InvalidLevel { level: 11, max: 10 };
        assert_eq!(error.to_string(), "Invalid level: 11 (valid range 1..=10)");
    }

    #[test]
    fn test_config_error_display() {
        let error = Error::Config("levels must be greater than zero".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: levels must be greater than zero"
        );
    }
}
