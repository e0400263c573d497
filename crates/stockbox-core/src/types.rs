use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Product compartment number (1-based).
///
/// A `Level` is only known to be non-zero on construction. Whether it exists
/// on a particular kiosk depends on the configured level count, checked with
/// [`Level::within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Level(u16);

impl Level {
    /// Create a new level.
    ///
    /// # Errors
    /// Returns `Error::InvalidLevel` if `value` is zero.
    pub fn new(value: u16) -> Result<Self> {
        if value == 0 {
            return Err(Error::InvalidLevel {
                level: value,
                max: u16::MAX,
            });
        }
        Ok(Level(value))
    }

    /// Confirm this level exists on a kiosk with `levels` compartments.
    ///
    /// # Errors
    /// Returns `Error::InvalidLevel` if the level exceeds `levels`.
    pub fn within(self, levels: u16) -> Result<Self> {
        if self.0 > levels {
            return Err(Error::InvalidLevel {
                level: self.0,
                max: levels,
            });
        }
        Ok(self)
    }

    /// Get the raw level number.
    #[must_use]
    pub fn get(&self) -> u16 {
        self.0
    }

    /// Zero-based position of this level in per-level tables.
    #[must_use]
    pub fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Level {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        Level::new(value)
    }
}

impl From<Level> for u16 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl std::str::FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: u16 = s.trim().parse().map_err(|_| Error::InvalidLevel {
            level: 0,
            max: u16::MAX,
        })?;
        Level::new(value)
    }
}

/// Opaque purchase session identifier.
///
/// Generated when a session is created and used to correlate log lines,
/// telemetry records and purchase server calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id.
    #[must_use]
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|_| Error::InvalidSessionId(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    fn test_level_valid(#[case] value: u16) {
        let level = Level::new(value).unwrap();
        assert_eq!(level.get(), value);
        assert_eq!(level.index(), usize::from(value - 1));
        assert!(level.within(10).is_ok());
    }

    #[test]
    fn test_level_zero_rejected() {
        assert!(matches!(Level::new(0), Err(Error::InvalidLevel { level: 0, .. })));
    }

    #[test]
    fn test_level_outside_kiosk() {
        let level = Level::new(11).unwrap();
        assert!(matches!(
            level.within(10),
            Err(Error::InvalidLevel { level: 11, max: 10 })
        ));
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!(" 4 ".parse::<Level>().unwrap().get(), 4);
        assert!("abc".parse::<Level>().is_err());
        assert!("0".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_serde_rejects_zero() {
        #[derive(Deserialize)]
        struct Holder {
            level: Level,
        }

        let ok: Holder = toml::from_str("level = 2").unwrap();
        assert_eq!(ok.level.get(), 2);
        assert!(toml::from_str::<Holder>("level = 0").is_err());
    }

    #[test]
    fn test_session_id_unique_and_parseable() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);

        let parsed: SessionId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
