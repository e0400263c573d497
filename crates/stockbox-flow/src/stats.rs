use serde::{Deserialize, Serialize};

use crate::state_machine::StatKind;

/// Monotonic purchase counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub completed_purchases: u64,
    pub failed_purchases: u64,
    pub network_incidents: u64,
    pub server_incidents: u64,
}

impl Statistics {
    pub fn get(&self, kind: StatKind) -> u64 {
        match kind {
            StatKind::CompletedPurchases => self.completed_purchases,
            StatKind::FailedPurchases => self.failed_purchases,
            StatKind::NetworkIncidents => self.network_incidents,
            StatKind::ServerIncidents => self.server_incidents,
        }
    }

    /// Bump one counter and return its new value.
    pub fn increment(&mut self, kind: StatKind) -> u64 {
        let counter = match kind {
            StatKind::CompletedPurchases => &mut self.completed_purchases,
            StatKind::FailedPurchases => &mut self.failed_purchases,
            StatKind::NetworkIncidents => &mut self.network_incidents,
            StatKind::ServerIncidents => &mut self.server_incidents,
        };
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Counters seeded from persisted `(name, value)` pairs.
    ///
    /// Unknown names are skipped.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        let mut stats = Self::default();
        for (name, value) in pairs {
            let Some(kind) = StatKind::from_name(name) else {
                continue;
            };
            match kind {
                StatKind::CompletedPurchases => stats.completed_purchases = value,
                StatKind::FailedPurchases => stats.failed_purchases = value,
                StatKind::NetworkIncidents => stats.network_incidents = value,
                StatKind::ServerIncidents => stats.server_incidents = value,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_returns_new_value() {
        let mut stats = Statistics::default();
        assert_eq!(stats.increment(StatKind::FailedPurchases), 1);
        assert_eq!(stats.increment(StatKind::FailedPurchases), 2);
        assert_eq!(stats.get(StatKind::FailedPurchases), 2);
        assert_eq!(stats.get(StatKind::CompletedPurchases), 0);
    }

    #[test]
    fn test_from_pairs() {
        let stats = Statistics::from_pairs([
            ("completed_purchases", 12),
            ("server_incidents", 3),
            ("legacy_counter", 99),
        ]);
        assert_eq!(stats.completed_purchases, 12);
        assert_eq!(stats.server_incidents, 3);
        assert_eq!(stats.failed_purchases, 0);
    }
}
