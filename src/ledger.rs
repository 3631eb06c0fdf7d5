//! Per-user unlock ledger.
//!
//! The ledger is the only achievement state that outlives a process. It is
//! insert-only: once an id is present its timestamp never changes and the id
//! is never removed.
//!
//! Storage format is a JSON array of `[id, RFC 3339 timestamp]` pairs.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::achievements::AchievementId;
use crate::error::{Result, RideError};

/// Achievement id -> unlock timestamp (ms since epoch).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockLedger {
    entries: BTreeMap<AchievementId, i64>,
}

impl UnlockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unlock. Returns `false` (and leaves the ledger untouched)
    /// if the id was already present.
    pub fn unlock(&mut self, id: AchievementId, at: i64) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, at);
        true
    }

    pub fn is_unlocked(&self, id: AchievementId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn unlocked_at(&self, id: AchievementId) -> Option<i64> {
        self.entries.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AchievementId, i64)> + '_ {
        self.entries.iter().map(|(id, at)| (*id, *at))
    }

    /// Fold another ledger in. Existing entries win.
    pub fn merge(&mut self, other: &UnlockLedger) {
        for (id, at) in other.iter() {
            self.unlock(id, at);
        }
    }

    /// Serialize to the opaque storage blob.
    pub fn to_blob(&self) -> Result<String> {
        let pairs: Vec<(AchievementId, String)> = self
            .iter()
            .map(|(id, at)| Ok((id, format_timestamp(at)?)))
            .collect::<Result<_>>()?;
        Ok(serde_json::to_string(&pairs)?)
    }

    /// Parse a storage blob. Unknown achievement ids are skipped so that a
    /// ledger written by a newer catalog still loads.
    pub fn from_blob(blob: &str) -> Result<Self> {
        let pairs: Vec<(String, String)> = serde_json::from_str(blob)?;
        let mut ledger = Self::new();
        for (id, at) in pairs {
            let Some(id) = AchievementId::from_key(&id) else {
                log::warn!("[Ledger] Skipping unknown achievement id '{}'", id);
                continue;
            };
            ledger.unlock(id, parse_timestamp(&at)?);
        }
        Ok(ledger)
    }
}

fn format_timestamp(ms: i64) -> Result<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| RideError::Serialization {
            message: format!("timestamp {} out of range", ms),
        })
}

fn parse_timestamp(value: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| RideError::Serialization {
            message: format!("invalid unlock timestamp '{}': {}", value, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_is_insert_only() {
        let mut ledger = UnlockLedger::new();
        assert!(ledger.unlock(AchievementId::FirstRide, 1_000));
        assert!(!ledger.unlock(AchievementId::FirstRide, 2_000));
        assert_eq!(ledger.unlocked_at(AchievementId::FirstRide), Some(1_000));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_merge_keeps_existing() {
        let mut a = UnlockLedger::new();
        a.unlock(AchievementId::Century, 10);
        let mut b = UnlockLedger::new();
        b.unlock(AchievementId::Century, 20);
        b.unlock(AchievementId::Climber, 30);

        a.merge(&b);
        assert_eq!(a.unlocked_at(AchievementId::Century), Some(10));
        assert_eq!(a.unlocked_at(AchievementId::Climber), Some(30));
    }

    #[test]
    fn test_blob_format() {
        let mut ledger = UnlockLedger::new();
        ledger.unlock(AchievementId::SpeedDemon, 1_718_000_000_123);

        let blob = ledger.to_blob().unwrap();
        assert_eq!(blob, r#"[["speed_demon","2024-06-10T06:13:20.123Z"]]"#);
        assert_eq!(UnlockLedger::from_blob(&blob).unwrap(), ledger);
    }

    #[test]
    fn test_blob_skips_unknown_ids() {
        let blob = r#"[["first_ride","2024-01-01T00:00:00Z"],
                       ["moon_landing","2024-01-02T00:00:00Z"]]"#;
        let ledger = UnlockLedger::from_blob(blob).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_unlocked(AchievementId::FirstRide));
    }

    #[test]
    fn test_blob_rejects_garbage() {
        assert!(UnlockLedger::from_blob("{").is_err());
        let bad_time = r#"[["first_ride","yesterday"]]"#;
        assert!(matches!(
            UnlockLedger::from_blob(bad_time),
            Err(RideError::Serialization { .. })
        ));
    }
}
