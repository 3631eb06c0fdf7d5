//! Achievement catalog and rule evaluation.
//!
//! Rules are evaluated over a rider's full history of completed rides. Each
//! requirement kind maps to one pure metric function, and the unlock ledger
//! makes unlocking monotonic: an achievement is unlocked the first time its
//! metric reaches the target and stays unlocked from then on.
//!
//! ## Example
//! ```rust
//! use chrono::Utc;
//! use ride_tracker::achievements::{evaluate, AchievementId};
//! use ride_tracker::{Ride, UnlockLedger};
//!
//! let ride = Ride::new("r1", "user-1", None, 0);
//! let result = evaluate(&[ride], &UnlockLedger::new(), &Utc::now());
//!
//! assert_eq!(result.newly_unlocked.len(), 1);
//! assert_eq!(result.newly_unlocked[0].id, AchievementId::FirstRide);
//! ```

use std::collections::HashSet;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::ledger::UnlockLedger;
use crate::streak::current_streak;
use crate::Ride;

/// Fixed set of achievements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementId {
    FirstRide,
    Century,
    Climber,
    Explorer,
    Consistent,
    SpeedDemon,
}

impl AchievementId {
    /// Stable storage key.
    pub fn key(self) -> &'static str {
        match self {
            AchievementId::FirstRide => "first_ride",
            AchievementId::Century => "century",
            AchievementId::Climber => "climber",
            AchievementId::Explorer => "explorer",
            AchievementId::Consistent => "consistent",
            AchievementId::SpeedDemon => "speed_demon",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        CATALOG.iter().map(|a| a.id).find(|id| id.key() == key)
    }

    /// Catalog entry for this id.
    pub fn definition(self) -> &'static Achievement {
        match self {
            AchievementId::FirstRide => &CATALOG[0],
            AchievementId::Century => &CATALOG[1],
            AchievementId::Climber => &CATALOG[2],
            AchievementId::Explorer => &CATALOG[3],
            AchievementId::Consistent => &CATALOG[4],
            AchievementId::SpeedDemon => &CATALOG[5],
        }
    }
}

/// Aggregate a requirement is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    /// Number of rides
    Rides,
    /// Total distance, km
    Distance,
    /// Total elevation gain, m
    Elevation,
    /// Distinct trails ridden
    Trails,
    /// Consecutive riding days
    Streak,
    /// Best max speed, m/s
    Speed,
}

impl RequirementKind {
    /// Unclamped metric value for this kind over a deduplicated history.
    pub fn current_value<Tz: TimeZone>(self, rides: &[&Ride], now: &DateTime<Tz>) -> f64 {
        match self {
            RequirementKind::Rides => ride_count(rides),
            RequirementKind::Distance => total_distance(rides),
            RequirementKind::Elevation => total_elevation(rides),
            RequirementKind::Trails => distinct_trails(rides),
            RequirementKind::Streak => streak_days(rides, now),
            RequirementKind::Speed => best_max_speed(rides),
        }
    }
}

/// Unlock condition: `current >= target`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub kind: RequirementKind,
    pub target: f64,
}

/// An achievement definition, optionally annotated with its unlock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: AchievementId,
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub requirement: Requirement,
    /// Unlock time, ms since epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<i64>,
}

const fn definition(
    id: AchievementId,
    title: &'static str,
    description: &'static str,
    icon: &'static str,
    kind: RequirementKind,
    target: f64,
) -> Achievement {
    Achievement {
        id,
        title,
        description,
        icon,
        requirement: Requirement { kind, target },
        unlocked_at: None,
    }
}

/// The static catalog, in evaluation and notification order.
pub static CATALOG: [Achievement; 6] = [
    definition(
        AchievementId::FirstRide,
        "First Ride",
        "Complete your first ride",
        "https://images.unsplash.com/photo-1541625602330-2277a4c46182?w=200&h=200&fit=crop",
        RequirementKind::Rides,
        1.0,
    ),
    definition(
        AchievementId::Century,
        "Century",
        "Ride 100 total miles",
        "https://images.unsplash.com/photo-1559827260-dc66d52bef19?w=200&h=200&fit=crop",
        RequirementKind::Distance,
        160.934,
    ),
    definition(
        AchievementId::Climber,
        "Climber",
        "Gain 10,000 feet of elevation",
        "https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=200&h=200&fit=crop",
        RequirementKind::Elevation,
        3048.0,
    ),
    definition(
        AchievementId::Explorer,
        "Explorer",
        "Visit 10 different trails",
        "https://images.unsplash.com/photo-1464822759023-fed622ff2c3b?w=200&h=200&fit=crop",
        RequirementKind::Trails,
        10.0,
    ),
    definition(
        AchievementId::Consistent,
        "Consistent",
        "Ride 7 days in a row",
        "https://images.unsplash.com/photo-1504280390367-361c6d9f38f4?w=200&h=200&fit=crop",
        RequirementKind::Streak,
        7.0,
    ),
    definition(
        AchievementId::SpeedDemon,
        "Speed Demon",
        "Reach 30+ mph on a ride",
        "https://images.unsplash.com/photo-1558981852-426c6c22a060?w=200&h=200&fit=crop",
        RequirementKind::Speed,
        13.4112,
    ),
];

/// Display progress towards one achievement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProgress {
    pub achievement_id: AchievementId,
    /// Metric value clamped to `[0, target]`
    pub current: f64,
    pub target: f64,
    pub unlocked: bool,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One entry per catalog achievement, in catalog order
    pub progress: Vec<AchievementProgress>,
    /// Input ledger plus this pass's unlocks
    pub ledger: UnlockLedger,
    /// Achievements unlocked by this pass, in catalog order
    pub newly_unlocked: Vec<Achievement>,
}

impl Evaluation {
    pub fn unlocked_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn has_new_unlocks(&self) -> bool {
        !self.newly_unlocked.is_empty()
    }
}

/// Evaluate every catalog rule over a ride history.
///
/// Rides sharing an id are counted once (first occurrence wins). Unlocks are
/// stamped with `now`. Entries already in `ledger` are carried over untouched,
/// so re-running over the same history never changes the ledger.
///
/// # Arguments
/// * `rides` - Completed rides, any order
/// * `ledger` - Unlocks recorded so far
/// * `now` - Evaluation time; its time zone defines streak calendar days
pub fn evaluate<Tz: TimeZone>(
    rides: &[Ride],
    ledger: &UnlockLedger,
    now: &DateTime<Tz>,
) -> Evaluation {
    let history = dedupe_rides(rides);
    let stamp = now.timestamp_millis();

    let mut updated = ledger.clone();
    let mut newly_unlocked = Vec::new();
    let mut progress = Vec::with_capacity(CATALOG.len());

    for achievement in &CATALOG {
        let Requirement { kind, target } = achievement.requirement;
        let current = kind.current_value(&history, now);

        if current >= target && updated.unlock(achievement.id, stamp) {
            newly_unlocked.push(Achievement {
                unlocked_at: Some(stamp),
                ..*achievement
            });
        }

        progress.push(AchievementProgress {
            achievement_id: achievement.id,
            current: current.clamp(0.0, target),
            target,
            unlocked: updated.is_unlocked(achievement.id),
        });
    }

    if !newly_unlocked.is_empty() {
        log::info!(
            "[Achievements] Unlocked {} achievement(s) over {} rides: {:?}",
            newly_unlocked.len(),
            history.len(),
            newly_unlocked.iter().map(|a| a.id.key()).collect::<Vec<_>>()
        );
    }

    Evaluation {
        progress,
        ledger: updated,
        newly_unlocked,
    }
}

/// Catalog annotated with unlock times from a ledger.
pub fn achievements_view(ledger: &UnlockLedger) -> Vec<Achievement> {
    CATALOG
        .iter()
        .map(|a| Achievement {
            unlocked_at: ledger.unlocked_at(a.id),
            ..*a
        })
        .collect()
}

/// Drop rides whose id was already seen.
pub fn dedupe_rides(rides: &[Ride]) -> Vec<&Ride> {
    let mut seen = HashSet::new();
    let history: Vec<&Ride> = rides.iter().filter(|r| seen.insert(r.id.as_str())).collect();

    if history.len() < rides.len() {
        log::debug!(
            "[Achievements] Ignored {} duplicate ride(s)",
            rides.len() - history.len()
        );
    }
    history
}

// ============================================================================
// Metric Functions
// ============================================================================

fn ride_count(rides: &[&Ride]) -> f64 {
    rides.len() as f64
}

fn total_distance(rides: &[&Ride]) -> f64 {
    rides.iter().map(|r| r.stats.distance).sum()
}

fn total_elevation(rides: &[&Ride]) -> f64 {
    rides.iter().map(|r| r.stats.elevation_gain).sum()
}

fn distinct_trails(rides: &[&Ride]) -> f64 {
    rides
        .iter()
        .filter_map(|r| r.trail_id.as_deref())
        .filter(|t| !t.is_empty())
        .collect::<HashSet<_>>()
        .len() as f64
}

fn streak_days<Tz: TimeZone>(rides: &[&Ride], now: &DateTime<Tz>) -> f64 {
    let starts: Vec<i64> = rides.iter().map(|r| r.start_time).collect();
    current_streak(&starts, now) as f64
}

fn best_max_speed(rides: &[&Ride]) -> f64 {
    rides.iter().map(|r| r.stats.max_speed).fold(0.0, f64::max)
}
