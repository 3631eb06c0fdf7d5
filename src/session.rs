//! # Ride Session
//!
//! Per-user service tying the recorder, the stores and the rule engine
//! together. One session is created per signed-in user and owns all of that
//! user's in-process state; nothing is global.
//!
//! Stopping a ride runs, in order: finalize stats, attribute a trail,
//! persist (tiered), append to history, evaluate, save the ledger, queue
//! notifications.
//!
//! The ledger is only written after the stored copy has been loaded once, so
//! a failed load can never overwrite stored unlock times. Until then unlocks
//! live in memory and the save is deferred.

use std::collections::VecDeque;

use chrono::{DateTime, TimeZone};

use crate::achievements::{
    achievements_view, evaluate, Achievement, AchievementProgress, Evaluation,
};
use crate::config::TrackerConfig;
use crate::error::{Result, RideError};
use crate::metrics::HistoryTotals;
use crate::persistence::{
    merge_rides, LedgerStore, LocalStore, RideStore, StorageTier, TieredRideStore,
};
use crate::recorder::{FixSender, RideRecorder, RideState};
use crate::trails::TrailIndex;
use crate::units::Units;
use crate::{GeoFix, Ride, UnlockLedger, CATALOG};

/// Outcome of stopping a ride.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRide {
    pub ride: Ride,
    /// Tier that stored the ride, `None` if every tier failed and the ride
    /// only lives in this session's history
    pub persisted: Option<StorageTier>,
    /// Achievements this ride unlocked, in catalog order
    pub newly_unlocked: Vec<Achievement>,
}

pub struct RideSession<S, L> {
    user_id: String,
    store: S,
    ledger_store: L,
    config: TrackerConfig,
    trails: Option<TrailIndex>,
    recorder: RideRecorder,
    rides: Vec<Ride>,
    /// Completed rides no tier accepted, retried on every load
    unsaved: Vec<Ride>,
    ledger: UnlockLedger,
    ledger_loaded: bool,
    ledger_dirty: bool,
    progress: Vec<AchievementProgress>,
    notifications: VecDeque<Achievement>,
}

impl<P: RideStore> RideSession<TieredRideStore<P, LocalStore>, LocalStore> {
    /// Session over a primary ride service, with the local tier and the
    /// ledger store opened from `config.database_path`.
    pub fn open(user_id: impl Into<String>, primary: P, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let local = LocalStore::open(&config)?;
        let ledger_store = LocalStore::open(&config)?;
        Ok(Self::new(
            user_id,
            TieredRideStore::new(primary, local),
            ledger_store,
            config,
        ))
    }
}

impl<S: RideStore, L: LedgerStore> RideSession<S, L> {
    pub fn new(
        user_id: impl Into<String>,
        store: S,
        ledger_store: L,
        config: TrackerConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            ledger_store,
            config,
            trails: None,
            recorder: RideRecorder::new(),
            rides: Vec::new(),
            unsaved: Vec::new(),
            ledger: UnlockLedger::new(),
            ledger_loaded: false,
            ledger_dirty: false,
            progress: empty_progress(),
            notifications: VecDeque::new(),
        }
    }

    /// Attribute rides started without a trail id to the nearest trail head.
    pub fn with_trails(mut self, trails: TrailIndex) -> Self {
        self.trails = Some(trails);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger_store(&self) -> &L {
        &self.ledger_store
    }

    pub fn trails(&self) -> Option<&TrailIndex> {
        self.trails.as_ref()
    }

    pub fn units(&self) -> Units {
        self.config.units
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load ride history and the unlock ledger, then evaluate.
    ///
    /// Unsaved rides are retried first and stay in history whether or not
    /// the retry succeeds. Stored unlock times win over ones held in memory.
    /// If the ledger cannot be loaded the error is returned and nothing is
    /// evaluated. Returns achievements the history earned but the stored
    /// ledger lacked.
    pub fn load_achievements<Tz: TimeZone>(
        &mut self,
        now: &DateTime<Tz>,
    ) -> Result<Vec<Achievement>> {
        self.retry_unsaved();
        let listed = self.store.list(&self.user_id)?;
        self.rides = merge_rides(self.unsaved.clone(), listed);

        self.load_stored_ledger().map_err(|e| {
            log::warn!(
                "[RideSession] Failed to load unlock ledger for {}: {}",
                self.user_id,
                e
            );
            e
        })?;

        log::info!(
            "[RideSession] Loaded {} rides and {} unlocks for {}",
            self.rides.len(),
            self.ledger.len(),
            self.user_id
        );

        let evaluation = evaluate(&self.rides, &self.ledger, now);
        Ok(self.apply_evaluation(evaluation))
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn ride_state(&self) -> RideState {
        self.recorder.state()
    }

    /// Active ride as of the last drain of queued fixes.
    pub fn active_ride(&self) -> Option<&Ride> {
        self.recorder.active_ride()
    }

    /// Active ride including fixes still queued by the sensor. Call once
    /// per display tick.
    pub fn live_ride(&mut self) -> Option<&Ride> {
        self.recorder.live_ride()
    }

    /// Handle for the location-sensing collaborator.
    pub fn fix_sender(&self) -> FixSender {
        self.recorder.fix_sender()
    }

    /// Append a fix directly. Returns whether it was accepted.
    pub fn record_fix(&mut self, fix: GeoFix) -> bool {
        self.recorder.push_fix(fix)
    }

    /// Register a ride with the store and start recording it.
    pub fn start_ride<Tz: TimeZone>(
        &mut self,
        trail_id: Option<String>,
        now: &DateTime<Tz>,
    ) -> Result<&Ride> {
        if let Some(active) = self.recorder.active_ride() {
            return Err(RideError::RideAlreadyActive {
                ride_id: active.id.clone(),
            });
        }

        let start_time = now.timestamp_millis();
        let ride_id = self
            .store
            .create(&self.user_id, trail_id.as_deref(), start_time)?;
        self.recorder.start(ride_id, self.user_id.as_str(), trail_id, start_time)
    }

    pub fn pause_ride(&mut self) -> Result<()> {
        self.recorder.pause()
    }

    pub fn resume_ride(&mut self) -> Result<()> {
        self.recorder.resume()
    }

    /// Finalize, persist and evaluate the active ride.
    ///
    /// Storage failures never discard the ride: it is kept in the session
    /// history and still counts towards achievements.
    pub fn stop_ride<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Result<CompletedRide> {
        let mut ride = self.recorder.stop(now.timestamp_millis())?;

        if ride.trail_id.is_none() {
            if let Some(trails) = &self.trails {
                ride.trail_id = trails
                    .infer_trail(&ride.coordinates, self.config.trail_radius_km)
                    .map(|t| t.id.clone());
            }
        }

        let persisted = match self.store.save_completed(&ride) {
            Ok(tier) => Some(tier),
            Err(e) => {
                log::error!("[RideSession] Ride {} could not be stored: {}", ride.id, e);
                self.unsaved.push(ride.clone());
                None
            }
        };

        if !self.ledger_loaded {
            if let Err(e) = self.load_stored_ledger() {
                log::warn!("[RideSession] Unlock ledger still unavailable: {}", e);
            }
        }

        self.rides.push(ride.clone());
        let evaluation = evaluate(&self.rides, &self.ledger, now);
        let newly_unlocked = self.apply_evaluation(evaluation);

        Ok(CompletedRide {
            ride,
            persisted,
            newly_unlocked,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Ride history known to this session.
    pub fn rides(&self) -> &[Ride] {
        &self.rides
    }

    /// Completed rides waiting for a store to accept them.
    pub fn unsaved_rides(&self) -> &[Ride] {
        &self.unsaved
    }

    /// Catalog with unlock times.
    pub fn achievements(&self) -> Vec<Achievement> {
        achievements_view(&self.ledger)
    }

    /// Progress from the latest evaluation, in catalog order.
    pub fn progress(&self) -> &[AchievementProgress] {
        &self.progress
    }

    pub fn ledger(&self) -> &UnlockLedger {
        &self.ledger
    }

    pub fn totals(&self) -> HistoryTotals {
        HistoryTotals::from_rides(&self.rides)
    }

    /// Progress line in the configured units, e.g. `"12.5/160.9 km"`.
    pub fn format_progress(&self, progress: &AchievementProgress) -> String {
        let kind = progress.achievement_id.definition().requirement.kind;
        self.config.units.format_progress(kind, progress)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Oldest undismissed unlock notification.
    pub fn next_notification(&self) -> Option<&Achievement> {
        self.notifications.front()
    }

    /// Dismiss the oldest notification and return it.
    pub fn dismiss_notification(&mut self) -> Option<Achievement> {
        self.notifications.pop_front()
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    fn apply_evaluation(&mut self, evaluation: Evaluation) -> Vec<Achievement> {
        let Evaluation {
            progress,
            ledger,
            newly_unlocked,
        } = evaluation;
        self.progress = progress;
        self.ledger = ledger;

        if !newly_unlocked.is_empty() {
            self.ledger_dirty = true;
            self.notifications.extend(newly_unlocked.iter().copied());
        }
        self.save_ledger();
        newly_unlocked
    }

    /// Merge the stored ledger under the in-memory one; stored entries win.
    fn load_stored_ledger(&mut self) -> Result<()> {
        let mut merged = self.ledger_store.load(&self.user_id)?;
        let stored_len = merged.len();
        merged.merge(&self.ledger);
        if merged.len() > stored_len {
            self.ledger_dirty = true;
        }
        self.ledger = merged;
        self.ledger_loaded = true;
        Ok(())
    }

    fn save_ledger(&mut self) {
        if !self.ledger_dirty {
            return;
        }
        if !self.ledger_loaded {
            log::warn!(
                "[RideSession] Stored ledger for {} not loaded yet, deferring save",
                self.user_id
            );
            return;
        }
        // In-memory ledger stays authoritative if the save fails
        match self.ledger_store.save(&self.user_id, &self.ledger) {
            Ok(()) => self.ledger_dirty = false,
            Err(e) => log::warn!("[RideSession] Failed to save unlock ledger: {}", e),
        }
    }

    fn retry_unsaved(&mut self) {
        for ride in std::mem::take(&mut self.unsaved) {
            match self.store.save_completed(&ride) {
                Ok(tier) => {
                    log::info!("[RideSession] Stored ride {} on retry ({:?})", ride.id, tier)
                }
                Err(e) => {
                    log::warn!("[RideSession] Ride {} still unsaved: {}", ride.id, e);
                    self.unsaved.push(ride);
                }
            }
        }
    }
}

fn empty_progress() -> Vec<AchievementProgress> {
    CATALOG
        .iter()
        .map(|a| AchievementProgress {
            achievement_id: a.id,
            current: 0.0,
            target: a.requirement.target,
            unlocked: false,
        })
        .collect()
}
