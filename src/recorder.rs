//! # Ride Recorder
//!
//! Lifecycle state machine for the single active ride:
//!
//! ```text
//! Idle --start--> Recording --pause--> Paused
//!                  ^   |                 |
//!                  |   +-----stop----+   |
//!                  +-----resume------|---+
//!                                    v
//!                               Completed --start--> Recording (new ride)
//! ```
//!
//! Fixes are accepted only while recording. The sensing collaborator pushes
//! fixes through a [`FixSender`], which never blocks; pending fixes are
//! drained before every transition so each fix is judged by the state that
//! was in force when it arrived.
//!
//! Queued fixes reach the active ride on the next transition, `push_fix`,
//! `sync` or `live_ride`. Hosts showing a live ride call `live_ride` (or
//! `sync`) once per display tick. Outside a recording window the sender
//! drops fixes itself, so nothing accumulates while idle, paused or
//! completed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use crate::error::{OptionExt, Result, RideError};
use crate::metrics::compute_stats;
use crate::{GeoFix, Ride};

/// Lifecycle state of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideState {
    Idle,
    Recording,
    Paused,
    Completed,
}

impl RideState {
    /// Whether a ride is in progress (recording or paused).
    pub fn is_active(self) -> bool {
        matches!(self, RideState::Recording | RideState::Paused)
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideState::Idle => "idle",
            RideState::Recording => "recording",
            RideState::Paused => "paused",
            RideState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Recording window shared between a recorder and its senders.
#[derive(Debug, Default)]
struct FixGate {
    open: AtomicBool,
    dropped: AtomicUsize,
}

/// Non-blocking handle for delivering fixes to a recorder.
#[derive(Debug, Clone)]
pub struct FixSender {
    tx: mpsc::Sender<GeoFix>,
    gate: Arc<FixGate>,
}

impl FixSender {
    /// Queue a fix. Returns `false` if the recorder is not recording or has
    /// been dropped; such fixes are never queued.
    pub fn send(&self, fix: GeoFix) -> bool {
        if !self.gate.open.load(Ordering::Acquire) {
            self.gate.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.tx.send(fix).is_ok()
    }
}

/// The ride lifecycle state machine.
pub struct RideRecorder {
    state: RideState,
    active: Option<Ride>,
    tx: mpsc::Sender<GeoFix>,
    rx: mpsc::Receiver<GeoFix>,
    gate: Arc<FixGate>,
    discarded: usize,
}

impl Default for RideRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RideRecorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            state: RideState::Idle,
            active: None,
            tx,
            rx,
            gate: Arc::new(FixGate::default()),
            discarded: 0,
        }
    }

    pub fn state(&self) -> RideState {
        self.state
    }

    /// The ride currently recording or paused, as of the last drain.
    ///
    /// Fixes still queued in a [`FixSender`] are not included; use
    /// [`live_ride`](Self::live_ride) to see them.
    pub fn active_ride(&self) -> Option<&Ride> {
        self.active.as_ref()
    }

    /// The ride currently recording or paused, after processing queued fixes.
    pub fn live_ride(&mut self) -> Option<&Ride> {
        self.drain_pending();
        self.active.as_ref()
    }

    /// Number of fixes dropped because they arrived outside a recording window.
    pub fn discarded_count(&self) -> usize {
        self.discarded + self.gate.dropped.load(Ordering::Relaxed)
    }

    /// Handle for the location-sensing collaborator.
    pub fn fix_sender(&self) -> FixSender {
        FixSender {
            tx: self.tx.clone(),
            gate: Arc::clone(&self.gate),
        }
    }

    /// Begin a new ride. Rejected while another ride is recording or paused.
    pub fn start(
        &mut self,
        ride_id: impl Into<String>,
        user_id: impl Into<String>,
        trail_id: Option<String>,
        now: i64,
    ) -> Result<&Ride> {
        if let Some(ride) = self.active.as_ref().filter(|_| self.state.is_active()) {
            return Err(RideError::RideAlreadyActive {
                ride_id: ride.id.clone(),
            });
        }

        // Anything queued before the ride existed is stale
        self.drain_pending();

        let ride = Ride::new(ride_id, user_id, trail_id, now);
        log::info!(
            "[RideRecorder] Started ride {} (trail: {:?})",
            ride.id,
            ride.trail_id
        );
        self.set_state(RideState::Recording);
        Ok(&*self.active.insert(ride))
    }

    /// Stop appending fixes until resumed.
    pub fn pause(&mut self) -> Result<()> {
        self.require(RideState::Recording, "pause")?;
        self.drain_pending();
        self.set_state(RideState::Paused);
        log::debug!("[RideRecorder] Paused");
        Ok(())
    }

    /// Resume appending fixes.
    pub fn resume(&mut self) -> Result<()> {
        self.require(RideState::Paused, "resume")?;
        self.drain_pending();
        self.set_state(RideState::Recording);
        log::debug!("[RideRecorder] Resumed");
        Ok(())
    }

    /// Append a fix directly. Returns whether it was accepted.
    ///
    /// Fixes already queued through a [`FixSender`] are processed first.
    pub fn push_fix(&mut self, fix: GeoFix) -> bool {
        self.drain_pending();
        self.accept(fix)
    }

    /// Process queued fixes under the current state. Returns how many were
    /// appended.
    pub fn sync(&mut self) -> usize {
        self.drain_pending()
    }

    /// Finalize the active ride: set its end time and compute its stats.
    ///
    /// The recorder moves to `Completed` and hands the ride to the caller;
    /// no further fixes can reach it.
    pub fn stop(&mut self, now: i64) -> Result<Ride> {
        if !self.state.is_active() {
            return Err(match self.state {
                RideState::Idle => RideError::NoActiveRide,
                other => RideError::InvalidTransition {
                    from: other.to_string(),
                    action: "stop".to_string(),
                },
            });
        }

        self.drain_pending();
        let mut ride = self.active.take().ok_or_no_active_ride()?;
        self.set_state(RideState::Completed);

        ride.end_time = Some(now);
        ride.stats = compute_stats(&ride.coordinates, ride.start_time, now);

        log::info!(
            "[RideRecorder] Stopped ride {}: {} fixes, {:.2} km, {:.0} m gain, {:.0}s",
            ride.id,
            ride.coordinates.len(),
            ride.stats.distance,
            ride.stats.elevation_gain,
            ride.stats.duration
        );
        Ok(ride)
    }

    fn require(&self, expected: RideState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RideError::InvalidTransition {
                from: self.state.to_string(),
                action: action.to_string(),
            })
        }
    }

    fn set_state(&mut self, state: RideState) {
        self.state = state;
        self.gate
            .open
            .store(state == RideState::Recording, Ordering::Release);
    }

    fn drain_pending(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(fix) = self.rx.try_recv() {
            if self.accept(fix) {
                accepted += 1;
            }
        }
        accepted
    }

    fn accept(&mut self, fix: GeoFix) -> bool {
        match (&mut self.active, self.state) {
            (Some(ride), RideState::Recording) => {
                ride.coordinates.push(fix);
                true
            }
            _ => {
                self.discarded += 1;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lon: f64, t: i64) -> GeoFix {
        GeoFix::new(0.0, lon, t)
    }

    #[test]
    fn test_full_lifecycle() {
        let mut recorder = RideRecorder::new();
        assert_eq!(recorder.state(), RideState::Idle);

        let ride = recorder.start("r1", "u1", Some("2".to_string()), 1_000).unwrap();
        assert_eq!(ride.start_time, 1_000);
        assert!(ride.coordinates.is_empty());
        assert_eq!(recorder.state(), RideState::Recording);

        assert!(recorder.push_fix(fix(0.0, 2_000)));
        recorder.pause().unwrap();
        assert!(!recorder.push_fix(fix(0.5, 3_000)));
        recorder.resume().unwrap();
        assert!(recorder.push_fix(fix(0.01, 4_000)));

        let ride = recorder.stop(3_601_000).unwrap();
        assert_eq!(recorder.state(), RideState::Completed);
        assert_eq!(ride.end_time, Some(3_601_000));
        assert_eq!(ride.coordinates.len(), 2);
        assert_eq!(ride.stats.duration, 3600.0);
        assert!(ride.stats.distance > 1.0 && ride.stats.distance < 1.2);
        assert_eq!(recorder.discarded_count(), 1);
    }

    #[test]
    fn test_second_start_rejected() {
        let mut recorder = RideRecorder::new();
        recorder.start("r1", "u1", None, 0).unwrap();
        let err = recorder.start("r2", "u1", None, 10).unwrap_err();
        assert!(matches!(err, RideError::RideAlreadyActive { ride_id } if ride_id == "r1"));

        recorder.pause().unwrap();
        assert!(recorder.start("r2", "u1", None, 10).is_err());
        assert_eq!(recorder.active_ride().unwrap().id, "r1");
    }

    #[test]
    fn test_invalid_transitions() {
        let mut recorder = RideRecorder::new();
        assert!(matches!(recorder.pause(), Err(RideError::InvalidTransition { .. })));
        assert!(matches!(recorder.resume(), Err(RideError::InvalidTransition { .. })));
        assert!(matches!(recorder.stop(0), Err(RideError::NoActiveRide)));

        recorder.start("r1", "u1", None, 0).unwrap();
        assert!(recorder.resume().is_err());
        recorder.stop(10).unwrap();
        assert!(matches!(recorder.stop(20), Err(RideError::InvalidTransition { .. })));
    }

    #[test]
    fn test_stop_while_paused() {
        let mut recorder = RideRecorder::new();
        recorder.start("r1", "u1", None, 0).unwrap();
        recorder.push_fix(fix(0.0, 1));
        recorder.pause().unwrap();
        let ride = recorder.stop(60_000).unwrap();
        assert_eq!(ride.coordinates.len(), 1);
        assert_eq!(ride.stats.distance, 0.0);
    }

    #[test]
    fn test_new_ride_after_completed() {
        let mut recorder = RideRecorder::new();
        recorder.start("r1", "u1", None, 0).unwrap();
        recorder.push_fix(fix(0.0, 1));
        recorder.stop(10).unwrap();

        let ride = recorder.start("r2", "u1", None, 20).unwrap();
        assert_eq!(ride.id, "r2");
        assert!(ride.coordinates.is_empty());
    }

    #[test]
    fn test_sender_respects_arrival_window() {
        let mut recorder = RideRecorder::new();
        let sensor = recorder.fix_sender();

        // Before start: discarded
        sensor.send(fix(9.0, 0));
        recorder.start("r1", "u1", None, 0).unwrap();

        sensor.send(fix(0.0, 1));
        sensor.send(fix(0.001, 2));
        recorder.pause().unwrap();

        // While paused: dropped by the sender
        sensor.send(fix(5.0, 3));
        recorder.resume().unwrap();

        sensor.send(fix(0.002, 4));
        assert_eq!(recorder.sync(), 1);

        let ride = recorder.stop(10_000).unwrap();
        let lons: Vec<f64> = ride.coordinates.iter().map(|f| f.longitude).collect();
        assert_eq!(lons, vec![0.0, 0.001, 0.002]);
        assert_eq!(recorder.discarded_count(), 2);

        // After stop: nothing reaches the completed ride
        assert!(!sensor.send(fix(1.0, 5)));
        assert_eq!(recorder.sync(), 0);
    }

    #[test]
    fn test_sender_drops_outside_recording_window() {
        let mut recorder = RideRecorder::new();
        let sensor = recorder.fix_sender();

        for i in 0..1_000 {
            assert!(!sensor.send(fix(0.0, i)));
        }
        assert_eq!(recorder.discarded_count(), 1_000);
        // Nothing was queued, so the channel is empty
        assert!(recorder.rx.try_recv().is_err());

        recorder.start("r1", "u1", None, 0).unwrap();
        assert!(sensor.send(fix(0.0, 1)));
        recorder.stop(10).unwrap();
        assert!(!sensor.send(fix(0.0, 2)));
        assert!(recorder.rx.try_recv().is_err());
        assert_eq!(recorder.discarded_count(), 1_001);
    }

    #[test]
    fn test_live_ride_includes_queued_fixes() {
        let mut recorder = RideRecorder::new();
        let sensor = recorder.fix_sender();
        recorder.start("r1", "u1", None, 0).unwrap();

        sensor.send(fix(0.0, 1));
        sensor.send(fix(0.001, 2));
        assert!(recorder.active_ride().unwrap().coordinates.is_empty());
        assert_eq!(recorder.live_ride().unwrap().coordinates.len(), 2);
        assert_eq!(recorder.active_ride().unwrap().coordinates.len(), 2);
    }

    #[test]
    fn test_sender_from_another_thread() {
        let mut recorder = RideRecorder::new();
        recorder.start("r1", "u1", None, 0).unwrap();
        let sensor = recorder.fix_sender();

        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                assert!(sensor.send(fix(i as f64 * 0.0001, i)));
            }
        });
        handle.join().unwrap();

        let ride = recorder.stop(100_000).unwrap();
        assert_eq!(ride.coordinates.len(), 100);
        assert!(ride.coordinates.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_sender_after_recorder_dropped() {
        let recorder = RideRecorder::new();
        let sensor = recorder.fix_sender();
        drop(recorder);
        assert!(!sensor.send(fix(0.0, 0)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RideState::Paused.to_string(), "paused");
        assert!(RideState::Recording.is_active());
        assert!(!RideState::Completed.is_active());
    }
}
