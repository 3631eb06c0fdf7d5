//! End-to-end ride lifecycle through the public API.

use chrono::{Duration, TimeZone, Utc};
use ride_tracker::geo_utils::haversine_km;
use ride_tracker::{
    AchievementId, GeoFix, MemoryStore, RideSession, RideState, TrackerConfig,
};

fn session() -> RideSession<MemoryStore, MemoryStore> {
    RideSession::new("rider", MemoryStore::new(), MemoryStore::new(), TrackerConfig::default())
}

#[test]
fn test_recorded_track_stats() {
    let mut session = session();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    session.start_ride(None, &start).unwrap();
    assert_eq!(session.ride_state(), RideState::Recording);

    let t0 = start.timestamp_millis();
    for (i, (lon, alt)) in [(0.0, 100.0), (0.01, 105.0), (0.02, 102.0)].iter().enumerate() {
        session.record_fix(GeoFix::new(0.0, *lon, t0 + i as i64 * 5_000).with_altitude(*alt));
    }

    let completed = session.stop_ride(&(start + Duration::minutes(30))).unwrap();
    let stats = completed.ride.stats;
    let leg = haversine_km(0.0, 0.0, 0.0, 0.01);
    assert_eq!(stats.elevation_gain, 5.0);
    assert!((stats.distance - 2.0 * leg).abs() < 1e-9);
    assert_eq!(stats.duration, 1800.0);
    assert!((stats.avg_speed - stats.distance * 2.0).abs() < 1e-9);
    assert_eq!(session.ride_state(), RideState::Completed);
}

#[test]
fn test_paused_fixes_are_not_recorded() {
    let mut session = session();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    session.start_ride(None, &start).unwrap();
    let sensor = session.fix_sender();

    sensor.send(GeoFix::new(0.0, 0.0, 1));
    session.pause_ride().unwrap();
    sensor.send(GeoFix::new(0.0, 1.0, 2));
    session.resume_ride().unwrap();
    sensor.send(GeoFix::new(0.0, 0.001, 3));

    let ride = session.stop_ride(&(start + Duration::minutes(1))).unwrap().ride;
    let lons: Vec<f64> = ride.coordinates.iter().map(|f| f.longitude).collect();
    assert_eq!(lons, vec![0.0, 0.001]);
}

#[test]
fn test_century_unlocks_at_threshold_and_stays() {
    let mut session = session();
    let mut day = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();

    // Each ride heads north 0.9 degrees (~100 km)
    let mut ride_north = |session: &mut RideSession<MemoryStore, MemoryStore>| {
        session.start_ride(None, &day).unwrap();
        let t0 = day.timestamp_millis();
        session.record_fix(GeoFix::new(0.0, 0.0, t0));
        session.record_fix(GeoFix::new(0.9, 0.0, t0 + 1_000));
        let completed = session.stop_ride(&(day + Duration::hours(4))).unwrap();
        day += Duration::days(3);
        completed
    };

    let first = ride_north(&mut session);
    assert!(!first.newly_unlocked.iter().any(|a| a.id == AchievementId::Century));
    assert!(!session.ledger().is_unlocked(AchievementId::Century));

    let second = ride_north(&mut session);
    assert!(second.newly_unlocked.iter().any(|a| a.id == AchievementId::Century));
    let unlocked_at = session.ledger().unlocked_at(AchievementId::Century);

    let third = ride_north(&mut session);
    assert!(third.newly_unlocked.is_empty());
    assert_eq!(session.ledger().unlocked_at(AchievementId::Century), unlocked_at);

    let century = session
        .progress()
        .iter()
        .find(|p| p.achievement_id == AchievementId::Century)
        .unwrap();
    assert_eq!(century.current, century.target);
    assert!(century.unlocked);
}
