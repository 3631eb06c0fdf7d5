//! # Ride and Ledger Persistence
//!
//! Storage collaborators the core depends on, plus the two-tier strategy used
//! when finishing a ride.
//!
//! ## Tiers
//!
//! 1. **Primary** (remote ride service): receives `create` at ride start and
//!    the finalized stats at ride stop.
//! 2. **Local fallback** (on-device store): holds rides the primary could not
//!    take, complete with their computed stats, and a copy of every ride the
//!    primary accepted.
//!
//! Fallback order, per operation:
//! - `create`: primary, else a locally generated `offline_<start_time>` id
//!   registered in the local tier
//! - `update`: primary, else local; offline ids go straight to local
//! - `save_completed`: primary `update`, else local `insert`
//! - `list`: primary and local merged by ride id (primary wins), oldest first
//!
//! Copies written to the local tier after a primary success are best effort:
//! a failure there is logged and does not fail the operation.
//!
//! Stats are computed once on the device and are never re-derived from a
//! store's response.

use std::collections::{BTreeMap, HashMap, HashSet};

#[cfg(feature = "persistence")]
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use crate::config::TrackerConfig;
use crate::error::{OptionExt, Result};
use crate::{GeoFix, Ride, RideStats, UnlockLedger};

/// Prefix for ride ids generated while the primary store is unreachable.
pub const OFFLINE_ID_PREFIX: &str = "offline_";

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Partial update of a stored ride. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideUpdate {
    pub trail_id: Option<String>,
    pub end_time: Option<i64>,
    pub stats: Option<RideStats>,
    pub coordinates: Option<Vec<GeoFix>>,
}

impl RideUpdate {
    /// Update carrying everything a finalized ride adds.
    pub fn finalized(ride: &Ride) -> Self {
        Self {
            trail_id: ride.trail_id.clone(),
            end_time: ride.end_time,
            stats: Some(ride.stats),
            coordinates: Some(ride.coordinates.clone()),
        }
    }

    fn apply(self, ride: &mut Ride) {
        if let Some(trail_id) = self.trail_id {
            ride.trail_id = Some(trail_id);
        }
        if let Some(end_time) = self.end_time {
            ride.end_time = Some(end_time);
        }
        if let Some(stats) = self.stats {
            ride.stats = stats;
        }
        if let Some(coordinates) = self.coordinates {
            ride.coordinates = coordinates;
        }
    }
}

/// Ride persistence collaborator.
pub trait RideStore {
    /// Register a new ride and return its id.
    fn create(&mut self, user_id: &str, trail_id: Option<&str>, start_time: i64) -> Result<String>;

    /// Apply a partial update and return the stored ride.
    fn update(&mut self, ride_id: &str, update: RideUpdate) -> Result<Ride>;

    /// All rides of a user, in any order.
    fn list(&self, user_id: &str) -> Result<Vec<Ride>>;

    /// Persist a finalized ride and report which tier took it.
    fn save_completed(&mut self, ride: &Ride) -> Result<StorageTier> {
        self.update(&ride.id, RideUpdate::finalized(ride))?;
        Ok(StorageTier::Primary)
    }
}

/// A store that can take a complete ride as-is (the local tier).
pub trait LocalRideStore: RideStore {
    /// Insert or replace a ride by id.
    fn insert(&mut self, ride: &Ride) -> Result<()>;
}

/// Unlock-ledger persistence, keyed by user.
pub trait LedgerStore {
    /// Stored ledger, empty if none was saved yet.
    fn load(&self, user_id: &str) -> Result<UnlockLedger>;

    fn save(&mut self, user_id: &str, ledger: &UnlockLedger) -> Result<()>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Process-local ride and ledger storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rides: BTreeMap<String, Ride>,
    ledgers: HashMap<String, String>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }

    pub fn get(&self, ride_id: &str) -> Option<&Ride> {
        self.rides.get(ride_id)
    }
}

impl RideStore for MemoryStore {
    fn create(&mut self, user_id: &str, trail_id: Option<&str>, start_time: i64) -> Result<String> {
        self.next_id += 1;
        let id = format!("ride_{}", self.next_id);
        let ride = Ride::new(id.clone(), user_id, trail_id.map(str::to_string), start_time);
        self.rides.insert(id.clone(), ride);
        Ok(id)
    }

    fn update(&mut self, ride_id: &str, update: RideUpdate) -> Result<Ride> {
        let ride = self.rides.get_mut(ride_id).ok_or_ride_not_found(ride_id)?;
        update.apply(ride);
        Ok(ride.clone())
    }

    fn list(&self, user_id: &str) -> Result<Vec<Ride>> {
        Ok(self
            .rides
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

impl LocalRideStore for MemoryStore {
    fn insert(&mut self, ride: &Ride) -> Result<()> {
        self.rides.insert(ride.id.clone(), ride.clone());
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self, user_id: &str) -> Result<UnlockLedger> {
        match self.ledgers.get(user_id) {
            Some(blob) => UnlockLedger::from_blob(blob),
            None => Ok(UnlockLedger::new()),
        }
    }

    fn save(&mut self, user_id: &str, ledger: &UnlockLedger) -> Result<()> {
        self.ledgers.insert(user_id.to_string(), ledger.to_blob()?);
        Ok(())
    }
}

// ============================================================================
// Two-Tier Ride Store
// ============================================================================

/// Where a completed ride ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    Primary,
    Local,
}

/// Primary store with a local fallback. See the module docs for the order.
#[derive(Debug)]
pub struct TieredRideStore<P, L> {
    primary: P,
    local: L,
}

impl<P: RideStore, L: LocalRideStore> TieredRideStore<P, L> {
    pub fn new(primary: P, local: L) -> Self {
        Self { primary, local }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut P {
        &mut self.primary
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut L {
        &mut self.local
    }

    fn mirror(&mut self, ride: &Ride) {
        if let Err(e) = self.local.insert(ride) {
            log::warn!("[Persistence] Local copy of ride {} failed: {}", ride.id, e);
        }
    }
}

impl<P: RideStore, L: LocalRideStore> RideStore for TieredRideStore<P, L> {
    fn create(&mut self, user_id: &str, trail_id: Option<&str>, start_time: i64) -> Result<String> {
        let trail_id = trail_id.map(str::to_string);
        match self.primary.create(user_id, trail_id.as_deref(), start_time) {
            Ok(id) => {
                self.mirror(&Ride::new(id.as_str(), user_id, trail_id, start_time));
                Ok(id)
            }
            Err(e) => {
                let id = format!("{}{}", OFFLINE_ID_PREFIX, start_time);
                log::warn!("[Persistence] Primary create failed, using {}: {}", id, e);
                self.local
                    .insert(&Ride::new(id.as_str(), user_id, trail_id, start_time))?;
                Ok(id)
            }
        }
    }

    fn update(&mut self, ride_id: &str, update: RideUpdate) -> Result<Ride> {
        if is_offline_id(ride_id) {
            return self.local.update(ride_id, update);
        }
        match self.primary.update(ride_id, update.clone()) {
            Ok(ride) => {
                self.mirror(&ride);
                Ok(ride)
            }
            Err(e) => {
                log::warn!("[Persistence] Primary update failed for {}: {}", ride_id, e);
                self.local.update(ride_id, update)
            }
        }
    }

    fn list(&self, user_id: &str) -> Result<Vec<Ride>> {
        let remote = self.primary.list(user_id).unwrap_or_else(|e| {
            log::warn!("[Persistence] Primary list failed, using local rides only: {}", e);
            Vec::new()
        });
        let local = self.local.list(user_id)?;
        Ok(merge_rides(remote, local))
    }

    /// Persist a finalized ride, falling back to the local tier.
    ///
    /// Rides with an offline id never reached the primary and go straight to
    /// the local tier. Errors only when both tiers fail.
    fn save_completed(&mut self, ride: &Ride) -> Result<StorageTier> {
        if !is_offline_id(&ride.id) {
            match self.primary.update(&ride.id, RideUpdate::finalized(ride)) {
                Ok(_) => {
                    self.mirror(ride);
                    return Ok(StorageTier::Primary);
                }
                Err(e) => log::warn!(
                    "[Persistence] Primary save failed for ride {}, keeping it locally: {}",
                    ride.id,
                    e
                ),
            }
        }

        self.local.insert(ride).map_err(|e| {
            log::error!("[Persistence] Local save failed for ride {}: {}", ride.id, e);
            e
        })?;
        Ok(StorageTier::Local)
    }
}

impl<P: RideStore, L: LocalRideStore> LocalRideStore for TieredRideStore<P, L> {
    fn insert(&mut self, ride: &Ride) -> Result<()> {
        self.local.insert(ride)
    }
}

/// Whether an id was generated locally while the primary was unreachable.
pub fn is_offline_id(ride_id: &str) -> bool {
    ride_id.starts_with(OFFLINE_ID_PREFIX)
}

/// Union of two ride lists by id, `first` winning, sorted by start time.
pub fn merge_rides(first: Vec<Ride>, second: Vec<Ride>) -> Vec<Ride> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Ride> = first
        .into_iter()
        .chain(second)
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    merged.sort_by_key(|r| r.start_time);
    merged
}

// ============================================================================
// SQLite Store
// ============================================================================

/// Ride and ledger storage in a SQLite database.
///
/// Coordinates are stored as a MessagePack blob; stats are columns so they
/// can be inspected without decoding the track.
#[cfg(feature = "persistence")]
pub struct SqliteStore {
    db: Connection,
}

#[cfg(feature = "persistence")]
struct RideRow {
    id: String,
    user_id: String,
    trail_id: Option<String>,
    start_time: i64,
    end_time: Option<i64>,
    stats: RideStats,
    coordinates: Vec<u8>,
}

#[cfg(feature = "persistence")]
impl RideRow {
    fn into_ride(self) -> Result<Ride> {
        Ok(Ride {
            id: self.id,
            user_id: self.user_id,
            trail_id: self.trail_id,
            start_time: self.start_time,
            end_time: self.end_time,
            stats: self.stats,
            coordinates: rmp_serde::from_slice(&self.coordinates)?,
        })
    }
}

#[cfg(feature = "persistence")]
impl SqliteStore {
    /// Open (or create) a database at the given path.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        log::info!("[Persistence] Opened ride database at {}", db_path);
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> SqlResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rides (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                trail_id TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                distance REAL NOT NULL DEFAULT 0,
                duration REAL NOT NULL DEFAULT 0,
                elevation_gain REAL NOT NULL DEFAULT 0,
                max_speed REAL NOT NULL DEFAULT 0,
                avg_speed REAL NOT NULL DEFAULT 0,
                coordinates BLOB NOT NULL,
                point_count INTEGER NOT NULL DEFAULT 0
            );

            -- Opaque ledger blobs, one per user
            CREATE TABLE IF NOT EXISTS unlock_ledgers (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_rides_user ON rides(user_id, start_time);
        "#,
        )
    }

    /// Fetch one ride by id.
    pub fn get(&self, ride_id: &str) -> Result<Option<Ride>> {
        let row = self
            .db
            .query_row(
                "SELECT id, user_id, trail_id, start_time, end_time,
                        distance, duration, elevation_gain, max_speed, avg_speed, coordinates
                 FROM rides WHERE id = ?",
                params![ride_id],
                Self::read_row,
            )
            .optional()?;
        row.map(RideRow::into_ride).transpose()
    }

    fn read_row(row: &rusqlite::Row<'_>) -> SqlResult<RideRow> {
        Ok(RideRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            trail_id: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            stats: RideStats {
                distance: row.get(5)?,
                duration: row.get(6)?,
                elevation_gain: row.get(7)?,
                max_speed: row.get(8)?,
                avg_speed: row.get(9)?,
            },
            coordinates: row.get(10)?,
        })
    }

    fn write_ride(&self, ride: &Ride) -> Result<()> {
        let coords_blob = rmp_serde::to_vec(&ride.coordinates)?;
        self.db.execute(
            "INSERT OR REPLACE INTO rides
                (id, user_id, trail_id, start_time, end_time,
                 distance, duration, elevation_gain, max_speed, avg_speed,
                 coordinates, point_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ride.id,
                ride.user_id,
                ride.trail_id,
                ride.start_time,
                ride.end_time,
                ride.stats.distance,
                ride.stats.duration,
                ride.stats.elevation_gain,
                ride.stats.max_speed,
                ride.stats.avg_speed,
                coords_blob,
                ride.coordinates.len() as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(feature = "persistence")]
impl RideStore for SqliteStore {
    fn create(&mut self, user_id: &str, trail_id: Option<&str>, start_time: i64) -> Result<String> {
        let seq: i64 = self
            .db
            .query_row("SELECT COALESCE(MAX(rowid), 0) + 1 FROM rides", [], |row| {
                row.get(0)
            })?;
        let id = format!("local_{}_{}", start_time, seq);
        let ride = Ride::new(id.clone(), user_id, trail_id.map(str::to_string), start_time);
        self.write_ride(&ride)?;
        Ok(id)
    }

    fn update(&mut self, ride_id: &str, update: RideUpdate) -> Result<Ride> {
        let mut ride = self.get(ride_id)?.ok_or_ride_not_found(ride_id)?;
        update.apply(&mut ride);
        self.write_ride(&ride)?;
        Ok(ride)
    }

    fn list(&self, user_id: &str) -> Result<Vec<Ride>> {
        let mut stmt = self.db.prepare(
            "SELECT id, user_id, trail_id, start_time, end_time,
                    distance, duration, elevation_gain, max_speed, avg_speed, coordinates
             FROM rides WHERE user_id = ? ORDER BY start_time",
        )?;
        let rows = stmt
            .query_map(params![user_id], Self::read_row)?
            .collect::<SqlResult<Vec<RideRow>>>()?;
        rows.into_iter().map(RideRow::into_ride).collect()
    }
}

#[cfg(feature = "persistence")]
impl LocalRideStore for SqliteStore {
    fn insert(&mut self, ride: &Ride) -> Result<()> {
        self.write_ride(ride)
    }
}

#[cfg(feature = "persistence")]
impl LedgerStore for SqliteStore {
    fn load(&self, user_id: &str) -> Result<UnlockLedger> {
        let blob: Option<String> = self
            .db
            .query_row(
                "SELECT data FROM unlock_ledgers WHERE user_id = ?",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(blob) => UnlockLedger::from_blob(&blob),
            None => Ok(UnlockLedger::new()),
        }
    }

    fn save(&mut self, user_id: &str, ledger: &UnlockLedger) -> Result<()> {
        self.db.execute(
            "INSERT OR REPLACE INTO unlock_ledgers (user_id, data) VALUES (?, ?)",
            params![user_id, ledger.to_blob()?],
        )?;
        Ok(())
    }
}

// ============================================================================
// Configured Local Store
// ============================================================================

/// On-device store selected by [`TrackerConfig::database_path`]: SQLite at
/// that path, or process memory when unset.
pub enum LocalStore {
    Memory(MemoryStore),
    #[cfg(feature = "persistence")]
    Sqlite(SqliteStore),
}

impl LocalStore {
    pub fn open(config: &TrackerConfig) -> Result<Self> {
        match config.database_path.as_deref() {
            None => {
                log::info!("[Persistence] No database path configured, keeping rides in memory");
                Ok(Self::Memory(MemoryStore::new()))
            }
            #[cfg(feature = "persistence")]
            Some(path) => Ok(Self::Sqlite(SqliteStore::new(path)?)),
            #[cfg(not(feature = "persistence"))]
            Some(path) => Err(crate::RideError::Config {
                message: format!("database_path {} needs the persistence feature", path),
            }),
        }
    }

    /// Whether rides outlive the process.
    pub fn is_durable(&self) -> bool {
        !matches!(self, Self::Memory(_))
    }
}

impl RideStore for LocalStore {
    fn create(&mut self, user_id: &str, trail_id: Option<&str>, start_time: i64) -> Result<String> {
        match self {
            Self::Memory(store) => store.create(user_id, trail_id, start_time),
            #[cfg(feature = "persistence")]
            Self::Sqlite(store) => store.create(user_id, trail_id, start_time),
        }
    }

    fn update(&mut self, ride_id: &str, update: RideUpdate) -> Result<Ride> {
        match self {
            Self::Memory(store) => store.update(ride_id, update),
            #[cfg(feature = "persistence")]
            Self::Sqlite(store) => store.update(ride_id, update),
        }
    }

    fn list(&self, user_id: &str) -> Result<Vec<Ride>> {
        match self {
            Self::Memory(store) => store.list(user_id),
            #[cfg(feature = "persistence")]
            Self::Sqlite(store) => store.list(user_id),
        }
    }
}

impl LocalRideStore for LocalStore {
    fn insert(&mut self, ride: &Ride) -> Result<()> {
        match self {
            Self::Memory(store) => store.insert(ride),
            #[cfg(feature = "persistence")]
            Self::Sqlite(store) => store.insert(ride),
        }
    }
}

impl LedgerStore for LocalStore {
    fn load(&self, user_id: &str) -> Result<UnlockLedger> {
        match self {
            Self::Memory(store) => store.load(user_id),
            #[cfg(feature = "persistence")]
            Self::Sqlite(store) => store.load(user_id),
        }
    }

    fn save(&mut self, user_id: &str, ledger: &UnlockLedger) -> Result<()> {
        match self {
            Self::Memory(store) => store.save(user_id, ledger),
            #[cfg(feature = "persistence")]
            Self::Sqlite(store) => store.save(user_id, ledger),
        }
    }
}

/// Store that rejects every call, standing in for an unreachable remote.
#[cfg(test)]
pub(crate) struct UnreachableStore;

#[cfg(test)]
impl RideStore for UnreachableStore {
    fn create(&mut self, _: &str, _: Option<&str>, _: i64) -> Result<String> {
        Err(unreachable_error())
    }

    fn update(&mut self, _: &str, _: RideUpdate) -> Result<Ride> {
        Err(unreachable_error())
    }

    fn list(&self, _: &str) -> Result<Vec<Ride>> {
        Err(unreachable_error())
    }
}

#[cfg(test)]
impl LocalRideStore for UnreachableStore {
    fn insert(&mut self, _: &Ride) -> Result<()> {
        Err(unreachable_error())
    }
}

#[cfg(test)]
impl LedgerStore for UnreachableStore {
    fn load(&self, _: &str) -> Result<UnlockLedger> {
        Err(unreachable_error())
    }

    fn save(&mut self, _: &str, _: &UnlockLedger) -> Result<()> {
        Err(unreachable_error())
    }
}

#[cfg(test)]
fn unreachable_error() -> crate::RideError {
    crate::RideError::StoreUnavailable {
        message: "network unreachable".to_string(),
    }
}
