#![forbid(unsafe_code)]

//! SQLite-backed store. The controller lease is claimed with a single
//! `INSERT .. ON CONFLICT DO UPDATE .. WHERE` statement, and the NTN status update
//! and its history row share one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use ntnctl_kernel_contracts::kpi::{ChannelValueRecord, KpiChannel, KpiSample, KpiVector};
use ntnctl_kernel_contracts::lease::{ClientIdentity, ControllerLease};
use ntnctl_kernel_contracts::ntn::{NtnState, NtnStatus};
use ntnctl_kernel_contracts::{ContractViolation, UnixTimeNs, Validate};
use rusqlite::{params, Connection, OptionalExtension};

use crate::repo::{ControllerLeaseRepo, KpiHistoryRepo, NtnStatusRepo, NtnUpdateRepo};
use crate::store::StorageError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS controller (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    owner_id TEXT,
    acquired_at INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS ntn_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    ntn_state INTEGER NOT NULL,
    critical_count INTEGER NOT NULL,
    recovery_count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    congestion REAL NOT NULL,
    prb_util REAL NOT NULL,
    traffic_load REAL NOT NULL,
    ran_energy REAL NOT NULL,
    carbon_intensity REAL NOT NULL,
    isac_quality REAL NOT NULL,
    mobility_rate REAL NOT NULL,
    crisis_score REAL NOT NULL,
    ntn_state INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS history_ts_idx ON history (ts);
INSERT OR IGNORE INTO controller (id, owner_id, acquired_at) VALUES (1, NULL, 0);
INSERT OR IGNORE INTO ntn_state (id, ntn_state, critical_count, recovery_count) VALUES (1, 0, 0, 0);
";

const CLAIM_LEASE_SQL: &str = "
INSERT INTO controller (id, owner_id, acquired_at) VALUES (1, ?1, ?2)
ON CONFLICT (id) DO UPDATE SET
    owner_id = excluded.owner_id,
    acquired_at = excluded.acquired_at
WHERE controller.owner_id IS NULL
    OR controller.owner_id = excluded.owner_id
    OR ?2 - controller.acquired_at >= ?3
";

const HISTORY_COLUMNS: &str = "ts, congestion, prb_util, traffic_load, ran_energy, \
     carbon_intensity, isac_quality, mobility_rate, crisis_score, ntn_state";

pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let connection = Connection::open(path)?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut connection: Connection) -> Result<Self, StorageError> {
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.connection
            .lock()
            .map_err(|_| StorageError::Backend("sqlite connection lock poisoned".to_string()))
    }
}

fn initialize_schema(connection: &mut Connection) -> Result<(), StorageError> {
    let tx = connection.transaction()?;
    tx.execute_batch(SCHEMA_SQL)?;
    for channel in KpiChannel::ALL.into_iter().filter(|c| c.is_submittable()) {
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value REAL NOT NULL,
                ts INTEGER NOT NULL
            );",
            channel.as_str()
        ))?;
    }
    tx.commit()?;
    tracing::debug!("sqlite schema initialized");
    Ok(())
}

fn to_sql_ns(at: UnixTimeNs) -> Result<i64, StorageError> {
    i64::try_from(at.0).map_err(|_| StorageError::Backend("timestamp exceeds i64 range".to_string()))
}

fn from_sql_ns(raw: i64) -> UnixTimeNs {
    UnixTimeNs(u64::try_from(raw).unwrap_or(0))
}

fn to_sql_count(count: u32) -> i64 {
    i64::from(count)
}

fn from_sql_count(field: &'static str, raw: i64) -> Result<u32, StorageError> {
    u32::try_from(raw).map_err(|_| {
        StorageError::ContractViolation(ContractViolation::InvalidValue {
            field,
            reason: "must be a non-negative 32-bit count",
        })
    })
}

fn from_sql_state(raw: i64) -> Result<NtnState, StorageError> {
    let raw = u8::try_from(raw).map_err(|_| ContractViolation::InvalidValue {
        field: "ntn_state",
        reason: "must be within 0..=3",
    })?;
    Ok(NtnState::from_u8(raw)?)
}

fn read_lease(connection: &Connection) -> Result<ControllerLease, StorageError> {
    let row = connection
        .query_row(
            "SELECT owner_id, acquired_at FROM controller WHERE id = 1",
            [],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    match row {
        None => Ok(ControllerLease::unowned()),
        Some((owner_id, acquired_at)) => {
            let owner_id = owner_id.map(ClientIdentity::new).transpose()?;
            Ok(ControllerLease::v1(owner_id, from_sql_ns(acquired_at))?)
        }
    }
}

struct HistoryRowRaw {
    ts: i64,
    values: [f64; 8],
    ntn_state: i64,
}

impl HistoryRowRaw {
    fn into_sample(self) -> Result<KpiSample, StorageError> {
        let v = self.values;
        let kpis = KpiVector::from_inputs([
            v[0] as f32,
            v[1] as f32,
            v[2] as f32,
            v[3] as f32,
            v[4] as f32,
            v[5] as f32,
            v[6] as f32,
        ]);
        Ok(KpiSample::v1(
            from_sql_ns(self.ts),
            kpis,
            v[7] as f32,
            from_sql_state(self.ntn_state)?,
        )?)
    }
}

impl ControllerLeaseRepo for SqliteStore {
    fn controller_lease_row(&self) -> Result<ControllerLease, StorageError> {
        let connection = self.lock()?;
        read_lease(&connection)
    }

    fn claim_controller_lease_row(
        &self,
        identity: &ClientIdentity,
        now: UnixTimeNs,
        ttl_ns: u64,
    ) -> Result<ControllerLease, StorageError> {
        identity.validate()?;
        let ttl = i64::try_from(ttl_ns)
            .map_err(|_| StorageError::Backend("lease ttl exceeds i64 range".to_string()))?;
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        tx.execute(
            CLAIM_LEASE_SQL,
            params![identity.as_str(), to_sql_ns(now)?, ttl],
        )?;
        let lease = read_lease(&tx)?;
        tx.commit()?;
        Ok(lease)
    }

    fn clear_controller_lease_owner_row(
        &self,
        identity: &ClientIdentity,
    ) -> Result<bool, StorageError> {
        let changed = self.lock()?.execute(
            "UPDATE controller SET owner_id = NULL WHERE id = 1 AND owner_id = ?1",
            params![identity.as_str()],
        )?;
        Ok(changed > 0)
    }
}

impl NtnStatusRepo for SqliteStore {
    fn ntn_status_row(&self) -> Result<NtnStatus, StorageError> {
        let row = self
            .lock()?
            .query_row(
                "SELECT ntn_state, critical_count, recovery_count FROM ntn_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        let (state, critical_count, recovery_count) =
            row.ok_or(StorageError::NotFound { table: "ntn_state" })?;
        Ok(NtnStatus {
            state: from_sql_state(state)?,
            critical_count: from_sql_count("ntn_state.critical_count", critical_count)?,
            recovery_count: from_sql_count("ntn_state.recovery_count", recovery_count)?,
        })
    }
}

impl KpiHistoryRepo for SqliteStore {
    fn append_channel_value_row(
        &self,
        channel: KpiChannel,
        value: f32,
        recorded_at: UnixTimeNs,
    ) -> Result<u64, StorageError> {
        if !channel.is_submittable() {
            return Err(StorageError::ChannelNotWritable {
                table: channel.as_str(),
            });
        }
        if !value.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "channel_value.value",
            }
            .into());
        }
        let connection = self.lock()?;
        // Table name comes from the closed KpiChannel set, never from caller text.
        connection.execute(
            &format!("INSERT INTO {} (value, ts) VALUES (?1, ?2)", channel.as_str()),
            params![f64::from(value), to_sql_ns(recorded_at)?],
        )?;
        Ok(u64::try_from(connection.last_insert_rowid()).unwrap_or(0))
    }

    fn channel_value_rows(
        &self,
        channel: KpiChannel,
    ) -> Result<Vec<ChannelValueRecord>, StorageError> {
        if !channel.is_submittable() {
            return Ok(Vec::new());
        }
        let connection = self.lock()?;
        let mut stmt = connection.prepare(&format!(
            "SELECT id, value, ts FROM {} ORDER BY id ASC",
            channel.as_str()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (row_id, value, ts) = row?;
            out.push(ChannelValueRecord {
                row_id: u64::try_from(row_id).unwrap_or(0),
                channel,
                value: value as f32,
                recorded_at: from_sql_ns(ts),
            });
        }
        Ok(out)
    }

    fn recent_history_rows(&self, limit: usize) -> Result<Vec<KpiSample>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let connection = self.lock()?;
        let mut stmt = connection.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history ORDER BY ts DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], |row| {
            let mut values = [0.0f64; 8];
            for (idx, slot) in values.iter_mut().enumerate() {
                *slot = row.get(idx + 1)?;
            }
            Ok(HistoryRowRaw {
                ts: row.get(0)?,
                values,
                ntn_state: row.get(9)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_sample()?);
        }
        out.reverse();
        Ok(out)
    }

    fn history_row_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl NtnUpdateRepo for SqliteStore {
    fn commit_ntn_update_rows(
        &self,
        status: NtnStatus,
        sample: KpiSample,
    ) -> Result<(), StorageError> {
        sample.validate()?;
        let row = sample.feature_row();
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        let updated = tx.execute(
            "UPDATE ntn_state SET ntn_state = ?1, critical_count = ?2, recovery_count = ?3 WHERE id = 1",
            params![
                i64::from(status.state.as_u8()),
                to_sql_count(status.critical_count),
                to_sql_count(status.recovery_count)
            ],
        )?;
        if updated != 1 {
            return Err(StorageError::NotFound { table: "ntn_state" });
        }
        tx.execute(
            &format!(
                "INSERT INTO history ({HISTORY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                to_sql_ns(sample.ts)?,
                f64::from(row[0]),
                f64::from(row[1]),
                f64::from(row[2]),
                f64::from(row[3]),
                f64::from(row[4]),
                f64::from(row[5]),
                f64::from(row[6]),
                f64::from(row[7]),
                i64::from(sample.ntn_state.as_u8())
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
