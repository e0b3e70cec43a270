//! SQLite durable store.
//!
//! Schema is created on connect. Vitals are keyed by (source, timestamp) and
//! inserted with `ON CONFLICT DO NOTHING`; alarms are keyed by id and only
//! overwritten by a higher revision. Retention deletes run in bounded batches
//! through a `rowid IN (... LIMIT n)` subquery.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use super::repository::{DurableStore, Repository};
use crate::config::StorageConfig;
use crate::logging::log_storage_operation;
use crate::models::{ActorRef, AlarmKind, AlarmPriority, AlarmSnapshot, Origin, RecordRef, SourceId, VitalRecord};
use crate::state_machine::AlarmState;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS vitals (
        source_id INTEGER NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        heart_rate REAL,
        spo2 REAL,
        respiration_rate REAL,
        origin TEXT NOT NULL,
        PRIMARY KEY (source_id, timestamp_ms)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_vitals_timestamp ON vitals (timestamp_ms)",
    r#"
    CREATE TABLE IF NOT EXISTS vitals_archive (
        source_id INTEGER NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        heart_rate REAL,
        spo2 REAL,
        respiration_rate REAL,
        origin TEXT NOT NULL,
        PRIMARY KEY (source_id, timestamp_ms)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alarms (
        alarm_id TEXT PRIMARY KEY NOT NULL,
        kind TEXT NOT NULL,
        priority TEXT NOT NULL,
        state TEXT NOT NULL,
        raised_at_ms INTEGER NOT NULL,
        acknowledged_at_ms INTEGER,
        acknowledged_by INTEGER,
        silenced_until_ms INTEGER,
        escalation_level INTEGER NOT NULL,
        trigger_source_id INTEGER NOT NULL,
        trigger_timestamp_ms INTEGER NOT NULL,
        value REAL NOT NULL,
        threshold REAL NOT NULL,
        revision INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alarms_raised_at ON alarms (raised_at_ms)",
    r#"
    CREATE TABLE IF NOT EXISTS alarms_archive (
        alarm_id TEXT PRIMARY KEY NOT NULL,
        kind TEXT NOT NULL,
        priority TEXT NOT NULL,
        state TEXT NOT NULL,
        raised_at_ms INTEGER NOT NULL,
        acknowledged_at_ms INTEGER,
        acknowledged_by INTEGER,
        silenced_until_ms INTEGER,
        escalation_level INTEGER NOT NULL,
        trigger_source_id INTEGER NOT NULL,
        trigger_timestamp_ms INTEGER NOT NULL,
        value REAL NOT NULL,
        threshold REAL NOT NULL,
        revision INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL
    )
    "#,
];

/// Vitals table
#[derive(Debug, Clone)]
pub struct SqliteVitals {
    pool: SqlitePool,
}

/// Alarms table
#[derive(Debug, Clone)]
pub struct SqliteAlarms {
    pool: SqlitePool,
}

/// Durable store on a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    vitals: SqliteVitals,
    alarms: SqliteAlarms,
}

impl SqliteStore {
    /// Open the configured database and create the schema
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| StorageError::Schema(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and create the schema
    pub async fn with_pool(pool: SqlitePool) -> StorageResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::Schema(e.to_string()))?;
        }
        debug!("SQLite schema ready");

        Ok(Self {
            vitals: SqliteVitals { pool: pool.clone() },
            alarms: SqliteAlarms { pool: pool.clone() },
            pool,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn vital_from_row(row: &SqliteRow) -> StorageResult<VitalRecord> {
    let origin: String = row.try_get("origin")?;
    let source_id: i64 = row.try_get("source_id")?;
    Ok(VitalRecord::new(
        SourceId(u32::try_from(source_id).map_err(|e| StorageError::decode(e.to_string()))?),
        row.try_get("timestamp_ms")?,
        row.try_get("heart_rate")?,
        row.try_get("spo2")?,
        row.try_get("respiration_rate")?,
        Origin::from_str(&origin).map_err(StorageError::Decode)?,
    ))
}

fn alarm_from_row(row: &SqliteRow) -> StorageResult<AlarmSnapshot> {
    let alarm_id: String = row.try_get("alarm_id")?;
    let kind: String = row.try_get("kind")?;
    let priority: String = row.try_get("priority")?;
    let state: String = row.try_get("state")?;
    let acknowledged_by: Option<i64> = row.try_get("acknowledged_by")?;
    let escalation_level: i64 = row.try_get("escalation_level")?;
    let trigger_source_id: i64 = row.try_get("trigger_source_id")?;
    let revision: i64 = row.try_get("revision")?;

    let narrow = |e: std::num::TryFromIntError| StorageError::decode(e.to_string());
    Ok(AlarmSnapshot {
        alarm_id: Uuid::parse_str(&alarm_id).map_err(|e| StorageError::decode(e.to_string()))?,
        kind: AlarmKind::from_str(&kind).map_err(StorageError::Decode)?,
        priority: AlarmPriority::from_str(&priority).map_err(StorageError::Decode)?,
        state: AlarmState::from_str(&state).map_err(StorageError::Decode)?,
        raised_at_ms: row.try_get("raised_at_ms")?,
        acknowledged_at_ms: row.try_get("acknowledged_at_ms")?,
        acknowledged_by: acknowledged_by
            .map(u32::try_from)
            .transpose()
            .map_err(narrow)?
            .map(ActorRef),
        silenced_until_ms: row.try_get("silenced_until_ms")?,
        escalation_level: u8::try_from(escalation_level).map_err(narrow)?,
        trigger: RecordRef {
            source_id: SourceId(u32::try_from(trigger_source_id).map_err(narrow)?),
            timestamp_ms: row.try_get("trigger_timestamp_ms")?,
        },
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        revision: u32::try_from(revision).map_err(narrow)?,
        updated_at_ms: row.try_get("updated_at_ms")?,
    })
}

#[async_trait]
impl Repository<VitalRecord> for SqliteVitals {
    async fn save(&self, item: &VitalRecord) -> StorageResult<()> {
        self.save_batch(std::slice::from_ref(item)).await.map(|_| ())
    }

    async fn save_batch(&self, items: &[VitalRecord]) -> StorageResult<u64> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for record in items {
            let result = sqlx::query(
                r#"
                INSERT INTO vitals (source_id, timestamp_ms, heart_rate, spo2, respiration_rate, origin)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (source_id, timestamp_ms) DO NOTHING
                "#,
            )
            .bind(i64::from(record.source_id().0))
            .bind(record.timestamp_ms())
            .bind(record.heart_rate())
            .bind(record.spo2())
            .bind(record.respiration_rate())
            .bind(record.origin().to_string())
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;

        log_storage_operation(
            "save_batch",
            Some("vitals"),
            Some(items.len()),
            "committed",
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(changed)
    }

    async fn get_range(&self, start_ms: i64, end_ms: i64) -> StorageResult<Vec<VitalRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, timestamp_ms, heart_rate, spo2, respiration_rate, origin
            FROM vitals
            WHERE timestamp_ms BETWEEN ? AND ?
            ORDER BY timestamp_ms, source_id
            "#,
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(vital_from_row).collect()
    }

    async fn delete_older_than(&self, cutoff_ms: i64, batch_size: usize) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM vitals WHERE rowid IN (
                SELECT rowid FROM vitals WHERE timestamp_ms < ? LIMIT ?
            )
            "#,
        )
        .bind(cutoff_ms)
        .bind(batch_size as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn archive(&self, before_ms: i64) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO vitals_archive
            SELECT * FROM vitals WHERE timestamp_ms < ?
            "#,
        )
        .bind(before_ms)
        .execute(&mut *tx)
        .await?;
        let moved = sqlx::query("DELETE FROM vitals WHERE timestamp_ms < ?")
            .bind(before_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(moved.rows_affected())
    }

    async fn count(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vitals")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl Repository<AlarmSnapshot> for SqliteAlarms {
    async fn save(&self, item: &AlarmSnapshot) -> StorageResult<()> {
        self.save_batch(std::slice::from_ref(item)).await.map(|_| ())
    }

    async fn save_batch(&self, items: &[AlarmSnapshot]) -> StorageResult<u64> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for alarm in items {
            let result = sqlx::query(
                r#"
                INSERT INTO alarms (
                    alarm_id, kind, priority, state, raised_at_ms, acknowledged_at_ms,
                    acknowledged_by, silenced_until_ms, escalation_level, trigger_source_id,
                    trigger_timestamp_ms, value, threshold, revision, updated_at_ms
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (alarm_id) DO UPDATE SET
                    priority = excluded.priority,
                    state = excluded.state,
                    acknowledged_at_ms = excluded.acknowledged_at_ms,
                    acknowledged_by = excluded.acknowledged_by,
                    silenced_until_ms = excluded.silenced_until_ms,
                    escalation_level = excluded.escalation_level,
                    revision = excluded.revision,
                    updated_at_ms = excluded.updated_at_ms
                WHERE excluded.revision > alarms.revision
                "#,
            )
            .bind(alarm.alarm_id().to_string())
            .bind(alarm.kind().to_string())
            .bind(alarm.priority().to_string())
            .bind(alarm.state().to_string())
            .bind(alarm.raised_at_ms())
            .bind(alarm.acknowledged_at_ms())
            .bind(alarm.acknowledged_by().map(|actor| i64::from(actor.0)))
            .bind(alarm.silenced_until_ms())
            .bind(i64::from(alarm.escalation_level()))
            .bind(i64::from(alarm.trigger().source_id.0))
            .bind(alarm.trigger().timestamp_ms)
            .bind(alarm.value())
            .bind(alarm.threshold())
            .bind(i64::from(alarm.revision()))
            .bind(alarm.updated_at_ms())
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;

        log_storage_operation(
            "save_batch",
            Some("alarms"),
            Some(items.len()),
            "committed",
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(changed)
    }

    async fn get_range(&self, start_ms: i64, end_ms: i64) -> StorageResult<Vec<AlarmSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alarms
            WHERE raised_at_ms BETWEEN ? AND ?
            ORDER BY raised_at_ms
            "#,
        )
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alarm_from_row).collect()
    }

    async fn delete_older_than(&self, cutoff_ms: i64, batch_size: usize) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM alarms WHERE rowid IN (
                SELECT rowid FROM alarms
                WHERE state = ? AND updated_at_ms < ?
                LIMIT ?
            )
            "#,
        )
        .bind(AlarmState::Resolved.to_string())
        .bind(cutoff_ms)
        .bind(batch_size as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn archive(&self, before_ms: i64) -> StorageResult<u64> {
        let resolved = AlarmState::Resolved.to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO alarms_archive
            SELECT * FROM alarms WHERE state = ? AND updated_at_ms < ?
            "#,
        )
        .bind(resolved.as_str())
        .bind(before_ms)
        .execute(&mut *tx)
        .await?;
        let moved = sqlx::query("DELETE FROM alarms WHERE state = ? AND updated_at_ms < ?")
            .bind(resolved.as_str())
            .bind(before_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(moved.rows_affected())
    }

    async fn count(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alarms")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn vitals(&self) -> &dyn Repository<VitalRecord> {
        &self.vitals
    }

    fn alarms(&self) -> &dyn Repository<AlarmSnapshot> {
        &self.alarms
    }

    async fn size_bytes(&self) -> StorageResult<u64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }

    async fn compact(&self) -> StorageResult<()> {
        let started = Instant::now();
        sqlx::query("VACUUM").execute(&self.pool).await?;
        log_storage_operation(
            "compact",
            None,
            None,
            "completed",
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
