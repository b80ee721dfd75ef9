//! SQLite-backed relational store.
//!
//! Records live in one table keyed by `(dataset, kind, id)` with their
//! fields as JSON text. References are mirrored into `record_ref` with
//! deferred foreign keys, so SQLite itself refuses to commit a transaction
//! that leaves a reference dangling.

use crate::error::{StoreError, StoreResult};
use crate::store::{Referrer, RelationalStore, StoreTransaction};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use taxosync_model::{DatasetId, Record, RecordKey, RecordKind, RevisionId, Snapshot, Value};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dataset_revision (
    dataset  INTEGER PRIMARY KEY,
    revision INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS record (
    dataset INTEGER NOT NULL,
    kind    TEXT    NOT NULL,
    id      TEXT    NOT NULL,
    fields  TEXT    NOT NULL,
    PRIMARY KEY (dataset, kind, id)
);
CREATE TABLE IF NOT EXISTS record_ref (
    dataset     INTEGER NOT NULL,
    kind        TEXT    NOT NULL,
    id          TEXT    NOT NULL,
    field       TEXT    NOT NULL,
    target_kind TEXT    NOT NULL,
    target_id   TEXT    NOT NULL,
    PRIMARY KEY (dataset, kind, id, field),
    FOREIGN KEY (dataset, kind, id) REFERENCES record (dataset, kind, id)
        DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (dataset, target_kind, target_id) REFERENCES record (dataset, kind, id)
        DEFERRABLE INITIALLY DEFERRED
);
CREATE INDEX IF NOT EXISTS record_ref_target
    ON record_ref (dataset, target_kind, target_id);
";

/// A relational store backed by a SQLite database.
///
/// The connection is guarded by a mutex: one transaction or query at a time.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn dataset_param(dataset: DatasetId) -> i64 {
    i64::from(dataset.as_u32())
}

fn revision_param(revision: RevisionId) -> StoreResult<i64> {
    i64::try_from(revision.as_u64())
        .map_err(|_| StoreError::invalid_operation(format!("{revision} exceeds SQLite range")))
}

fn revision_from(raw: i64) -> StoreResult<RevisionId> {
    u64::try_from(raw)
        .map(RevisionId::new)
        .map_err(|_| StoreError::corrupt(format!("negative revision {raw}")))
}

fn parse_kind(raw: &str) -> StoreResult<RecordKind> {
    RecordKind::parse(raw).ok_or_else(|| StoreError::corrupt(format!("unknown record kind '{raw}'")))
}

fn decode_record(dataset: DatasetId, kind: &str, id: String, fields: &str) -> StoreResult<Record> {
    let fields: BTreeMap<String, Value> = serde_json::from_str(fields)?;
    Ok(Record {
        dataset,
        key: RecordKey::new(parse_kind(kind)?, id),
        fields,
    })
}

fn read_latest(conn: &Connection, dataset: DatasetId) -> StoreResult<Option<RevisionId>> {
    conn.query_row(
        "SELECT revision FROM dataset_revision WHERE dataset = ?1",
        params![dataset_param(dataset)],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .map(revision_from)
    .transpose()
}

fn read_record(conn: &Connection, dataset: DatasetId, key: &RecordKey) -> StoreResult<Option<Record>> {
    let row = conn
        .query_row(
            "SELECT fields FROM record WHERE dataset = ?1 AND kind = ?2 AND id = ?3",
            params![dataset_param(dataset), key.kind.as_str(), key.id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    row.map(|fields| decode_record(dataset, key.kind.as_str(), key.id.clone(), &fields))
        .transpose()
}

impl RelationalStore for SqliteStore {
    fn begin(&self, dataset: DatasetId) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            dataset,
            finished: false,
        }))
    }

    fn latest_revision(&self, dataset: DatasetId) -> StoreResult<Option<RevisionId>> {
        read_latest(&self.conn.lock(), dataset)
    }

    fn get(&self, dataset: DatasetId, key: &RecordKey) -> StoreResult<Option<Record>> {
        read_record(&self.conn.lock(), dataset, key)
    }

    fn referrers(&self, dataset: DatasetId, target: &RecordKey) -> StoreResult<Vec<Referrer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT kind, id, field FROM record_ref
             WHERE dataset = ?1 AND target_kind = ?2 AND target_id = ?3
             ORDER BY kind, id, field",
        )?;
        let rows = stmt.query_map(
            params![dataset_param(dataset), target.kind.as_str(), target.id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut referrers = Vec::new();
        for row in rows {
            let (kind, id, field) = row?;
            referrers.push(Referrer {
                key: RecordKey::new(parse_kind(&kind)?, id),
                field,
            });
        }
        Ok(referrers)
    }

    fn load_snapshot(&self, dataset: DatasetId) -> StoreResult<Snapshot> {
        let conn = self.conn.lock();
        let latest = read_latest(&conn, dataset)?;
        let mut stmt = conn.prepare_cached(
            "SELECT kind, id, fields FROM record WHERE dataset = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![dataset_param(dataset)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (kind, id, fields) = row?;
            records.push(decode_record(dataset, &kind, id, &fields)?);
        }
        Ok(Snapshot::with_revision(dataset, latest, records)?)
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    dataset: DatasetId,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn check_scope(&self, record: &Record) -> StoreResult<()> {
        if record.dataset != self.dataset {
            return Err(StoreError::invalid_operation(format!(
                "{} belongs to {}, transaction is scoped to {}",
                record.key, record.dataset, self.dataset
            )));
        }
        record.validate()?;
        Ok(())
    }

    fn write_refs(&self, record: &Record) -> StoreResult<()> {
        let ds = dataset_param(self.dataset);
        self.conn.execute(
            "DELETE FROM record_ref WHERE dataset = ?1 AND kind = ?2 AND id = ?3",
            params![ds, record.key.kind.as_str(), record.key.id],
        )?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO record_ref (dataset, kind, id, field, target_kind, target_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (field, target) in record.references() {
            stmt.execute(params![
                ds,
                record.key.kind.as_str(),
                record.key.id,
                field,
                target.kind.as_str(),
                target.id
            ])?;
        }
        Ok(())
    }

    /// Finds the first reference left without a target.
    fn first_dangling(&self) -> StoreResult<Option<(RecordKey, String, RecordKey)>> {
        let row = self
            .conn
            .query_row(
                "SELECT r.kind, r.id, r.field, r.target_kind, r.target_id
                 FROM record_ref r
                 LEFT JOIN record t
                   ON t.dataset = r.dataset AND t.kind = r.target_kind AND t.id = r.target_id
                 WHERE r.dataset = ?1 AND t.id IS NULL
                 ORDER BY r.kind, r.id, r.field
                 LIMIT 1",
                params![dataset_param(self.dataset)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(kind, id, field, target_kind, target_id)| {
            Ok((
                RecordKey::new(parse_kind(&kind)?, id),
                field,
                RecordKey::new(parse_kind(&target_kind)?, target_id),
            ))
        })
        .transpose()
    }

    fn finish(&mut self, sql: &str) -> StoreResult<()> {
        self.finished = true;
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn dataset(&self) -> DatasetId {
        self.dataset
    }

    fn latest_revision(&self) -> StoreResult<Option<RevisionId>> {
        read_latest(&self.conn, self.dataset)
    }

    fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        read_record(&self.conn, self.dataset, key)
    }

    fn insert(&mut self, record: &Record) -> StoreResult<()> {
        self.check_scope(record)?;
        let fields = serde_json::to_string(&record.fields)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO record (dataset, kind, id, fields) VALUES (?1, ?2, ?3, ?4)",
            params![
                dataset_param(self.dataset),
                record.key.kind.as_str(),
                record.key.id,
                fields
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::constraint(&record.key, "record already exists"));
        }
        self.write_refs(record)
    }

    fn update(&mut self, record: &Record) -> StoreResult<()> {
        self.check_scope(record)?;
        let fields = serde_json::to_string(&record.fields)?;
        let updated = self.conn.execute(
            "UPDATE record SET fields = ?4 WHERE dataset = ?1 AND kind = ?2 AND id = ?3",
            params![
                dataset_param(self.dataset),
                record.key.kind.as_str(),
                record.key.id,
                fields
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::constraint(&record.key, "record does not exist"));
        }
        self.write_refs(record)
    }

    fn delete(&mut self, key: &RecordKey) -> StoreResult<()> {
        let ds = dataset_param(self.dataset);
        self.conn.execute(
            "DELETE FROM record_ref WHERE dataset = ?1 AND kind = ?2 AND id = ?3",
            params![ds, key.kind.as_str(), key.id],
        )?;
        let deleted = self.conn.execute(
            "DELETE FROM record WHERE dataset = ?1 AND kind = ?2 AND id = ?3",
            params![ds, key.kind.as_str(), key.id],
        )?;
        if deleted == 0 {
            return Err(StoreError::constraint(key, "record does not exist"));
        }
        Ok(())
    }

    fn set_latest_revision(&mut self, revision: RevisionId) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO dataset_revision (dataset, revision) VALUES (?1, ?2)
             ON CONFLICT (dataset) DO UPDATE SET revision = excluded.revision",
            params![dataset_param(self.dataset), revision_param(revision)?],
        )?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if let Some((key, field, target)) = self.first_dangling()? {
            self.finish("ROLLBACK")?;
            return Err(StoreError::constraint(
                &key,
                format!("{field} references missing {target}"),
            ));
        }
        if let Err(err) = self.conn.execute_batch("COMMIT") {
            self.finish("ROLLBACK")?;
            return Err(err.into());
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(dataset = %self.dataset, error = %err, "rollback on drop failed");
            }
        }
    }
}
