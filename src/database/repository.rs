/*!
 * Repository layer for database operations.
 *
 * `NoteRepository` stores notes (deck, note type and a JSON map of fields)
 * and the run history, and implements the `RecordRepository` contract used
 * by the annotation pipeline.
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::RepositoryError;
use crate::records::{Record, RecordId, RecordRepository, RecordSelector};

use super::connection::{Inventory, NoteDatabase};
use super::models::{NewNote, NoteRecord, RunRecord};

/// SQLite-backed note and run storage
#[derive(Clone)]
pub struct NoteRepository {
    db: NoteDatabase,
}

impl NoteRepository {
    pub fn new(db: NoteDatabase) -> Self {
        Self { db }
    }

    pub fn new_default() -> Result<Self> {
        Ok(Self::new(NoteDatabase::open_default()?))
    }

    /// Repository over an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::new(NoteDatabase::in_memory()?))
    }

    pub fn database(&self) -> &NoteDatabase {
        &self.db
    }

    pub async fn inventory(&self) -> Result<Inventory> {
        self.db.inventory().await
    }

    // =========================================================================
    // Note Operations
    // =========================================================================

    /// Insert a note and return its identifier
    pub async fn insert_note(&self, note: &NewNote) -> Result<RecordId> {
        let note = note.clone();

        self.db
            .call(move |conn| {
                let now = chrono::Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO notes (deck, note_type, fields, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![note.deck, note.note_type, serde_json::to_string(&note.fields)?, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    pub async fn get_note(&self, id: RecordId) -> Result<Option<NoteRecord>> {
        self.db.call(move |conn| Self::get_note_sync(conn, id)).await
    }

    fn get_note_sync(conn: &Connection, id: RecordId) -> Result<Option<NoteRecord>> {
        let row = conn
            .query_row(
                "SELECT id, deck, note_type, fields, created_at, updated_at FROM notes WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, deck, note_type, fields, created_at, updated_at)| {
            let fields: BTreeMap<String, String> = serde_json::from_str(&fields)
                .with_context(|| format!("Corrupt field map for note {}", id))?;
            Ok(NoteRecord {
                id,
                deck,
                note_type,
                fields,
                created_at,
                updated_at,
            })
        })
        .transpose()
    }

    /// Add an empty `field` to every note of `note_type` that lacks it.
    ///
    /// Returns the number of notes changed.
    pub async fn ensure_field(&self, note_type: &str, field: &str) -> Result<usize> {
        let note_type = note_type.to_string();
        let field = field.to_string();

        let changed = self
            .db
            .call_in_transaction(move |tx| {
                let mut stmt = tx.prepare("SELECT id, fields FROM notes WHERE note_type = ?1")?;
                let rows = stmt
                    .query_map([&note_type], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                let now = chrono::Utc::now().to_rfc3339();
                let mut changed = 0;
                for (id, fields) in rows {
                    let mut fields: BTreeMap<String, String> = serde_json::from_str(&fields)?;
                    if fields.contains_key(&field) {
                        continue;
                    }
                    fields.insert(field.clone(), String::new());
                    tx.execute(
                        "UPDATE notes SET fields = ?1, updated_at = ?2 WHERE id = ?3",
                        params![serde_json::to_string(&fields)?, now, id],
                    )?;
                    changed += 1;
                }
                Ok(changed)
            })
            .await?;

        if changed > 0 {
            info!("Added field to {} notes", changed);
        }
        Ok(changed)
    }

    /// Import tab-separated notes.
    ///
    /// Each non-empty line that does not start with `#` becomes one note; its
    /// columns are assigned to `field_names` in order. Extra columns are
    /// named `Field<n>`.
    pub async fn import_tsv<P: AsRef<Path>>(
        &self,
        path: P,
        deck: &str,
        note_type: &str,
        field_names: &[String],
    ) -> Result<usize> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read import file: {:?}", path))?;

        let notes: Vec<NewNote> = content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .map(|line| {
                line.split('\t')
                    .enumerate()
                    .fold(NewNote::new(deck, note_type), |note, (i, column)| {
                        let name = field_names
                            .get(i)
                            .cloned()
                            .unwrap_or_else(|| format!("Field{}", i + 1));
                        note.with_field(name, column)
                    })
            })
            .collect();

        let count = notes.len();
        self.db
            .call_in_transaction(move |tx| {
                let now = chrono::Utc::now().to_rfc3339();
                for note in notes {
                    tx.execute(
                        "INSERT INTO notes (deck, note_type, fields, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![note.deck, note.note_type, serde_json::to_string(&note.fields)?, now],
                    )?;
                }
                Ok(())
            })
            .await?;

        info!("Imported {} notes from {:?}", count, path);
        Ok(count)
    }

    // =========================================================================
    // Run History
    // =========================================================================

    pub async fn save_run(&self, run: &RunRecord) -> Result<()> {
        let run = run.clone();

        self.db
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO runs (
                        id, state, deck, note_type, source_field, target_field,
                        total_records, processed, skipped, failed, cache_hits, api_calls,
                        statistics, started_at, finished_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                    "#,
                    params![
                        run.id,
                        run.state,
                        run.deck,
                        run.note_type,
                        run.source_field,
                        run.target_field,
                        run.total_records,
                        run.processed,
                        run.skipped,
                        run.failed,
                        run.cache_hits,
                        run.api_calls,
                        run.statistics,
                        run.started_at,
                        run.finished_at,
                    ],
                )?;
                debug!("Saved run {}", run.id);
                Ok(())
            })
            .await
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, state, deck, note_type, source_field, target_field,
                           total_records, processed, skipped, failed, cache_hits, api_calls,
                           statistics, started_at, finished_at
                    FROM runs ORDER BY started_at DESC LIMIT ?1
                    "#,
                )?;
                let runs = stmt
                    .query_map([limit as i64], |row| {
                        Ok(RunRecord {
                            id: row.get(0)?,
                            state: row.get(1)?,
                            deck: row.get(2)?,
                            note_type: row.get(3)?,
                            source_field: row.get(4)?,
                            target_field: row.get(5)?,
                            total_records: row.get(6)?,
                            processed: row.get(7)?,
                            skipped: row.get(8)?,
                            failed: row.get(9)?,
                            cache_hits: row.get(10)?,
                            api_calls: row.get(11)?,
                            statistics: row.get(12)?,
                            started_at: row.get(13)?,
                            finished_at: row.get(14)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(runs)
            })
            .await
    }
}

#[async_trait]
impl RecordRepository for NoteRepository {
    async fn list_records(&self, selector: &RecordSelector) -> Result<Vec<Record>, RepositoryError> {
        let selector = selector.clone();

        let records = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, deck, note_type FROM notes
                    WHERE (?1 IS NULL OR deck = ?1) AND (?2 IS NULL OR note_type = ?2)
                    ORDER BY id
                    "#,
                )?;
                let records = stmt
                    .query_map(params![selector.deck, selector.note_type], |row| {
                        Ok(Record {
                            id: row.get(0)?,
                            deck: row.get(1)?,
                            note_type: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;

        Ok(records)
    }

    async fn read_field(&self, record: &Record, field: &str) -> Result<String, RepositoryError> {
        let id = record.id;
        let note = self
            .db
            .call(move |conn| Self::get_note_sync(conn, id))
            .await?
            .ok_or(RepositoryError::NotFound(id))?;

        note.field(field)
            .map(str::to_string)
            .ok_or_else(|| RepositoryError::FieldMissing {
                record_id: id,
                field: field.to_string(),
            })
    }

    async fn write_field(&self, record: &Record, field: &str, content: &str) -> Result<(), RepositoryError> {
        let id = record.id;
        let field_name = field.to_string();
        let content = content.to_string();

        let outcome = self
            .db
            .call_in_transaction(move |tx| {
                let Some(mut note) = Self::get_note_sync(tx, id)? else {
                    return Ok(Err(RepositoryError::NotFound(id)));
                };
                let Some(slot) = note.fields.get_mut(&field_name) else {
                    return Ok(Err(RepositoryError::FieldMissing {
                        record_id: id,
                        field: field_name,
                    }));
                };
                *slot = content;

                tx.execute(
                    "UPDATE notes SET fields = ?1, updated_at = ?2 WHERE id = ?3",
                    params![serde_json::to_string(&note.fields)?, chrono::Utc::now().to_rfc3339(), id],
                )?;
                Ok(Ok(()))
            })
            .await?;

        if let Err(e) = &outcome {
            warn!("Write to note {} rejected: {}", id, e);
        }
        outcome
    }
}
