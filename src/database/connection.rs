/*!
 * Handle on the note database.
 *
 * A single SQLite connection is shared by every annotation worker. Calls are
 * serialized behind a mutex and run on the blocking pool so record writes
 * never stall the async workers.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::schema;

const DB_FILENAME: &str = "notes.db";
const DATA_DIRNAME: &str = "kanjigloss";

/// Wait on locks held by other processes instead of failing with SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, cloneable handle on the note database
#[derive(Clone)]
pub struct NoteDatabase {
    location: Location,
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

impl NoteDatabase {
    /// Open the database under the user data directory
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Open the database file at `path`, creating it and its schema when missing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create note database directory: {:?}", parent))?;
        }

        info!("Opening note database at {:?}", path);
        let conn = Connection::open(&path).with_context(|| format!("Failed to open note database: {:?}", path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::prepare(conn, Location::File(path))
    }

    /// Throwaway database living only as long as the handle
    pub fn in_memory() -> Result<Self> {
        debug!("Opening in-memory note database");
        let conn = Connection::open_in_memory().context("Failed to open in-memory note database")?;
        Self::prepare(conn, Location::Memory)
    }

    fn prepare(conn: Connection, location: Location) -> Result<Self> {
        schema::initialize_schema(&conn)?;
        Ok(Self {
            location,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .ok_or_else(|| anyhow::anyhow!("No user data directory on this platform; pass --db"))?;
        Ok(data_dir.join(DATA_DIRNAME).join(DB_FILENAME))
    }

    /// File backing the database, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .context("Note database task panicked")?
    }

    /// Run `f` inside a transaction committed only when `f` succeeds
    pub async fn call_in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .context("Note database transaction panicked")?
    }

    /// Notes per deck and the time of the last recorded run
    pub async fn inventory(&self) -> Result<Inventory> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT deck, COUNT(*) FROM notes GROUP BY deck ORDER BY deck")?;
            let decks = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let runs: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
            let last_run_at: Option<String> = conn
                .query_row("SELECT finished_at FROM runs ORDER BY started_at DESC LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()?;

            Ok(Inventory {
                decks,
                runs,
                last_run_at,
            })
        })
        .await
    }
}

/// What the note database currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    /// (deck, note count), sorted by deck name
    pub decks: Vec<(String, i64)>,
    pub runs: i64,
    pub last_run_at: Option<String>,
}

impl Inventory {
    pub fn note_count(&self) -> i64 {
        self.decks.iter().map(|(_, count)| count).sum()
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} notes in {} decks, {} runs", self.note_count(), self.decks.len(), self.runs)?;
        if let Some(last) = &self.last_run_at {
            write!(f, " (last finished {})", last)?;
        }
        Ok(())
    }
}
