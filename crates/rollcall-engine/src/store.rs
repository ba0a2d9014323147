//! Durable identity storage.
//!
//! Stores are append-only and loaded fully at startup. The registry owns the
//! in-memory copy; a store only has to persist rows in registration order.

use rollcall_core::{Embedding, Identity};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot encode embedding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("malformed record {row}: {reason}")]
    Malformed { row: usize, reason: String },
    #[error("cannot open {path}: {reason}")]
    Unavailable { path: String, reason: String },
    #[error("{0}")]
    NotLoaded(String),
}

/// Append-only persistence for registered identities.
///
/// Implementations must be safe for concurrent use; writes are serialized
/// by the registry.
pub trait IdentityStore: Send + Sync {
    /// Every persisted identity, in registration order.
    fn load_all(&self) -> Result<Vec<Identity>, StoreError>;

    /// Persist one new identity after all existing ones.
    fn append(&mut self, identity: &Identity) -> Result<(), StoreError>;
}

/// Open the store for `path`: SQLite for `.db`/`.sqlite`/`.sqlite3`, CSV otherwise.
///
/// A database that cannot be opened yields an [`UnavailableStore`], so the
/// failure surfaces from `load_all` like any other unreadable store.
pub fn open_identity_store(path: &Path) -> Box<dyn IdentityStore> {
    let is_sqlite = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "db" | "sqlite" | "sqlite3"));

    if !is_sqlite {
        return Box::new(CsvStore::new(path));
    }
    match SqliteStore::open(path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot open identity database");
            Box::new(UnavailableStore {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Store that failed to open; every operation reports why.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    path: String,
    reason: String,
}

impl UnavailableStore {
    fn error(&self) -> StoreError {
        StoreError::Unavailable {
            path: self.path.clone(),
            reason: self.reason.clone(),
        }
    }
}

impl IdentityStore for UnavailableStore {
    fn load_all(&self) -> Result<Vec<Identity>, StoreError> {
        Err(self.error())
    }

    fn append(&mut self, _identity: &Identity) -> Result<(), StoreError> {
        Err(self.error())
    }
}

/// Volatile [`IdentityStore`]. Data is lost on exit; for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Vec<Identity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `identities`, as if they had been appended in order.
    pub fn with_identities(identities: Vec<Identity>) -> Self {
        Self { rows: identities }
    }
}

impl IdentityStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.rows.clone())
    }

    fn append(&mut self, identity: &Identity) -> Result<(), StoreError> {
        self.rows.push(identity.clone());
        Ok(())
    }
}

/// Header of the identity CSV.
const CSV_HEADER: [&str; 3] = ["id", "name", "embedding"];

#[derive(Deserialize)]
struct CsvRow {
    id: String,
    name: String,
    embedding: String,
}

/// CSV-backed store: `id,name,embedding` with the embedding as a JSON list.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for CsvStore {
    fn load_all(&self) -> Result<Vec<Identity>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut identities: Vec<Identity> = Vec::new();
        for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row?;
            let row_no = i + 1;
            let embedding: Embedding = serde_json::from_str(&row.embedding).map_err(|e| StoreError::Malformed {
                row: row_no,
                reason: format!("embedding: {e}"),
            })?;
            check_dimension(&identities, &embedding, row_no)?;
            identities.push(Identity {
                id: row.id,
                display_name: row.name,
                embedding,
            });
        }

        tracing::debug!(path = %self.path.display(), count = identities.len(), "loaded identity CSV");
        Ok(identities)
    }

    fn append(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let is_new = file_is_empty(&self.path);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if is_new {
            writer.write_record(CSV_HEADER)?;
        }
        let embedding = serde_json::to_string(&identity.embedding)?;
        writer.write_record([identity.id.as_str(), identity.display_name.as_str(), embedding.as_str()])?;
        writer.flush()?;
        Ok(())
    }
}

/// SQLite-backed store; `seq` preserves registration order.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                seq       INTEGER PRIMARY KEY AUTOINCREMENT,
                id        TEXT NOT NULL UNIQUE,
                name      TEXT NOT NULL,
                embedding TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl IdentityStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare("SELECT id, name, embedding FROM identities ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut identities: Vec<Identity> = Vec::new();
        for (i, row) in rows.enumerate() {
            let (id, name, raw) = row?;
            let embedding: Embedding = serde_json::from_str(&raw).map_err(|e| StoreError::Malformed {
                row: i + 1,
                reason: format!("embedding: {e}"),
            })?;
            check_dimension(&identities, &embedding, i + 1)?;
            identities.push(Identity {
                id,
                display_name: name,
                embedding,
            });
        }
        Ok(identities)
    }

    fn append(&mut self, identity: &Identity) -> Result<(), StoreError> {
        let embedding = serde_json::to_string(&identity.embedding)?;
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO identities (id, name, embedding) VALUES (?1, ?2, ?3)",
            params![identity.id, identity.display_name, embedding],
        )?;
        Ok(())
    }
}

/// Missing or zero-length files need a header before the first row.
pub(crate) fn file_is_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

/// All embeddings in one store share a length.
fn check_dimension(loaded: &[Identity], embedding: &Embedding, row: usize) -> Result<(), StoreError> {
    match loaded.first() {
        Some(first) if first.embedding.dim() != embedding.dim() => Err(StoreError::Malformed {
            row,
            reason: format!(
                "embedding has {} values, expected {}",
                embedding.dim(),
                first.embedding.dim()
            ),
        }),
        _ => Ok(()),
    }
}
