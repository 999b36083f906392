use crate::analysis::extract::Fragment;
use anyhow::{Context, Result, anyhow};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

mod migrations;

pub use migrations::FRAGMENT_FORMAT;

pub const CACHE_DIR: &str = ".astrograph";
pub const CACHE_FILE: &str = "cache.sqlite";

const READ_POOL_SIZE: u32 = 4;

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub payload_bytes: u64,
}

/// Persistent map from `(path, content_hash)` to the fragment parsed from
/// those bytes.
///
/// Writes go through one mutex-guarded connection; lookups come from a read
/// pool so parse workers do not queue behind each other.
pub struct ContentCache {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl ContentCache {
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(CACHE_DIR).join(CACHE_FILE)
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        crate::util::ensure_parent_dir(db_path)?;

        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open cache db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        migrations::migrate(&write_conn).context("migrate cache schema")?;
        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(READ_POOL_SIZE)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .context("create cache read pool")?;

        tracing::debug!("opened content cache at {}", db_path.display());
        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .context("get read connection from pool")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.write_conn
            .lock()
            .map_err(|_| anyhow!("cache writer lock poisoned"))
    }

    /// Records `root` as the project this cache belongs to. Entries written
    /// for a different root are dropped; returns how many.
    pub fn bind_root(&self, root: &Path) -> Result<usize> {
        let root = root.to_string_lossy().into_owned();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let bound: Option<String> = tx
            .query_row("SELECT value FROM meta WHERE key = 'root'", [], |row| {
                row.get(0)
            })
            .optional()?;
        let mut removed = 0;
        if bound.as_deref() != Some(root.as_str()) {
            if let Some(previous) = &bound {
                tracing::info!("cache was bound to {previous}; dropping its fragments for {root}");
            }
            removed = tx.execute("DELETE FROM fragments", [])?;
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('root', ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![root],
            )?;
        }
        tx.commit().context("commit cache root")?;
        Ok(removed)
    }

    /// The project root recorded by the last `bind_root`.
    pub fn bound_root(&self) -> Result<Option<PathBuf>> {
        let value: Option<String> = self
            .read_conn()?
            .query_row("SELECT value FROM meta WHERE key = 'root'", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.map(PathBuf::from))
    }

    /// The fragment stored for exactly this path and hash, if any.
    pub fn lookup(&self, path: &str, hash: &str) -> Result<Option<Fragment>> {
        let payload: Option<String> = self
            .read_conn()?
            .query_row(
                "SELECT payload FROM fragments WHERE path = ? AND hash = ?",
                params![path, hash],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("lookup {path}"))?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let fragment = serde_json::from_str(&payload)
            .with_context(|| format!("decode cached fragment for {path}"))?;
        Ok(Some(fragment))
    }

    /// Upserts the fragment for `path`; the last writer wins.
    pub fn store(&self, path: &str, hash: &str, fragment: &Fragment) -> Result<()> {
        let payload = serde_json::to_string(fragment).context("encode fragment")?;
        let stored = chrono::Utc::now().timestamp();
        self.conn()?
            .execute(
                "INSERT INTO fragments (path, hash, language, payload, stored)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(path) DO UPDATE SET
                    hash = excluded.hash,
                    language = excluded.language,
                    payload = excluded.payload,
                    stored = excluded.stored",
                params![path, hash, fragment.language.as_str(), payload, stored],
            )
            .with_context(|| format!("store {path}"))?;
        Ok(())
    }

    /// Deletes every entry whose path is not in `keep`. Returns the number
    /// of entries removed.
    pub fn retain_paths(&self, keep: &[&str]) -> Result<usize> {
        let keep: HashSet<&str> = keep.iter().copied().collect();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT path FROM fragments")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut stale = Vec::new();
            for row in rows {
                let path = row?;
                if !keep.contains(path.as_str()) {
                    stale.push(path);
                }
            }
            stale
        };
        {
            let mut delete = tx.prepare("DELETE FROM fragments WHERE path = ?")?;
            for path in &stale {
                delete.execute(params![path])?;
            }
        }
        tx.commit().context("commit cache purge")?;
        Ok(stale.len())
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn()?.execute("DELETE FROM fragments", [])?;
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.stats()?.entries)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let (entries, payload_bytes): (i64, i64) = self.read_conn()?.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0) FROM fragments",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CacheStats {
            entries: entries.max(0) as usize,
            payload_bytes: payload_bytes.max(0) as u64,
        })
    }
}
