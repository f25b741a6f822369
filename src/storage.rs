use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Durable settings and custom-instance storage.
///
/// Every write is a synchronous statement on the shared connection, so a read
/// issued right after a write always observes it.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

const UPSERT_SETTING: &str = r#"
INSERT INTO settings (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomInstance {
    pub name: String,
    pub api_url: String,
}

impl CustomInstance {
    pub fn new(name: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_url: api_url.into(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;
        log::debug!("storage: opened {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("storage: read setting {key}"))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(UPSERT_SETTING, params![key, value, Utc::now().timestamp()])
        .with_context(|| format!("storage: write setting {key}"))?;
        Ok(())
    }

    /// Writes every pair in one transaction: either all values land or none.
    pub fn set_settings(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin settings write")?;
        let now = Utc::now().timestamp();
        for (key, value) in entries {
            tx.execute(UPSERT_SETTING, params![key, value, now])
                .with_context(|| format!("storage: write setting {key}"))?;
        }
        tx.commit().context("storage: commit settings write")
    }

    /// Inserts the instance unless one with the same api url exists.
    /// Returns `false` when the row was already present.
    pub fn insert_custom_instance(&self, instance: &CustomInstance) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                r#"
INSERT INTO custom_instances (name, api_url, created_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(api_url) DO NOTHING
"#,
                params![instance.name, instance.api_url, Utc::now().timestamp()],
            )
            .context("storage: insert custom instance")?;
        Ok(changed == 1)
    }

    pub fn list_custom_instances(&self) -> Result<Vec<CustomInstance>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT name, api_url
FROM custom_instances
ORDER BY id ASC
"#,
        )?;
        let rows = stmt
            .query_map([], instance_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("storage: list custom instances")?;
        Ok(rows)
    }

    pub fn delete_custom_instance(&self, api_url: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "DELETE FROM custom_instances WHERE api_url = ?1",
                params![api_url],
            )
            .context("storage: delete custom instance")?;
        Ok(changed > 0)
    }

    pub fn delete_all_custom_instances(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM custom_instances", [])
            .context("storage: clear custom instances")
    }
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<CustomInstance> {
    Ok(CustomInstance {
        name: row.get(0)?,
        api_url: row.get(1)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
        log::debug!("storage: applied migration {version}");
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS custom_instances (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  api_url TEXT NOT NULL UNIQUE,
  created_at INTEGER NOT NULL
);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tube-instances").join("state.db"))
}

#[cfg(test)]
pub(crate) fn open_temp() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(Options {
        path: Some(dir.path().join("state.db")),
    })
    .unwrap();
    (dir, store)
}
