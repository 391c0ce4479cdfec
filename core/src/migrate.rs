use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Schema level this build knows how to produce.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    description: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create base tables and repair shopping_list column name",
        apply: migrate_v0_to_v1,
    },
    Migration {
        version: 2,
        description: "add schema version history",
        apply: migrate_v1_to_v2,
    },
];

/// Brings the on-disk store up to [`CURRENT_SCHEMA_VERSION`].
pub struct Migrator {
    path: PathBuf,
}

impl Migrator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create or upgrade the store. Safe to call on every start.
    pub fn ensure_schema(&self) -> Result<i64> {
        if !self.path.exists() {
            return self.create_fresh();
        }

        let conn = Connection::open(&self.path).map_err(|e| {
            Error::setup(format!("cannot open {}", self.path.display()), e)
        })?;
        let current = read_version(&conn)
            .map_err(|e| Error::setup("cannot read schema version", e))?;
        debug!(current, target = CURRENT_SCHEMA_VERSION, "checked schema version");

        if current > CURRENT_SCHEMA_VERSION {
            warn!(
                current,
                target = CURRENT_SCHEMA_VERSION,
                "store was written by a newer version; leaving it untouched"
            );
            return Ok(current);
        }
        if current == CURRENT_SCHEMA_VERSION {
            return Ok(current);
        }

        let backup = backup_store(&self.path)?;
        info!(backup = %backup.display(), "backed up store before migrating");

        for step in MIGRATIONS.iter().filter(|m| m.version > current) {
            info!(
                from = step.version - 1,
                to = step.version,
                "{}",
                step.description
            );
            apply_step(&conn, step).map_err(|e| {
                Error::setup(
                    format!(
                        "migration to v{} failed; pre-migration backup kept at {}",
                        step.version,
                        backup.display()
                    ),
                    e,
                )
            })?;
        }

        info!(version = CURRENT_SCHEMA_VERSION, "schema is up to date");
        Ok(CURRENT_SCHEMA_VERSION)
    }

    /// Applied schema level, or 0 when the store is missing or unreadable.
    #[must_use]
    pub fn schema_version(&self) -> i64 {
        let conn = match Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        {
            Ok(conn) => conn,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no readable store");
                return 0;
            }
        };
        read_version(&conn).unwrap_or_else(|e| {
            warn!(error = %e, "failed to read schema version");
            0
        })
    }

    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.schema_version() <= CURRENT_SCHEMA_VERSION
    }

    fn create_fresh(&self) -> Result<i64> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::setup(format!("cannot create {}", parent.display()), e)
            })?;
        }
        let conn = Connection::open(&self.path).map_err(|e| {
            Error::setup(format!("cannot create {}", self.path.display()), e)
        })?;
        let tx = conn
            .unchecked_transaction()
            .and_then(|tx| {
                create_initial_schema(&tx)?;
                Ok(tx)
            })
            .map_err(|e| Error::setup("cannot create initial schema", e))?;
        tx.commit()
            .map_err(|e| Error::setup("cannot create initial schema", e))?;
        info!(path = %self.path.display(), version = CURRENT_SCHEMA_VERSION, "created new store");
        Ok(CURRENT_SCHEMA_VERSION)
    }
}

fn apply_step(conn: &Connection, step: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    (step.apply)(&tx)?;
    set_version(&tx, step.version)?;
    tx.commit()
}

/// Full current schema, stamped at [`CURRENT_SCHEMA_VERSION`].
pub(crate) fn create_initial_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS done_meals (
            meal_id INTEGER PRIMARY KEY,
            done_at TEXT
        );

        CREATE TABLE IF NOT EXISTS shopping_list (
            ingredient_id TEXT PRIMARY KEY,
            ingredient_name TEXT
        );",
    )?;
    set_version(conn, CURRENT_SCHEMA_VERSION)
}

pub(crate) fn read_version(conn: &Connection) -> rusqlite::Result<i64> {
    if !table_exists(conn, "schema_version")? {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

fn set_version(conn: &Connection, version: i64) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![version, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get(0),
    )
}

fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    stmt.query_map([], |row| row.get::<_, String>(1))?
        .collect()
}

/// Copy the store byte for byte to `<store>.backup.<UTC timestamp>`, adding `.1`, `.2`, ...
/// when that name is taken. An existing backup is never overwritten.
fn backup_store(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut base = path.as_os_str().to_owned();
    base.push(format!(".backup.{stamp}"));

    let mut source = File::open(path)
        .map_err(|e| Error::setup(format!("cannot read {} for backup", path.display()), e))?;

    let mut attempt = 0u32;
    let (backup, mut target) = loop {
        let mut name = base.clone();
        if attempt > 0 {
            name.push(format!(".{attempt}"));
        }
        let candidate = PathBuf::from(name);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => break (candidate, file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 1000 => attempt += 1,
            Err(e) => {
                return Err(Error::setup(
                    format!("cannot back up store to {}", candidate.display()),
                    e,
                ));
            }
        }
    };
    io::copy(&mut source, &mut target)
        .and_then(|_| target.sync_all())
        .map_err(|e| Error::setup(format!("cannot back up store to {}", backup.display()), e))?;
    Ok(backup)
}

fn migrate_v0_to_v1(conn: &Connection) -> rusqlite::Result<()> {
    // Early stores were created with a misspelled ingredient column.
    if table_exists(conn, "shopping_list")?
        && column_names(conn, "shopping_list")?
            .iter()
            .any(|c| c == "ingridient_name")
    {
        info!("repairing misspelled shopping_list.ingridient_name column");
        conn.execute_batch(
            "CREATE TABLE shopping_list_new (
                ingredient_id TEXT PRIMARY KEY,
                ingredient_name TEXT
            );

            INSERT INTO shopping_list_new (ingredient_id, ingredient_name)
            SELECT ingredient_id, ingridient_name FROM shopping_list;

            DROP TABLE shopping_list;
            ALTER TABLE shopping_list_new RENAME TO shopping_list;",
        )?;
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS done_meals (
            meal_id INTEGER PRIMARY KEY,
            done_at TEXT
        );

        CREATE TABLE IF NOT EXISTS shopping_list (
            ingredient_id TEXT PRIMARY KEY,
            ingredient_name TEXT
        );",
    )
}

fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backups_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("planner.db.backup."))
            })
            .collect()
    }

    fn legacy_store(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE done_meals (meal_id INTEGER PRIMARY KEY, done_at TEXT);
             CREATE TABLE shopping_list (ingredient_id TEXT PRIMARY KEY, ingridient_name TEXT);
             INSERT INTO done_meals VALUES (5, '2024-01-01T10:00:00');
             INSERT INTO shopping_list VALUES ('a1', 'Eggs');",
        )
        .unwrap();
    }

    #[test]
    fn test_fresh_store_created_at_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        let migrator = Migrator::new(&path);

        assert_eq!(migrator.schema_version(), 0);
        assert!(!path.exists(), "reading the version must not create the store");

        assert_eq!(migrator.ensure_schema().unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(migrator.schema_version(), CURRENT_SCHEMA_VERSION);
        assert!(migrator.is_compatible());
        assert!(backups_in(dir.path()).is_empty());
    }

    #[test]
    fn test_fresh_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("planner.db");
        Migrator::new(&path).ensure_schema().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_legacy_store_migrates_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        legacy_store(&path);
        let migrator = Migrator::new(&path);
        assert_eq!(migrator.schema_version(), 0);

        assert_eq!(migrator.ensure_schema().unwrap(), 2);

        let conn = Connection::open(&path).unwrap();
        let columns = column_names(&conn, "shopping_list").unwrap();
        assert!(columns.contains(&"ingredient_name".to_string()));
        assert!(!columns.contains(&"ingridient_name".to_string()));
        let name: String = conn
            .query_row(
                "SELECT ingredient_name FROM shopping_list WHERE ingredient_id = 'a1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Eggs");
        let done: i64 = conn
            .query_row("SELECT COUNT(*) FROM done_meals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(done, 1);

        // One history row per applied step
        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(versions, vec![1, 2]);

        assert_eq!(backups_in(dir.path()).len(), 1);
    }

    #[test]
    fn test_second_run_is_noop_without_new_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        legacy_store(&path);
        let migrator = Migrator::new(&path);

        migrator.ensure_schema().unwrap();
        assert_eq!(migrator.ensure_schema().unwrap(), 2);
        assert_eq!(backups_in(dir.path()).len(), 1);
    }

    #[test]
    fn test_backup_is_byte_identical_to_premigration_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        legacy_store(&path);
        let before = std::fs::read(&path).unwrap();

        Migrator::new(&path).ensure_schema().unwrap();

        let backups = backups_in(dir.path());
        assert_eq!(std::fs::read(&backups[0]).unwrap(), before);
    }

    #[test]
    fn test_backups_within_one_second_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        std::fs::write(&path, b"first").unwrap();
        let first = backup_store(&path).unwrap();

        std::fs::write(&path, b"second").unwrap();
        let second = backup_store(&path).unwrap();
        let third = backup_store(&path).unwrap();

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        assert_eq!(backups_in(dir.path()).len(), 3);
    }

    #[test]
    fn test_v1_store_without_typo_only_gains_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE done_meals (meal_id INTEGER PRIMARY KEY, done_at TEXT);
                 CREATE TABLE shopping_list (ingredient_id TEXT PRIMARY KEY, ingredient_name TEXT);
                 INSERT INTO shopping_list VALUES ('b2', 'Flour');",
            )
            .unwrap();
        }

        assert_eq!(Migrator::new(&path).ensure_schema().unwrap(), 2);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM shopping_list", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_step_keeps_backup_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        legacy_store(&path);
        {
            // A leftover scratch table makes the column repair fail.
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE shopping_list_new (x TEXT);")
                .unwrap();
        }
        let migrator = Migrator::new(&path);

        let err = migrator.ensure_schema().unwrap_err();
        assert!(matches!(err, Error::Setup { .. }));
        assert_eq!(migrator.schema_version(), 0);
        assert_eq!(backups_in(dir.path()).len(), 1);

        // The failed step rolled back, so the legacy column is still there.
        let conn = Connection::open(&path).unwrap();
        let columns = column_names(&conn, "shopping_list").unwrap();
        assert!(columns.contains(&"ingridient_name".to_string()));
    }

    #[test]
    fn test_newer_store_is_flagged_not_touched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        let migrator = Migrator::new(&path);
        migrator.ensure_schema().unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            set_version(&conn, CURRENT_SCHEMA_VERSION + 1).unwrap();
        }

        assert_eq!(migrator.ensure_schema().unwrap(), CURRENT_SCHEMA_VERSION + 1);
        assert!(!migrator.is_compatible());
        assert!(backups_in(dir.path()).is_empty());
    }

    #[test]
    fn test_unreadable_store_reports_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.db");
        std::fs::write(&path, b"definitely not sqlite").unwrap();
        assert_eq!(Migrator::new(&path).schema_version(), 0);
    }
}
