use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::error::{Result, storage};
use crate::migrate::{self, Migrator};
use crate::models::{DoneMarker, MealId, ShoppingListEntry};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Migrate the store at `path` and open it. Nothing touches the store before migration finishes.
    pub fn open(path: &Path) -> Result<Self> {
        Migrator::new(path).ensure_schema()?;
        let conn = Connection::open(path).map_err(storage("open the store"))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(storage("configure the store"))?;
        Ok(Database { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage("open the store"))?;
        migrate::create_initial_schema(&conn).map_err(storage("create the schema"))?;
        Ok(Database { conn })
    }

    pub fn schema_version(&self) -> Result<i64> {
        migrate::read_version(&self.conn).map_err(storage("read the schema version"))
    }

    // --- Done markers ---

    /// Returns `false` when the meal was already done.
    pub fn mark_done(&self, meal_id: MealId) -> Result<bool> {
        self.mark_done_at(meal_id, Utc::now())
    }

    pub fn mark_done_at(&self, meal_id: MealId, done_at: DateTime<Utc>) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO done_meals (meal_id, done_at) VALUES (?1, ?2)",
                params![meal_id, done_at.to_rfc3339_opts(SecondsFormat::Micros, true)],
            )
            .map_err(storage("mark a meal done"))?;
        if inserted == 0 {
            tracing::debug!(%meal_id, "meal already marked done");
        }
        Ok(inserted > 0)
    }

    pub fn is_done(&self, meal_id: MealId) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM done_meals WHERE meal_id = ?1)",
                params![meal_id],
                |row| row.get(0),
            )
            .map_err(storage("check a done marker"))
    }

    /// Most recently marked first.
    pub fn get_all_done_ids(&self) -> Result<Vec<MealId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT meal_id FROM done_meals ORDER BY done_at DESC, meal_id DESC")
            .map_err(storage("list done meals"))?;
        stmt.query_map([], |row| row.get(0))
            .and_then(Iterator::collect)
            .map_err(storage("list done meals"))
    }

    pub fn list_done(&self) -> Result<Vec<DoneMarker>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT meal_id, done_at FROM done_meals ORDER BY done_at DESC, meal_id DESC",
            )
            .map_err(storage("list done meals"))?;
        stmt.query_map([], |row| {
            Ok(DoneMarker {
                meal_id: row.get(0)?,
                done_at: row.get(1)?,
            })
        })
        .and_then(Iterator::collect)
        .map_err(storage("list done meals"))
    }

    /// Returns `false` when the meal was never marked.
    pub fn re_add(&self, meal_id: MealId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM done_meals WHERE meal_id = ?1", params![meal_id])
            .map_err(storage("re-add a meal"))?;
        Ok(removed > 0)
    }

    // --- Shopping list ---

    /// Ordered by ingredient name.
    pub fn get_shopping_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ingredient_id FROM shopping_list ORDER BY ingredient_name, ingredient_id",
            )
            .map_err(storage("list the shopping list"))?;
        stmt.query_map([], |row| row.get(0))
            .and_then(Iterator::collect)
            .map_err(storage("list the shopping list"))
    }

    pub fn get_shopping_list(&self) -> Result<Vec<ShoppingListEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ingredient_id, ingredient_name FROM shopping_list
                 ORDER BY ingredient_name, ingredient_id",
            )
            .map_err(storage("list the shopping list"))?;
        stmt.query_map([], |row| {
            Ok(ShoppingListEntry {
                ingredient_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                ingredient_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })
        .and_then(Iterator::collect)
        .map_err(storage("list the shopping list"))
    }

    /// Atomically swap the whole shopping list for `entries`.
    ///
    /// Entries sharing an `ingredient_id` (including the empty sentinel) keep the
    /// first one. Returns the number of rows written.
    pub fn replace_shopping_list(&self, entries: &[ShoppingListEntry]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(storage("replace the shopping list"))?;
        tx.execute("DELETE FROM shopping_list", [])
            .map_err(storage("replace the shopping list"))?;
        let mut written = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO shopping_list (ingredient_id, ingredient_name)
                     VALUES (?1, ?2)",
                )
                .map_err(storage("replace the shopping list"))?;
            for entry in entries {
                written += stmt
                    .execute(params![entry.ingredient_id, entry.ingredient_name])
                    .map_err(storage("replace the shopping list"))?;
            }
        }
        tx.commit().map_err(storage("replace the shopping list"))?;
        if written < entries.len() {
            tracing::debug!(
                submitted = entries.len(),
                written,
                "dropped shopping entries with duplicate ids"
            );
        }
        Ok(written)
    }
}
