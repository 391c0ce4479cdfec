use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::mealie::{MealPlanResponse, MealieConfig, NewPlanEntry, RecipeDetail};
use crate::migrate::CURRENT_SCHEMA_VERSION;
use crate::models::{
    DateWindow, DoneMarker, MealId, SchemaStatus, ShoppingListEntry, parse_shopping_pairs,
};
use crate::reconcile::{self, PlanResult, PlanView, partition};

/// Remote meal-plan service.
///
/// The CLI implements this with reqwest. Calls block until the remote answers
/// or its timeout fires; no retries.
pub trait MealPlanSource: Send + Sync {
    /// Connection details, used to derive image and recipe links.
    fn config(&self) -> &MealieConfig;
    fn meal_plan(&self, window: Option<DateWindow>) -> Result<MealPlanResponse>;
    fn recipe(&self, slug: &str) -> Result<RecipeDetail>;
    fn delete_plan_entry(&self, id: MealId) -> Result<()>;
    fn create_plan_entry(&self, entry: &NewPlanEntry) -> Result<()>;
}

/// Remote grocery-list service. A single blocking call: sign in, find or create
/// `list_name`, append `items`. Any failure is reported as one error.
pub trait GroceryList: Send + Sync {
    fn add_items(&self, list_name: &str, items: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ShoppingBuild {
    pub recipes: usize,
    pub written: usize,
}

pub struct PlannerService {
    db: Database,
}

impl PlannerService {
    /// Open (and migrate) the store at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        Ok(Self::with_database(Database::open(db_path)?))
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn with_database(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let version = self.db.schema_version()?;
        Ok(SchemaStatus {
            version,
            target: CURRENT_SCHEMA_VERSION,
            compatible: version <= CURRENT_SCHEMA_VERSION,
        })
    }

    // --- Done state ---

    pub fn mark_done(&self, meal_id: MealId) -> Result<bool> {
        self.db.mark_done(meal_id)
    }

    pub fn re_add(&self, meal_id: MealId) -> Result<bool> {
        self.db.re_add(meal_id)
    }

    pub fn list_done(&self) -> Result<Vec<DoneMarker>> {
        self.db.list_done()
    }

    // --- Plan ---

    pub fn plan_view(
        &self,
        source: &dyn MealPlanSource,
        window: Option<DateWindow>,
    ) -> Result<PlanView> {
        reconcile::view(reconcile::fetch_plan(source, window)?, &self.db, window)
    }

    /// Same as [`plan_view`](Self::plan_view) for a plan fetched elsewhere, e.g. by an async client.
    pub fn plan_view_from(
        &self,
        fetched: Result<MealPlanResponse>,
        config: &MealieConfig,
        window: Option<DateWindow>,
    ) -> Result<PlanView> {
        reconcile::view(PlanResult::from_fetch(fetched, config)?, &self.db, window)
    }

    pub fn remove_from_plan(&self, source: &dyn MealPlanSource, meal_id: MealId) -> Result<()> {
        source.delete_plan_entry(meal_id)
    }

    /// Add the recipe behind `slug` to the plan on `date`.
    pub fn add_to_plan(
        &self,
        source: &dyn MealPlanSource,
        date: NaiveDate,
        slug: &str,
        entry_type: &str,
    ) -> Result<()> {
        validate_slug(slug)?;
        let recipe = source.recipe(slug)?;
        let recipe_id = recipe
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::validation(format!("Recipe '{slug}' has no id")))?;
        source.create_plan_entry(&NewPlanEntry {
            date,
            recipe_id,
            entry_type: entry_type.to_string(),
        })
    }

    // --- Shopping list ---

    pub fn shopping_list(&self) -> Result<Vec<ShoppingListEntry>> {
        self.db.get_shopping_list()
    }

    pub fn replace_shopping_list(&self, entries: &[ShoppingListEntry]) -> Result<usize> {
        self.db.replace_shopping_list(entries)
    }

    /// Validate a snapshot of `[id, name]` pairs and store it. Invalid input leaves the list untouched.
    pub fn replace_shopping_pairs(&self, pairs: &[serde_json::Value]) -> Result<usize> {
        let entries = parse_shopping_pairs(pairs)?;
        self.db.replace_shopping_list(&entries)
    }

    /// Rebuild the shopping list from the ingredients of every not-yet-done meal in `window`.
    ///
    /// A failed fetch is an error here: the cached list is only replaced from a good plan.
    pub fn build_shopping_list(
        &self,
        source: &dyn MealPlanSource,
        window: Option<DateWindow>,
    ) -> Result<ShoppingBuild> {
        let plan = source.meal_plan(window)?;
        let done_ids = self.db.get_all_done_ids()?;
        let (visible, _) = partition(plan.items, &done_ids);

        let mut seen = HashSet::new();
        let slugs: Vec<String> = visible
            .iter()
            .filter_map(|item| item.recipe_slug())
            .filter(|slug| seen.insert(slug.to_string()))
            .map(str::to_string)
            .collect();

        let mut entries = Vec::new();
        for slug in &slugs {
            let recipe = source.recipe(slug)?;
            entries.extend(recipe.recipe_ingredient.iter().filter_map(|i| i.to_entry()));
        }

        let written = self.db.replace_shopping_list(&entries)?;
        tracing::info!(recipes = slugs.len(), written, "rebuilt shopping list");
        Ok(ShoppingBuild {
            recipes: slugs.len(),
            written,
        })
    }

    /// Ingredient names to push to the grocery list, in list order. Empty names are dropped.
    pub fn items_to_send(&self) -> Result<Vec<String>> {
        Ok(self
            .db
            .get_shopping_list()?
            .into_iter()
            .map(|e| e.ingredient_name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Push the cached shopping list to `list_name`. Returns how many items were sent;
    /// an empty list never reaches the remote service.
    pub fn send_shopping_list(&self, grocery: &dyn GroceryList, list_name: &str) -> Result<usize> {
        let items = self.items_to_send()?;
        if items.is_empty() {
            return Ok(0);
        }
        grocery.add_items(list_name, &items)?;
        tracing::info!(count = items.len(), list_name, "sent shopping list");
        Ok(items.len())
    }
}

/// Slugs go into URL paths verbatim, so anything that would change the path or query is refused.
fn validate_slug(slug: &str) -> Result<()> {
    if slug.trim().is_empty() {
        return Err(Error::validation("Recipe slug must not be empty"));
    }
    if slug
        .chars()
        .any(|c| matches!(c, '/' | '?' | '#' | '%' | '\\') || c.is_whitespace() || c.is_control())
    {
        return Err(Error::validation(format!("Invalid recipe slug '{slug}'")));
    }
    Ok(())
}
