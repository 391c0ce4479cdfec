use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{MealId, ShoppingListEntry};

/// Connection settings for the Mealie meal-plan service.
#[derive(Debug, Clone)]
pub struct MealieConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout: Duration,
}

impl MealieConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn mealplans_url(&self) -> String {
        format!("{}/api/households/mealplans", self.base_url)
    }

    #[must_use]
    pub fn mealplan_url(&self, id: MealId) -> String {
        format!("{}/api/households/mealplans/{id}", self.base_url)
    }

    #[must_use]
    pub fn recipe_api_url(&self, slug: &str) -> String {
        format!("{}/api/recipes/{slug}", self.base_url)
    }

    #[must_use]
    pub fn image_url(&self, recipe_id: &str) -> String {
        format!(
            "{}/api/media/recipes/{recipe_id}/images/min-original.webp",
            self.base_url
        )
    }

    #[must_use]
    pub fn recipe_page_url(&self, slug: &str) -> String {
        format!("{}/g/home/r/{slug}", self.base_url)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MealPlanResponse {
    #[serde(default)]
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub id: Option<MealId>,
    pub date: Option<String>,
    pub entry_type: Option<String>,
    pub title: Option<String>,
    pub recipe: Option<RecipeSummary>,
    #[serde(default, rename = "image_url")]
    pub image_url: Option<String>,
    #[serde(default, rename = "recipe_url")]
    pub recipe_url: Option<String>,
    /// Fields we pass through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanItem {
    #[must_use]
    pub fn recipe_slug(&self) -> Option<&str> {
        self.recipe
            .as_ref()
            .and_then(|r| r.slug.as_deref())
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.recipe
            .as_ref()
            .and_then(|r| r.name.as_deref())
            .or(self.title.as_deref())
            .unwrap_or("(untitled)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDetail {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub recipe_ingredient: Vec<IngredientRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientRef {
    pub reference_id: Option<String>,
    pub display: Option<String>,
    pub note: Option<String>,
}

impl IngredientRef {
    /// `None` when the ingredient has no usable text at all.
    #[must_use]
    pub fn to_entry(&self) -> Option<ShoppingListEntry> {
        let name = self
            .display
            .as_deref()
            .or(self.note.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())?;
        Some(ShoppingListEntry::new(self.reference_id.clone(), name))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlanEntry {
    pub date: NaiveDate,
    pub recipe_id: String,
    pub entry_type: String,
}

/// Fill in `image_url` and `recipe_url` from each item's recipe reference.
pub fn enrich_items(config: &MealieConfig, items: &mut [PlanItem]) {
    for item in items {
        let recipe = item.recipe.as_ref();
        item.image_url = recipe
            .and_then(|r| r.id.as_deref())
            .filter(|id| !id.is_empty())
            .map(|id| config.image_url(id));
        item.recipe_url = recipe
            .and_then(|r| r.slug.as_deref())
            .filter(|slug| !slug.is_empty())
            .map(|slug| config.recipe_page_url(slug));
    }
}

/// Fail with [`Error::RemoteRequest`] unless `status` is 2xx.
pub fn check_status(url: &str, status: u16, body: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(Error::RemoteRequest {
            url: url.to_string(),
            status: Some(status),
            message: body.to_string(),
        })
    }
}

/// Decode a response body, keeping the raw status and body when it is not what we expect.
pub fn parse_response<T: DeserializeOwned>(url: &str, status: u16, body: &str) -> Result<T> {
    check_status(url, status, body)?;
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!(url, status, error = %e, "malformed response from meal-plan service");
        Error::RemoteContract {
            url: url.to_string(),
            status,
            body: body.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> MealieConfig {
        MealieConfig::new("https://mealie.local/", "token")
    }

    fn item(value: Value) -> PlanItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let c = config();
        assert_eq!(c.base_url, "https://mealie.local");
        assert_eq!(
            c.mealplans_url(),
            "https://mealie.local/api/households/mealplans"
        );
        assert_eq!(
            c.mealplan_url(MealId(12)),
            "https://mealie.local/api/households/mealplans/12"
        );
        assert_eq!(
            c.recipe_api_url("pad-thai"),
            "https://mealie.local/api/recipes/pad-thai"
        );
    }

    #[test]
    fn test_enrich_items_derives_urls() {
        let mut items = vec![item(json!({
            "id": 1,
            "date": "2024-03-01",
            "entryType": "dinner",
            "recipe": {"id": "abc-123", "slug": "pad-thai", "name": "Pad Thai"}
        }))];
        enrich_items(&config(), &mut items);

        assert_eq!(
            items[0].image_url.as_deref(),
            Some("https://mealie.local/api/media/recipes/abc-123/images/min-original.webp")
        );
        assert_eq!(
            items[0].recipe_url.as_deref(),
            Some("https://mealie.local/g/home/r/pad-thai")
        );
    }

    #[test]
    fn test_enrich_items_missing_identifiers() {
        let mut items = vec![
            item(json!({"id": 2, "title": "Leftovers", "recipe": null})),
            item(json!({"id": 3, "recipe": {"id": null, "slug": "soup"}})),
            item(json!({"id": 4, "recipe": {"id": "r4", "slug": ""}})),
        ];
        enrich_items(&config(), &mut items);

        assert!(items[0].image_url.is_none());
        assert!(items[0].recipe_url.is_none());
        assert!(items[1].image_url.is_none());
        assert!(items[1].recipe_url.is_some());
        assert!(items[2].image_url.is_some());
        assert!(items[2].recipe_url.is_none());
    }

    #[test]
    fn test_plan_item_keeps_unknown_fields() {
        let parsed = item(json!({"id": 5, "text": "extra rice", "householdId": "h1"}));
        assert_eq!(parsed.extra["text"], "extra rice");

        let out = serde_json::to_value(&parsed).unwrap();
        assert_eq!(out["householdId"], "h1");
        assert!(out.get("image_url").is_some());
    }

    #[test]
    fn test_display_name_prefers_recipe() {
        let with_recipe = item(json!({"id": 1, "title": "t", "recipe": {"name": "Chili"}}));
        assert_eq!(with_recipe.display_name(), "Chili");
        let note_only = item(json!({"id": 2, "title": "Eat out"}));
        assert_eq!(note_only.display_name(), "Eat out");
    }

    #[test]
    fn test_parse_response_ok() {
        let body = r#"{"items": [{"id": 1}, {"id": 2}], "page": 1}"#;
        let resp: MealPlanResponse = parse_response("u", 200, body).unwrap();
        assert_eq!(resp.items.len(), 2);
    }

    #[test]
    fn test_parse_response_missing_items_is_empty_plan() {
        let resp: MealPlanResponse = parse_response("u", 200, "{}").unwrap();
        assert!(resp.items.is_empty());
    }

    #[test]
    fn test_parse_response_non_json_is_contract_error() {
        let err = parse_response::<MealPlanResponse>("u", 200, "<html>oops</html>").unwrap_err();
        match err {
            Error::RemoteContract { status, body, url } => {
                assert_eq!(status, 200);
                assert_eq!(body, "<html>oops</html>");
                assert_eq!(url, "u");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_wrong_shape_is_contract_error() {
        let err = parse_response::<MealPlanResponse>("u", 200, r#"{"items": 3}"#).unwrap_err();
        assert!(matches!(err, Error::RemoteContract { .. }));
    }

    #[test]
    fn test_parse_response_non_2xx_is_request_error() {
        let err = parse_response::<MealPlanResponse>("u", 401, r#"{"detail":"bad token"}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RemoteRequest {
                status: Some(401),
                ..
            }
        ));
    }

    #[test]
    fn test_ingredient_to_entry() {
        let with_ref: IngredientRef = serde_json::from_value(json!({
            "referenceId": "ing-1", "display": "2 cups flour"
        }))
        .unwrap();
        assert_eq!(
            with_ref.to_entry(),
            Some(ShoppingListEntry::new(Some("ing-1".into()), "2 cups flour"))
        );

        let no_ref: IngredientRef =
            serde_json::from_value(json!({"referenceId": null, "note": "salt"})).unwrap();
        assert_eq!(no_ref.to_entry().unwrap().ingredient_id, "");

        let empty: IngredientRef =
            serde_json::from_value(json!({"referenceId": "x", "display": "  "})).unwrap();
        assert!(empty.to_entry().is_none());
    }

    #[test]
    fn test_new_plan_entry_wire_format() {
        let entry = NewPlanEntry {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            recipe_id: "abc".to_string(),
            entry_type: "dinner".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"date": "2024-03-01", "recipeId": "abc", "entryType": "dinner"})
        );
    }
}
