use std::collections::HashSet;

use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::mealie::{MealPlanResponse, MealieConfig, PlanItem, enrich_items};
use crate::models::{DateWindow, MealId};
use crate::service::MealPlanSource;

/// Why a plan could not be fetched, in a shape a view can render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanError {
    pub message: String,
    pub status_code: Option<u16>,
    pub response_text: Option<String>,
    pub url: String,
}

impl PlanError {
    /// `None` for errors that did not come from the remote service.
    #[must_use]
    pub fn from_remote(err: &Error) -> Option<Self> {
        match err {
            Error::RemoteContract { url, status, body } => Some(Self {
                message: "Invalid JSON response".to_string(),
                status_code: Some(*status),
                response_text: Some(body.clone()),
                url: url.clone(),
            }),
            Error::RemoteRequest {
                url,
                status,
                message,
            } => Some(Self {
                message: "Request failed".to_string(),
                status_code: *status,
                response_text: Some(message.clone()),
                url: url.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub items: Vec<PlanItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PlanError>,
}

impl PlanResult {
    /// Turn a raw fetch into an enriched plan. Remote failures become an empty plan
    /// carrying the error; anything else is passed back to the caller.
    pub fn from_fetch(fetched: Result<MealPlanResponse>, config: &MealieConfig) -> Result<Self> {
        match fetched {
            Ok(mut resp) => {
                enrich_items(config, &mut resp.items);
                Ok(Self {
                    items: resp.items,
                    error: None,
                })
            }
            Err(err) => match PlanError::from_remote(&err) {
                Some(error) => {
                    tracing::warn!(error = %err, "meal plan fetch failed");
                    Ok(Self {
                        items: Vec::new(),
                        error: Some(error),
                    })
                }
                None => Err(err),
            },
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub visible: Vec<PlanItem>,
    pub done: Vec<PlanItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<DateWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PlanError>,
}

impl PlanView {
    #[must_use]
    pub fn build(plan: PlanResult, done_ids: &[MealId], window: Option<DateWindow>) -> Self {
        let (visible, done) = partition(plan.items, done_ids);
        Self {
            visible,
            done,
            window,
            error: plan.error,
        }
    }
}

/// Split items into `(visible, done)`. Only done-set membership decides; items
/// without an id are always visible.
#[must_use]
pub fn partition(items: Vec<PlanItem>, done_ids: &[MealId]) -> (Vec<PlanItem>, Vec<PlanItem>) {
    let done_set: HashSet<MealId> = done_ids.iter().copied().collect();
    items
        .into_iter()
        .partition(|item| !item.id.is_some_and(|id| done_set.contains(&id)))
}

/// Fetch the plan for `window` and enrich it with the source's URLs.
pub fn fetch_plan(source: &dyn MealPlanSource, window: Option<DateWindow>) -> Result<PlanResult> {
    PlanResult::from_fetch(source.meal_plan(window), source.config())
}

/// Merge a fetched plan with local done state. Never writes to the store.
pub fn view(plan: PlanResult, db: &Database, window: Option<DateWindow>) -> Result<PlanView> {
    let done_ids = db.get_all_done_ids()?;
    Ok(PlanView::build(plan, &done_ids, window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(ids: impl IntoIterator<Item = i64>) -> Vec<PlanItem> {
        ids.into_iter()
            .map(|id| serde_json::from_value(json!({ "id": id })).unwrap())
            .collect()
    }

    fn ids(items: &[PlanItem]) -> Vec<i64> {
        items.iter().filter_map(|i| i.id).map(|id| id.0).collect()
    }

    #[test]
    fn test_partition_scenario() {
        let (visible, done) = partition(items(1..=10), &[MealId(5), MealId(9)]);
        assert_eq!(ids(&visible), vec![1, 2, 3, 4, 6, 7, 8, 10]);
        assert_eq!(ids(&done), vec![5, 9]);
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let done_ids = [MealId(2), MealId(3), MealId(99)];
        let (visible, done) = partition(items(1..=6), &done_ids);

        let mut all: Vec<i64> = ids(&visible).into_iter().chain(ids(&done)).collect();
        all.sort_unstable();
        assert_eq!(all, vec![1, 2, 3, 4, 5, 6]);
        assert!(ids(&visible).iter().all(|id| !ids(&done).contains(id)));
    }

    #[test]
    fn test_partition_orphaned_markers_are_ignored() {
        let (visible, done) = partition(items([1, 2]), &[MealId(50), MealId(51)]);
        assert_eq!(ids(&visible), vec![1, 2]);
        assert!(done.is_empty());
    }

    #[test]
    fn test_partition_item_without_id_is_visible() {
        let no_id: PlanItem = serde_json::from_value(json!({"title": "Pizza night"})).unwrap();
        let (visible, done) = partition(vec![no_id], &[MealId(1)]);
        assert_eq!(visible.len(), 1);
        assert!(done.is_empty());
    }

    #[test]
    fn test_from_fetch_remote_failure_is_empty_but_marked() {
        let config = MealieConfig::new("http://m", "t");
        let result = PlanResult::from_fetch(
            Err(Error::RemoteContract {
                url: "http://m/api/households/mealplans".to_string(),
                status: 502,
                body: "Bad Gateway".to_string(),
            }),
            &config,
        )
        .unwrap();

        assert!(result.items.is_empty());
        assert!(result.is_error());
        let error = result.error.unwrap();
        assert_eq!(error.status_code, Some(502));
        assert_eq!(error.response_text.as_deref(), Some("Bad Gateway"));
    }

    #[test]
    fn test_from_fetch_non_remote_error_propagates() {
        let config = MealieConfig::new("http://m", "t");
        let result = PlanResult::from_fetch(Err(Error::validation("bad window")), &config);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_from_fetch_enriches() {
        let config = MealieConfig::new("http://m", "t");
        let resp: MealPlanResponse = serde_json::from_value(json!({
            "items": [{"id": 1, "recipe": {"id": "r1", "slug": "stew"}}]
        }))
        .unwrap();
        let result = PlanResult::from_fetch(Ok(resp), &config).unwrap();
        assert_eq!(
            result.items[0].recipe_url.as_deref(),
            Some("http://m/g/home/r/stew")
        );
    }

    #[test]
    fn test_view_build_keeps_error() {
        let plan = PlanResult {
            items: Vec::new(),
            error: Some(PlanError {
                message: "Request failed".to_string(),
                status_code: None,
                response_text: Some("timed out".to_string()),
                url: "http://m".to_string(),
            }),
        };
        let view = PlanView::build(plan, &[], None);
        assert!(view.visible.is_empty());
        assert!(view.done.is_empty());
        assert!(view.error.is_some());
    }
}
