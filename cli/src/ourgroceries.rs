use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};

use platter_core::error::{Error, Result};
use platter_core::service::GroceryList;

const SIGN_IN_URL: &str = "https://www.ourgroceries.com/sign-in";
const YOUR_LISTS_URL: &str = "https://www.ourgroceries.com/your-lists/";
const AUTH_COOKIE: &str = "ourgroceries-auth";

static TEAM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"g_teamId\s*=\s*"([^"]+)""#).expect("valid team id pattern"));

#[derive(Debug, Clone)]
pub struct GroceryConfig {
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// An authenticated `OurGroceries` session.
struct Session {
    cookie: String,
    team_id: String,
}

pub struct OurGroceriesClient {
    client: reqwest::Client,
    config: GroceryConfig,
    rt: tokio::runtime::Handle,
}

fn failure(message: impl Into<String>) -> Error {
    Error::RemoteRequest {
        url: YOUR_LISTS_URL.to_string(),
        status: None,
        message: format!("OurGroceries sync failed: {}", message.into()),
    }
}

impl OurGroceriesClient {
    pub fn new(config: GroceryConfig, rt: tokio::runtime::Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("platter/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| failure(e.to_string()))?;
        Ok(Self { client, config, rt })
    }

    async fn login(&self) -> Result<Session> {
        let resp = self
            .client
            .post(SIGN_IN_URL)
            .form(&[
                ("emailAddress", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
                ("action", "sign-me-in"),
            ])
            .send()
            .await
            .map_err(|e| failure(format!("sign-in request failed: {e}")))?;

        let cookie = resp
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(auth_cookie)
            .ok_or_else(|| failure("sign-in rejected; check OG_USERNAME and OG_PASSWORD"))?;

        let page = self
            .client
            .get(YOUR_LISTS_URL)
            .header(reqwest::header::COOKIE, &cookie)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failure(format!("failed to load lists page: {e}")))?
            .text()
            .await
            .map_err(|e| failure(format!("failed to load lists page: {e}")))?;
        let team_id =
            extract_team_id(&page).ok_or_else(|| failure("team id not found after sign-in"))?;

        tracing::debug!("signed in to OurGroceries");
        Ok(Session { cookie, team_id })
    }

    async fn command(&self, session: &Session, mut body: Value) -> Result<Value> {
        body["teamId"] = Value::String(session.team_id.clone());
        let command = body["command"].as_str().unwrap_or_default().to_string();
        let resp = self
            .client
            .post(YOUR_LISTS_URL)
            .header(reqwest::header::COOKIE, &session.cookie)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failure(format!("{command} failed: {e}")))?;
        let text = resp
            .text()
            .await
            .map_err(|e| failure(format!("{command} failed: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|_| failure(format!("{command} returned unexpected response: {text}")))
    }

    async fn get_or_create_list(&self, session: &Session, list_name: &str) -> Result<String> {
        let overview = self
            .command(session, json!({ "command": "getOverview" }))
            .await?;
        if let Some(id) = find_list_id(&overview, list_name) {
            tracing::info!(list_name, list_id = %id, "found existing grocery list");
            return Ok(id);
        }

        let created = self
            .command(
                session,
                json!({ "command": "createList", "name": list_name, "listType": "SHOPPING" }),
            )
            .await?;
        let id = created_list_id(&created)
            .ok_or_else(|| failure(format!("createList returned unexpected response: {created}")))?;
        tracing::info!(list_name, list_id = %id, "created grocery list");
        Ok(id)
    }

    pub async fn add_items_async(&self, list_name: &str, items: &[String]) -> Result<()> {
        let session = self.login().await?;
        let list_id = self.get_or_create_list(&session, list_name).await?;
        let values: Vec<Value> = items.iter().map(|i| json!({ "value": i })).collect();
        self.command(
            &session,
            json!({ "command": "insertItems", "listId": list_id, "items": values }),
        )
        .await?;
        tracing::info!(count = items.len(), list_name, "added items to grocery list");
        Ok(())
    }
}

impl GroceryList for OurGroceriesClient {
    fn add_items(&self, list_name: &str, items: &[String]) -> Result<()> {
        self.rt.block_on(self.add_items_async(list_name, items))
    }
}

/// `name=value` of the auth cookie out of a `Set-Cookie` header.
fn auth_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == AUTH_COOKIE && !value.is_empty()).then(|| pair.to_string())
}

fn extract_team_id(page: &str) -> Option<String> {
    TEAM_ID
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn find_list_id(overview: &Value, list_name: &str) -> Option<String> {
    let lists = overview
        .get("shoppingLists")
        .or(Some(overview))
        .and_then(Value::as_array)?;
    lists
        .iter()
        .filter(|entry| entry.get("name").and_then(Value::as_str) == Some(list_name))
        .find_map(list_id_of)
}

fn created_list_id(created: &Value) -> Option<String> {
    match created {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(_) => list_id_of(created),
        _ => None,
    }
}

fn list_id_of(entry: &Value) -> Option<String> {
    entry
        .get("listId")
        .or_else(|| entry.get("id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_cookie() {
        assert_eq!(
            auth_cookie("ourgroceries-auth=abc123; Path=/; HttpOnly").as_deref(),
            Some("ourgroceries-auth=abc123")
        );
        assert!(auth_cookie("other=1; Path=/").is_none());
        assert!(auth_cookie("ourgroceries-auth=; Path=/").is_none());
    }

    #[test]
    fn test_extract_team_id() {
        let page = r#"<script>var g_teamId = "T-42"; var x = 1;</script>"#;
        assert_eq!(extract_team_id(page).as_deref(), Some("T-42"));
        assert!(extract_team_id("<html></html>").is_none());
    }

    #[test]
    fn test_find_list_id_in_overview() {
        let overview = json!({"shoppingLists": [
            {"name": "Hardware", "id": "L1"},
            {"name": "Meal Planner", "id": "L2"}
        ]});
        assert_eq!(find_list_id(&overview, "Meal Planner").as_deref(), Some("L2"));
        assert!(find_list_id(&overview, "Pharmacy").is_none());
    }

    #[test]
    fn test_find_list_id_plain_array_and_list_id_key() {
        let lists = json!([{"name": "Weekly", "listId": "L9"}, "junk"]);
        assert_eq!(find_list_id(&lists, "Weekly").as_deref(), Some("L9"));
    }

    #[test]
    fn test_created_list_id() {
        assert_eq!(created_list_id(&json!({"listId": "N1"})).as_deref(), Some("N1"));
        assert_eq!(created_list_id(&json!({"id": "N2"})).as_deref(), Some("N2"));
        assert_eq!(created_list_id(&json!("N3")).as_deref(), Some("N3"));
        assert!(created_list_id(&json!({"ok": true})).is_none());
        assert!(created_list_id(&Value::Null).is_none());
    }

    #[test]
    fn test_failure_is_single_remote_error() {
        let err = failure("boom");
        assert!(err.is_remote());
        assert!(err.to_string().contains("OurGroceries sync failed: boom"));
    }
}
