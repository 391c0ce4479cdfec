use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::Settings;
use crate::mealie::MealieClient;
use crate::ourgroceries::OurGroceriesClient;
use platter_core::error::Error;
use platter_core::models::{DateWindow, MealId, SchemaStatus, ShoppingListEntry};
use platter_core::reconcile::PlanView;
use platter_core::service::PlannerService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
pub(crate) struct AppState {
    pub svc: Arc<Mutex<PlannerService>>,
    pub mealie: Arc<MealieClient>,
    pub grocery: Option<Arc<OurGroceriesClient>>,
    pub settings: Settings,
    pub api_key: Option<String>,
}

impl AppState {
    fn svc(&self) -> MutexGuard<'_, PlannerService> {
        self.svc
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct PlanQuery {
    start: Option<String>,
    end: Option<String>,
    #[serde(default)]
    all: bool,
}

#[derive(Deserialize, Default)]
struct SendRequest {
    list_name: Option<String>,
}

#[derive(Serialize)]
struct DoneResponse {
    meal_id: MealId,
    marked: bool,
}

#[derive(Serialize)]
struct ReaddResponse {
    meal_id: MealId,
    removed: bool,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct WrittenResponse {
    written: usize,
}

#[derive(Serialize)]
struct SentResponse {
    sent: usize,
    list: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => Self::BadRequest(msg),
            e @ (Error::RemoteContract { .. } | Error::RemoteRequest { .. }) => {
                Self::BadGateway(e.to_string())
            }
            e @ (Error::Storage { .. } | Error::Setup { .. }) => Self::Internal(format!("{e:#}")),
        }
    }
}

fn parse_meal_id(raw: &str) -> Result<MealId, ApiError> {
    MealId::from_str(raw).map_err(ApiError::from)
}

fn parse_query_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("Invalid date '{s}'. Use YYYY-MM-DD")))
        })
        .transpose()
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn get_plan(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<PlanView>, ApiError> {
    let window = if query.all {
        None
    } else {
        let default = state.settings.window_around(Local::now().date_naive())?;
        let start = parse_query_date(query.start.as_deref())?.unwrap_or(default.start);
        let end = parse_query_date(query.end.as_deref())?.unwrap_or(default.end);
        Some(DateWindow::new(start, end)?)
    };

    // Remote call first; the store is only locked for the done-set read.
    let fetched = state.mealie.meal_plan_async(window).await;
    let view = state
        .svc()
        .plan_view_from(fetched, state.mealie.config(), window)?;
    Ok(Json(view))
}

async fn mark_done(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DoneResponse>, ApiError> {
    let meal_id = parse_meal_id(&id)?;
    let marked = state.svc().mark_done(meal_id)?;
    Ok(Json(DoneResponse { meal_id, marked }))
}

async fn readd(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReaddResponse>, ApiError> {
    let meal_id = parse_meal_id(&id)?;
    if !state.svc().re_add(meal_id)? {
        return Err(ApiError::NotFound(format!(
            "Meal {meal_id} was not marked done"
        )));
    }
    Ok(Json(ReaddResponse {
        meal_id,
        removed: true,
    }))
}

async fn delete_plan_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let meal_id = parse_meal_id(&id)?;
    state.mealie.delete_plan_entry_async(meal_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_shopping(
    State(state): State<AppState>,
) -> Result<Json<Vec<ShoppingListEntry>>, ApiError> {
    Ok(Json(state.svc().shopping_list()?))
}

async fn put_shopping(
    State(state): State<AppState>,
    Json(pairs): Json<Vec<serde_json::Value>>,
) -> Result<Json<WrittenResponse>, ApiError> {
    let written = state.svc().replace_shopping_pairs(&pairs)?;
    Ok(Json(WrittenResponse { written }))
}

async fn send_shopping(
    State(state): State<AppState>,
    body: Option<Json<SendRequest>>,
) -> Result<Json<SentResponse>, ApiError> {
    let Some(grocery) = state.grocery.clone() else {
        return Err(ApiError::BadRequest(
            "Grocery sync is not configured (set OG_USERNAME and OG_PASSWORD)".to_string(),
        ));
    };
    let list = body
        .and_then(|Json(req)| req.list_name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| state.settings.grocery_list_name.clone());

    let items = state.svc().items_to_send()?;
    if !items.is_empty() {
        grocery.add_items_async(&list, &items).await?;
        tracing::info!(count = items.len(), list_name = %list, "sent shopping list");
    }
    Ok(Json(SentResponse {
        sent: items.len(),
        list,
    }))
}

async fn get_schema(State(state): State<AppState>) -> Result<Json<SchemaStatus>, ApiError> {
    Ok(Json(state.svc().schema_status()?))
}

/// First and last four characters of the key, or `None` when the key is too short to abbreviate.
fn key_preview(key: &str) -> Option<String> {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return None;
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    Some(format!("{head}...{tail}"))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/plan", get(get_plan))
        .route("/api/meals/{id}/done", post(mark_done))
        .route("/api/meals/{id}/readd", post(readd))
        .route("/api/mealplans/{id}", delete(delete_plan_entry))
        .route("/api/shopping", get(get_shopping).put(put_shopping))
        .route("/api/shopping/send", post(send_shopping))
        .route("/api/schema", get(get_schema))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub(crate) async fn start_server(
    state: AppState,
    port: u16,
    bind: &str,
) -> anyhow::Result<()> {
    if let Some(ref key) = state.api_key {
        match key_preview(key) {
            Some(preview) => {
                eprintln!("API key: {preview} (see api_key file in data directory)");
            }
            None => eprintln!("API key loaded (see api_key file in data directory)"),
        }
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && state.api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }
    if state.grocery.is_none() {
        tracing::warn!("OG_USERNAME/OG_PASSWORD not set; /api/shopping/send is disabled");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(bind, port, "server started");
    axum::serve(listener, app).await?;

    Ok(())
}
