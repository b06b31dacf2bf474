use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::admin::{self, DashboardStats, EventFilter, FeedStats};
use crate::assistant;
use crate::error::SyncError;
use crate::ingest::providers::gemini::GeminiClient;
use crate::model::{EventRecord, NotificationEvent, Role, TicketLead, User, UserPreferences};
use crate::notify;
use crate::sync::{SyncReport, SyncRunner, SyncStatus, Trigger};

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<SyncRunner>,
    pub ai: Option<GeminiClient>,
    /// Default city for manual syncs and chat prompts.
    pub city: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/events", get(list_feed))
        .route("/events/featured", get(featured_event))
        .route("/events/stats", get(feed_stats))
        .route("/notifications", get(list_notifications))
        .route("/notifications/{id}/read", post(mark_notification_read))
        .route("/preferences", get(get_preferences).put(put_preferences))
        .route("/leads", post(create_lead))
        .route("/chat", post(chat))
        .route("/sync/status", get(sync_status))
        .route("/admin/events", get(admin_events))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/categories", get(admin_categories))
        .route("/admin/events/{id}/import", post(admin_import))
        .route("/admin/sync", post(admin_sync))
        .route("/admin/sync/retry-save", post(admin_retry_save))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Sync(SyncError),
    Unauthorized,
    Forbidden,
    BadRequest(String),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::Sync(e) => {
                let status = match &e {
                    SyncError::Busy => StatusCode::CONFLICT,
                    SyncError::SourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                    SyncError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    SyncError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "sign-in required".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "admin role required".to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn persistence(e: anyhow::Error) -> ApiError {
    ApiError::Sync(SyncError::persistence(e))
}

// ---------------------------------------------------------------------------
// Identity (delivered by the upstream auth provider as headers)
// ---------------------------------------------------------------------------

pub const HDR_USER_ID: &str = "x-user-id";
pub const HDR_USER_NAME: &str = "x-user-name";
pub const HDR_USER_EMAIL: &str = "x-user-email";
pub const HDR_USER_ROLE: &str = "x-user-role";

pub struct AuthUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let id = header(HDR_USER_ID).ok_or(ApiError::Unauthorized)?;
        let role = match header(HDR_USER_ROLE).as_deref() {
            Some(r) if r.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::User,
        };
        Ok(AuthUser(User {
            name: header(HDR_USER_NAME).unwrap_or_else(|| id.clone()),
            email: header(HDR_USER_EMAIL).unwrap_or_default(),
            id,
            role,
        }))
    }
}

pub struct AdminUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

// ---------------------------------------------------------------------------
// Public feed
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FeedQuery {
    #[serde(default)]
    category: Option<String>,
}

async fn list_feed(
    State(state): State<AppState>,
    Query(q): Query<FeedQuery>,
) -> ApiResult<Json<Vec<EventRecord>>> {
    let catalog = state.runner.load_catalog_or_seed().await?;
    let category = q.category.as_deref().filter(|c| !c.eq_ignore_ascii_case("all"));
    Ok(Json(admin::public_feed(&catalog, category)))
}

async fn featured_event(State(state): State<AppState>) -> ApiResult<Json<Option<EventRecord>>> {
    let catalog = state.runner.load_catalog_or_seed().await?;
    Ok(Json(admin::featured(&catalog)))
}

async fn feed_stats(State(state): State<AppState>) -> ApiResult<Json<FeedStats>> {
    let catalog = state.runner.load_catalog_or_seed().await?;
    Ok(Json(admin::feed_stats(&catalog, state.runner.now())))
}

// ---------------------------------------------------------------------------
// Notifications & preferences
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct NotificationsOut {
    unread: usize,
    items: Vec<NotificationEvent>,
}

async fn list_notifications(State(state): State<AppState>) -> ApiResult<Json<NotificationsOut>> {
    let items = state
        .runner
        .store()
        .load_notifications()
        .await
        .map_err(persistence)?;
    Ok(Json(NotificationsOut {
        unread: notify::unread_count(&items),
        items,
    }))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.runner.mark_notification_read(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_preferences(State(state): State<AppState>) -> ApiResult<Json<UserPreferences>> {
    let prefs = state
        .runner
        .store()
        .load_preferences()
        .await
        .map_err(persistence)?;
    Ok(Json(prefs))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferencesIn {
    categories: Vec<String>,
    #[serde(default)]
    last_notification_check: Option<chrono::DateTime<chrono::Utc>>,
}

async fn put_preferences(
    State(state): State<AppState>,
    Json(body): Json<PreferencesIn>,
) -> ApiResult<Json<UserPreferences>> {
    let store = state.runner.store();
    let mut prefs = store.load_preferences().await.map_err(persistence)?;
    let mut cats: Vec<String> = Vec::with_capacity(body.categories.len());
    for c in body.categories {
        let c = c.trim().to_string();
        if !c.is_empty() && !cats.contains(&c) {
            cats.push(c);
        }
    }
    prefs.categories = cats;
    if let Some(ts) = body.last_notification_check {
        prefs.last_notification_check = ts;
    }
    store.save_preferences(&prefs).await.map_err(persistence)?;
    Ok(Json(prefs))
}

// ---------------------------------------------------------------------------
// Leads & chat
// ---------------------------------------------------------------------------

fn default_consent() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeadIn {
    email: String,
    #[serde(default = "default_consent")]
    consent: bool,
    event_id: String,
}

async fn create_lead(
    State(state): State<AppState>,
    Json(body): Json<LeadIn>,
) -> ApiResult<(StatusCode, Json<TicketLead>)> {
    let email = body.email.trim().to_string();
    if email.is_empty() {
        return Err(ApiError::BadRequest("email is required".into()));
    }
    let catalog = state.runner.load_catalog_or_seed().await?;
    let event = catalog
        .iter()
        .find(|e| e.id == body.event_id)
        .ok_or_else(|| SyncError::NotFound(body.event_id.clone()))?;
    let lead = TicketLead {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        consent: body.consent,
        event_id: event.id.clone(),
        event_title: event.title.clone(),
        timestamp: state.runner.now(),
    };
    state
        .runner
        .store()
        .save_lead(&lead)
        .await
        .map_err(persistence)?;
    Ok((StatusCode::CREATED, Json(lead)))
}

#[derive(Deserialize)]
struct ChatIn {
    message: String,
}

#[derive(Serialize)]
struct ChatOut {
    reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    #[serde(rename = "suggestedCategory", skip_serializing_if = "Option::is_none")]
    suggested_category: Option<String>,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatIn>) -> ApiResult<Json<ChatOut>> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message is required".into()));
    }
    let catalog = state.runner.load_catalog_or_seed().await?;
    let active = admin::public_feed(&catalog, None);
    let prefs = state
        .runner
        .store()
        .load_preferences()
        .await
        .map_err(persistence)?;

    let reply = assistant::recommend(state.ai.as_ref(), message, &active, &state.city).await;
    let suggested_category = assistant::suggest_subscription(message, &active, &prefs);
    Ok(Json(ChatOut {
        reply,
        suggestion: suggested_category
            .as_deref()
            .map(assistant::subscription_prompt),
        suggested_category,
    }))
}

// ---------------------------------------------------------------------------
// Sync & admin
// ---------------------------------------------------------------------------

async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.runner.status().await)
}

async fn admin_events(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> ApiResult<Json<Vec<EventRecord>>> {
    let catalog = state.runner.load_catalog_or_seed().await?;
    Ok(Json(filter.apply(&catalog)))
}

async fn admin_stats(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Json<DashboardStats>> {
    let catalog = state.runner.load_catalog_or_seed().await?;
    let leads = state
        .runner
        .store()
        .load_leads()
        .await
        .map_err(persistence)?;
    Ok(Json(admin::dashboard_stats(&catalog, leads.len())))
}

async fn admin_categories(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<String>>> {
    let catalog = state.runner.load_catalog_or_seed().await?;
    Ok(Json(admin::categories(&catalog)))
}

#[derive(Deserialize, Default)]
struct ImportIn {
    #[serde(default)]
    notes: Option<String>,
}

async fn admin_import(
    AdminUser(user): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ImportIn>>,
) -> ApiResult<Json<EventRecord>> {
    let notes = body.map(|Json(b)| b).unwrap_or_default().notes;
    let record = state.runner.import_event(&id, &user.name, notes).await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
struct SyncQuery {
    #[serde(default)]
    city: Option<String>,
}

async fn admin_sync(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(q): Query<SyncQuery>,
) -> ApiResult<Json<SyncReport>> {
    let city = q
        .city
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("all"))
        .unwrap_or_else(|| state.city.clone());
    let report = state.runner.run_once(&city, Trigger::Manual).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct RetryOut {
    saved: bool,
}

async fn admin_retry_save(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Json<RetryOut>> {
    let saved = state.runner.retry_save().await?;
    Ok(Json(RetryOut { saved }))
}
