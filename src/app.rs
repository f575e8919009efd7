use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, Query, State},
    http::header,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::analytics::DashboardAnalytics;
use crate::config::AppConfig;
use crate::dashboard::{self, RecordPage, RecordQuery};
use crate::downloader;
use crate::error::{Error, Result};
use crate::graph::{self, ChartKind, GraphOptions};
use crate::login::{self, AuthState, SessionStore, SessionUser, UserDirectory};
use crate::poller::{DashboardFeed, Poller};
use crate::prefill::{self, FormTab};
use crate::record::{FieldBag, FormType, RecordKey, Status, ValuationRecord};
use crate::store::{RecordDetails, RecordStore};
use crate::uploads::{self, DiskImageSink, ImageCategory, PendingImage, UploadReport};
use crate::valuation;
use crate::workflow::Role;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<RecordStore>,
    pub feed: Arc<DashboardFeed>,
    pub poller: Arc<Poller<RecordStore>>,
    pub images: Arc<DiskImageSink>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Open the record store, user file and upload directory under `data_dir`.
pub fn build_state(config: AppConfig) -> Result<AppState> {
    let store = Arc::new(RecordStore::open(config.records_dir())?);
    let feed = Arc::new(DashboardFeed::new());
    let poller = Poller::new(Arc::clone(&store), Arc::clone(&feed), config.poll_interval());
    let auth = AuthState {
        users: Arc::new(UserDirectory::open(config.data_dir.clone())?),
        sessions: Arc::new(SessionStore::new(
            chrono::Duration::seconds(config.access_ttl_secs),
            chrono::Duration::seconds(config.refresh_ttl_secs),
        )),
        blob_root: config.blobs_dir(),
    };

    Ok(AppState {
        images: Arc::new(DiskImageSink::new(config.uploads_dir())),
        config: Arc::new(config),
        store,
        feed,
        poller,
        auth,
    })
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/auth/login", post(login::handle_login))
        .route("/api/auth/register", post(login::handle_register))
        .route("/api/auth/refresh", post(login::handle_refresh))
        .route("/api/auth/logout", post(login::handle_logout));

    let protected = Router::new()
        .route("/api/records", get(list_records))
        .route("/api/records/refresh", post(refresh_records))
        .route("/api/records/delete", post(delete_records))
        .route("/api/records/:form/:id/status", post(change_status))
        .route("/api/analytics", get(get_analytics))
        .route("/api/graphs/:kind", get(get_graph))
        .route("/api/export/:format", get(export_records))
        .route("/api/forms/:form/:id", get(open_form))
        .route("/api/forms/:form/:id/drafts/:tab", put(save_tab_draft))
        .route("/api/forms/:form/:id/submit", post(submit_form))
        .route(
            "/api/forms/:form/:id/images",
            post(upload_images).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/calc", post(calculate))
        .route(
            "/api/drafts/current",
            get(load_draft).put(save_draft).delete(clear_draft),
        )
        .route("/api/users/:username/role", post(change_role))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .nest_service("/uploads", ServeDir::new(state.config.uploads_dir()))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<()> {
    let state = build_state(config)?;
    Arc::clone(&state.poller).spawn();

    let sessions = Arc::clone(&state.auth.sessions);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(600));
        loop {
            ticker.tick().await;
            sessions.purge_expired(Utc::now());
        }
    });

    let bind_addr = state.config.bind_addr.clone();
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn form_type(slug: &str) -> Result<FormType> {
    FormType::from_slug(slug).ok_or_else(|| Error::NotFound(format!("form type {}", slug)))
}

fn require_reviewer(user: &SessionUser) -> Result<()> {
    if user.role.is_reviewer() {
        Ok(())
    } else {
        Err(Error::Forbidden(
            "only a manager or admin can do that".to_string(),
        ))
    }
}

/// Current corpus, loading it on first use.
async fn current_records(state: &AppState) -> Arc<Vec<ValuationRecord>> {
    let snapshot = state.feed.snapshot().await;
    if snapshot.seq > 0 {
        return snapshot.records;
    }
    state.poller.refresh_once().await;
    state.feed.snapshot().await.records
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(flatten)]
    page: RecordPage,
    refreshed_at: Option<chrono::DateTime<Utc>>,
}

async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordQuery>,
) -> Json<ListResponse> {
    let records = current_records(&state).await;
    let page = dashboard::apply_query(&records, &query, state.config.page_size);
    Json(ListResponse {
        page,
        refreshed_at: state.feed.snapshot().await.refreshed_at,
    })
}

async fn refresh_records(State(state): State<AppState>) -> Json<Value> {
    let applied = state.poller.refresh_once().await;
    let snapshot = state.feed.snapshot().await;
    Json(json!({
        "status": "ok",
        "applied": applied,
        "count": snapshot.records.len(),
        "refreshedAt": snapshot.refreshed_at,
    }))
}

#[derive(Deserialize)]
struct DeleteRequest {
    keys: Vec<RecordKey>,
}

async fn delete_records(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<Value>> {
    require_reviewer(&user)?;
    let deleted = state.store.bulk_delete(&request.keys).await?;
    state.poller.refresh_once().await;
    Ok(Json(json!({ "status": "ok", "deleted": deleted })))
}

#[derive(Deserialize)]
struct StatusChange {
    status: Status,
    #[serde(default)]
    feedback: Option<String>,
}

async fn change_status(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path((form, id)): Path<(String, String)>,
    Json(change): Json<StatusChange>,
) -> Result<Json<ValuationRecord>> {
    let record = state
        .store
        .transition(form_type(&form)?, &id, user.role, change.status, change.feedback, Utc::now())
        .await?;
    state.poller.refresh_once().await;
    Ok(Json(record))
}

async fn get_analytics(State(state): State<AppState>) -> Json<DashboardAnalytics> {
    let records = current_records(&state).await;
    Json(DashboardAnalytics::from_records(&records))
}

async fn get_graph(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(options): Query<GraphOptions>,
) -> Result<Response> {
    let kind = ChartKind::from_slug(&kind)
        .ok_or_else(|| Error::NotFound(format!("chart {}", kind)))?;
    let records = current_records(&state).await;
    let analytics = DashboardAnalytics::from_records(&records);
    let svg = graph::render_chart(kind, &analytics, &options)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

async fn export_records(
    State(state): State<AppState>,
    Path(format): Path<String>,
    Query(query): Query<RecordQuery>,
) -> Result<Response> {
    let records = current_records(&state).await;
    let rows: Vec<ValuationRecord> = dashboard::select(&records, &query)
        .into_iter()
        .cloned()
        .collect();

    let (content_type, extension, body) = match format.as_str() {
        "csv" => ("text/csv; charset=utf-8", "csv", downloader::to_csv(&rows)?.into_bytes()),
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            "xlsx",
            downloader::to_xlsx(&rows)?,
        ),
        other => return Err(Error::NotFound(format!("export format {}", other))),
    };

    let disposition = format!(
        "attachment; filename=\"valuations-{}.{}\"",
        Utc::now().format("%Y%m%d"),
        extension
    );
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn open_form(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path((form, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let form_type = form_type(&form)?;
    let existing = state.store.get(form_type, &id).await;
    let base = existing
        .as_ref()
        .map(|r| r.pdf_details.clone())
        .unwrap_or_default();

    let blobs = state.auth.blobs_for(&user.username);
    let fields = prefill::open_form(&blobs, form_type, &id, &base, existing.is_none())?;
    Ok(Json(json!({
        "status": "ok",
        "isNew": existing.is_none(),
        "record": existing,
        "fields": fields,
    })))
}

async fn save_tab_draft(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path((form, id, tab)): Path<(String, String, String)>,
    Json(edits): Json<FieldBag>,
) -> Result<Json<Value>> {
    let form_type = form_type(&form)?;
    let tab = FormTab::ALL
        .into_iter()
        .find(|t| t.as_str() == tab)
        .ok_or_else(|| Error::NotFound(format!("tab {}", tab)))?;

    let blobs = state.auth.blobs_for(&user.username);
    let draft = prefill::save_tab_draft(&blobs, form_type, tab, &id, edits)?;
    Ok(Json(json!({ "status": "ok", "draft": draft })))
}

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    details: RecordDetails,
    #[serde(default)]
    fields: FieldBag,
}

async fn submit_form(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path((form, id)): Path<(String, String)>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<ValuationRecord>> {
    let form_type = form_type(&form)?;
    let mut fields = request.fields;
    valuation::recalculate(&mut fields);

    let record = state
        .store
        .submit(form_type, &id, request.details, fields.clone(), user.role, Utc::now())
        .await?;

    let blobs = state.auth.blobs_for(&user.username);
    prefill::record_submission(&blobs, form_type, &id, &fields)?;
    prefill::clear_user_draft(&blobs, &user.username)?;
    state.poller.refresh_once().await;

    info!("{} submitted {} {}", user.username, form_type, id);
    Ok(Json(record))
}

async fn upload_images(
    State(state): State<AppState>,
    Path((form, id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Json<UploadReport>> {
    let form_type = form_type(&form)?;
    if state.store.get(form_type, &id).await.is_none() {
        return Err(Error::NotFound(format!("{} record {}", form_type, id)));
    }

    let mut batches: Vec<(ImageCategory, Vec<PendingImage>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(e.to_string()))?
    {
        let Some(category) = field.name().and_then(ImageCategory::from_field) else {
            continue;
        };
        let file_name = field.file_name().unwrap_or("image").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(e.to_string()))?;

        let image = PendingImage {
            file_name,
            bytes: bytes.to_vec(),
        };
        match batches.iter_mut().find(|(c, _)| *c == category) {
            Some((_, images)) => images.push(image),
            None => batches.push((category, vec![image])),
        }
    }
    if batches.is_empty() {
        return Err(Error::Validation("No images received".to_string()));
    }

    let report = uploads::upload_all(Arc::clone(&state.images), &id, batches).await;

    if !report.uploaded.is_empty() {
        let now = Utc::now();
        let appended = state
            .store
            .update(form_type, &id, |record| {
                for image in &report.uploaded {
                    let key = format!("{}Images", image.category.as_str());
                    let urls = record
                        .pdf_details
                        .entry(key)
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !urls.is_array() {
                        *urls = Value::Array(Vec::new());
                    }
                    if let Value::Array(list) = urls {
                        list.push(Value::String(image.url.clone()));
                    }
                }
                record.touch(now);
                Ok(())
            })
            .await;
        match appended {
            Ok(_) => {
                state.poller.refresh_once().await;
            }
            Err(Error::NotFound(what)) => warn!("{} was deleted during an upload", what),
            Err(err) => return Err(err),
        }
    }

    Ok(Json(report))
}

#[derive(Deserialize)]
struct CalcRequest {
    #[serde(default)]
    fields: FieldBag,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Value,
}

async fn calculate(Json(request): Json<CalcRequest>) -> Json<Value> {
    let mut fields = request.fields;
    let changed = match request.key {
        Some(key) => valuation::apply_edit(&mut fields, &key, request.value),
        None => {
            valuation::recalculate(&mut fields);
            Vec::new()
        }
    };
    Json(json!({ "status": "ok", "fields": fields, "changed": changed }))
}

async fn load_draft(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let blobs = state.auth.blobs_for(&user.username);
    let draft = prefill::load_user_draft(&blobs, &user.username)?;
    Ok(Json(json!({ "status": "ok", "draft": draft })))
}

async fn save_draft(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Json(draft): Json<Value>,
) -> Result<Json<Value>> {
    let blobs = state.auth.blobs_for(&user.username);
    prefill::save_user_draft(&blobs, &user.username, &draft)?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn clear_draft(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<Value>> {
    let blobs = state.auth.blobs_for(&user.username);
    prefill::clear_user_draft(&blobs, &user.username)?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
struct RoleChange {
    role: Role,
}

async fn change_role(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(username): Path<String>,
    Json(change): Json<RoleChange>,
) -> Result<Json<Value>> {
    if user.role != Role::Admin {
        return Err(Error::Forbidden("only an admin can change roles".to_string()));
    }
    let updated = state.auth.users.set_role(&username, change.role)?;
    info!("{} set {} to {:?}", user.username, updated.username, updated.role);
    Ok(Json(json!({
        "status": "ok",
        "user": { "username": updated.username, "role": updated.role },
    })))
}
