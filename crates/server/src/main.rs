use std::{net::SocketAddr, str::FromStr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use session::SessionConfig;
use shared::{
    domain::{CollectionId, CollectionKind, ComicId, EntryId, ReviewId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AddEntryRequest, CollectionDetail, CollectionSummary, ComicSummary,
        CreateCollectionRequest, CreateReviewRequest, EntrySummary, Page, PageRequest,
        ReorderRequest, ReviewSummary, UpdateEntryRequest,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;

use auth::Caller;
use config::{load_settings, normalize_database_url};

struct AppState {
    api: ApiContext,
    session: SessionConfig,
}

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCollectionsQuery {
    owner_id: Option<String>,
    kind: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            error = %format!("{error:#}"),
            "failed to open SQLite database; verify the path and permissions"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext::new(storage),
        session: SessionConfig {
            issuer: settings.session_issuer,
            secret: settings.session_secret,
            ttl_seconds: settings.session_ttl_seconds,
        },
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/collections",
            get(http_list_collections).post(http_create_collection),
        )
        .route(
            "/collections/:collection_id",
            get(http_get_collection).delete(http_delete_collection),
        )
        .route(
            "/collections/:collection_id/entries",
            get(http_list_entries).post(http_add_entry),
        )
        .route(
            "/collections/:collection_id/entries/reorder",
            patch(http_reorder_entries),
        )
        .route(
            "/collections/:collection_id/entries/:entry_id",
            patch(http_update_entry).delete(http_delete_entry),
        )
        .route("/lists/:collection_id/entries", get(http_list_list_entries))
        .route(
            "/lists/:collection_id/entries/reorder",
            patch(http_reorder_list_entries),
        )
        .route(
            "/roadmaps/:collection_id/entries",
            get(http_list_roadmap_entries),
        )
        .route(
            "/roadmaps/:collection_id/entries/reorder",
            patch(http_reorder_roadmap_entries),
        )
        .route("/comics", get(http_list_comics))
        .route("/comics/:comic_id", get(http_get_comic))
        .route(
            "/comics/:comic_id/reviews",
            get(http_list_reviews).post(http_create_review),
        )
        .route("/reviews/:review_id", delete(http_delete_review))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        error!(error = %format!("{e:#}"), "health check failed");
        api_error(ApiError::new(ErrorCode::StorageFailure, "database unavailable"))
    })?;
    Ok("ok")
}

async fn http_create_collection(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    payload: Result<Json<CreateCollectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CollectionSummary>), HttpError> {
    let Json(req) = payload.map_err(json_rejection)?;
    let collection = server_api::create_collection(&state.api, caller, req)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(collection)))
}

async fn http_list_collections(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListCollectionsQuery>, QueryRejection>,
) -> Result<Json<Page<CollectionSummary>>, HttpError> {
    let Query(query) = query.map_err(query_rejection)?;
    let owner_id = query
        .owner_id
        .as_deref()
        .map(|raw| parse_id::<UserId>(raw, "ownerId"))
        .transpose()?;
    let kind = query
        .kind
        .as_deref()
        .map(|raw| {
            CollectionKind::from_str(raw)
                .map_err(|e| api_error(ApiError::invalid(e.to_string())))
        })
        .transpose()?;
    let page = PageRequest::from_query(query.page, query.per_page);
    server_api::list_collections(&state.api, owner_id, kind, page)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_get_collection(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
) -> Result<Json<CollectionDetail>, HttpError> {
    let collection_id = parse_id::<CollectionId>(&collection_id, "collection id")?;
    server_api::get_collection(&state.api, collection_id, None)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_delete_collection(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(collection_id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let collection_id = parse_id::<CollectionId>(&collection_id, "collection id")?;
    server_api::delete_collection(&state.api, caller, collection_id, None)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_entries(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    list_entries_of_kind(&state, &collection_id, None).await
}

async fn http_list_list_entries(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    list_entries_of_kind(&state, &collection_id, Some(CollectionKind::List)).await
}

async fn http_list_roadmap_entries(
    State(state): State<Arc<AppState>>,
    Path(collection_id): Path<String>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    list_entries_of_kind(&state, &collection_id, Some(CollectionKind::Roadmap)).await
}

async fn list_entries_of_kind(
    state: &AppState,
    collection_id: &str,
    kind: Option<CollectionKind>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    let collection_id = parse_id::<CollectionId>(collection_id, "collection id")?;
    server_api::list_entries(&state.api, collection_id, kind)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_add_entry(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(collection_id): Path<String>,
    payload: Result<Json<AddEntryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EntrySummary>), HttpError> {
    let collection_id = parse_id::<CollectionId>(&collection_id, "collection id")?;
    let Json(req) = payload.map_err(json_rejection)?;
    let entry = server_api::add_entry(&state.api, caller, collection_id, None, req)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn http_update_entry(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((collection_id, entry_id)): Path<(String, String)>,
    payload: Result<Json<UpdateEntryRequest>, JsonRejection>,
) -> Result<Json<EntrySummary>, HttpError> {
    let collection_id = parse_id::<CollectionId>(&collection_id, "collection id")?;
    let entry_id = parse_id::<EntryId>(&entry_id, "entry id")?;
    let Json(req) = payload.map_err(json_rejection)?;
    server_api::update_entry(&state.api, caller, collection_id, None, entry_id, req)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_delete_entry(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((collection_id, entry_id)): Path<(String, String)>,
) -> Result<StatusCode, HttpError> {
    let collection_id = parse_id::<CollectionId>(&collection_id, "collection id")?;
    let entry_id = parse_id::<EntryId>(&entry_id, "entry id")?;
    server_api::delete_entry(&state.api, caller, collection_id, None, entry_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_reorder_entries(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(collection_id): Path<String>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    reorder_of_kind(&state, caller, &collection_id, None, payload).await
}

async fn http_reorder_list_entries(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(collection_id): Path<String>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    reorder_of_kind(
        &state,
        caller,
        &collection_id,
        Some(CollectionKind::List),
        payload,
    )
    .await
}

async fn http_reorder_roadmap_entries(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(collection_id): Path<String>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    reorder_of_kind(
        &state,
        caller,
        &collection_id,
        Some(CollectionKind::Roadmap),
        payload,
    )
    .await
}

async fn reorder_of_kind(
    state: &AppState,
    caller: UserId,
    collection_id: &str,
    kind: Option<CollectionKind>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<Vec<EntrySummary>>, HttpError> {
    let collection_id = parse_id::<CollectionId>(collection_id, "collection id")?;
    let Json(req) = payload.map_err(json_rejection)?;
    server_api::reorder_entries(&state.api, caller, collection_id, kind, &req.entry_orders)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_list_comics(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<ComicSummary>>, HttpError> {
    let Query(query) = query.map_err(query_rejection)?;
    let page = PageRequest::from_query(query.page, query.per_page);
    server_api::list_comics(&state.api, page)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_get_comic(
    State(state): State<Arc<AppState>>,
    Path(comic_id): Path<String>,
) -> Result<Json<ComicSummary>, HttpError> {
    let comic_id = parse_id::<ComicId>(&comic_id, "comic id")?;
    server_api::get_comic(&state.api, comic_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_list_reviews(
    State(state): State<Arc<AppState>>,
    Path(comic_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<ReviewSummary>>, HttpError> {
    let comic_id = parse_id::<ComicId>(&comic_id, "comic id")?;
    let Query(query) = query.map_err(query_rejection)?;
    let page = PageRequest::from_query(query.page, query.per_page);
    server_api::list_reviews(&state.api, comic_id, page)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn http_create_review(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(comic_id): Path<String>,
    payload: Result<Json<CreateReviewRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReviewSummary>), HttpError> {
    let comic_id = parse_id::<ComicId>(&comic_id, "comic id")?;
    let Json(req) = payload.map_err(json_rejection)?;
    let review = server_api::create_review(&state.api, caller, comic_id, req)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn http_delete_review(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(review_id): Path<String>,
) -> Result<StatusCode, HttpError> {
    let review_id = parse_id::<ReviewId>(&review_id, "review id")?;
    server_api::delete_review(&state.api, caller, review_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn api_error(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn json_rejection(rejection: JsonRejection) -> HttpError {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ApiError::invalid(rejection.body_text())),
    )
}

fn query_rejection(rejection: QueryRejection) -> HttpError {
    api_error(ApiError::invalid(rejection.body_text()))
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, HttpError> {
    raw.parse()
        .map_err(|_| api_error(ApiError::invalid(format!("malformed {what} '{raw}'"))))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
