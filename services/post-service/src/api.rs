use crate::auth::{AuthenticatedUser, JwtVerifier};
use crate::config::ApiConfig;
use crate::error::PostError;
use crate::geo_search::GeoSearch;
use crate::ingestion::PostIngestion;
use crate::model::{
    CoordinateParsing, ImageUpload, Location, Post, PostId, PostSubmission, Radius, SearchQuery,
};
use crate::record_store::RecordStore;
use crate::search_index::SearchIndex;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<PostIngestion>,
    pub geo_search: Arc<GeoSearch>,
    pub verifier: Arc<JwtVerifier>,
    pub search_index: Arc<dyn SearchIndex>,
    pub record_store: Arc<dyn RecordStore>,
    pub default_radius: Radius,
    pub coordinate_parsing: CoordinateParsing,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Response to a successful post submission
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub id: PostId,
}

/// Query parameters for geo search
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub lat: Option<String>,
    pub lon: Option<String>,
    /// Radius in kilometres
    pub range: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/post", post(create_post))
        .route("/search", get(search_posts))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "post-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let (records, search) = tokio::join!(state.record_store.ping(), state.search_index.ping());

    let status_of = |result: &Result<(), PostError>| match result {
        Ok(()) => "connected".to_string(),
        Err(e) => e.to_string(),
    };

    let body = Json(serde_json::json!({
        "status": if records.is_ok() && search.is_ok() { "ready" } else { "not_ready" },
        "record_store": status_of(&records),
        "search_index": status_of(&search),
    }));

    if records.is_ok() && search.is_ok() {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Accept one multipart post submission
#[instrument(skip_all)]
async fn create_post(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreatePostResponse>), PostError> {
    let submission = read_submission(multipart, state.coordinate_parsing).await?;
    let id = state.ingestion.ingest(&principal, submission).await?;

    Ok((StatusCode::CREATED, Json(CreatePostResponse { id })))
}

/// Posts within `range` km of (`lat`, `lon`)
#[instrument(skip_all)]
async fn search_posts(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Post>>, PostError> {
    debug!(user = %principal.as_str(), ?params, "Search request");

    let center = Location::parse(
        params.lat.as_deref().unwrap_or_default(),
        params.lon.as_deref().unwrap_or_default(),
        state.coordinate_parsing,
    )?;
    let radius = Radius::parse(params.range.as_deref(), state.default_radius)?;

    let posts = state.geo_search.search(SearchQuery { center, radius }).await?;

    Ok(Json(posts))
}

/// Decode the `message`, `lat`, `lon` and `image` parts of a submission
async fn read_submission(
    mut multipart: Multipart,
    parsing: CoordinateParsing,
) -> Result<PostSubmission, PostError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        PostError::InvalidSubmission(e.body_text())
    };

    let mut message = String::new();
    let mut lat = String::new();
    let mut lon = String::new();
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "message" => message = field.text().await.map_err(invalid)?,
            "lat" => lat = field.text().await.map_err(invalid)?,
            "lon" => lon = field.text().await.map_err(invalid)?,
            "image" => {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(invalid)?;

                // An unselected file input arrives as an empty part
                if !bytes.is_empty() {
                    image = Some(ImageUpload {
                        bytes,
                        content_type,
                        file_name,
                    });
                }
            }
            other => debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let location = Location::parse(&lat, &lon, parsing)?;

    Ok(PostSubmission {
        message,
        location,
        image,
    })
}

/// Start the HTTP API server, stopping when `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting post API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
