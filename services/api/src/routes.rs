//! API service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use common::id::new_id;
use serde_json::json;
use tracing::{error, info};

use crate::{
    error::{ApiError, ApiResult},
    middleware::{AuthUser, auth_middleware},
    models::{
        GenerateRequest, GeneratedPhotoResponse, MeResponse, TaskStatusResponse, UploadRequest,
        UploadResponse,
    },
    state::AppState,
};
use generation::{GenerationError, models::GenerationStatus};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/photos/:original_id/generate", post(generate_photo))
        .route("/tasks/:task_id/status", get(task_status))
        .route("/generated/:id", get(get_generated_photo))
        .route("/uploads", post(create_upload))
        .route("/me", get(me))
        .route("/auth/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);
    let sessions = state.sessions.health_check().await.unwrap_or_else(|e| {
        error!("Redis health check failed: {}", e);
        false
    });

    let status = if database && sessions {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "service": "api-service",
            "database": database,
            "sessions": sessions,
        })),
    )
}

/// Debit a credit and queue a restyle of an original photo
pub async fn generate_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(original_id): Path<String>,
    Json(payload): Json<GenerateRequest>,
) -> ApiResult<impl IntoResponse> {
    let ticket = state
        .generation
        .generate(&user.id, &original_id, &payload.theme_id)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// Queue status of a generation task
pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state.generation.task_status(&task_id).await?;

    Ok(Json(TaskStatusResponse { task_id, status }))
}

/// A generated photo requested by the caller
pub async fn get_generated_photo(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let photo = state
        .repository
        .find_generated_photo(&id)
        .await?
        .filter(|photo| photo.requested_by == user.id)
        .ok_or_else(|| ApiError::NotFound(format!("generated photo {}", id)))?;

    let url = match (&photo.status, &photo.file_id) {
        (GenerationStatus::Finished, Some(file_id)) => {
            let file = state
                .repository
                .find_file(file_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("file {}", file_id)))?;
            let url = state
                .store
                .presign_get(&file.storage_key, state.settings.presign_ttl())
                .await
                .map_err(GenerationError::from)?;
            Some(url)
        }
        _ => None,
    };

    Ok(Json(GeneratedPhotoResponse::new(photo, url)))
}

/// Signed URL for uploading an original photo straight to the bucket
pub async fn create_upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<UploadRequest>,
) -> ApiResult<impl IntoResponse> {
    if !payload.content_type.starts_with("image/") {
        return Err(ApiError::BadRequest(format!(
            "unsupported content type '{}'",
            payload.content_type
        )));
    }

    let key = new_id();
    let ttl = state.settings.presign_ttl();
    let upload_url = state
        .store
        .presign_put(&key, &payload.content_type, ttl)
        .await
        .map_err(GenerationError::from)?;

    info!("Upload URL issued to user {} for key {}", user.id, key);

    Ok(Json(UploadResponse {
        key,
        upload_url,
        expires_in: ttl.as_secs(),
    }))
}

/// The caller's account
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let account = state
        .repository
        .find_user(&user.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    Ok(Json(MeResponse::from(account)))
}

/// End the caller's session
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    state.sessions.end_session(&user.token).await.map_err(|e| {
        error!("Failed to end session: {}", e);
        ApiError::InternalServerError
    })?;

    Ok(StatusCode::NO_CONTENT)
}
