use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::services::ServeFile;

use crate::archive::{rebuild_archive, ArchiveSummary};
use crate::db::events::require_participant;
use crate::db::models::Role;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;
use crate::storage::paths;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub event_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events/{id}/archive", post(build_archive))
        .route("/api/download-photos", get(download_photos))
}

async fn build_archive(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
) -> AppResult<Json<ArchiveSummary>> {
    let summary = rebuild_archive(&state, &event_id, &user.id).await?;
    Ok(Json(summary))
}

/// Filename offered to the browser, derived from the event name.
pub fn download_filename(event_name: &str) -> String {
    let slug: String = event_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "photos.zip".to_string()
    } else {
        format!("{}-photos.zip", slug)
    }
}

/// Stream the pre-built archive from disk. 404 until the organizer has
/// built one. Range requests are honoured.
async fn download_photos(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<DownloadQuery>,
    request: Request,
) -> AppResult<Response> {
    let event = {
        let conn = state.db.get()?;
        let (event, role) = require_participant(&conn, &query.event_id, &user.id)?;
        if !event.moderation.allow_downloads && role != Role::Organizer {
            return Err(AppError::Forbidden);
        }
        event
    };

    let key = paths::archive(&event.id);
    if !state.blobs.exists(&key).await? {
        return Err(AppError::NotFound);
    }
    let mut file = ServeFile::new(state.blobs.path_for(&key)?);
    let served = file.try_call(request).await?;

    let disposition = format!("attachment; filename=\"{}\"", download_filename(&event.name));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| AppError::Internal(format!("Bad Content-Disposition: {}", e)))?;

    tracing::info!("Archive for event {} downloaded by {}", event.id, user.id);
    let mut response = served.map(Body::new).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}
