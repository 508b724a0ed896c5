use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::events::require_participant;
use crate::db::photos::{liked_photo_ids, require_visible_photo};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::rpc::types::PhotoView;
use crate::state::AppState;
use crate::upload::{ingest_photo_detached, UploadError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoQuery {
    pub event_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadedPhotos {
    pub photos: Vec<PhotoView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedPhoto>,
}

/// A photo from a multi-photo request that was not stored.
#[derive(Debug, Serialize)]
pub struct FailedPhoto {
    /// Position among the request's `photo` fields.
    pub index: usize,
    pub code: &'static str,
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/photo/{id}", get(get_photo))
        .route("/api/events/{id}/photos", post(upload_photos))
}

/// Single photo lookup, scoped to the event the client thinks it belongs to.
async fn get_photo(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(photo_id): Path<String>,
    Query(query): Query<PhotoQuery>,
) -> AppResult<Json<PhotoView>> {
    let conn = state.db.get()?;
    let (photo, _) = require_visible_photo(&conn, &photo_id, &user.id)?;
    if photo.event_id != query.event_id {
        return Err(AppError::NotFound);
    }

    let liked = liked_photo_ids(&conn, &user.id, &[photo.id.clone()])?;
    let liked_by_me = liked.contains(&photo.id);
    Ok(Json(PhotoView::new(photo, &state.config, liked_by_me)))
}

/// Classify a failure while reading the request body.
pub(crate) fn body_error(e: MultipartError, limit: usize) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge { limit }
    } else {
        UploadError::Interrupted(e.body_text())
    }
}

/// Multipart upload of one or more `photo` fields.
///
/// Only receiving the body is bounded by the upload timeout. Each received
/// photo is then ingested to completion, so a timeout never leaves a photo
/// half stored. When some photos are stored and others fail, the response
/// is still 201 and lists the failures next to the stored photos.
async fn upload_photos(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadedPhotos>)> {
    {
        let conn = state.db.get()?;
        let (event, _) = require_participant(&conn, &event_id, &user.id)?;
        if !event.accepts_uploads() {
            return Err(UploadError::EventClosed.into());
        }
    }

    let limit = state.config.upload.max_photo_bytes;
    let timeout = state.config.upload_timeout();
    let bodies = match tokio::time::timeout(timeout, receive_photos(multipart, limit)).await {
        Ok(bodies) => bodies?,
        Err(_) => {
            tracing::warn!(
                "Upload to event {} by {} timed out after {:?}",
                event_id,
                user.id,
                timeout
            );
            return Err(UploadError::Timeout.into());
        }
    };
    if bodies.is_empty() {
        return Err(UploadError::Empty.into());
    }

    let mut photos = Vec::new();
    let mut failed = Vec::new();
    let mut first_error = None;
    for (index, data) in bodies.into_iter().enumerate() {
        match ingest_photo_detached(&state, &event_id, &user.id, data).await {
            Ok(photo) => photos.push(PhotoView::new(photo, &state.config, false)),
            Err(e) => {
                failed.push(FailedPhoto {
                    index,
                    code: e.code(),
                    message: e.public_message(),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if photos.is_empty() => Err(e),
        _ => Ok((StatusCode::CREATED, Json(UploadedPhotos { photos, failed }))),
    }
}

/// Read every `photo` field into memory. Fields larger than `limit` fail
/// the whole request before anything is stored.
async fn receive_photos(mut multipart: Multipart, limit: usize) -> AppResult<Vec<Bytes>> {
    let mut bodies = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e, limit))?
    {
        if field.name() != Some("photo") {
            continue;
        }
        let data = field.bytes().await.map_err(|e| body_error(e, limit))?;
        if data.len() > limit {
            return Err(UploadError::TooLarge { limit }.into());
        }
        bodies.push(data);
    }

    Ok(bodies)
}
