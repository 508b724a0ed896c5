//! Photo ingestion: validation, optimization, blob storage and bookkeeping.

pub mod optimize;
pub mod sessions;

use axum::http::StatusCode;
use bytes::Bytes;
use chrono::Utc;
use std::time::Instant;

use crate::db::events::{require_organizer, require_participant, set_cover_image};
use crate::db::models::{Event, ModerationStatus, Photo, Role};
use crate::db::photos::{insert_photo, NewPhoto};
use crate::error::{AppError, AppResult};
use crate::realtime::ChangeKind;
use crate::state::AppState;
use crate::storage::paths;

use self::optimize::{process_cover, process_photo, OptimizeSettings};

const MB: usize = 1024 * 1024;

/// Why an upload failed, phrased for the person holding the camera.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no photo in request")]
    Empty,

    #[error("photo exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("image could not be decoded")]
    Unreadable,

    #[error("upload timed out")]
    Timeout,

    #[error("upload interrupted: {0}")]
    Interrupted(String),

    #[error("event is closed")]
    EventClosed,

    #[error("image processing failed: {0}")]
    Processing(String),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Empty | UploadError::Unreadable | UploadError::Interrupted(_) => {
                "BAD_REQUEST"
            }
            UploadError::TooLarge { .. } => "PAYLOAD_TOO_LARGE",
            UploadError::UnsupportedFormat => "UNSUPPORTED_MEDIA_TYPE",
            UploadError::Timeout => "TIMEOUT",
            UploadError::EventClosed => "FORBIDDEN",
            UploadError::Processing(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::Empty | UploadError::Unreadable | UploadError::Interrupted(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::Timeout => StatusCode::REQUEST_TIMEOUT,
            UploadError::EventClosed => StatusCode::FORBIDDEN,
            UploadError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            UploadError::Empty => "No photo was provided".to_string(),
            UploadError::TooLarge { limit } => {
                format!("Photo is too large (max {} MB)", limit.div_ceil(MB))
            }
            UploadError::UnsupportedFormat => {
                "Unsupported image format. Please upload a JPEG, PNG or WebP photo".to_string()
            }
            UploadError::Unreadable => {
                "This photo could not be read. Please try another file".to_string()
            }
            UploadError::Timeout => "Upload timed out. Please try again".to_string(),
            UploadError::Interrupted(detail) => {
                tracing::warn!("Upload interrupted: {}", detail);
                "Upload was interrupted. Please try again".to_string()
            }
            UploadError::EventClosed => "This event is no longer accepting photos".to_string(),
            UploadError::Processing(detail) => {
                tracing::error!("Image processing failed: {}", detail);
                "Something went wrong while processing the photo".to_string()
            }
        }
    }
}

async fn run_blocking<T, F>(task: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, UploadError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Internal(format!("Image task failed: {}", e)))?
        .map_err(AppError::from)
}

/// Store one uploaded photo for `uploader_id` in `event_id`.
///
/// Membership and event status are checked before any work is done. The
/// renditions are written first and the database row second; if the row
/// cannot be written the blobs are removed again.
pub async fn ingest_photo(
    state: &AppState,
    event_id: &str,
    uploader_id: &str,
    bytes: Bytes,
) -> AppResult<Photo> {
    let started = Instant::now();
    let limit = state.config.upload.max_photo_bytes;
    if bytes.is_empty() {
        return Err(UploadError::Empty.into());
    }
    if bytes.len() > limit {
        return Err(UploadError::TooLarge { limit }.into());
    }

    let (event, role) = {
        let conn = state.db.get()?;
        require_participant(&conn, event_id, uploader_id)?
    };
    if !event.accepts_uploads() {
        return Err(UploadError::EventClosed.into());
    }

    let settings = OptimizeSettings::from(&state.config.upload);
    let input = bytes.clone();
    let renditions = run_blocking(move || process_photo(&input, settings)).await?;

    let photo_id = uuid::Uuid::now_v7().to_string();
    let original_path = paths::photo_original(event_id, &photo_id);
    let medium_path = paths::photo_medium(event_id, &photo_id);
    let thumbnail_path = paths::photo_thumbnail(event_id, &photo_id);
    let keys = [
        original_path.as_str(),
        medium_path.as_str(),
        thumbnail_path.as_str(),
    ];

    let stored = async {
        state.blobs.put(&original_path, &renditions.original).await?;
        state.blobs.put(&medium_path, &renditions.medium).await?;
        state.blobs.put(&thumbnail_path, &renditions.thumbnail).await
    }
    .await;
    if let Err(e) = stored {
        state.blobs.delete_all(&keys).await;
        return Err(e);
    }

    let moderation_status = if event.moderation.require_approval && role != Role::Organizer {
        ModerationStatus::Pending
    } else {
        ModerationStatus::Approved
    };
    let new = NewPhoto {
        id: photo_id.clone(),
        event_id: event_id.to_string(),
        uploader_id: uploader_id.to_string(),
        original_path: original_path.clone(),
        medium_path: medium_path.clone(),
        thumbnail_path: thumbnail_path.clone(),
        width: renditions.width,
        height: renditions.height,
        size_bytes: renditions.original.len() as i64,
        moderation_status,
        created_at: Utc::now(),
    };

    let inserted = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|mut conn| insert_photo(&mut conn, &new));
    let photo = match inserted {
        Ok(photo) => photo,
        Err(e) => {
            state.blobs.delete_all(&keys).await;
            return Err(e);
        }
    };

    state.notifier.publish_photo(&photo, ChangeKind::Added);
    tracing::info!(
        "Photo {} added to event {} by {} ({} -> {} bytes, {:?})",
        photo.id,
        event_id,
        uploader_id,
        bytes.len(),
        photo.size_bytes,
        started.elapsed()
    );
    Ok(photo)
}

/// Run [`ingest_photo`] on its own task. Dropping the returned future (a
/// client disconnect or an elapsed timeout) then cannot stop ingestion
/// between storing blobs and recording the row or removing the blobs again.
pub async fn ingest_photo_detached(
    state: &AppState,
    event_id: &str,
    uploader_id: &str,
    bytes: Bytes,
) -> AppResult<Photo> {
    let state = state.clone();
    let event_id = event_id.to_string();
    let uploader_id = uploader_id.to_string();
    tokio::spawn(async move { ingest_photo(&state, &event_id, &uploader_id, bytes).await })
        .await
        .map_err(|e| AppError::Internal(format!("Ingest task failed: {}", e)))?
}

/// Replace an event's cover image. Organizer only.
pub async fn ingest_cover(
    state: &AppState,
    event_id: &str,
    user_id: &str,
    bytes: Bytes,
) -> AppResult<Event> {
    let limit = state.config.upload.max_photo_bytes;
    if bytes.is_empty() {
        return Err(UploadError::Empty.into());
    }
    if bytes.len() > limit {
        return Err(UploadError::TooLarge { limit }.into());
    }

    {
        let conn = state.db.get()?;
        require_organizer(&conn, event_id, user_id)?;
    }

    let max = state.config.upload.cover_dimension;
    let webp = run_blocking(move || process_cover(&bytes, max)).await?;

    let key = paths::cover(event_id);
    state.blobs.put(&key, &webp).await?;

    let conn = state.db.get()?;
    set_cover_image(&conn, event_id, &key)?;
    tracing::info!("Cover updated for event {} ({} bytes)", event_id, webp.len());
    crate::db::events::get_event(&conn, event_id)
}
