use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::events::require_participant;
use crate::db::models::Photo;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::routes::UPLOAD_OFFSET;
use crate::rpc::types::PhotoView;
use crate::state::AppState;
use crate::upload::sessions::{remove_files, write_chunk, UploadSession};
use crate::upload::{ingest_photo_detached, UploadError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatus {
    pub upload_id: String,
    pub event_id: String,
    pub offset: u64,
    pub size: u64,
}

impl From<&UploadSession> for UploadStatus {
    fn from(session: &UploadSession) -> Self {
        Self {
            upload_id: session.id.clone(),
            event_id: session.event_id.clone(),
            offset: session.received,
            size: session.size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkAccepted {
    pub offset: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events/{id}/uploads", post(create_upload))
        .route(
            "/api/uploads/{id}",
            get(upload_status).put(put_chunk).delete(cancel_upload),
        )
        .route("/api/uploads/{id}/complete", post(complete_upload))
}

async fn create_upload(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
    Json(req): Json<CreateUploadRequest>,
) -> AppResult<(StatusCode, Json<UploadStatus>)> {
    let limit = state.config.upload.max_photo_bytes;
    if req.size == 0 {
        return Err(UploadError::Empty.into());
    }
    if req.size > limit as u64 {
        return Err(UploadError::TooLarge { limit }.into());
    }

    {
        let conn = state.db.get()?;
        let (event, _) = require_participant(&conn, &event_id, &user.id)?;
        if !event.accepts_uploads() {
            return Err(UploadError::EventClosed.into());
        }
    }

    let (session, stale) = {
        let mut store = state.uploads.lock().await;
        let stale = store.clear_stale();
        let session = store.create(&event_id, &user.id, &req.file_name, req.size);
        (session, stale)
    };
    remove_files(&stale).await;

    Ok((StatusCode::CREATED, Json(UploadStatus::from(&session))))
}

async fn upload_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(upload_id): Path<String>,
) -> AppResult<Json<UploadStatus>> {
    let session = state.uploads.lock().await.get(&upload_id, &user.id)?;
    Ok(Json(UploadStatus::from(&session)))
}

fn chunk_offset(headers: &HeaderMap) -> AppResult<u64> {
    headers
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| AppError::BadRequest("Upload-Offset header is required".into()))
}

/// Append one chunk. The chunk is validated and the session claimed under
/// the store lock, then written without it. A concurrent request for the
/// same session gets `CONFLICT` before it touches the file.
async fn put_chunk(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ChunkAccepted>> {
    let offset = chunk_offset(&headers)?;
    let len = body.len() as u64;
    let max_chunk = state.config.upload.max_chunk_bytes as u64;

    let session = state
        .uploads
        .lock()
        .await
        .reserve_chunk(&upload_id, &user.id, offset, len, max_chunk)?;

    if let Err(e) = write_chunk(&session.path, offset, &body).await {
        state.uploads.lock().await.release(&upload_id);
        return Err(e.into());
    }

    let offset = state
        .uploads
        .lock()
        .await
        .advance(&upload_id, &user.id, offset, len)?;
    tracing::debug!("Upload {} at {}/{} bytes", upload_id, offset, session.size);

    Ok(Json(ChunkAccepted { offset }))
}

/// Ingest a fully received upload. The session and its file are kept when
/// ingestion fails for a reason worth retrying, so the client can call
/// complete again without re-sending any bytes.
async fn complete_upload(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(upload_id): Path<String>,
) -> AppResult<(StatusCode, Json<PhotoView>)> {
    let session = state
        .uploads
        .lock()
        .await
        .begin_complete(&upload_id, &user.id)?;

    let result = ingest_session(&state, &session, &user).await;

    let finished = {
        let mut store = state.uploads.lock().await;
        match &result {
            Err(e) if e.is_retryable() => {
                store.release(&upload_id);
                None
            }
            _ => store.finish(&upload_id),
        }
    };
    if let Some(finished) = finished {
        remove_files(&[finished]).await;
    }

    let photo = result?;
    tracing::info!(
        "Resumable upload {} ({}) completed as photo {}",
        upload_id,
        session.file_name,
        photo.id
    );
    Ok((StatusCode::CREATED, Json(PhotoView::new(photo, &state.config, false))))
}

async fn ingest_session(state: &AppState, session: &UploadSession, user: &CurrentUser) -> AppResult<Photo> {
    let data = tokio::fs::read(&session.path).await?;
    if data.len() as u64 != session.size {
        return Err(UploadError::Interrupted(format!(
            "expected {} bytes, found {}",
            session.size,
            data.len()
        ))
        .into());
    }
    ingest_photo_detached(state, &session.event_id, &user.id, Bytes::from(data)).await
}

async fn cancel_upload(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(upload_id): Path<String>,
) -> AppResult<StatusCode> {
    let session = state.uploads.lock().await.cancel(&upload_id, &user.id)?;
    remove_files(&[session]).await;
    Ok(StatusCode::NO_CONTENT)
}
