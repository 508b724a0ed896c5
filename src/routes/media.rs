use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::db::events::require_participant;
use crate::db::photos::require_visible_photo;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;
use crate::storage::paths::{classify, BlobKind};

pub fn router() -> Router<AppState> {
    Router::new().route("/media/{*path}", get(serve))
}

/// Check that `user` may read the blob at `key`.
fn authorize(state: &AppState, user: &CurrentUser, key: &str) -> AppResult<()> {
    let conn = state.db.get()?;
    match classify(key) {
        BlobKind::Cover { event_id } => {
            require_participant(&conn, event_id, &user.id)?;
            Ok(())
        }
        BlobKind::Photo { event_id, photo_id } => {
            let (photo, _) = require_visible_photo(&conn, photo_id, &user.id)?;
            if photo.event_id != event_id {
                return Err(AppError::NotFound);
            }
            Ok(())
        }
        // Archives go through the download route, which checks download
        // permissions.
        BlobKind::Archive { .. } | BlobKind::Unknown => Err(AppError::NotFound),
    }
}

pub async fn serve(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(path): Path<String>,
) -> AppResult<Response> {
    authorize(&state, &user, &path)?;
    let data = state.blobs.get(&path).await?;

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "private, max-age=86400".to_string()),
        ],
        data,
    )
        .into_response())
}
