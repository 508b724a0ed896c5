use axum::extract::{Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::db::events::require_organizer;
use crate::db::models::Role;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::invite::{build_invite, Invite};
use crate::routes::photos::body_error;
use crate::rpc::types::EventView;
use crate::state::AppState;
use crate::upload::{ingest_cover, UploadError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events/{id}/cover", post(upload_cover))
        .route("/api/events/{id}/invite", get(invite))
}

/// Replace the cover from a multipart `cover` field. Organizer only.
async fn upload_cover(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Json<EventView>> {
    let limit = state.config.upload.max_photo_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e, limit))?
    {
        if field.name() != Some("cover") {
            continue;
        }
        let data = field.bytes().await.map_err(|e| body_error(e, limit))?;
        let event = ingest_cover(&state, &event_id, &user.id, data).await?;
        return Ok(Json(EventView::new(event, &state.config, Some(Role::Organizer))));
    }

    Err(UploadError::Empty.into())
}

async fn invite(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
) -> AppResult<Json<Invite>> {
    {
        let conn = state.db.get()?;
        require_organizer(&conn, &event_id, &user.id)?;
    }
    Ok(Json(build_invite(&state.config.base_url(), &event_id)?))
}
