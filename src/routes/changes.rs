use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream};

use crate::db::events::require_participant;
use crate::error::AppError;
use crate::extractors::CurrentUser;
use crate::realtime::next_invalidation;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/events/{id}/changes", get(gallery_changes))
}

/// SSE stream of debounced `invalidate` events for one gallery. Clients
/// refetch the first page whenever one arrives.
async fn gallery_changes(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(event_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    {
        let conn = state.db.get()?;
        require_participant(&conn, &event_id, &user.id)?;
    }

    // Subscribe before responding so nothing published after this point is
    // missed.
    let rx = state.notifier.subscribe();
    let window = state.config.invalidation_debounce();
    tracing::debug!("User {} watching event {}", user.id, event_id);

    let stream = stream::unfold((rx, event_id), move |(mut rx, event_id)| async move {
        let batch = next_invalidation(&mut rx, &event_id, window).await?;
        let data = match serde_json::to_string(&batch) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Failed to encode invalidation: {}", e);
                String::from("{}")
            }
        };
        let event = Event::default().event("invalidate").data(data);
        Some((Ok(event), (rx, event_id)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
