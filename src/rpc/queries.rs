use async_graphql::{Context, Object, Result};

use crate::db::events::{
    get_event, list_events_for_user, list_participants, participant_role, require_organizer,
    require_participant,
};
use crate::db::photos::{liked_photo_ids, page_photos};
use crate::db::users::get_user;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::invite::{build_invite, Invite};
use crate::rpc::types::{EventView, ParticipantView, PhotoPageView, UserView};
use crate::rpc::{app_state, maybe_viewer, viewer, RpcResultExt};
use crate::state::AppState;

/// Clamp a requested page size to the configured bounds.
pub fn page_limit(requested: Option<i32>, default: u32, max: u32) -> u32 {
    match requested {
        Some(n) if n < 1 => 1,
        Some(n) => (n as u32).min(max),
        None => default.min(max),
    }
}

fn load_me(state: &AppState, user: &CurrentUser) -> AppResult<UserView> {
    let conn = state.db.get()?;
    Ok(get_user(&conn, &user.id)?.into())
}

fn load_events(state: &AppState, user: &CurrentUser) -> AppResult<Vec<EventView>> {
    let conn = state.db.get()?;
    let events = list_events_for_user(&conn, &user.id)?;
    Ok(events
        .into_iter()
        .map(|(event, role)| EventView::new(event, &state.config, Some(role)))
        .collect())
}

fn load_event(state: &AppState, user: &CurrentUser, id: &str) -> AppResult<EventView> {
    let conn = state.db.get()?;
    let event = get_event(&conn, id)?;
    let role = participant_role(&conn, id, &user.id)?;
    Ok(EventView::new(event, &state.config, role))
}

fn load_photo_page(
    state: &AppState,
    user: &CurrentUser,
    event_id: &str,
    cursor: Option<&str>,
    limit: u32,
) -> AppResult<PhotoPageView> {
    let conn = state.db.get()?;
    let (_, role) = require_participant(&conn, event_id, &user.id)?;
    let page = page_photos(&conn, event_id, &user.id, role, cursor, limit)?;
    let ids: Vec<String> = page.items.iter().map(|p| p.id.clone()).collect();
    let liked = liked_photo_ids(&conn, &user.id, &ids)?;
    Ok(PhotoPageView::new(page, &state.config, &liked))
}

fn load_participants(state: &AppState, user: &CurrentUser, event_id: &str) -> AppResult<Vec<ParticipantView>> {
    let conn = state.db.get()?;
    require_participant(&conn, event_id, &user.id)?;
    let participants = list_participants(&conn, event_id)?;
    Ok(participants.into_iter().map(Into::into).collect())
}

fn load_invite(state: &AppState, user: &CurrentUser, event_id: &str) -> AppResult<Invite> {
    {
        let conn = state.db.get()?;
        require_organizer(&conn, event_id, &user.id)?;
    }
    build_invite(&state.config.base_url(), event_id)
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The signed-in user, or null.
    async fn me(&self, ctx: &Context<'_>) -> Result<Option<UserView>> {
        let state = app_state(ctx)?;
        match maybe_viewer(ctx) {
            Some(user) => load_me(state, user).map(Some).rpc(),
            None => Ok(None),
        }
    }

    /// Events the caller organizes or joined, newest first.
    async fn events(&self, ctx: &Context<'_>) -> Result<Vec<EventView>> {
        load_events(app_state(ctx)?, viewer(ctx)?).rpc()
    }

    /// Any signed-in user may look an event up, so an invite link can be
    /// rendered before joining.
    async fn event(&self, ctx: &Context<'_>, id: String) -> Result<EventView> {
        load_event(app_state(ctx)?, viewer(ctx)?, &id).rpc()
    }

    /// One page of an event's gallery, newest first.
    async fn event_photos(
        &self,
        ctx: &Context<'_>,
        event_id: String,
        cursor: Option<String>,
        limit: Option<i32>,
    ) -> Result<PhotoPageView> {
        let state = app_state(ctx)?;
        let gallery = &state.config.gallery;
        let limit = page_limit(limit, gallery.default_page_size, gallery.max_page_size);
        load_photo_page(state, viewer(ctx)?, &event_id, cursor.as_deref(), limit).rpc()
    }

    async fn participants(&self, ctx: &Context<'_>, event_id: String) -> Result<Vec<ParticipantView>> {
        load_participants(app_state(ctx)?, viewer(ctx)?, &event_id).rpc()
    }

    /// Invite link and QR code. Organizer only.
    async fn event_invite(&self, ctx: &Context<'_>, event_id: String) -> Result<Invite> {
        load_invite(app_state(ctx)?, viewer(ctx)?, &event_id).rpc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(page_limit(None, 24, 100), 24);
        assert_eq!(page_limit(Some(0), 24, 100), 1);
        assert_eq!(page_limit(Some(-5), 24, 100), 1);
        assert_eq!(page_limit(Some(10), 24, 100), 10);
        assert_eq!(page_limit(Some(500), 24, 100), 100);
        assert_eq!(page_limit(None, 24, 10), 10);
    }
}
