use async_graphql::{Context, Error, ErrorExtensions, Object, Result};

use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::auth::session::{clear_session_cookie, create_session, delete_session, session_cookie};
use crate::db::events::{create_event, join_event, require_organizer, NewEvent};
use crate::db::models::{ModerationSettings, ModerationStatus, Role, User};
use crate::db::photos::{
    delete_photo, get_photo, liked_photo_ids, require_visible_photo, set_like, set_moderation_status,
    toggle_like,
};
use crate::db::users::{create_user, find_credentials, update_profile};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::realtime::ChangeKind;
use crate::rpc::types::{
    AuthPayload, CreateEventInput, CreateProfileInput, DeletedPhoto, EventView, LikeResult,
    LoginInput, ModerationStatusKind, PhotoView, UpdateProfileInput, UserView,
};
use crate::rpc::{app_state, set_cookie, viewer, RpcResultExt};
use crate::state::AppState;
use crate::storage::paths;

const MAX_DISPLAY_NAME_LEN: usize = 80;

fn validate_display_name(name: &str) -> AppResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Display name is required".into()));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "Display name must be {} characters or less",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(name)
}

fn validate_email(email: &str) -> AppResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::BadRequest("Please enter a valid email address".into())),
    }
}

async fn blocking<T, F>(task: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))?
}

fn start_session(state: &AppState, user: User) -> AppResult<(AuthPayload, String)> {
    let conn = state.db.get()?;
    let days = state.config.auth.session_days;
    let token = create_session(&conn, &user.id, days)?;
    let cookie = session_cookie(&state.config.auth, &token);
    Ok((
        AuthPayload {
            user: user.into(),
            token,
            expires_in_days: days,
        },
        cookie,
    ))
}

async fn sign_up(state: &AppState, input: CreateProfileInput) -> AppResult<(AuthPayload, String)> {
    validate_email(&input.email)?;
    validate_password(&input.password)?;
    let display_name = validate_display_name(&input.display_name)?.to_string();

    let cost = state.config.auth.bcrypt_cost;
    let password = input.password;
    let hash = blocking(move || hash_password(&password, cost)).await?;

    let user = {
        let conn = state.db.get()?;
        create_user(
            &conn,
            &input.email,
            &display_name,
            input.photo_url.as_deref(),
            &hash,
        )?
    };
    tracing::info!("Account created for {}", user.id);
    start_session(state, user)
}

async fn sign_in(state: &AppState, input: LoginInput) -> AppResult<(AuthPayload, String)> {
    let invalid = || AppError::Unauthorized;
    let found = {
        let conn = state.db.get()?;
        find_credentials(&conn, &input.email)?
    };
    let (user, hash) = found.ok_or_else(invalid)?;

    let password = input.password;
    let valid = blocking(move || Ok(verify_password(&password, &hash))).await?;
    if !valid {
        tracing::info!("Failed sign-in for {}", user.id);
        return Err(invalid());
    }
    start_session(state, user)
}

fn new_event(state: &AppState, user: &CurrentUser, input: CreateEventInput) -> AppResult<EventView> {
    let defaults = ModerationSettings::default();
    let new = NewEvent {
        name: input.name,
        description: input.description,
        date: input.date,
        end_date: input.end_date,
        moderation: ModerationSettings {
            require_approval: input.require_approval.unwrap_or(defaults.require_approval),
            allow_downloads: input.allow_downloads.unwrap_or(defaults.allow_downloads),
        },
    };

    let mut conn = state.db.get()?;
    let event = create_event(&mut conn, &user.id, &new)?;
    Ok(EventView::new(event, &state.config, Some(Role::Organizer)))
}

fn join(state: &AppState, user: &CurrentUser, event_id: &str) -> AppResult<EventView> {
    let mut conn = state.db.get()?;
    let outcome = join_event(&mut conn, event_id, &user.id)?;
    Ok(EventView::new(outcome.event, &state.config, Some(outcome.role)))
}

/// Apply a like change. `liked = None` flips the current state.
fn like(state: &AppState, user: &CurrentUser, photo_id: &str, liked: Option<bool>) -> AppResult<LikeResult> {
    let mut conn = state.db.get()?;
    let (photo, _) = require_visible_photo(&conn, photo_id, &user.id)?;
    let like_state = match liked {
        Some(liked) => set_like(&mut conn, photo_id, &user.id, liked)?,
        None => toggle_like(&mut conn, photo_id, &user.id)?,
    };

    state.notifier.publish_photo(&photo, ChangeKind::Updated);
    Ok(LikeResult::new(photo_id, like_state))
}

/// Organizer removes a photo: row and counters first, then blobs.
async fn remove_photo(state: &AppState, user: &CurrentUser, photo_id: &str) -> AppResult<DeletedPhoto> {
    let photo = {
        let mut conn = state.db.get()?;
        let photo = get_photo(&conn, photo_id)?;
        require_organizer(&conn, &photo.event_id, &user.id)?;
        delete_photo(&mut conn, photo_id)?
    };

    let archive = paths::archive(&photo.event_id);
    state
        .blobs
        .delete_all(&[
            photo.original_path.as_str(),
            photo.medium_path.as_str(),
            photo.thumbnail_path.as_str(),
            archive.as_str(),
        ])
        .await;

    state.notifier.publish_photo(&photo, ChangeKind::Removed);
    Ok(DeletedPhoto {
        id: photo.id,
        event_id: photo.event_id,
    })
}

/// Organizer changes a photo's moderation status. Taking a photo out of
/// the approved set drops the event archive, which may contain it.
async fn moderate(
    state: &AppState,
    user: &CurrentUser,
    photo_id: &str,
    status: ModerationStatus,
) -> AppResult<PhotoView> {
    let (previous, photo, liked) = {
        let conn = state.db.get()?;
        let previous = get_photo(&conn, photo_id)?;
        require_organizer(&conn, &previous.event_id, &user.id)?;
        let photo = set_moderation_status(&conn, photo_id, status)?;
        let liked = liked_photo_ids(&conn, &user.id, &[photo.id.clone()])?.contains(&photo.id);
        (previous, photo, liked)
    };
    tracing::info!("Photo {} marked {}", photo.id, status.as_str());

    if previous.moderation_status == ModerationStatus::Approved && status != ModerationStatus::Approved {
        state.blobs.delete(&paths::archive(&photo.event_id)).await?;
        tracing::info!("Archive for event {} dropped after moderation", photo.event_id);
    }

    state.notifier.publish_photo(&photo, ChangeKind::Updated);
    Ok(PhotoView::new(photo, &state.config, liked))
}

fn edit_profile(state: &AppState, user: &CurrentUser, input: UpdateProfileInput) -> AppResult<UserView> {
    let display_name = input
        .display_name
        .as_deref()
        .map(validate_display_name)
        .transpose()?;

    let conn = state.db.get()?;
    let user = update_profile(&conn, &user.id, display_name, input.photo_url.as_deref())?;
    Ok(user.into())
}

fn end_session(state: &AppState, user: Option<&CurrentUser>) -> AppResult<()> {
    if let Some(user) = user {
        let conn = state.db.get()?;
        delete_session(&conn, &user.token)?;
    }
    Ok(())
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Create an event. The caller becomes its organizer.
    async fn create_event(&self, ctx: &Context<'_>, input: CreateEventInput) -> Result<EventView> {
        new_event(app_state(ctx)?, viewer(ctx)?, input).rpc()
    }

    /// Join an event. Joining twice is harmless.
    async fn join_event(&self, ctx: &Context<'_>, event_id: String) -> Result<EventView> {
        join(app_state(ctx)?, viewer(ctx)?, &event_id).rpc()
    }

    /// Flip the caller's like on a photo.
    async fn toggle_like(&self, ctx: &Context<'_>, photo_id: String) -> Result<LikeResult> {
        like(app_state(ctx)?, viewer(ctx)?, &photo_id, None).rpc()
    }

    /// Set the caller's like on a photo.
    async fn set_like(&self, ctx: &Context<'_>, photo_id: String, liked: bool) -> Result<LikeResult> {
        like(app_state(ctx)?, viewer(ctx)?, &photo_id, Some(liked)).rpc()
    }

    async fn delete_photo(&self, ctx: &Context<'_>, photo_id: String) -> Result<DeletedPhoto> {
        remove_photo(app_state(ctx)?, viewer(ctx)?, &photo_id)
            .await
            .rpc()
    }

    async fn moderate_photo(
        &self,
        ctx: &Context<'_>,
        photo_id: String,
        status: ModerationStatusKind,
    ) -> Result<PhotoView> {
        moderate(app_state(ctx)?, viewer(ctx)?, &photo_id, status.into())
            .await
            .rpc()
    }

    /// Sign in with email and password.
    async fn login(&self, ctx: &Context<'_>, input: LoginInput) -> Result<AuthPayload> {
        let state = app_state(ctx)?;
        let (payload, cookie) = match sign_in(state, input).await {
            Ok(signed_in) => signed_in,
            Err(AppError::Unauthorized) => {
                return Err(Error::new("Invalid email or password")
                    .extend_with(|_, e| e.set("code", AppError::Unauthorized.code())));
            }
            Err(e) => return Err(e.extend()),
        };
        set_cookie(ctx, cookie);
        Ok(payload)
    }

    /// Create an account and sign in.
    async fn create_profile(&self, ctx: &Context<'_>, input: CreateProfileInput) -> Result<AuthPayload> {
        let state = app_state(ctx)?;
        let (payload, cookie) = sign_up(state, input).await.rpc()?;
        set_cookie(ctx, cookie);
        Ok(payload)
    }

    async fn update_profile(&self, ctx: &Context<'_>, input: UpdateProfileInput) -> Result<UserView> {
        edit_profile(app_state(ctx)?, viewer(ctx)?, input).rpc()
    }

    async fn logout(&self, ctx: &Context<'_>) -> Result<bool> {
        let state = app_state(ctx)?;
        end_session(state, crate::rpc::maybe_viewer(ctx)).rpc()?;
        set_cookie(ctx, clear_session_cookie(&state.config.auth));
        Ok(true)
    }
}
