use async_graphql::{Enum, InputObject, SimpleObject};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::db::models::{self, Event, Participant, Photo, User};
use crate::db::photos::{LikeState, PhotoPage};

/// Role of a user within one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Enum)]
#[graphql(name = "Role", remote = "crate::db::models::Role")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleKind {
    Organizer,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Enum)]
#[graphql(name = "EventStatus", remote = "crate::db::models::EventStatus")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatusKind {
    Upcoming,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Enum)]
#[graphql(name = "ModerationStatus", remote = "crate::db::models::ModerationStatus")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationStatusKind {
    Approved,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
#[graphql(name = "User")]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            photo_url: user.photo_url,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
#[graphql(name = "Event")]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub cover_image_url: Option<String>,
    pub organizer_id: String,
    pub photo_count: i64,
    pub participant_count: i64,
    pub require_approval: bool,
    pub allow_downloads: bool,
    pub status: EventStatusKind,
    /// The caller's role, or null when they have not joined.
    pub viewer_role: Option<RoleKind>,
    pub created_at: DateTime<Utc>,
}

impl EventView {
    pub fn new(event: Event, config: &Config, viewer_role: Option<models::Role>) -> Self {
        Self {
            status: event.status().into(),
            cover_image_url: event.cover_image.as_deref().map(|p| config.media_url(p)),
            id: event.id,
            name: event.name,
            description: event.description,
            date: event.date,
            end_date: event.end_date,
            organizer_id: event.organizer_id,
            photo_count: event.photo_count,
            participant_count: event.participant_count,
            require_approval: event.moderation.require_approval,
            allow_downloads: event.moderation.allow_downloads,
            viewer_role: viewer_role.map(Into::into),
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
#[graphql(name = "Photo")]
#[serde(rename_all = "camelCase")]
pub struct PhotoView {
    pub id: String,
    pub event_id: String,
    pub uploader_id: String,
    pub uploader_name: String,
    pub url: String,
    pub medium_url: String,
    pub thumbnail_url: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: i64,
    pub like_count: i64,
    pub liked_by_me: bool,
    pub moderation_status: ModerationStatusKind,
    pub created_at: DateTime<Utc>,
}

impl PhotoView {
    pub fn new(photo: Photo, config: &Config, liked_by_me: bool) -> Self {
        Self {
            url: config.media_url(&photo.original_path),
            medium_url: config.media_url(&photo.medium_path),
            thumbnail_url: config.media_url(&photo.thumbnail_path),
            moderation_status: photo.moderation_status.into(),
            id: photo.id,
            event_id: photo.event_id,
            uploader_id: photo.uploader_id,
            uploader_name: photo.uploader_name,
            width: photo.width,
            height: photo.height,
            size_bytes: photo.size_bytes,
            like_count: photo.like_count,
            liked_by_me,
            created_at: photo.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
#[graphql(name = "PhotoPage")]
#[serde(rename_all = "camelCase")]
pub struct PhotoPageView {
    pub items: Vec<PhotoView>,
    /// Pass back as `cursor` to fetch the next page; null on the last page.
    pub next_cursor: Option<String>,
}

impl PhotoPageView {
    pub fn new(page: PhotoPage, config: &Config, liked: &std::collections::HashSet<String>) -> Self {
        Self {
            items: page
                .items
                .into_iter()
                .map(|photo| {
                    let liked_by_me = liked.contains(&photo.id);
                    PhotoView::new(photo, config, liked_by_me)
                })
                .collect(),
            next_cursor: page.next_cursor,
        }
    }
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
#[serde(rename_all = "camelCase")]
pub struct LikeResult {
    pub photo_id: String,
    pub like_count: i64,
    pub liked: bool,
}

impl LikeResult {
    pub fn new(photo_id: &str, state: LikeState) -> Self {
        Self {
            photo_id: photo_id.to_string(),
            like_count: state.like_count,
            liked: state.liked,
        }
    }
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
#[graphql(name = "Participant")]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: String,
    pub display_name: String,
    pub role: RoleKind,
    pub photo_count: i64,
    pub joined_at: DateTime<Utc>,
}

impl From<Participant> for ParticipantView {
    fn from(p: Participant) -> Self {
        Self {
            user_id: p.user_id,
            display_name: p.display_name,
            role: p.role.into(),
            photo_count: p.photo_count,
            joined_at: p.joined_at,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
pub struct AuthPayload {
    pub user: UserView,
    /// Session token, for clients that cannot hold cookies.
    pub token: String,
    pub expires_in_days: u64,
}

#[derive(Debug, Clone, SimpleObject)]
pub struct DeletedPhoto {
    pub id: String,
    pub event_id: String,
}

#[derive(Debug, InputObject)]
pub struct CreateEventInput {
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    /// Defaults to false.
    pub require_approval: Option<bool>,
    /// Defaults to true.
    pub allow_downloads: Option<bool>,
}

#[derive(Debug, InputObject)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, InputObject)]
pub struct CreateProfileInput {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, InputObject)]
pub struct UpdateProfileInput {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}
