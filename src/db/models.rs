use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Organizer,
    Participant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Organizer => "organizer",
            Role::Participant => "participant",
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "organizer" => Role::Organizer,
            _ => Role::Participant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationSettings {
    /// Photos from non-organizers wait for approval before others see them.
    pub require_approval: bool,
    /// Participants may download the event archive.
    pub allow_downloads: bool,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            require_approval: false,
            allow_downloads: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Active,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    /// Blob path of the cover image.
    pub cover_image: Option<String>,
    pub organizer_id: String,
    pub photo_count: i64,
    pub participant_count: i64,
    pub moderation: ModerationSettings,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn status_at(&self, now: DateTime<Utc>) -> EventStatus {
        if now < self.date {
            EventStatus::Upcoming
        } else if self.end_date.map(|end| now > end).unwrap_or(false) {
            EventStatus::Ended
        } else {
            EventStatus::Active
        }
    }

    pub fn status(&self) -> EventStatus {
        self.status_at(Utc::now())
    }

    pub fn accepts_uploads(&self) -> bool {
        self.status() != EventStatus::Ended
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub event_id: String,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    pub photo_count: i64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Approved,
    Pending,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Approved => "approved",
            ModerationStatus::Pending => "pending",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> ModerationStatus {
        match s {
            "pending" => ModerationStatus::Pending,
            "rejected" => ModerationStatus::Rejected,
            _ => ModerationStatus::Approved,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub event_id: String,
    pub uploader_id: String,
    pub uploader_name: String,
    pub original_path: String,
    pub medium_path: String,
    pub thumbnail_path: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: i64,
    pub like_count: i64,
    pub moderation_status: ModerationStatus,
    pub created_at: DateTime<Utc>,
}

impl Photo {
    /// Whether `viewer` may see this photo given their role in the event.
    pub fn visible_to(&self, viewer_id: &str, viewer_role: Role) -> bool {
        viewer_role == Role::Organizer
            || self.moderation_status == ModerationStatus::Approved
            || self.uploader_id == viewer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event_with(date: DateTime<Utc>, end_date: Option<DateTime<Utc>>) -> Event {
        Event {
            id: "e".into(),
            name: "Party".into(),
            description: None,
            date,
            end_date,
            cover_image: None,
            organizer_id: "o".into(),
            photo_count: 0,
            participant_count: 1,
            moderation: ModerationSettings::default(),
            created_at: date,
        }
    }

    #[test]
    fn status_follows_the_clock() {
        let now = Utc::now();
        let event = event_with(now - Duration::hours(2), Some(now + Duration::hours(2)));
        assert_eq!(event.status_at(now), EventStatus::Active);
        assert_eq!(event.status_at(now - Duration::hours(3)), EventStatus::Upcoming);
        assert_eq!(event.status_at(now + Duration::hours(3)), EventStatus::Ended);
    }

    #[test]
    fn open_ended_event_never_ends() {
        let now = Utc::now();
        let event = event_with(now - Duration::days(400), None);
        assert_eq!(event.status_at(now), EventStatus::Active);
        assert!(event.accepts_uploads());
    }

    #[test]
    fn role_and_status_round_trip_through_strings() {
        assert_eq!(Role::parse(Role::Organizer.as_str()), Role::Organizer);
        assert_eq!(Role::parse("participant"), Role::Participant);
        assert_eq!(
            ModerationStatus::parse(ModerationStatus::Pending.as_str()),
            ModerationStatus::Pending
        );
    }

    #[test]
    fn pending_photo_hidden_from_other_participants() {
        let photo = Photo {
            id: "p".into(),
            event_id: "e".into(),
            uploader_id: "alice".into(),
            uploader_name: "Alice".into(),
            original_path: String::new(),
            medium_path: String::new(),
            thumbnail_path: String::new(),
            width: 1,
            height: 1,
            size_bytes: 1,
            like_count: 0,
            moderation_status: ModerationStatus::Pending,
            created_at: Utc::now(),
        };
        assert!(photo.visible_to("alice", Role::Participant));
        assert!(photo.visible_to("olga", Role::Organizer));
        assert!(!photo.visible_to("bob", Role::Participant));
    }
}
