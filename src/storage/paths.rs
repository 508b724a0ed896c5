//! Blob layout:
//!
//! ```text
//! events/{event}/cover.webp
//! events/{event}/photos/{photo}/original.jpg
//! events/{event}/photos/{photo}/medium.jpg
//! events/{event}/photos/{photo}/thumbnail.jpg
//! events/{event}/archive/photos.zip
//! ```

pub fn event_prefix(event_id: &str) -> String {
    format!("events/{}", event_id)
}

pub fn cover(event_id: &str) -> String {
    format!("events/{}/cover.webp", event_id)
}

pub fn photo_original(event_id: &str, photo_id: &str) -> String {
    format!("events/{}/photos/{}/original.jpg", event_id, photo_id)
}

pub fn photo_medium(event_id: &str, photo_id: &str) -> String {
    format!("events/{}/photos/{}/medium.jpg", event_id, photo_id)
}

pub fn photo_thumbnail(event_id: &str, photo_id: &str) -> String {
    format!("events/{}/photos/{}/thumbnail.jpg", event_id, photo_id)
}

pub fn archive(event_id: &str) -> String {
    format!("events/{}/archive/photos.zip", event_id)
}

/// What a blob key refers to, as far as access control cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobKind<'a> {
    Cover { event_id: &'a str },
    Photo { event_id: &'a str, photo_id: &'a str },
    Archive { event_id: &'a str },
    Unknown,
}

pub fn classify(key: &str) -> BlobKind<'_> {
    let segments: Vec<&str> = key.split('/').collect();
    match segments[..] {
        ["events", event_id, "cover.webp"] => BlobKind::Cover { event_id },
        ["events", event_id, "photos", photo_id, _] => BlobKind::Photo { event_id, photo_id },
        ["events", event_id, "archive", _] => BlobKind::Archive { event_id },
        _ => BlobKind::Unknown,
    }
}
