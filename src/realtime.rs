//! Gallery change notifications.
//!
//! Every write that changes what a gallery shows publishes a
//! [`GalleryChange`]. Subscribers coalesce bursts of changes for one event
//! into a single [`InvalidationBatch`] so a client refetches once per burst
//! instead of once per photo.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::db::models::{ModerationStatus, Photo};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryChange {
    pub event_id: String,
    /// `None` for photos that are not yet visible to every participant.
    pub photo_id: Option<String>,
    pub kind: ChangeKind,
}

/// One debounced notification sent to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationBatch {
    pub event_id: String,
    /// Number of changes folded into this batch.
    pub changes: usize,
    /// Distinct approved photos touched, in first-seen order. Changes to
    /// photos awaiting moderation are counted but not listed.
    pub photo_ids: Vec<String>,
}

impl InvalidationBatch {
    fn record(&mut self, change: GalleryChange) {
        self.changes += 1;
        if let Some(photo_id) = change.photo_id {
            if !self.photo_ids.contains(&photo_id) {
                self.photo_ids.push(photo_id);
            }
        }
    }

    fn record_lag(&mut self, skipped: u64) {
        self.changes += skipped as usize;
    }
}

#[derive(Debug, Clone)]
pub struct GalleryNotifier {
    tx: broadcast::Sender<GalleryChange>,
}

impl Default for GalleryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl GalleryNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GalleryChange> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event_id: &str, photo_id: Option<&str>, kind: ChangeKind) {
        let change = GalleryChange {
            event_id: event_id.to_string(),
            photo_id: photo_id.map(str::to_string),
            kind,
        };
        // No subscribers is the normal idle state.
        let receivers = self.tx.send(change).unwrap_or(0);
        tracing::debug!(
            "Gallery change {:?} for event {} photo {:?} ({} subscribers)",
            kind,
            event_id,
            photo_id,
            receivers
        );
    }

    /// Publish a change to `photo`. Every subscriber of the event receives
    /// it, so unapproved photos go out without their id.
    pub fn publish_photo(&self, photo: &Photo, kind: ChangeKind) {
        let photo_id = match photo.moderation_status {
            ModerationStatus::Approved => Some(photo.id.as_str()),
            ModerationStatus::Pending | ModerationStatus::Rejected => None,
        };
        self.publish(&photo.event_id, photo_id, kind);
    }
}

/// Wait for the next change to `event_id`, then keep collecting for `window`
/// and return everything seen as one batch. Returns `None` once the channel
/// is closed and nothing is pending.
pub async fn next_invalidation(
    rx: &mut broadcast::Receiver<GalleryChange>,
    event_id: &str,
    window: Duration,
) -> Option<InvalidationBatch> {
    let mut batch = InvalidationBatch {
        event_id: event_id.to_string(),
        ..Default::default()
    };

    loop {
        match rx.recv().await {
            Ok(change) if change.event_id == event_id => {
                batch.record(change);
                break;
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Gallery subscriber lagged by {} changes", skipped);
                batch.record_lag(skipped);
                break;
            }
            Err(RecvError::Closed) => return None,
        }
    }

    tokio::time::sleep(window).await;

    loop {
        match rx.try_recv() {
            Ok(change) if change.event_id == event_id => batch.record(change),
            Ok(_) => {}
            Err(TryRecvError::Lagged(skipped)) => batch.record_lag(skipped),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    Some(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn burst_is_coalesced_into_one_batch() {
        let notifier = GalleryNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish("e1", Some("p1"), ChangeKind::Added);
        notifier.publish("e1", Some("p2"), ChangeKind::Added);
        notifier.publish("e1", Some("p1"), ChangeKind::Updated);

        let batch = next_invalidation(&mut rx, "e1", WINDOW).await.unwrap();
        assert_eq!(batch.changes, 3);
        assert_eq!(batch.photo_ids, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let notifier = GalleryNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish("other", Some("x"), ChangeKind::Added);
        notifier.publish("e1", Some("p1"), ChangeKind::Removed);
        notifier.publish("other", Some("y"), ChangeKind::Added);

        let batch = next_invalidation(&mut rx, "e1", WINDOW).await.unwrap();
        assert_eq!(batch.changes, 1);
        assert_eq!(batch.photo_ids, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn changes_during_window_are_included() {
        let notifier = GalleryNotifier::new();
        let mut rx = notifier.subscribe();
        let publisher = notifier.clone();

        notifier.publish("e1", Some("p1"), ChangeKind::Added);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            publisher.publish("e1", Some("p2"), ChangeKind::Added);
        });

        let batch = next_invalidation(&mut rx, "e1", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(batch.changes, 2);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_stream() {
        let notifier = GalleryNotifier::new();
        let mut rx = notifier.subscribe();
        drop(notifier);
        assert!(next_invalidation(&mut rx, "e1", WINDOW).await.is_none());
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let notifier = GalleryNotifier::new();
        notifier.publish("e1", Some("p1"), ChangeKind::Added);
    }

    fn photo(id: &str, status: ModerationStatus) -> Photo {
        Photo {
            id: id.to_string(),
            event_id: "e1".to_string(),
            uploader_id: "gus".to_string(),
            uploader_name: "Gus".to_string(),
            original_path: String::new(),
            medium_path: String::new(),
            thumbnail_path: String::new(),
            width: 1,
            height: 1,
            size_bytes: 1,
            like_count: 0,
            moderation_status: status,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn unapproved_photos_are_counted_but_not_named() {
        let notifier = GalleryNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish_photo(&photo("held", ModerationStatus::Pending), ChangeKind::Added);
        notifier.publish_photo(&photo("shown", ModerationStatus::Approved), ChangeKind::Added);
        notifier.publish_photo(&photo("hidden", ModerationStatus::Rejected), ChangeKind::Updated);

        let batch = next_invalidation(&mut rx, "e1", WINDOW).await.unwrap();
        assert_eq!(batch.changes, 3);
        assert_eq!(batch.photo_ids, vec!["shown".to_string()]);
    }
}
