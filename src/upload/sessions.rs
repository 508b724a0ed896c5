use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::{AppError, AppResult};

/// Server-side state of one resumable upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: String,
    pub event_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub size: u64,
    /// Bytes received so far; the next chunk must start here.
    pub received: u64,
    pub path: PathBuf,
    pub expires_at: Instant,
    /// A chunk write or ingest is in flight.
    pub busy: bool,
}

impl UploadSession {
    pub fn is_complete(&self) -> bool {
        self.received == self.size
    }
}

/// In-memory registry of upload sessions. Chunk data lives in one temp file
/// per session under `dir`.
pub struct UploadSessionStore {
    dir: PathBuf,
    ttl: Duration,
    sessions: HashMap<String, UploadSession>,
}

impl UploadSessionStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            sessions: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn create(&mut self, event_id: &str, owner_id: &str, file_name: &str, size: u64) -> UploadSession {
        let id = uuid::Uuid::now_v7().to_string();
        let session = UploadSession {
            path: self.dir.join(format!("{}.part", id)),
            id: id.clone(),
            event_id: event_id.to_string(),
            owner_id: owner_id.to_string(),
            file_name: file_name.to_string(),
            size,
            received: 0,
            expires_at: Instant::now() + self.ttl,
            busy: false,
        };

        tracing::debug!(
            "Upload session {} opened by {} for event {} ({} bytes)",
            id,
            owner_id,
            event_id,
            size
        );
        self.sessions.insert(id, session.clone());
        session
    }

    fn live(&mut self, id: &str, owner_id: &str) -> AppResult<&mut UploadSession> {
        let expired = match self.sessions.get(id) {
            None => return Err(AppError::NotFound),
            Some(session) => Instant::now() >= session.expires_at,
        };
        if expired {
            // Leave the temp file for clear_stale to report.
            return Err(AppError::NotFound);
        }

        let session = self.sessions.get_mut(id).ok_or(AppError::NotFound)?;
        if session.owner_id != owner_id {
            return Err(AppError::Forbidden);
        }
        Ok(session)
    }

    pub fn get(&mut self, id: &str, owner_id: &str) -> AppResult<UploadSession> {
        self.live(id, owner_id).map(|s| s.clone())
    }

    /// Validate a chunk and claim the session for writing it. Only one
    /// request may write to or complete a session at a time; the claim is
    /// dropped by [`advance`](Self::advance) or [`release`](Self::release).
    pub fn reserve_chunk(
        &mut self,
        id: &str,
        owner_id: &str,
        offset: u64,
        len: u64,
        max_chunk: u64,
    ) -> AppResult<UploadSession> {
        let session = self.live(id, owner_id)?;

        if session.busy {
            return Err(busy_conflict());
        }
        if offset != session.received {
            return Err(AppError::Conflict(format!(
                "Expected chunk at offset {}",
                session.received
            )));
        }
        if len == 0 {
            return Err(AppError::BadRequest("Empty chunk".into()));
        }
        if len > max_chunk {
            return Err(AppError::BadRequest(format!(
                "Chunk exceeds {} bytes",
                max_chunk
            )));
        }
        if offset + len > session.size {
            return Err(AppError::BadRequest(format!(
                "Chunk runs past the declared size of {} bytes",
                session.size
            )));
        }

        session.busy = true;
        Ok(session.clone())
    }

    /// Record a written chunk, release the claim and extend the session's
    /// lifetime.
    pub fn advance(&mut self, id: &str, owner_id: &str, offset: u64, len: u64) -> AppResult<u64> {
        let ttl = self.ttl;
        let session = self.live(id, owner_id)?;

        if !session.busy || session.received != offset {
            return Err(AppError::Conflict(format!(
                "Expected chunk at offset {}",
                session.received
            )));
        }

        session.received = offset + len;
        session.busy = false;
        session.expires_at = Instant::now() + ttl;
        Ok(session.received)
    }

    /// Drop a claim without recording progress, after a failed write or a
    /// retryable ingest failure.
    pub fn release(&mut self, id: &str) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.busy = false;
        }
    }

    /// Claim a fully received session for ingestion. The session stays
    /// registered until [`finish`](Self::finish) so a failed ingest can be
    /// retried without uploading again.
    pub fn begin_complete(&mut self, id: &str, owner_id: &str) -> AppResult<UploadSession> {
        let session = self.live(id, owner_id)?;
        if session.busy {
            return Err(busy_conflict());
        }
        if !session.is_complete() {
            return Err(AppError::BadRequest(format!(
                "Upload is incomplete: {} of {} bytes received",
                session.received, session.size
            )));
        }
        session.busy = true;
        Ok(session.clone())
    }

    pub fn finish(&mut self, id: &str) -> Option<UploadSession> {
        self.sessions.remove(id)
    }

    pub fn cancel(&mut self, id: &str, owner_id: &str) -> AppResult<UploadSession> {
        if self.live(id, owner_id)?.busy {
            return Err(busy_conflict());
        }
        self.sessions.remove(id).ok_or(AppError::NotFound)
    }

    /// Drop expired sessions and return them so their temp files can be
    /// removed. Sessions with a write or ingest in flight are kept.
    pub fn clear_stale(&mut self) -> Vec<UploadSession> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| now >= s.expires_at && !s.busy)
            .map(|s| s.id.clone())
            .collect();

        let removed: Vec<UploadSession> = stale
            .iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect();
        if !removed.is_empty() {
            tracing::info!("Expired {} upload sessions", removed.len());
        }
        removed
    }
}

fn busy_conflict() -> AppError {
    AppError::Conflict("Another request for this upload is in progress".into())
}

/// Write `data` into the session file at `offset`.
pub async fn write_chunk(path: &Path, offset: u64, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

/// Best-effort removal of session temp files.
pub async fn remove_files(sessions: &[UploadSession]) {
    for session in sessions {
        match tokio::fs::remove_file(&session.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", session.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store() -> UploadSessionStore {
        UploadSessionStore::new("/tmp/eventroll-sessions", HOUR)
    }

    #[test]
    fn chunks_must_arrive_in_order() {
        let mut store = store();
        let session = store.create("e1", "gus", "IMG_0001.jpg", 10);

        let err = store.reserve_chunk(&session.id, "gus", 4, 4, 8).unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("offset 0")));

        store.reserve_chunk(&session.id, "gus", 0, 4, 8).unwrap();
        assert_eq!(store.advance(&session.id, "gus", 0, 4).unwrap(), 4);

        // A replay of the first chunk is told where to resume.
        let err = store.reserve_chunk(&session.id, "gus", 0, 4, 8).unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("offset 4")));
    }

    #[test]
    fn chunk_bounds_are_enforced() {
        let mut store = store();
        let session = store.create("e1", "gus", "a.jpg", 10);

        assert!(matches!(
            store.reserve_chunk(&session.id, "gus", 0, 11, 16),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            store.reserve_chunk(&session.id, "gus", 0, 9, 8),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            store.reserve_chunk(&session.id, "gus", 0, 0, 8),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn only_one_writer_per_session() {
        let mut store = store();
        let session = store.create("e1", "gus", "a.jpg", 10);

        store.reserve_chunk(&session.id, "gus", 0, 4, 8).unwrap();
        // A second request for the same offset is turned away before writing.
        let err = store.reserve_chunk(&session.id, "gus", 0, 4, 8).unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("in progress")));
        assert!(matches!(store.cancel(&session.id, "gus"), Err(AppError::Conflict(_))));

        // A failed write gives the offset back.
        store.release(&session.id);
        store.reserve_chunk(&session.id, "gus", 0, 4, 8).unwrap();
        assert_eq!(store.advance(&session.id, "gus", 0, 4).unwrap(), 4);
        assert!(matches!(
            store.advance(&session.id, "gus", 4, 4),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn completion_keeps_the_session_until_finished() {
        let mut store = store();
        let session = store.create("e1", "gus", "a.jpg", 6);
        store.reserve_chunk(&session.id, "gus", 0, 4, 8).unwrap();
        store.advance(&session.id, "gus", 0, 4).unwrap();

        assert!(matches!(
            store.begin_complete(&session.id, "gus"),
            Err(AppError::BadRequest(_))
        ));

        store.reserve_chunk(&session.id, "gus", 4, 2, 8).unwrap();
        store.advance(&session.id, "gus", 4, 2).unwrap();
        let done = store.begin_complete(&session.id, "gus").unwrap();
        assert!(done.is_complete());
        assert!(matches!(
            store.begin_complete(&session.id, "gus"),
            Err(AppError::Conflict(_))
        ));

        // A retryable failure leaves the session ready for another attempt.
        store.release(&session.id);
        store.begin_complete(&session.id, "gus").unwrap();
        assert!(store.finish(&session.id).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_belong_to_their_owner() {
        let mut store = store();
        let session = store.create("e1", "gus", "a.jpg", 6);

        assert!(matches!(store.get(&session.id, "hal"), Err(AppError::Forbidden)));
        assert!(matches!(store.cancel(&session.id, "hal"), Err(AppError::Forbidden)));
        assert!(store.cancel(&session.id, "gus").is_ok());
        assert!(matches!(store.get(&session.id, "gus"), Err(AppError::NotFound)));
    }

    #[test]
    fn expired_sessions_are_not_found_and_cleared() {
        let mut store = UploadSessionStore::new("/tmp/eventroll-sessions", Duration::ZERO);
        let session = store.create("e1", "gus", "a.jpg", 6);

        assert!(matches!(store.get(&session.id, "gus"), Err(AppError::NotFound)));
        let stale = store.clear_stale();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, session.id);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn chunks_are_written_at_their_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("upload.part");

        write_chunk(&path, 0, b"hello ").await.unwrap();
        write_chunk(&path, 6, b"world").await.unwrap();
        // A retried chunk rewrites the same bytes.
        write_chunk(&path, 0, b"hello ").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn remove_files_tolerates_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = UploadSessionStore::new(tmp.path(), HOUR);
        let written = store.create("e1", "gus", "a.jpg", 3);
        let never_written = store.create("e1", "gus", "b.jpg", 3);
        write_chunk(&written.path, 0, b"abc").await.unwrap();

        remove_files(&[written.clone(), never_written]).await;
        assert!(!written.path.exists());
    }
}
