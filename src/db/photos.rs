use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;

use crate::db::models::{ModerationStatus, Photo, Role};
use crate::db::{format_timestamp, parse_timestamp, write_transaction};
use crate::error::{AppError, AppResult};

const PHOTO_COLUMNS: &str = "p.id, p.event_id, p.uploader_id, u.display_name, p.original_path, \
     p.medium_path, p.thumbnail_path, p.width, p.height, p.size_bytes, p.like_count, \
     p.moderation_status, p.created_at";

#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: String,
    pub event_id: String,
    pub uploader_id: String,
    pub original_path: String,
    pub medium_path: String,
    pub thumbnail_path: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: i64,
    pub moderation_status: ModerationStatus,
    pub created_at: DateTime<Utc>,
}

/// One page of a gallery. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone)]
pub struct PhotoPage {
    pub items: Vec<Photo>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub like_count: i64,
    pub liked: bool,
}

fn row_to_photo(row: &rusqlite::Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get(0)?,
        event_id: row.get(1)?,
        uploader_id: row.get(2)?,
        uploader_name: row.get(3)?,
        original_path: row.get(4)?,
        medium_path: row.get(5)?,
        thumbnail_path: row.get(6)?,
        width: row.get(7)?,
        height: row.get(8)?,
        size_bytes: row.get(9)?,
        like_count: row.get(10)?,
        moderation_status: ModerationStatus::parse(&row.get::<_, String>(11)?),
        created_at: parse_timestamp(&row.get::<_, String>(12)?),
    })
}

/// Record an uploaded photo and bump the event and uploader counters.
pub fn insert_photo(conn: &mut Connection, new: &NewPhoto) -> AppResult<Photo> {
    let tx = write_transaction(conn)?;

    tx.execute(
        "INSERT INTO photos (id, event_id, uploader_id, original_path, medium_path,
                             thumbnail_path, width, height, size_bytes, like_count,
                             moderation_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)",
        params![
            new.id,
            new.event_id,
            new.uploader_id,
            new.original_path,
            new.medium_path,
            new.thumbnail_path,
            new.width,
            new.height,
            new.size_bytes,
            new.moderation_status.as_str(),
            format_timestamp(&new.created_at),
        ],
    )?;
    tx.execute(
        "UPDATE events SET photo_count = photo_count + 1 WHERE id = ?1",
        params![new.event_id],
    )?;
    let participant_rows = tx.execute(
        "UPDATE participants SET photo_count = photo_count + 1
         WHERE event_id = ?1 AND user_id = ?2",
        params![new.event_id, new.uploader_id],
    )?;
    if participant_rows == 0 {
        return Err(AppError::Forbidden);
    }

    let photo = get_photo(&tx, &new.id)?;
    tx.commit()?;
    Ok(photo)
}

pub fn get_photo(conn: &Connection, id: &str) -> AppResult<Photo> {
    conn.query_row(
        &format!(
            "SELECT {} FROM photos p JOIN users u ON u.id = p.uploader_id WHERE p.id = ?1",
            PHOTO_COLUMNS
        ),
        params![id],
        row_to_photo,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

/// Load a photo for a member of its event. Non-members get `Forbidden`;
/// photos the viewer may not see yet are reported as missing.
pub fn require_visible_photo(conn: &Connection, photo_id: &str, user_id: &str) -> AppResult<(Photo, Role)> {
    let photo = get_photo(conn, photo_id)?;
    let role = crate::db::events::participant_role(conn, &photo.event_id, user_id)?
        .ok_or(AppError::Forbidden)?;
    if !photo.visible_to(user_id, role) {
        return Err(AppError::NotFound);
    }
    Ok((photo, role))
}

/// Newest-first page of the photos `viewer_id` may see. The cursor is the id
/// of the last photo already delivered; the page starts strictly after it in
/// `(created_at DESC, id DESC)` order, so ties on timestamp never repeat or
/// skip a photo.
pub fn page_photos(
    conn: &Connection,
    event_id: &str,
    viewer_id: &str,
    viewer_role: Role,
    cursor: Option<&str>,
    limit: u32,
) -> AppResult<PhotoPage> {
    let anchor: Option<(String, String)> = match cursor {
        Some(cursor_id) => Some(
            conn.query_row(
                "SELECT created_at, id FROM photos WHERE id = ?1 AND event_id = ?2",
                params![cursor_id, event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| AppError::BadRequest("Invalid cursor".into()))?,
        ),
        None => None,
    };
    let (anchor_at, anchor_id) = match anchor {
        Some((at, id)) => (Some(at), Some(id)),
        None => (None, None),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM photos p
         JOIN users u ON u.id = p.uploader_id
         WHERE p.event_id = ?1
           AND (?2 OR p.moderation_status = 'approved' OR p.uploader_id = ?3)
           AND (?4 IS NULL OR p.created_at < ?4 OR (p.created_at = ?4 AND p.id < ?5))
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT ?6",
        PHOTO_COLUMNS
    ))?;

    let mut items = stmt
        .query_map(
            params![
                event_id,
                viewer_role == Role::Organizer,
                viewer_id,
                anchor_at,
                anchor_id,
                i64::from(limit) + 1,
            ],
            row_to_photo,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let next_cursor = if items.len() > limit as usize {
        items.truncate(limit as usize);
        items.last().map(|p| p.id.clone())
    } else {
        None
    };

    Ok(PhotoPage { items, next_cursor })
}

/// Which of `photo_ids` the user has liked.
pub fn liked_photo_ids(conn: &Connection, user_id: &str, photo_ids: &[String]) -> AppResult<HashSet<String>> {
    if photo_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let placeholders = vec!["?"; photo_ids.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT photo_id FROM photo_likes WHERE user_id = ? AND photo_id IN ({})",
        placeholders
    ))?;

    let values = std::iter::once(user_id).chain(photo_ids.iter().map(String::as_str));
    let liked = stmt
        .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;

    Ok(liked)
}

fn apply_like(tx: &Connection, photo_id: &str, user_id: &str, liked: bool) -> AppResult<LikeState> {
    if liked {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO photo_likes (photo_id, user_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![photo_id, user_id, crate::db::now_timestamp()],
        )?;
        if inserted == 1 {
            tx.execute(
                "UPDATE photos SET like_count = like_count + 1 WHERE id = ?1",
                params![photo_id],
            )?;
        }
    } else {
        let removed = tx.execute(
            "DELETE FROM photo_likes WHERE photo_id = ?1 AND user_id = ?2",
            params![photo_id, user_id],
        )?;
        if removed == 1 {
            tx.execute(
                "UPDATE photos SET like_count = MAX(like_count - 1, 0) WHERE id = ?1",
                params![photo_id],
            )?;
        }
    }

    let like_count: i64 = tx.query_row(
        "SELECT like_count FROM photos WHERE id = ?1",
        params![photo_id],
        |row| row.get(0),
    )?;
    Ok(LikeState { like_count, liked })
}

/// Set the user's like on a photo. Setting the same value twice is a no-op.
pub fn set_like(conn: &mut Connection, photo_id: &str, user_id: &str, liked: bool) -> AppResult<LikeState> {
    let tx = write_transaction(conn)?;
    get_photo(&tx, photo_id)?;
    let state = apply_like(&tx, photo_id, user_id, liked)?;
    tx.commit()?;
    Ok(state)
}

/// Flip the user's like on a photo.
pub fn toggle_like(conn: &mut Connection, photo_id: &str, user_id: &str) -> AppResult<LikeState> {
    let tx = write_transaction(conn)?;
    get_photo(&tx, photo_id)?;
    let currently_liked: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM photo_likes WHERE photo_id = ?1 AND user_id = ?2",
        params![photo_id, user_id],
        |row| row.get(0),
    )?;
    let state = apply_like(&tx, photo_id, user_id, !currently_liked)?;
    tx.commit()?;
    Ok(state)
}

/// Remove a photo and its likes, decrementing the event and uploader
/// counters. Returns the removed row so the caller can drop its blobs.
pub fn delete_photo(conn: &mut Connection, photo_id: &str) -> AppResult<Photo> {
    let tx = write_transaction(conn)?;
    let photo = get_photo(&tx, photo_id)?;

    tx.execute("DELETE FROM photo_likes WHERE photo_id = ?1", params![photo_id])?;
    tx.execute("DELETE FROM photos WHERE id = ?1", params![photo_id])?;
    tx.execute(
        "UPDATE events SET photo_count = MAX(photo_count - 1, 0) WHERE id = ?1",
        params![photo.event_id],
    )?;
    tx.execute(
        "UPDATE participants SET photo_count = MAX(photo_count - 1, 0)
         WHERE event_id = ?1 AND user_id = ?2",
        params![photo.event_id, photo.uploader_id],
    )?;

    tx.commit()?;
    tracing::info!("Photo {} removed from event {}", photo.id, photo.event_id);
    Ok(photo)
}

pub fn set_moderation_status(conn: &Connection, photo_id: &str, status: ModerationStatus) -> AppResult<Photo> {
    let rows = conn.execute(
        "UPDATE photos SET moderation_status = ?2 WHERE id = ?1",
        params![photo_id, status.as_str()],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    get_photo(conn, photo_id)
}

/// Approved photos of an event, oldest first.
pub fn approved_photos(conn: &Connection, event_id: &str) -> AppResult<Vec<Photo>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM photos p
         JOIN users u ON u.id = p.uploader_id
         WHERE p.event_id = ?1 AND p.moderation_status = 'approved'
         ORDER BY p.created_at ASC, p.id ASC",
        PHOTO_COLUMNS
    ))?;

    let photos = stmt
        .query_map(params![event_id], row_to_photo)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(photos)
}
