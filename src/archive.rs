//! Bulk-download archives.
//!
//! Archives are written straight to disk one photo at a time, so building
//! one never holds more than a single copy buffer in memory.

use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::db::events::require_organizer;
use crate::db::photos::approved_photos;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::paths;

/// One photo going into an archive, read from `source` on disk.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub photo_id: String,
    pub source: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    pub photo_count: usize,
    pub size_bytes: u64,
}

/// Name of the `index`th entry (zero based). The numeric prefix keeps the
/// gallery order when the archive is unpacked.
pub fn entry_name(index: usize, photo_id: &str) -> String {
    format!("{:04}-{}.jpg", index + 1, photo_id)
}

fn zip_error(context: &str, e: zip::result::ZipError) -> AppError {
    AppError::Internal(format!("{}: {}", context, e))
}

/// Stream `entries` into a zip written to `out`, in the given order. JPEGs
/// are already compressed, so entries are stored as-is. Sources that no
/// longer exist are skipped. Returns the writer and the number of entries
/// written.
pub fn write_zip<W: Write + Seek>(out: W, entries: &[ArchiveEntry]) -> AppResult<(W, usize)> {
    let mut zip = ZipWriter::new(out);
    let mut written = 0;

    for entry in entries {
        let mut source = match File::open(&entry.source) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Row without a blob: leave it out rather than fail the archive.
                tracing::warn!("Photo {} has no original blob, skipping", entry.photo_id);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let len = source.metadata()?.len();
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(len >= u32::MAX as u64);

        zip.start_file(entry_name(written, &entry.photo_id), options)
            .map_err(|e| zip_error("Failed to add archive entry", e))?;
        io::copy(&mut source, &mut zip)?;
        written += 1;
    }

    let out = zip
        .finish()
        .map_err(|e| zip_error("Failed to finish archive", e))?;
    Ok((out, written))
}

/// Write the archive to a temp file beside `dest` and move it into place,
/// so a download never sees a half-written zip.
fn write_archive_file(dest: &Path, entries: &[ArchiveEntry]) -> AppResult<ArchiveSummary> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension(format!("tmp-{}", uuid::Uuid::now_v7()));

    let result = File::create(&tmp)
        .map_err(AppError::from)
        .and_then(|file| write_zip(BufWriter::new(file), entries))
        .and_then(|(writer, count)| {
            let file = writer
                .into_inner()
                .map_err(|e| AppError::Io(e.into_error()))?;
            file.sync_all()?;
            Ok((file.metadata()?.len(), count))
        });

    let (size_bytes, photo_count) = match result {
        Ok((_, 0)) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(AppError::BadRequest("There are no photos to archive yet".into()));
        }
        Ok(done) => done,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };

    std::fs::rename(&tmp, dest)?;
    Ok(ArchiveSummary {
        photo_count,
        size_bytes,
    })
}

/// Snapshot every approved original of an event into
/// `events/{id}/archive/photos.zip`. Organizer only.
pub async fn rebuild_archive(state: &AppState, event_id: &str, user_id: &str) -> AppResult<ArchiveSummary> {
    let photos = {
        let conn = state.db.get()?;
        require_organizer(&conn, event_id, user_id)?;
        approved_photos(&conn, event_id)?
    };
    if photos.is_empty() {
        return Err(AppError::BadRequest("There are no photos to archive yet".into()));
    }

    let entries = photos
        .iter()
        .map(|photo| {
            Ok(ArchiveEntry {
                photo_id: photo.id.clone(),
                source: state.blobs.path_for(&photo.original_path)?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    let dest = state.blobs.path_for(&paths::archive(event_id))?;

    let summary = tokio::task::spawn_blocking(move || write_archive_file(&dest, &entries))
        .await
        .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))??;

    tracing::info!(
        "Archive for event {} rebuilt: {} photos, {} bytes",
        event_id,
        summary.photo_count,
        summary.size_bytes
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn entry(dir: &Path, id: &str, data: &[u8]) -> ArchiveEntry {
        let source = dir.join(format!("{}.jpg", id));
        std::fs::write(&source, data).unwrap();
        ArchiveEntry {
            photo_id: id.to_string(),
            source,
        }
    }

    #[test]
    fn entries_keep_order_and_content() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = [entry(tmp.path(), "b", b"second"), entry(tmp.path(), "a", b"first")];

        let (out, count) = write_zip(Cursor::new(Vec::new()), &entries).unwrap();
        assert_eq!(count, 2);
        let mut archive = ZipArchive::new(Cursor::new(out.into_inner())).unwrap();

        assert_eq!(archive.len(), 2);
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"0001-b.jpg".to_string()));
        assert!(names.contains(&"0002-a.jpg".to_string()));

        let mut file = archive.by_name("0001-b.jpg").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Stored);
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"second");
    }

    #[test]
    fn missing_sources_are_skipped_without_gaps() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = [
            entry(tmp.path(), "a", b"first"),
            ArchiveEntry {
                photo_id: "gone".to_string(),
                source: tmp.path().join("gone.jpg"),
            },
            entry(tmp.path(), "c", b"third"),
        ];

        let (out, count) = write_zip(Cursor::new(Vec::new()), &entries).unwrap();
        assert_eq!(count, 2);
        let archive = ZipArchive::new(Cursor::new(out.into_inner())).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"0002-c.jpg".to_string()));
    }

    #[test]
    fn archive_file_is_moved_into_place() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = [entry(tmp.path(), "a", b"first")];
        let dest = tmp.path().join("events/e1/archive/photos.zip");

        let summary = write_archive_file(&dest, &entries).unwrap();
        assert_eq!(summary.photo_count, 1);
        assert_eq!(summary.size_bytes, std::fs::metadata(&dest).unwrap().len());

        let leftovers = std::fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn nothing_to_archive_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = [ArchiveEntry {
            photo_id: "gone".to_string(),
            source: tmp.path().join("gone.jpg"),
        }];
        let dest = tmp.path().join("archive/photos.zip");

        assert!(matches!(
            write_archive_file(&dest, &entries),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 0);
    }

    #[test]
    fn entry_names_are_zero_padded() {
        assert_eq!(entry_name(0, "p1"), "0001-p1.jpg");
        assert_eq!(entry_name(41, "p1"), "0042-p1.jpg");
    }
}
