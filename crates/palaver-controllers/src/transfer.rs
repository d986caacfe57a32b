//! Attachment helpers shared by the channel controller: filename to MIME
//! resolution, progress formatting, and buffered blob reads.

use bytes::{Bytes, BytesMut};

use palaver_sync::{BlobReader, SyncError, TransferStats};

/// Known filename extensions and their MIME types. Anything else is
/// treated as an opaque binary attachment.
const MIME_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("svg", "image/svg+xml"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    ("json", "application/json"),
    ("zip", "application/zip"),
    ("mp3", "audio/mpeg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

pub fn mime_for_filename(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("");
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// Renders transfer progress as a short status line for the view model.
pub fn format_transfer_stats(stats: &TransferStats) -> String {
    if stats.finished {
        return "Finished".to_string();
    }
    if stats.is_paused {
        return "Paused".to_string();
    }
    let percent = if stats.size > 0 {
        stats.pos * 100 / stats.size
    } else {
        0
    };
    format!("{}% {} kb/s", percent, stats.throughput / 1024)
}

/// Drains a blob reader into a single buffer.
pub async fn read_to_buffer(reader: &mut dyn BlobReader) -> Result<Bytes, SyncError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = reader.next_chunk().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup_is_case_insensitive() {
        assert_eq!(mime_for_filename("photo.PNG"), "image/png");
        assert_eq!(mime_for_filename("notes.txt"), "text/plain");
        assert_eq!(mime_for_filename("archive.bin"), "application/octet-stream");
        assert_eq!(mime_for_filename("no-extension"), "application/octet-stream");
    }

    #[test]
    fn test_image_detection() {
        assert!(is_image(mime_for_filename("a.webp")));
        assert!(!is_image(mime_for_filename("a.pdf")));
    }

    #[test]
    fn test_progress_formatting() {
        let stats = TransferStats {
            pos: 512,
            size: 1024,
            throughput: 2048,
            ..TransferStats::default()
        };
        assert_eq!(format_transfer_stats(&stats), "50% 2 kb/s");

        let paused = TransferStats {
            is_paused: true,
            ..stats.clone()
        };
        assert_eq!(format_transfer_stats(&paused), "Paused");

        let finished = TransferStats {
            finished: true,
            ..stats
        };
        assert_eq!(format_transfer_stats(&finished), "Finished");

        let empty = TransferStats::default();
        assert_eq!(format_transfer_stats(&empty), "0% 0 kb/s");
    }
}
