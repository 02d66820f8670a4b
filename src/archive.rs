//! Default archive sink.
//!
//! Archive requests persist their response body to a file under the storage
//! directory. The returned path becomes the `ArchiveResponse`'s `file_url`
//! and is handed to the continuation.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// File extension for a file-type hint.
fn extension_for(expected_type: Option<&str>) -> &'static str {
    match expected_type {
        Some("pdf") => ".pdf",
        Some("audio") => ".mp3",
        _ => "",
    }
}

/// Pick a filename for an archived body: the last URL path segment when one
/// exists, otherwise a name synthesized from the URL hash and type hint.
pub fn archive_filename(url: &str, expected_type: Option<&str>) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
        {
            return segment.to_string();
        }
    }
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("download_{digest}{}", extension_for(expected_type))
}

/// Write bytes under the storage directory and return the absolute path.
pub fn default_archive_sink(
    bytes: &[u8],
    url: &str,
    expected_type: Option<&str>,
    storage_dir: &Path,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(storage_dir)?;
    let path = storage_dir.join(archive_filename(url, expected_type));
    std::fs::write(&path, bytes)?;
    Ok(std::fs::canonicalize(&path).unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_path_segment() {
        assert_eq!(
            archive_filename("https://example.com/files/brief.pdf", None),
            "brief.pdf"
        );
    }

    #[test]
    fn test_filename_synthesized_for_bare_host() {
        let name = archive_filename("https://example.com/", Some("pdf"));
        assert!(name.starts_with("download_"));
        assert!(name.ends_with(".pdf"));

        let audio = archive_filename("https://example.com/", Some("audio"));
        assert!(audio.ends_with(".mp3"));

        let plain = archive_filename("https://example.com/", None);
        assert!(plain.starts_with("download_"));
        assert!(!plain.contains('.'));
    }

    #[test]
    fn test_sink_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = default_archive_sink(
            b"PDF-BYTES",
            "https://example.com/files/brief.pdf",
            Some("pdf"),
            dir.path(),
        )
        .unwrap();

        assert!(path.is_absolute());
        assert_eq!(path.file_name().unwrap(), "brief.pdf");
        assert_eq!(std::fs::read(&path).unwrap(), b"PDF-BYTES");
    }
}
