//! Filename derivation, extension mapping and exclusive file creation.

use std::io;
use std::path::Path;

use url::Url;

use crate::fetch::FileSink;

/// Stem used when the URL has no usable path segment.
pub(crate) const FALLBACK_STEM: &str = "video";

/// Collision suffixes tried before giving up on a directory.
const MAX_COLLISION_SUFFIX: u32 = 9999;

/// Maps a media type essence to a file extension (without the dot).
///
/// Returns `None` for media types a download refuses to store.
#[must_use]
pub fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    let extension = match media_type.trim().to_ascii_lowercase().as_str() {
        "image/gif" => "gif",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-flv" => "flv",
        "video/3gpp" => "3gp",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        _ => return None,
    };
    Some(extension)
}

pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Derives a filename stem from the last path segment of `url`.
///
/// The segment is percent-decoded, its extension dropped and the rest
/// sanitised. Leading and trailing dots are stripped so the stem can never
/// name a dot segment; an empty result becomes [`FALLBACK_STEM`].
pub(crate) fn stem_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    let decoded = urlencoding::decode(segment).map_or_else(|_| segment.to_string(), |d| d.into_owned());
    let without_extension = match decoded.rfind('.') {
        Some(pos) if pos > 0 => &decoded[..pos],
        _ => decoded.as_str(),
    };
    let stem = sanitize_filename_component(without_extension);
    let stem = stem.trim_matches(|c| c == '.' || c == '_');
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}

/// Returns `stem.ext` for attempt 0, `stem-N.ext` afterwards.
pub(crate) fn candidate_name(stem: &str, extension: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{stem}.{extension}")
    } else {
        format!("{stem}-{attempt}.{extension}")
    }
}

/// Creates the first free `stem[-N].ext` in `dir` with exclusive creation.
///
/// Concurrent downloads racing for the same name each get a distinct file:
/// the filesystem arbitrates through `create_new`.
///
/// # Errors
///
/// Returns the first IO error other than [`io::ErrorKind::AlreadyExists`],
/// or `AlreadyExists` once every suffix is taken.
pub(crate) async fn create_unique_file(
    dir: &Path,
    stem: &str,
    extension: &str,
) -> io::Result<FileSink> {
    for attempt in 0..=MAX_COLLISION_SUFFIX {
        let path = dir.join(candidate_name(stem, extension, attempt));
        match FileSink::create_new(&path).await {
            Ok(sink) => return Ok(sink),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {stem}.{extension} in {}", dir.display()),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(value: &str) -> Url {
        Url::parse(value).unwrap()
    }

    #[test]
    fn test_extension_for_media_type_known_images() {
        assert_eq!(extension_for_media_type("image/gif"), Some("gif"));
        assert_eq!(extension_for_media_type("image/png"), Some("png"));
        assert_eq!(extension_for_media_type("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for_media_type("Image/PNG"), Some("png"));
    }

    #[test]
    fn test_extension_for_media_type_video_types() {
        assert_eq!(extension_for_media_type("video/mp4"), Some("mp4"));
        assert_eq!(extension_for_media_type("video/webm"), Some("webm"));
        assert_eq!(extension_for_media_type("video/x-flv"), Some("flv"));
        assert_eq!(extension_for_media_type("video/quicktime"), Some("mov"));
    }

    #[test]
    fn test_extension_for_media_type_rejects_unknown() {
        assert_eq!(extension_for_media_type("text/html"), None);
        assert_eq!(extension_for_media_type("application/octet-stream"), None);
        assert_eq!(extension_for_media_type(""), None);
    }

    #[test]
    fn test_sanitize_filename_component_collapses_separators() {
        assert_eq!(sanitize_filename_component("my  clip: part*1"), "my_clip_part_1");
        assert_eq!(sanitize_filename_component("__a__"), "a");
        assert_eq!(sanitize_filename_component("a\\b/c"), "a_b_c");
    }

    #[test]
    fn test_stem_from_url_drops_extension_and_decodes() {
        assert_eq!(stem_from_url(&url("https://example.com/v/My%20Clip.flv")), "My_Clip");
        assert_eq!(stem_from_url(&url("https://example.com/v/clip")), "clip");
        assert_eq!(stem_from_url(&url("https://example.com/a.b.c.mp4?x=1")), "a.b.c");
    }

    #[test]
    fn test_stem_from_url_falls_back_for_empty_or_dot_segments() {
        assert_eq!(stem_from_url(&url("https://example.com/")), FALLBACK_STEM);
        assert_eq!(stem_from_url(&url("https://example.com/v/%2E%2E")), FALLBACK_STEM);
        assert_eq!(stem_from_url(&url("https://example.com/.hidden")), "hidden");
    }

    #[test]
    fn test_stem_from_url_neutralises_encoded_separators() {
        let stem = stem_from_url(&url("https://example.com/..%2F..%2Fetc%2Fpasswd"));
        assert_eq!(stem, FALLBACK_STEM);
    }

    #[test]
    fn test_candidate_name_suffixes() {
        assert_eq!(candidate_name("clip", "mp4", 0), "clip.mp4");
        assert_eq!(candidate_name("clip", "mp4", 1), "clip-1.mp4");
        assert_eq!(candidate_name("clip", "mp4", 12), "clip-12.mp4");
    }

    #[tokio::test]
    async fn test_create_unique_file_no_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let sink = create_unique_file(temp_dir.path(), "clip", "png").await.unwrap();
        assert_eq!(sink.path(), temp_dir.path().join("clip.png"));
        assert!(sink.path().exists());
    }

    #[tokio::test]
    async fn test_create_unique_file_skips_taken_names() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("clip.png"), b"1").unwrap();
        std::fs::write(temp_dir.path().join("clip-1.png"), b"2").unwrap();

        let sink = create_unique_file(temp_dir.path(), "clip", "png").await.unwrap();
        assert_eq!(sink.path(), temp_dir.path().join("clip-2.png"));
        assert_eq!(std::fs::read(temp_dir.path().join("clip.png")).unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_create_unique_file_reports_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let error = create_unique_file(&missing, "clip", "png").await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
