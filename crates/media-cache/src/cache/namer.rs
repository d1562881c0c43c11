//! # Cache Naming
//!
//! Deterministic mapping from a locator and an optional MIME hint to a
//! filename that is safe on every platform.

use url::form_urlencoded;

use crate::cache::types::CacheKey;

/// Pure naming scheme shared by both partitions
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheNamer;

impl CacheNamer {
    /// Derive the cache key for a locator.
    ///
    /// The locator is form-encoded (`mxc://server/abc` becomes
    /// `mxc%3A%2F%2Fserver%2Fabc`) and `.<ext>` is appended when an extension
    /// is known for `mime_hint`.
    pub fn key_for(locator: &str, mime_hint: Option<&str>) -> CacheKey {
        let mut encoded: String = form_urlencoded::byte_serialize(locator.as_bytes())
            .collect::<String>()
            .replace('*', "%2A");

        // "." and ".." would address the partition directory itself
        if !encoded.is_empty() && encoded.chars().all(|c| c == '.') {
            encoded = encoded.replace('.', "%2E");
        }

        if let Some(ext) = mime_hint.and_then(extension_for_mime) {
            encoded.push('.');
            encoded.push_str(ext);
        }

        CacheKey::from_encoded(encoded)
    }
}

/// Best-effort file extension for a MIME type; parameters are ignored.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next()?.trim().to_ascii_lowercase();

    let ext = match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        "image/heic" => "heic",
        "image/heif" => "heif",
        "image/tiff" => "tiff",
        "image/avif" => "avif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/3gpp" => "3gp",
        "video/mp2t" => "ts",
        "video/x-flv" => "flv",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/aac" => "aac",
        "audio/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/flac" => "flac",
        "audio/webm" => "weba",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/json" => "json",
        "application/gzip" => "gz",
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" => "m3u8",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        "text/markdown" => "md",
        _ => return None,
    };

    Some(ext)
}
