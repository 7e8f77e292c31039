//! Media-type sniffing from raw bytes.
//!
//! Classification goes by content, not by URL extension or server-reported
//! content type: gateways routinely serve `application/octet-stream` for
//! everything. SVG detection runs first (an SVG is also valid XML/text and
//! would otherwise fall through to Text), then magic numbers, then a glTF
//! check for 3D animations delivered as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of media a fetched payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Gif,
    Svg,
    Video,
    Audio,
    /// 3D/interactive content (glTF and friends).
    Animation,
    Html,
    Text,
    Json,
    Unknown,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Gif => "gif",
            MediaType::Svg => "svg",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Animation => "animation",
            MediaType::Html => "html",
            MediaType::Text => "text",
            MediaType::Json => "json",
            MediaType::Unknown => "unknown",
        }
    }

    /// Raster media that gets a downscaled preview.
    pub fn is_raster_image(&self) -> bool {
        matches!(self, MediaType::Image | MediaType::Gif)
    }

    /// Moving media (previewed from the first frame where possible).
    pub fn is_animated(&self) -> bool {
        matches!(self, MediaType::Gif | MediaType::Video | MediaType::Animation)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a MIME content type to a [`MediaType`].
pub fn media_type_from_content_type(content_type: &str) -> MediaType {
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let mut parts = content_type.splitn(2, '/');
    let (top, sub) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));

    match top {
        "image" => match sub {
            "svg" | "svg+xml" => MediaType::Svg,
            "gif" => MediaType::Gif,
            _ => MediaType::Image,
        },
        "video" => MediaType::Video,
        "audio" => MediaType::Audio,
        "text" => match sub {
            "html" => MediaType::Html,
            _ => MediaType::Text,
        },
        "application" => match sub {
            "json" => MediaType::Json,
            "xhtml+xml" => MediaType::Html,
            _ => MediaType::Unknown,
        },
        "model" => MediaType::Animation,
        _ => MediaType::Unknown,
    }
}

/// Sniff the media type of a payload from its leading bytes.
///
/// Returns the media type together with the concrete content type to attach
/// when uploading to blob storage.
pub fn sniff_media_type(buf: &[u8]) -> (MediaType, &'static str) {
    if buf.is_empty() {
        return (MediaType::Unknown, "application/octet-stream");
    }

    if looks_like_svg(buf) {
        return (MediaType::Svg, "image/svg+xml");
    }

    if buf.starts_with(b"\x89PNG\r\n\x1a\n") {
        return (MediaType::Image, "image/png");
    }
    if buf.starts_with(b"\xff\xd8\xff") {
        return (MediaType::Image, "image/jpeg");
    }
    if buf.starts_with(b"GIF87a") || buf.starts_with(b"GIF89a") {
        return (MediaType::Gif, "image/gif");
    }
    if buf.len() >= 12 && buf.starts_with(b"RIFF") && &buf[8..12] == b"WEBP" {
        return (MediaType::Image, "image/webp");
    }
    if buf.starts_with(b"BM") {
        return (MediaType::Image, "image/bmp");
    }
    if buf.len() >= 12 && &buf[4..8] == b"ftyp" {
        // MP4/MOV family.
        return (MediaType::Video, "video/mp4");
    }
    if buf.starts_with(b"\x1a\x45\xdf\xa3") {
        return (MediaType::Video, "video/webm");
    }
    if buf.starts_with(b"OggS") {
        return (MediaType::Audio, "audio/ogg");
    }
    if buf.starts_with(b"ID3") || buf.starts_with(b"\xff\xfb") {
        return (MediaType::Audio, "audio/mpeg");
    }
    if buf.starts_with(b"glTF") {
        return (MediaType::Animation, "model/gltf-binary");
    }

    let text = String::from_utf8_lossy(&buf[..buf.len().min(512)]);
    let trimmed = text.trim_start();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") {
        return (MediaType::Html, "text/html");
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if looks_like_gltf_json(buf) {
            return (MediaType::Animation, "model/gltf+json");
        }
        return (MediaType::Json, "application/json");
    }

    (MediaType::Unknown, "application/octet-stream")
}

/// An SVG document: optional XML prolog/comments, then an `<svg` root.
fn looks_like_svg(buf: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&buf[..buf.len().min(1024)]);
    let mut rest = head.trim_start();
    // Skip the prolog and any leading comments/doctype.
    loop {
        if let Some(stripped) = rest.strip_prefix("<?xml") {
            match stripped.find("?>") {
                Some(end) => rest = stripped[end + 2..].trim_start(),
                None => return false,
            }
        } else if let Some(stripped) = rest.strip_prefix("<!--") {
            match stripped.find("-->") {
                Some(end) => rest = stripped[end + 3..].trim_start(),
                None => return false,
            }
        } else if rest.starts_with("<!DOCTYPE") || rest.starts_with("<!doctype") {
            match rest.find('>') {
                Some(end) => rest = rest[end + 1..].trim_start(),
                None => return false,
            }
        } else {
            break;
        }
    }
    rest.starts_with("<svg")
}

/// glTF delivered as JSON: a `{`-leading document naming glTF top-level keys.
fn looks_like_gltf_json(buf: &[u8]) -> bool {
    let text = String::from_utf8_lossy(&buf[..buf.len().min(4096)]);
    ["\"asset\"", "\"scenes\"", "\"meshes\"", "\"accessors\""]
        .iter()
        .filter(|field| text.contains(*field))
        .count()
        >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_png() {
        let (media_type, content_type) = sniff_media_type(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR");
        assert_eq!(media_type, MediaType::Image);
        assert_eq!(content_type, "image/png");
    }

    #[test]
    fn test_sniff_gif() {
        let (media_type, _) = sniff_media_type(b"GIF89a\x01\x00\x01\x00");
        assert_eq!(media_type, MediaType::Gif);
        assert!(media_type.is_animated());
    }

    #[test]
    fn test_sniff_svg_with_prolog() {
        let svg = br#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated -->
<svg xmlns="http://www.w3.org/2000/svg"></svg>"#;
        let (media_type, content_type) = sniff_media_type(svg);
        assert_eq!(media_type, MediaType::Svg);
        assert_eq!(content_type, "image/svg+xml");
    }

    #[test]
    fn test_sniff_bare_svg() {
        let (media_type, _) = sniff_media_type(b"<svg viewBox=\"0 0 10 10\"></svg>");
        assert_eq!(media_type, MediaType::Svg);
    }

    #[test]
    fn test_sniff_mp4() {
        let (media_type, content_type) = sniff_media_type(b"\0\0\0\x20ftypisom\0\0\x02\0");
        assert_eq!(media_type, MediaType::Video);
        assert_eq!(content_type, "video/mp4");
    }

    #[test]
    fn test_sniff_json_and_gltf() {
        let (media_type, _) = sniff_media_type(br#"{"name": "token"}"#);
        assert_eq!(media_type, MediaType::Json);

        let gltf = br#"{"asset": {"version": "2.0"}, "scenes": [], "meshes": []}"#;
        let (media_type, content_type) = sniff_media_type(gltf);
        assert_eq!(media_type, MediaType::Animation);
        assert_eq!(content_type, "model/gltf+json");
    }

    #[test]
    fn test_sniff_unknown() {
        let (media_type, _) = sniff_media_type(&[0u8, 1, 2, 3]);
        assert_eq!(media_type, MediaType::Unknown);
    }

    #[test]
    fn test_from_content_type() {
        assert_eq!(media_type_from_content_type("image/png"), MediaType::Image);
        assert_eq!(
            media_type_from_content_type("image/svg+xml; charset=utf-8"),
            MediaType::Svg
        );
        assert_eq!(media_type_from_content_type("video/mp4"), MediaType::Video);
        assert_eq!(
            media_type_from_content_type("text/html"),
            MediaType::Html
        );
    }
}
