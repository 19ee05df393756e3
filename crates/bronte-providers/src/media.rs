//! Media utilities: MIME sniffing, `data:` URLs, base64
//!
//! Small pure helpers shared by the drivers, plus the normalization pass that
//! guarantees every `File` part carries a non-empty media type before a
//! driver sees it.

use base64::Engine;
use bronte_protocol::{FileData, Part, Turn};

/// A parsed `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Sniff an image MIME type from magic bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n']) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }
    None
}

/// Guess a media type from a path or URL extension.
pub fn media_type_from_path(path: &str) -> Option<&'static str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Parse a `data:` URL into its media type and payload bytes.
///
/// Both base64 (`data:image/png;base64,...`) and plain payloads are accepted;
/// an empty media type defaults to `text/plain` per RFC 2397.
pub fn parse_data_url(url: &str) -> Option<DataUrl> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let (media_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(mt) => (mt, true),
        None => (meta, false),
    };
    let data = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(payload.as_bytes())
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some(DataUrl {
        media_type: if media_type.is_empty() {
            "text/plain".to_string()
        } else {
            media_type.to_string()
        },
        data,
    })
}

/// Render bytes as a base64 `data:` URL.
pub fn to_data_url(media_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        media_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Fill in missing media types on `File` parts and inline `data:` URLs.
///
/// After this pass every `File` part has a non-empty `media_type`, which is
/// the invariant drivers rely on. Unsniffable payloads fall back to
/// `application/octet-stream` and get rejected downstream as unsupported.
pub fn normalize_file_parts(turns: &mut [Turn]) {
    for turn in turns {
        for part in &mut turn.parts {
            let Part::File {
                data, media_type, ..
            } = part
            else {
                continue;
            };

            if let FileData::Url { url } = data {
                if let Some(parsed) = parse_data_url(url) {
                    if media_type.is_empty() {
                        *media_type = parsed.media_type;
                    }
                    *data = FileData::Bytes { data: parsed.data };
                }
            }

            if media_type.is_empty() {
                *media_type = match data {
                    FileData::Bytes { data } => sniff_media_type(data)
                        .unwrap_or("application/octet-stream")
                        .to_string(),
                    FileData::Url { url } => media_type_from_path(url)
                        .unwrap_or("application/octet-stream")
                        .to_string(),
                };
            }
        }
    }
}
