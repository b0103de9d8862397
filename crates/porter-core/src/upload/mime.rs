//! MIME type for uploaded media.

use crate::domain::MediaKind;

/// `Content-Type` of the download, else the URL's extension, else the kind's default.
pub fn detect_mime(content_type: Option<&str>, url: &str, kind: MediaKind) -> String {
    if let Some(ct) = content_type
        && let Some(essence) = ct.split(';').next().map(str::trim)
        && !essence.is_empty()
        && essence != "application/octet-stream"
    {
        return essence.to_ascii_lowercase();
    }
    from_extension(url)
        .unwrap_or(kind.fallback_mime())
        .to_string()
}

fn from_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "avif" => "image/avif",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("image/png; charset=binary"), "https://x/a.jpg", MediaKind::Image, "image/png")]
    #[case(Some("application/octet-stream"), "https://x/a.webp", MediaKind::Image, "image/webp")]
    #[case(None, "https://x/clip.MOV?sig=abc", MediaKind::Video, "video/quicktime")]
    #[case(None, "https://x/media/12345", MediaKind::Image, "image/jpeg")]
    #[case(None, "https://x/media/12345", MediaKind::Video, "video/mp4")]
    fn mime_detection(
        #[case] content_type: Option<&str>,
        #[case] url: &str,
        #[case] kind: MediaKind,
        #[case] expected: &str,
    ) {
        assert_eq!(detect_mime(content_type, url, kind), expected);
    }
}
