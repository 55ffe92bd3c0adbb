/// Content type returned for extensions missing from the table.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Fixed extension to MIME type table used when serving files.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("md", "text/markdown"),
    ("html", "text/html"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

/// Look up the content type for a lower-cased extension (without the dot).
#[must_use]
pub fn content_type_for(extension: Option<&str>) -> &'static str {
    extension
        .and_then(|ext| {
            CONTENT_TYPES
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(content_type_for(Some("txt")), "text/plain");
        assert_eq!(content_type_for(Some("jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Some("PDF")), "application/pdf");
    }

    #[test]
    fn unknown_or_missing_extension_is_binary() {
        assert_eq!(content_type_for(Some("exe")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(None), DEFAULT_CONTENT_TYPE);
    }
}
