/// Name used when a client supplies no usable filename.
pub const FALLBACK_FILENAME: &str = "upload.bin";

const MAX_FILENAME_LEN: usize = 255;

/// Reduce a client-supplied filename to its final path component.
///
/// Control characters are removed and the result is capped at 255 bytes on
/// a character boundary. Names that end up empty, `.` or `..` are replaced
/// by [`FALLBACK_FILENAME`].
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return FALLBACK_FILENAME.to_owned();
    }

    let mut end = trimmed.len().min(MAX_FILENAME_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_owned()
}

/// Render a filename so it can sit inside a quoted `Content-Disposition`
/// parameter: quotes, backslashes and anything outside printable ASCII
/// become `_`.
#[must_use]
pub fn header_safe_filename(name: &str) -> String {
    let sanitized = sanitize_filename(name);
    sanitized
        .chars()
        .map(|c| {
            if c == '"' || c == '\\' || !(' '..='~').contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}
