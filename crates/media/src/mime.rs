use std::path::Path;

/// MIME type for extensions outside the table.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// MIME type for an outgoing attachment, by extension.
#[must_use]
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "html" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => DEFAULT_MIME,
    }
}
