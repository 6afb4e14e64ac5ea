//! MIME type lookup by extension.

/// Best-guess MIME type for a lower-case extension.
pub fn lookup(extension: &str) -> Option<String> {
    mime_guess::from_ext(extension)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// MIME type for a file name, falling back to `application/octet-stream`.
pub fn for_name(name: &str) -> String {
    crate::file::extension_of(name)
        .and_then(|ext| lookup(&ext))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
