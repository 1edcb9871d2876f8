//! Name sanitization for uploaded files and folders.

/// Replacement for a final filename that sanitizes to nothing.
pub const UNNAMED_FILE: &str = "unnamed_file";

/// Replacement for a directory segment that sanitizes to nothing.
pub const UNNAMED_FOLDER: &str = "unnamed_folder";

/// Longest stored name, in bytes.
pub const MAX_NAME_BYTES: usize = 255;

const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a single path segment to a safe name.
///
/// Whitespace runs become `_`, anything other than letters, digits, `.`,
/// `-` and `_` is dropped, and leading/trailing `.`/`_` are stripped.
/// Returns `None` if nothing usable remains.
pub fn sanitize_segment(name: &str) -> Option<String> {
    let joined = name.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    let mut cleaned = filtered.trim_matches(['.', '_']).to_string();
    if cleaned.is_empty() {
        return None;
    }

    let stem = cleaned.split('.').next().unwrap_or_default();
    if WINDOWS_DEVICE_NAMES
        .iter()
        .any(|device| device.eq_ignore_ascii_case(stem))
    {
        cleaned.insert(0, '_');
    }

    if cleaned.len() > MAX_NAME_BYTES {
        cleaned = truncate_bytes(&cleaned, MAX_NAME_BYTES)
            .trim_end_matches(['.', '_'])
            .to_string();
    }

    Some(cleaned)
}

/// Longest prefix of `name` that fits in `max` bytes without splitting a
/// character.
pub fn truncate_bytes(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut cut = max;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    &name[..cut]
}

/// Sanitize a final filename, falling back to [`UNNAMED_FILE`].
pub fn sanitize_file_name(name: &str) -> String {
    sanitize_segment(name).unwrap_or_else(|| UNNAMED_FILE.to_string())
}

/// Sanitize a directory segment, falling back to [`UNNAMED_FOLDER`].
pub fn sanitize_folder_name(name: &str) -> String {
    sanitize_segment(name).unwrap_or_else(|| UNNAMED_FOLDER.to_string())
}

/// Split a name into stem and extension the way collision suffixes expect.
///
/// `report.pdf` → (`report`, `.pdf`), `archive.tar.gz` → (`archive.tar`,
/// `.gz`), `README` → (`README`, ``). A leading dot does not start an
/// extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let body = name.trim_start_matches('.');
    let offset = name.len() - body.len();
    match body.rfind('.') {
        Some(idx) => name.split_at(offset + idx),
        None => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_unchanged() {
        assert_eq!(sanitize_segment("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_segment("my-file_v2.tar.gz").as_deref(), Some("my-file_v2.tar.gz"));
    }

    #[test]
    fn test_whitespace_and_symbols() {
        assert_eq!(
            sanitize_segment("  my  holiday photo (1).jpg ").as_deref(),
            Some("my_holiday_photo_1.jpg")
        );
        assert_eq!(sanitize_segment("a$b%c!.txt").as_deref(), Some("abc.txt"));
    }

    #[test]
    fn test_strips_leading_dots_and_underscores() {
        assert_eq!(sanitize_segment(".bashrc").as_deref(), Some("bashrc"));
        assert_eq!(sanitize_segment("__init__.py").as_deref(), Some("init__.py"));
        assert_eq!(sanitize_segment("..."), None);
        assert_eq!(sanitize_segment("   "), None);
        assert_eq!(sanitize_segment("$$$"), None);
    }

    #[test]
    fn test_keeps_unicode_letters() {
        assert_eq!(sanitize_segment("résumé.pdf").as_deref(), Some("résumé.pdf"));
        assert_eq!(sanitize_segment("写真.png").as_deref(), Some("写真.png"));
    }

    #[test]
    fn test_windows_device_names() {
        assert_eq!(sanitize_segment("CON").as_deref(), Some("_CON"));
        assert_eq!(sanitize_segment("nul.txt").as_deref(), Some("_nul.txt"));
        assert_eq!(sanitize_segment("CONSOLE.txt").as_deref(), Some("CONSOLE.txt"));
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let sanitized = sanitize_segment(&long).unwrap();
        assert!(sanitized.len() <= MAX_NAME_BYTES);
        assert_eq!(sanitized.len(), 254);
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(sanitize_file_name("???"), UNNAMED_FILE);
        assert_eq!(sanitize_folder_name(""), UNNAMED_FOLDER);
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".profile"), (".profile", ""));
    }
}
