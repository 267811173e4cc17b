//! Shared utility functions
//!
//! Formatting and name cleanup used by the upload, suggestion and CLI code.

use regex::Regex;
use std::sync::OnceLock;

/// Format a byte size as human-readable string
///
/// Examples: "1.2MB", "450KB", "23B", "2.5TB"
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1}TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[/\\\p{Cc}]+").expect("static pattern"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Clean a proposed node name: path separators and control characters
/// become spaces, runs of whitespace collapse to one space, and surrounding
/// quotes and whitespace are dropped. Returns `None` if nothing usable is left.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let cleaned = unsafe_chars().replace_all(raw, " ");
    let collapsed = whitespace().replace_all(&cleaned, " ");
    let name = collapsed.trim().trim_matches(['"', '\'', '`']).trim();

    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(100), "100B");
        assert_eq!(format_size(1024), "1KB");
        assert_eq!(format_size(1536), "2KB"); // Rounds to nearest
        assert_eq!(format_size(1024 * 1024), "1.0MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0GB");
        assert_eq!(format_size(1024 * 1024 * 1024 * 1024), "1.0TB");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Opening   Titles "), Some("Opening Titles".to_string()));
        assert_eq!(sanitize_name("night/day\\shoot"), Some("night day shoot".to_string()));
        assert_eq!(sanitize_name("seq\t01\n"), Some("seq 01".to_string()));
        assert_eq!(sanitize_name("\"Chase\""), Some("Chase".to_string()));
        assert_eq!(sanitize_name(" / "), None);
        assert_eq!(sanitize_name(".."), None);
    }
}
