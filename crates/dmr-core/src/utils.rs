use chrono::{DateTime, Local};

// ============== Timestamp Helpers ==============

/// Wall-clock time as shown in progress output.
pub fn clock_time(at: &DateTime<Local>) -> String {
    at.format("%H:%M:%S").to_string()
}

// ============== Text Helpers ==============

/// Keep the first `max_chars` characters, appending `...` when cut.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// Single-line preview: newlines folded to spaces, then truncated.
pub fn preview(s: &str, max_chars: usize) -> String {
    let flat = s
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    truncate_text(&flat, max_chars)
}
