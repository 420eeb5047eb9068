//! Filesystem-safe names for downloaded artifacts.

use crate::models::PaperRecord;

/// Longest stem produced by [`sanitize`], before the extension
pub const MAX_STEM_LEN: usize = 120;

fn is_reserved(c: char) -> bool {
    matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Replace path separators and reserved characters with `-`.
///
/// Whitespace runs collapse to one space and runs of reserved characters to
/// one hyphen. Leading and trailing hyphens and dots are trimmed, and the
/// result is truncated on a character boundary to [`MAX_STEM_LEN`].
pub fn sanitize(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut replaced = String::with_capacity(collapsed.len());
    let mut in_run = false;
    for c in collapsed.chars() {
        if is_reserved(c) {
            if !in_run {
                replaced.push('-');
            }
            in_run = true;
        } else {
            replaced.push(c);
            in_run = false;
        }
    }
    let trimmed = replaced.trim_matches(|c: char| c == '-' || c == '.' || c.is_whitespace());

    let mut out: String = trimmed.chars().take(MAX_STEM_LEN).collect();
    while out.ends_with('-') || out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Default file name for a paper's PDF: the sanitized identifier, or the
/// sanitized title when the identifier has no usable characters.
pub fn paper_file_name(paper: &PaperRecord) -> String {
    let stem = sanitize(&paper.id);
    let stem = if stem.is_empty() {
        sanitize(&paper.title)
    } else {
        stem
    };
    let stem = if stem.is_empty() {
        "paper".to_string()
    } else {
        stem
    };
    format!("{}.pdf", stem)
}

/// Clean a caller-supplied file name, keeping only its final component
pub fn override_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = sanitize(last);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
