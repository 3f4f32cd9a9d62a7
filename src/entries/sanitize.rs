//! File-name sanitisation shared by every `*_sanitized` variable.

/// Replaces characters that are unsafe in a path component on Unix or
/// Windows with full-width lookalikes.
pub fn sanitize_filename(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '/' => out.push('⧸'),
            '\\' => out.push('⧹'),
            ':' => out.push('：'),
            '*' => out.push('＊'),
            '?' => out.push('？'),
            '"' => out.push('＂'),
            '<' => out.push('＜'),
            '>' => out.push('＞'),
            '|' => out.push('｜'),
            ch if ch.is_control() => {}
            ch => out.push(ch),
        }
    }
    let trimmed = out.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Metadata braces become full-width so they never parse as expressions.
pub fn escape_braces(value: &str) -> String {
    value.replace('{', "｛").replace('}', "｝")
}

/// Shortens `base` so that `base + suffix` fits in `limit` bytes without
/// splitting a character.
pub fn truncate_to_bytes(base: &str, suffix: &str, limit: usize) -> String {
    let budget = limit.saturating_sub(suffix.len());
    if base.len() <= budget {
        return base.to_string();
    }
    let mut end = budget;
    while end > 0 && !base.is_char_boundary(end) {
        end -= 1;
    }
    base[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_hostile_characters() {
        assert_eq!(sanitize_filename("AC/DC: Live?"), "AC⧸DC： Live？");
        assert_eq!(sanitize_filename("a<b>c|d\"e*f\\g"), "a＜b＞c｜d＂e＊f⧹g");
    }

    #[test]
    fn strips_controls_and_trailing_dots() {
        assert_eq!(sanitize_filename("line\nbreak..  "), "linebreak");
        assert_eq!(sanitize_filename("..."), "_");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn sanitising_is_idempotent() {
        for input in ["AC/DC: Live?", "a<b>c|d", "trailing. ", "plain", "", "tab\there"] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once);
            assert!(!once.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|']));
        }
    }

    #[test]
    fn braces_are_escaped() {
        assert_eq!(escape_braces("{title}"), "｛title｝");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let base = "é".repeat(200);
        let cut = truncate_to_bytes(&base, "-thumb.jpg", 255);
        assert!(cut.len() + "-thumb.jpg".len() <= 255);
        assert!(cut.chars().all(|ch| ch == 'é'));
        assert_eq!(truncate_to_bytes("short", ".mp4", 255), "short");
    }
}
