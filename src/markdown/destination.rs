//! Link and image destination normalization
//!
//! Turns the raw destination of `![alt](destination "title")` into the
//! string the resolver works with, following the CommonMark rules for
//! angle-bracket destinations and backslash escapes.

/// Normalize a raw markdown link/image destination.
///
/// Trims surrounding whitespace, strips one pair of enclosing angle brackets
/// and resolves backslash escapes of ASCII punctuation. A backslash before any
/// other character is kept literally. Nothing else is touched: no
/// percent-decoding and no case folding.
pub fn parse_destination(raw: &str) -> String {
    let trimmed = raw.trim();

    let inner = if trimmed.len() >= 2 && trimmed.starts_with('<') && trimmed.ends_with('>') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    unescape(inner)
}

/// Format a destination so that `parse_destination` returns it unchanged.
///
/// Destinations containing whitespace, parentheses or angle brackets are
/// wrapped in `<...>`; backslashes and brackets inside are escaped.
pub fn format_destination(destination: &str) -> String {
    let needs_brackets = destination
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '<' | '>'));

    let mut escaped = String::with_capacity(destination.len() + 2);
    for ch in destination.chars() {
        if ch == '\\' || (needs_brackets && matches!(ch, '<' | '>')) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    if needs_brackets {
        format!("<{}>", escaped)
    } else {
        escaped
    }
}

/// Check if a character is ASCII punctuation (can be backslash-escaped)
pub fn is_escapable(ch: char) -> bool {
    ch.is_ascii_punctuation()
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if is_escapable(next) {
                    result.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        result.push(ch);
    }

    result
}
