use std::borrow::Cow;

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
}

/// Remove characters that are not allowed in XML 1.0 text, along with any
/// ANSI escape sequences that leaked into upstream titles or descriptions.
///
/// Tab, newline and carriage return are kept. Clean input is returned
/// borrowed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(|c| c == '\u{1b}' || is_stripped_control(c)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                // CSI: parameters until a final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for n in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&n) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(n) = chars.next() {
                        if n == '\u{7}' {
                            break;
                        }
                        if n == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_stripped_control(c) {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

pub const MAX_SLUG_LEN: usize = 64;

/// Turn a display name into a channel key: lowercase ASCII letters, digits
/// and single underscores. Whitespace, dashes and dots become underscores;
/// anything else is dropped. Keys are cut to [`MAX_SLUG_LEN`] characters and
/// keys shorter than two characters get a `channel_` prefix.
pub fn slugify(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    for c in display_name.trim().chars().flat_map(char::to_lowercase) {
        let mapped = match c {
            'a'..='z' | '0'..='9' | '_' => Some(c),
            c if c.is_whitespace() || c == '-' || c == '.' => Some('_'),
            _ => None,
        };
        if let Some(m) = mapped {
            if m == '_' && slug.ends_with('_') {
                continue;
            }
            slug.push(m);
        }
    }
    // Only ASCII is pushed, so byte length equals char count.
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_matches('_').to_string();
    if slug.len() < 2 {
        format!("channel_{slug}")
    } else {
        slug
    }
}

/// Format a duration in seconds as `HH:MM:SS`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
