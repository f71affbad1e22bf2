//! Small text helpers for branch names and log excerpts

/// Lowercase, dash-separated slug of at most `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug: String = slug.chars().take(max_len).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// The last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// The first `max_chars` characters of `text`, with `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add OAuth2 login (SSO)!", 30), "add-oauth2-login-sso");
        assert_eq!(slugify("  --  ", 30), "");
        assert_eq!(slugify("Very long title that keeps going", 10), "very-long");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("héllo wörld", 5), "wörld");
        assert_eq!(tail("abc", 10), "abc");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
