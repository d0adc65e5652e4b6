//! Shared utility functions for the specflow crate.

/// Lower-case ASCII slug: runs of anything outside `[a-z0-9]` collapse to a
/// single `-`, truncated to `max_len` without a trailing hyphen.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}
