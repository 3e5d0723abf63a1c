//! URL helpers for url-filter evaluation
//!
//! These functions avoid allocations and work directly on string slices.

// =============================================================================
// Scheme / Host
// =============================================================================

/// Byte range of the host in a hierarchical (`scheme://`) URL, without
/// userinfo or port.
fn host_range(url: &str) -> Option<(usize, usize)> {
    let authority = url.find("://")? + 3;
    let rest = &url[authority..];
    let authority_end = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .map_or(url.len(), |i| authority + i);

    let host_start = url[authority..authority_end]
        .rfind('@')
        .map_or(authority, |i| authority + i + 1);
    let host_end = url[host_start..authority_end]
        .find(':')
        .map_or(authority_end, |i| host_start + i);
    Some((host_start, host_end))
}

/// Positions inside the host where a domain label starts.
/// Used by `||` anchors, which match the host or any subdomain boundary.
pub fn host_label_starts(url: &str) -> Vec<usize> {
    let Some((host_start, host_end)) = host_range(url) else {
        return Vec::new();
    };
    let bytes = url.as_bytes();
    let mut starts = vec![host_start];
    for i in host_start..host_end {
        if bytes[i] == b'.' && i + 1 < host_end {
            starts.push(i + 1);
        }
    }
    starts
}

// =============================================================================
// Separator Check
// =============================================================================

/// Check if a byte is a separator (`^` in url filters).
/// `^` matches end of string, or any byte other than a letter, digit, or one
/// of `_ - . %`.
#[inline]
pub fn is_separator_char(c: u8) -> bool {
    !(c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.' | b'%'))
}

/// Check if position in string is at a separator.
#[inline]
pub fn is_at_separator(s: &str, pos: usize) -> bool {
    if pos >= s.len() {
        return true;
    }
    is_separator_char(s.as_bytes()[pos])
}

/// ASCII case-insensitive substring search. Returns the byte offset.
#[inline]
pub fn find_case_insensitive(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}
