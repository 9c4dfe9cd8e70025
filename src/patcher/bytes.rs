//! Byte-string search and splice helpers
//!
//! Reconstructed sources predate UTF-8 (comments are often EUC-JP), so rules
//! work on raw bytes and never round-trip content through `String`.

/// Position of the first occurrence of `needle` at or after `from`
pub fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Position of the first occurrence of `needle`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_from(haystack, needle, 0)
}

/// Position of the last occurrence of `needle`
pub fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Whether `needle` occurs anywhere in `haystack`
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// Replace every non-overlapping occurrence of `from`, scanning left to right
pub fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    replace_n(haystack, from, to, usize::MAX)
}

/// Replace the first occurrence of `from`
pub fn replace_first(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    replace_n(haystack, from, to, 1)
}

fn replace_n(haystack: &[u8], from: &[u8], to: &[u8], limit: usize) -> Vec<u8> {
    if from.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut pos = 0;
    let mut replaced = 0;
    while replaced < limit {
        match find_from(haystack, from, pos) {
            Some(hit) => {
                out.extend_from_slice(&haystack[pos..hit]);
                out.extend_from_slice(to);
                pos = hit + from.len();
                replaced += 1;
            }
            None => break,
        }
    }
    out.extend_from_slice(&haystack[pos..]);
    out
}

/// Concatenate byte slices
pub fn join(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

/// Copy of `haystack` with `text` spliced in at `pos`
pub fn insert_at(haystack: &[u8], pos: usize, text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len() + text.len());
    out.extend_from_slice(&haystack[..pos]);
    out.extend_from_slice(text);
    out.extend_from_slice(&haystack[pos..]);
    out
}
