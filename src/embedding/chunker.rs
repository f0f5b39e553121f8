//! Deterministic text chunking
//!
//! Chunks never exceed the configured size in characters. Split points are
//! searched for in a window before the size limit, preferring paragraph
//! breaks, then sentence ends, then newlines, then any whitespace.

/// How far back from the size limit to look for a natural break
const SEARCH_WINDOW: usize = 100;

/// Splits `text` into overlapping chunks of at most `max_chars` characters
///
/// Consecutive chunks overlap by roughly `overlap` characters. Chunks are
/// trimmed; chunks that are empty after trimming are dropped.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < len {
        let split_end = find_split_point(&chars, start, start + max_chars, len);

        let chunk: String = chars[start..split_end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if split_end >= len {
            break;
        }
        start = split_end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Finds where the chunk starting at `start` should end
///
/// Returns an index in `start + 1..=target_end`, or `len` if the rest of the
/// text fits.
fn find_split_point(chars: &[char], start: usize, target_end: usize, len: usize) -> usize {
    if target_end >= len {
        return len;
    }

    let lowest = target_end.saturating_sub(SEARCH_WINDOW).max(start + 1);
    let candidates = || (lowest..=target_end).rev();

    // Paragraph break: split after "\n\n"
    if let Some(end) = candidates().find(|&end| {
        end >= start + 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n'
    }) {
        return end;
    }

    // Sentence end followed by whitespace: split after the whitespace
    if let Some(end) = candidates().find(|&end| {
        end >= start + 2
            && chars[end - 1].is_whitespace()
            && matches!(chars[end - 2], '.' | '!' | '?')
    }) {
        return end;
    }

    if let Some(end) = candidates().find(|&end| chars[end - 1] == '\n') {
        return end;
    }

    if let Some(end) = candidates().find(|&end| chars[end - 1].is_whitespace()) {
        return end;
    }

    target_end
}
