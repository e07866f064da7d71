//! Small text helpers shared across the pipeline

/// Trim `s` to at most `max_bytes` bytes without splitting a UTF-8 sequence.
///
/// Returns the longest prefix whose byte length does not exceed `max_bytes`;
/// a multi-byte character straddling the limit is dropped whole. Used to cap
/// provider error bodies before they reach logs or typed errors.
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Largest character start position that still fits the budget
    let cut = s
        .char_indices()
        .map(|(at, _)| at)
        .take_while(|at| *at <= max_bytes)
        .last()
        .unwrap_or(0);
    &s[..cut]
}

/// Split text into chunks of at most `max_len` characters on word boundaries.
///
/// Words longer than `max_len` become their own chunk rather than being cut
/// mid-word. Empty input yields no chunks.
pub fn split_by_words(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.len()
        } else {
            current.len() + 1 + word.len()
        };

        if needed > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
