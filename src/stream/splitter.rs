/// Splits finished text into pieces of at most `limit` characters.
///
/// Each piece ends at the last newline inside its window when there is one,
/// so lines are kept whole where possible. Concatenating the pieces gives back
/// `text`; no piece is empty.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(i, _)| i);
        if window_end == rest.len() {
            chunks.push(rest.to_string());
            break;
        }

        let cut = rest[..window_end]
            .rfind('\n')
            .map_or(window_end, |i| i + 1);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    chunks
}

/// Last `limit` characters of `text`, marked with a leading ellipsis when cut.
pub fn tail_preview(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(1);
    let start = text
        .char_indices()
        .nth(count - keep)
        .map_or(text.len(), |(i, _)| i);
    format!("…{}", &text[start..])
}
