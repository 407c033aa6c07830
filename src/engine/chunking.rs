// ── Recursive character text splitter ──────────────────────────────────────
// Separator priority: paragraph break, line break, word, sentence-stop,
// comma, then raw characters. Each separator is retried on any piece still
// too big, retaining the separator text in the emitted chunk.

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ".", ",", ""];

pub struct Chunk {
    pub content: String,
    pub start_offset: usize,
    pub index: usize,
    pub character_count: i64,
    pub token_count: i64,
}

pub fn split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let pieces = split_recursive(text, SEPARATORS, chunk_size, chunk_overlap);

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut cursor = 0usize;
    for (index, content) in pieces.into_iter().enumerate() {
        let start_offset = text[cursor..].find(content.as_str()).map(|p| cursor + p).unwrap_or(cursor);
        cursor = start_offset + content.len();
        chunks.push(Chunk {
            character_count: content.chars().count() as i64,
            token_count: estimate_tokens(&content),
            start_offset,
            index,
            content,
        });
    }
    chunks
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= chunk_size || separators.is_empty() {
        return chunk_by_chars(text, chunk_size, chunk_overlap);
    }

    let sep = separators[0];
    let rest = &separators[1..];
    let pieces = if sep.is_empty() { chunk_by_chars(text, chunk_size, chunk_overlap) } else { split_keep_separator(text, sep) };

    let mut out = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if piece.chars().count() > chunk_size {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.extend(split_recursive(&piece, rest, chunk_size, chunk_overlap));
            continue;
        }
        if !current.is_empty() && current.chars().count() + piece.chars().count() > chunk_size {
            out.push(current.clone());
            current = tail_for_overlap(&current, chunk_overlap);
        }
        current.push_str(&piece);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_keep_separator(text: &str, sep: &str) -> Vec<String> {
    let parts: Vec<&str> = text.split(sep).collect();
    let n = parts.len();
    parts
        .into_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let piece = if i < n - 1 { format!("{p}{sep}") } else { p.to_string() };
            if piece.is_empty() { None } else { Some(piece) }
        })
        .collect()
}

fn chunk_by_chars(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

fn tail_for_overlap(text: &str, overlap: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}

/// word count + half the non-word punctuation, minimum 1.
pub(crate) fn estimate_tokens(text: &str) -> i64 {
    let words = text.split_whitespace().count() as i64;
    let punctuation = text.chars().filter(|c| !c.is_alphanumeric() && !c.is_whitespace()).count() as i64;
    (words + punctuation / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_paragraph_boundaries_first() {
        let text = "first paragraph here.\n\nsecond paragraph here.\n\nthird paragraph here.";
        let chunks = split(text, 30, 5);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.character_count as usize <= 30 || !c.content.contains("\n\n"));
        }
    }

    #[test]
    fn respects_chunk_overlap_between_consecutive_chunks() {
        let text = "a ".repeat(100);
        let chunks = split(&text, 20, 5);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        assert!(split("", 100, 10).is_empty());
    }

    #[test]
    fn token_estimate_is_at_least_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("hello world"), 2);
        assert_eq!(estimate_tokens("hello, world!"), 2 + 1);
    }

    #[test]
    fn start_offsets_are_non_decreasing() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split(text, 15, 3);
        let mut last = 0;
        for c in &chunks {
            assert!(c.start_offset >= last || c.start_offset == 0);
            last = c.start_offset;
        }
    }
}
