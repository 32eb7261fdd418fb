//! Text chunking
//!
//! Splits page text into overlapping chunks bounded by a character budget,
//! preferring paragraph, line, sentence and word boundaries (in that order)
//! over hard cuts. Lengths are counted in characters, not bytes.

mod boundaries;

pub use boundaries::*;

use crate::config::ChunkConfig;

/// A text chunk with its position in the source text
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The chunk text, trimmed
    pub text: String,

    /// Character start position in the source text
    pub char_start: usize,

    /// Character end position in the source text (exclusive)
    pub char_end: usize,

    /// Chunk index (0-based)
    pub index: usize,
}

impl TextChunk {
    /// Length of the chunk in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into chunks of at most `config.max_chars` characters with up
/// to `config.overlap_chars` characters shared between neighbours.
pub fn split_text(text: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let max_chars = config.max_chars.max(1);

    if total == 0 {
        return Vec::new();
    }

    let points = find_break_points(&chars);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let limit = start + max_chars;
        let end = if limit >= total {
            total
        } else {
            find_best_break(&points, start, limit)
        };

        let raw: String = chars[start..end].iter().collect();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            chunks.push(TextChunk {
                text: trimmed.to_string(),
                char_start: start,
                char_end: end,
                index: chunks.len(),
            });
        }

        if end >= total {
            break;
        }

        start = next_start(&points, start, end, config.overlap_chars);
    }

    chunks
}

/// Start of the chunk following `[start, end)`: step back by the overlap and
/// snap forward to the next boundary so the overlap does not open mid-word.
fn next_start(points: &[BreakPoint], start: usize, end: usize, overlap: usize) -> usize {
    let back = end.saturating_sub(overlap);
    let snapped = points
        .iter()
        .map(|p| p.position)
        .find(|&p| p >= back && p < end)
        .unwrap_or(back);

    if snapped <= start {
        end
    } else {
        snapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkConfig {
        ChunkConfig {
            max_chars,
            overlap_chars,
        }
    }

    fn long_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("  Just one short page.  ", &ChunkConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Just one short page.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(split_text("", &ChunkConfig::default()).is_empty());
        assert!(split_text(" \n\t \n", &ChunkConfig::default()).is_empty());
    }

    #[test]
    fn test_chunks_respect_budget_and_overlap() {
        let text = long_text(600);
        let chunks = split_text(&text, &config(1000, 200));

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.char_len() <= 1000);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end, "chunks should overlap");
            assert!(pair[0].char_end - pair[1].char_start <= 200);
            assert!(pair[1].char_start > pair[0].char_start);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_overlap_starts_on_word_boundary() {
        let text = long_text(600);
        let chunks = split_text(&text, &config(1000, 200));

        for chunk in chunks.iter().skip(1) {
            assert!(chunk.text.starts_with("word"), "got {:?}", &chunk.text[..10]);
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let first = "a".repeat(70);
        let second = "b".repeat(70);
        let text = format!("{}\n\n{}", first, second);
        let chunks = split_text(&text, &config(100, 10));

        assert_eq!(chunks[0].text, first);
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let text = "é".repeat(250);
        let chunks = split_text(&text, &config(100, 20));

        assert!(chunks.iter().all(|c| c.char_len() <= 100));
        assert_eq!(chunks[0].char_len(), 100);
    }
}
