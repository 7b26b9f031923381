//! Text chunking with sentence-boundary awareness.
//!
//! Splits at paragraph and sentence boundaries before falling back to hard
//! character cuts, carries a configurable overlap from the previous chunk,
//! and merges fragments too short to be useful retrieval units.
//!
//! Chunking is fully deterministic: identical input and parameters always
//! yield the identical chunk sequence. Cache correctness depends on this.

use crate::config::ChunkingConfig;
use crate::types::Chunk;

/// Sentence/paragraph-aware chunker.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split `text` into overlapping chunks.
    ///
    /// Adjacent segments are packed greedily up to `target_size`; a single
    /// segment longer than `target_size` is hard-cut at character
    /// boundaries. Each chunk after the first is extended backwards by up
    /// to `overlap` characters, snapped to a word boundary.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let segments = self.segments(text);
        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut cur: Option<(usize, usize)> = None;

        for (start, end) in segments {
            match cur {
                None => cur = Some((start, end)),
                Some((cs, _)) if end - cs <= self.config.target_size => {
                    cur = Some((cs, end));
                }
                Some(span) => {
                    spans.push(span);
                    cur = Some((start, end));
                }
            }
        }
        if let Some(span) = cur {
            spans.push(span);
        }

        self.merge_short(text, &mut spans);

        let mut chunks = Vec::with_capacity(spans.len());
        for (i, &(start, end)) in spans.iter().enumerate() {
            let start = if i == 0 {
                start
            } else {
                self.overlap_start(text, start)
            };
            chunks.push(Chunk {
                id: i,
                text: text[start..end].to_string(),
                start,
                end,
            });
        }
        chunks
    }

    /// Split the text into contiguous sentence-level segments.
    ///
    /// Segment boundaries fall after sentence terminators and newlines, so
    /// paragraph breaks always coincide with a segment boundary. Segments
    /// longer than `target_size` (a single run with no terminator) are
    /// hard-cut.
    fn segments(&self, text: &str) -> Vec<(usize, usize)> {
        let mut boundaries = Vec::new();
        let mut prev_char: Option<char> = None;
        for (idx, ch) in text.char_indices() {
            if let Some(p) = prev_char
                && matches!(p, '.' | '?' | '!' | '\n')
                && !matches!(ch, '.' | '?' | '!')
            {
                boundaries.push(idx);
            }
            prev_char = Some(ch);
        }
        boundaries.push(text.len());

        let mut segments = Vec::with_capacity(boundaries.len());
        let mut start = 0;
        for end in boundaries {
            if end <= start {
                continue;
            }
            if end - start > self.config.target_size {
                self.hard_cut(text, start, end, &mut segments);
            } else {
                segments.push((start, end));
            }
            start = end;
        }
        segments
    }

    /// Cut an oversized span into pieces of at most `target_size` bytes,
    /// snapped back to character boundaries.
    fn hard_cut(&self, text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
        let mut cut_start = start;
        while cut_start < end {
            let mut cut_end = (cut_start + self.config.target_size).min(end);
            while cut_end < end && !text.is_char_boundary(cut_end) {
                cut_end -= 1;
            }
            // A pathological boundary walk could stall; force progress.
            if cut_end <= cut_start {
                cut_end = end;
            }
            out.push((cut_start, cut_end));
            cut_start = cut_end;
        }
    }

    /// Merge spans whose visible text is shorter than `min_chunk_len` into
    /// their neighbor.
    fn merge_short(&self, text: &str, spans: &mut Vec<(usize, usize)>) {
        let mut i = 0;
        while i < spans.len() && spans.len() > 1 {
            let (start, end) = spans[i];
            if text[start..end].trim().len() < self.config.min_chunk_len {
                if i > 0 {
                    spans[i - 1].1 = end;
                    spans.remove(i);
                } else {
                    spans[1].0 = start;
                    spans.remove(0);
                }
            } else {
                i += 1;
            }
        }
    }

    /// Walk back up to `overlap` bytes from `chunk_start` and snap forward
    /// to the start of a word.
    fn overlap_start(&self, text: &str, chunk_start: usize) -> usize {
        if self.config.overlap == 0 {
            return chunk_start;
        }
        let mut pos = chunk_start.saturating_sub(self.config.overlap);
        while pos < chunk_start && !text.is_char_boundary(pos) {
            pos += 1;
        }
        if pos == 0 {
            return 0;
        }
        if text[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_whitespace())
        {
            return pos;
        }
        // Snap forward to a word boundary so the overlap never starts
        // mid-word.
        let mut iter = text[pos..chunk_start].char_indices().peekable();
        while let Some((_, ch)) = iter.next() {
            if ch.is_whitespace() {
                if let Some(&(next_off, _)) = iter.peek() {
                    return pos + next_off;
                }
                return chunk_start;
            }
        }
        chunk_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(target_size: usize, overlap: usize, min_chunk_len: usize) -> Chunker {
        Chunker::new(ChunkingConfig {
            target_size,
            overlap,
            min_chunk_len,
        })
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let c = chunker(800, 200, 50);
        assert!(c.chunk("").is_empty());
        assert!(c.chunk("   \n\n  ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let c = chunker(800, 200, 10);
        let chunks = c.chunk("The grace period for premium payment is 30 days.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].text,
            "The grace period for premium payment is 30 days."
        );
        assert_eq!(chunks[0].start, 0);
    }

    #[test]
    fn test_deterministic() {
        let c = chunker(120, 30, 20);
        let text = "First sentence here. Second sentence follows. Third one too.\n\n\
                    A new paragraph begins. It has more sentences. And even more text to split. \
                    The quick brown fox jumps over the lazy dog repeatedly until done.";
        let a = c.chunk(text);
        let b = c.chunk(text);
        assert_eq!(a, b);
    }

    #[test]
    fn test_splits_at_sentence_boundaries() {
        let c = chunker(60, 0, 10);
        let text = "Alpha sentence number one is right here. Beta sentence is the second one. \
                    Gamma sentence closes it out.";
        let chunks = c.chunk(text);
        assert!(chunks.len() > 1);
        // Every chunk except possibly the last ends on a terminator (plus
        // trailing whitespace), never mid-sentence.
        for chunk in &chunks[..chunks.len() - 1] {
            let trimmed = chunk.text.trim_end();
            assert!(
                trimmed.ends_with('.') || trimmed.ends_with('?') || trimmed.ends_with('!'),
                "chunk cut mid-sentence: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_hard_cut_for_unbroken_text() {
        let c = chunker(100, 0, 10);
        let text = "x".repeat(350);
        let chunks = c.chunk(&text);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|ch| ch.text.len() <= 100));
        // Coverage: chunks reassemble the input exactly when overlap is 0.
        let joined: String = chunks.iter().map(|ch| ch.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_overlap_extends_backwards() {
        let c = chunker(80, 30, 10);
        let text = "One full sentence sits here to start. Another sentence lands in the middle. \
                    A final sentence wraps the entire thing up nicely.";
        let chunks = c.chunk(text);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].start < pair[0].end,
                "expected overlap between consecutive chunks"
            );
            assert!(pair[0].end - pair[1].start <= 30 + 1);
        }
    }

    #[test]
    fn test_overlap_starts_at_word_boundary() {
        let c = chunker(80, 25, 10);
        let text = "Words accumulate into a sentence that will overflow. More words follow in \
                    the second sentence of the document. Then a third sentence arrives.";
        let chunks = c.chunk(text);
        for chunk in &chunks[1..] {
            if chunk.start > 0 {
                let before: char = text[..chunk.start]
                    .chars()
                    .next_back()
                    .expect("non-empty prefix");
                assert!(
                    before.is_whitespace(),
                    "overlap started mid-word before {:?}",
                    chunk.text
                );
            }
        }
    }

    #[test]
    fn test_tiny_trailing_fragment_merged() {
        let c = chunker(75, 0, 40);
        let text = "This is a complete sentence that takes up most of the first chunk nicely. Ok.";
        let chunks = c.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.ends_with("Ok."));
    }

    #[test]
    fn test_paragraph_break_is_a_boundary() {
        let c = chunker(90, 0, 10);
        let text = "Paragraph one has some words in it and ends here.\n\nParagraph two starts \
                    fresh with its own words and keeps going a bit.";
        let chunks = c.chunk(text);
        assert!(chunks.len() >= 2);
        assert!(chunks[1].text.contains("Paragraph two"));
    }

    #[test]
    fn test_multibyte_text_never_panics() {
        let c = chunker(50, 10, 5);
        let text = "Überraschung für alle Beteiligten. Ein längerer Satz mit Umlauten äöü folgt \
                    direkt danach. Noch ein Satz für gute Maße.";
        let chunks = c.chunk(text);
        assert!(!chunks.is_empty());
        let rebuilt: String = chunks.iter().map(|ch| ch.text.as_str()).collect();
        assert!(rebuilt.contains("Überraschung"));
    }
}
