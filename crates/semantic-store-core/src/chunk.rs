//! Sliding-window text chunker.
//!
//! Splits document text into overlapping substrings sized for an
//! embedding model. Windows are measured in characters (not bytes), so
//! multi-byte text is never cut inside a code point.
//!
//! # Algorithm
//!
//! 1. Take a window of `chunk_size` characters starting at `start`.
//! 2. If the window ends before the end of the text, look backward from the
//!    window end for the last `". "`. If it lies past the window midpoint,
//!    cut just after the period so sentences stay intact.
//! 3. Trim the window and keep it if non-empty.
//! 4. Stop once a window reaches the end of the text; otherwise move
//!    `start` to `end - chunk_overlap`, forcing progress of at least
//!    `max(1, chunk_size - chunk_overlap)` characters when the overlap would
//!    not advance the window.
//!
//! # Example
//!
//! ```rust
//! use semantic_store_core::chunk::Chunker;
//!
//! let chunks = Chunker::default().split("Hello world. Goodbye.");
//! assert_eq!(chunks, vec!["Hello world. Goodbye.".to_string()]);
//! ```

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

const SENTENCE_BREAK: &str = ". ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    /// A zero `chunk_size` is bumped to 1 so the window always advances.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into ordered, non-empty, trimmed chunks.
    ///
    /// Returns an empty vector only when `text` is blank.
    pub fn split(&self, text: &str) -> Vec<String> {
        // Byte offset of every char, plus the end of the string, so window
        // arithmetic can happen in char units and slicing in bytes.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < len {
            let mut end = (start + self.chunk_size).min(len);

            if end < len {
                if let Some(brk) = self.sentence_break(text, &bounds, start, end) {
                    end = brk + 1;
                }
            }

            let piece = text[bounds[start]..bounds[end]].trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            if end >= len {
                break;
            }

            let next = end.saturating_sub(self.chunk_overlap);
            start = if next <= start {
                start + self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
            } else {
                next
            };
        }

        chunks
    }

    /// Char index of the last `". "` starting at or before `end`, if it
    /// lies past the midpoint of the window beginning at `start`.
    fn sentence_break(&self, text: &str, bounds: &[usize], start: usize, end: usize) -> Option<usize> {
        let len = bounds.len() - 1;
        // A match may begin exactly at `end`, so let the haystack run two
        // chars further.
        let limit = bounds[(end + SENTENCE_BREAK.len()).min(len)];
        let byte_pos = text[..limit].rfind(SENTENCE_BREAK)?;
        let pos = bounds.binary_search(&byte_pos).ok()?;

        let midpoint = start as f64 + self.chunk_size as f64 * 0.5;
        if pos > start && (pos as f64) > midpoint {
            Some(pos)
        } else {
            None
        }
    }
}
