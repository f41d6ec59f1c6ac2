//! Splits extracted document text into overlapping, fixed-size character
//! windows for embedding.
//!
//! Windows are taken over Unicode scalar values, not bytes, so multi-byte
//! text chunks without ever splitting inside a character.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub size: usize,
    pub overlap: usize,
}

#[derive(Debug)]
pub struct ChunkerError(String);

impl fmt::Display for ChunkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid chunker config: {}", self.0)
    }
}

impl std::error::Error for ChunkerError {}

impl ChunkerConfig {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        if size == 0 {
            return Err(ChunkerError("chunk_size must be > 0".to_string()));
        }
        if overlap >= size {
            return Err(ChunkerError(format!(
                "chunk_overlap ({overlap}) must be < chunk_size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }

    const fn step(self) -> usize {
        let diff = self.size.saturating_sub(self.overlap);
        if diff == 0 {
            1
        } else {
            diff
        }
    }
}

#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    #[must_use]
    pub const fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split `text` into overlapping windows of `config.size` characters,
    /// stepping by `config.size - config.overlap`. Each window is trimmed;
    /// empty windows are dropped. All-whitespace input yields no chunks.
    #[must_use]
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let step = self.config.step();
        let size = self.config.size;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + size).min(len);
            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
            if start + size >= len {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Convenience free function for one-off calls without constructing a
/// [`Chunker`].
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, ChunkerError> {
    let config = ChunkerConfig::new(size, overlap)?;
    Ok(Chunker::new(config).chunk_text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert_eq!(chunk_text("", 10, 2).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn whitespace_only_yields_no_chunks() {
        assert_eq!(chunk_text("   \n\t  ", 10, 2).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn single_char_windows_no_overlap() {
        let chunks = chunk_text("abc", 1, 0).unwrap();
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn overlapping_windows_cover_text() {
        let chunks = chunk_text("abcdefghij", 4, 2).unwrap();
        // step = 2: [0..4]=abcd [2..6]=cdef [4..8]=efgh [6..10]=ghij, then
        // 6+4>=10 stops the loop before start reaches 8.
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn trims_each_window() {
        let chunks = chunk_text("ab cd ef", 4, 0).unwrap();
        assert_eq!(chunks, vec!["ab c", "d ef"]);
    }

    #[test]
    fn multibyte_text_does_not_split_characters() {
        let text = "日本語のテキストです";
        let chunks = chunk_text(text, 3, 1).unwrap();
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 3);
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
    }

    #[test]
    fn rejects_zero_size() {
        assert!(ChunkerConfig::new(0, 0).is_err());
    }

    #[test]
    fn rejects_overlap_ge_size() {
        assert!(ChunkerConfig::new(5, 5).is_err());
        assert!(ChunkerConfig::new(5, 6).is_err());
    }

    #[test]
    fn large_overlap_still_terminates() {
        let chunks = chunk_text("abcdefgh", 3, 2).unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 100);
    }
}
