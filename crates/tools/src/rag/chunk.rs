//! Word-window chunking.

use serde::{Deserialize, Serialize};

/// A slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Where the text came from (file path).
    pub source: String,
    pub text: String,
}

/// Split `text` into windows of `size` words, consecutive windows sharing
/// `overlap` words. `overlap` is clamped below `size`.
pub fn split(source: &str, text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let size = size.max(1);
    let step = size - overlap.min(size - 1);
    let words: Vec<&str> = text.split_whitespace().collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + size).min(words.len());
        chunks.push(Chunk {
            source: source.to_string(),
            text: words[start..end].join(" "),
        });
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}
