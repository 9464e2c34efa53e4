use serde::Serialize;

use crate::error::SplitError;

/// A window over the document text. Offsets count chars, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Sliding-window split: each chunk holds at most `chunk_size` chars and the next
/// one starts `overlap` chars before the previous end.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>, SplitError> {
    if chunk_size <= overlap {
        return Err(SplitError::InvalidWindow {
            chunk_size,
            overlap,
        });
    }

    let bounds = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect::<Vec<_>>();
    let total_chars = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total_chars {
        let end = (start + chunk_size).min(total_chars);
        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end,
            text: text[bounds[start]..bounds[end]].to_owned(),
        });
        if end == total_chars {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}
