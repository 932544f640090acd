//! Text chunking used by map-reduce document workflows (§8 boundary cases).
//! Kept a free function rather than a trait: the ingestion/vector-store
//! stack this would normally sit behind (file/URL readers, embeddings,
//! retrieval ranking) is an external collaborator, not something this crate
//! implements — this module only covers the byte-offset arithmetic the
//! document-summary graph needs to turn one string into overlapping windows.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("chunk_size must be greater than zero")]
    InvalidChunkSize,
}

/// Splits `text` into overlapping windows of `chunk_size` characters, advancing
/// by `chunk_size - overlap` each step.
///
/// - `chunk_size > text.chars().count()` returns a single chunk equal to `text`.
/// - `overlap >= chunk_size` (a non-positive step) clamps the step to
///   `chunk_size`, i.e. the windows do not overlap, rather than looping forever.
/// - An empty `text` returns zero chunks; callers that require at least one
///   chunk (e.g. a retrieval step) are responsible for rejecting that case.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    if chunk_size >= chars.len() {
        return Ok(vec![text.to_string()]);
    }

    let step = if overlap >= chunk_size { chunk_size } else { chunk_size - overlap };

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    Ok(chunks)
}
