use super::{Chunk, ChunkMetadata, Document};
use rayon::prelude::*;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Provenance header prepended to every chunk
pub fn chunk_header(source: &str, repo: &str) -> String {
    format!("File: {}\nRepo: {}\n\n", source, repo)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Recursive character splitter
///
/// Tries separators from coarsest (`"\n\n"`) to finest (`""`, single characters),
/// keeping each separator at the start of the piece that follows it. Pieces are then
/// greedily merged up to `chunk_size` characters, carrying up to `chunk_overlap`
/// characters of trailing pieces into the next segment. Segments are whitespace-trimmed.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];

        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut segments = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keep_start(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                segments.extend(self.merge(&pending));
                pending.clear();
            }

            if finer.is_empty() {
                segments.push(piece.to_string());
            } else {
                segments.extend(self.split_with(piece, finer));
            }
        }

        if !pending.is_empty() {
            segments.extend(self.merge(&pending));
        }

        segments
    }

    /// Greedy merge of small pieces into segments with overlap
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut segments = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                if total > self.chunk_size {
                    tracing::warn!(
                        "Created a chunk of {} characters, longer than the limit of {}",
                        total,
                        self.chunk_size
                    );
                }

                if let Some(segment) = join_trimmed(&window) {
                    segments.push(segment);
                }

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    let first = window.remove(0);
                    total -= char_len(first);
                }
            }

            window.push(piece);
            total += len;
        }

        if let Some(segment) = join_trimmed(&window) {
            segments.push(segment);
        }

        segments
    }
}

fn join_trimmed(pieces: &[&str]) -> Option<String> {
    let joined = pieces.concat();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Split `text` on `separator`, attaching each separator to the following piece
///
/// An empty separator splits into single characters. Empty pieces are dropped.
fn split_keep_start<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Splits documents into header-prefixed chunks
pub struct TextChunker {
    splitter: RecursiveSplitter,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            splitter: RecursiveSplitter::new(chunk_size, chunk_overlap),
        }
    }

    /// Split one document; the header is added after splitting, so it never counts
    /// against the chunk size and appears on every chunk
    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        let header = chunk_header(&document.source, &document.repo);

        self.splitter
            .split_text(&document.content)
            .into_iter()
            .enumerate()
            .map(|(index, segment)| Chunk {
                text: format!("{}{}", header, segment),
                metadata: ChunkMetadata {
                    source: document.source.clone(),
                    repo: document.repo.clone(),
                },
                index,
            })
            .collect()
    }

    /// Chunk all documents in parallel, keeping collection order
    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents
            .par_iter()
            .map(|doc| self.chunk_document(doc))
            .flatten()
            .collect();

        tracing::info!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        chunks
    }
}
