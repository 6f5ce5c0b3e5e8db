//! File collection and chunking
//!
//! Turns a checked-out snapshot into [`Document`]s (one per qualifying file) and then
//! into header-prefixed [`Chunk`]s ready for embedding.

mod chunker;
mod file_collector;

pub use chunker::{RecursiveSplitter, TextChunker, chunk_header};
pub use file_collector::{FileCollector, PROGRESS_INTERVAL};

/// Extensions (lowercase, without the dot) that are collected from a snapshot
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "py", "ipynb", "js", "jsx", "ts", "tsx", "c", "cpp", "h", "hpp", "java", "kt", "go", "rs",
    "php", "rb", "cs", "md", "txt", "rst", "json", "yaml", "yml", "toml", "xml", "gradle",
];

/// Case-insensitive allow-list check on a file extension
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Raw content of one collected file
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the snapshot root, `/`-separated
    pub source: String,
    /// Normalized locator of the owning repository
    pub repo: String,
    pub content: String,
}

/// Provenance stored next to every chunk
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub repo: String,
}

/// A bounded slice of a document, header included; the unit of embedding and storage
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Position of this chunk within its document
    pub index: usize,
}

impl Chunk {
    /// Stable row id within one store: `<source>#<index>`
    pub fn id(&self) -> String {
        format!("{}#{}", self.metadata.source, self.index)
    }
}
