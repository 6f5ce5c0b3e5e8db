use super::{Document, is_supported_extension};
use crate::error::IndexingError;
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Progress is reported every this many collected documents
pub const PROGRESS_INTERVAL: usize = 200;

/// Walks a snapshot and reads every allow-listed text file
pub struct FileCollector {
    root: PathBuf,
    repo: String,
    max_files: usize,
}

impl FileCollector {
    pub fn new(root: impl AsRef<Path>, repo: impl Into<String>, max_files: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            repo: repo.into(),
            max_files,
        }
    }

    /// Collect documents in a deterministic (name-sorted) order
    ///
    /// Stops silently once `max_files` documents have been collected. `on_progress` is
    /// called with the running document count every [`PROGRESS_INTERVAL`] documents.
    /// Fails with [`IndexingError::NoFilesFound`] when nothing qualifies.
    pub fn collect(&self, on_progress: &dyn Fn(usize)) -> Result<Vec<Document>, IndexingError> {
        if !self.root.is_dir() {
            return Err(IndexingError::WalkFailed(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut documents = Vec::new();

        for entry in walker {
            if documents.len() >= self.max_files {
                tracing::info!(
                    "Reached file cap of {}, ignoring remaining files",
                    self.max_files
                );
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(is_supported_extension);
            if !supported {
                continue;
            }

            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("Skipping unreadable file {:?}: {}", path, e);
                    continue;
                }
            };

            let content = String::from_utf8_lossy(&bytes).into_owned();
            if content.trim().is_empty() {
                continue;
            }

            let source = relative_source(&self.root, path);
            tracing::debug!("Collected {}", source);

            documents.push(Document {
                source,
                repo: self.repo.clone(),
                content,
            });

            if documents.len() % PROGRESS_INTERVAL == 0 {
                on_progress(documents.len());
            }
        }

        if documents.is_empty() {
            return Err(IndexingError::NoFilesFound(self.root.display().to_string()));
        }

        tracing::info!(
            "Collected {} documents from {}",
            documents.len(),
            self.root.display()
        );
        Ok(documents)
    }
}

/// Path relative to `root`, always `/`-separated
fn relative_source(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
