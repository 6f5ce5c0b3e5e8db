/// Centralized platform-specific path computation
///
/// Follows the platform conventions exposed by the `dirs` crate
/// (XDG on Linux, `Library/Application Support` on macOS, `%LOCALAPPDATA%` on Windows).
use std::path::{Path, PathBuf};

const FOLDER_NAME: &str = "repo-rag";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Get the appropriate data directory for the current platform
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the appropriate config directory for the current platform
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Returns: {data_dir}/repo-rag
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(FOLDER_NAME)
    }

    /// Returns: {config_dir}/repo-rag
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(FOLDER_NAME)
    }

    /// Returns: {config_dir}/repo-rag/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }

    /// Directory holding one shallow snapshot per repository id
    pub fn repos_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("repos")
    }

    /// Directory holding one vector store per repository id
    pub fn vector_stores_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("vector_stores")
    }

    /// Directory holding per-repository ingestion lock files
    pub fn locks_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("locks")
    }
}
