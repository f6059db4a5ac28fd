//! Image folder scanner
//!
//! Recursive discovery of dive photos for folder import. Files are selected by
//! magic bytes, not extension: anything `infer` recognizes as an image is
//! returned, including formats the vision engine will later reject (those
//! become per-item `UNSUPPORTED_IMAGE_FORMAT` failures instead of vanishing).

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Bytes read from each file for type detection
const SNIFF_LEN: usize = 64;

/// Folder scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Cannot access file
    #[error("File access error {0}: {1}")]
    FileAccessError(PathBuf, String),
}

/// Image folder scanner
pub struct ImageFolderScanner {
    ignore_names: Vec<String>,
    max_depth: Option<usize>,
}

impl ImageFolderScanner {
    /// Scanner skipping hidden entries and OS metadata files
    pub fn new() -> Self {
        Self {
            ignore_names: vec![
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                "__MACOSX".to_string(),
                "node_modules".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Image files under `root_path`, sorted by path
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut candidate_files = Vec::new();
        let mut symlink_visited = HashSet::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() {
                        candidate_files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        let mut images: Vec<PathBuf> = candidate_files
            .into_iter()
            .filter(|path| match is_image_file(path) {
                Ok(is_image) => is_image,
                Err(e) => {
                    tracing::warn!("Error verifying {}: {}", path.display(), e);
                    false
                }
            })
            .collect();
        images.sort();

        tracing::debug!(
            root = %root_path.display(),
            images = images.len(),
            "Folder scan complete"
        );

        Ok(images)
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        let file_name = entry.file_name().to_string_lossy();

        if file_name.starts_with('.') || self.ignore_names.iter().any(|n| file_name == n.as_str()) {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!("Symlink loop detected: {}", entry.path().display());
                    return false;
                }
            }
        }

        true
    }
}

impl Default for ImageFolderScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// File name used as the batch item name
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn is_image_file(path: &Path) -> Result<bool, ScanError> {
    let mut file =
        File::open(path).map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;

    let mut buffer = [0u8; SNIFF_LEN];
    let bytes_read = file
        .read(&mut buffer)
        .map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;

    Ok(infer::is_image(&buffer[..bytes_read]))
}
