pub mod groove;
pub mod smf;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use walkdir::WalkDir;

use crate::GROOVE_EXTENSIONS;
pub use groove::{Groove, GrooveCategory, GrooveEvent, NoteEvent};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed MIDI in {path}: {message}")]
    Malformed { path: PathBuf, message: String },
    #[error("No groove at category {category}, index {groove}")]
    InvalidIndex { category: usize, groove: usize },
    #[error("Groove '{0}' is not loaded")]
    NotLoaded(String),
}

/// The groove library: categories of lazily-parsed MIDI patterns.
///
/// One lock guards the category list. It is never held across file I/O:
/// scans walk the directory before taking it, and `load` parses outside it.
#[derive(Debug, Default)]
pub struct GrooveStore {
    inner: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    root: Option<PathBuf>,
    categories: Vec<GrooveCategory>,
}

impl GrooveStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the library with the contents of `root`.
    ///
    /// First-level subdirectories become categories and the rhythm files
    /// directly inside them become grooves, both in name order. Categories
    /// with no grooves are dropped. On error the previous library is kept.
    pub fn scan(&self, root: &Path) -> Result<usize, LibraryError> {
        let categories = scan_categories(root)?;
        let groove_count = categories.iter().map(|c| c.grooves.len()).sum();

        log::info!(
            "Scanned {}: {} categories, {} grooves",
            root.display(),
            categories.len(),
            groove_count
        );

        let mut state = self.state();
        state.root = Some(root.to_path_buf());
        state.categories = categories;
        Ok(groove_count)
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.state().root.clone()
    }

    /// Cheap copy of the current library (grooves are shared).
    pub fn categories(&self) -> Vec<GrooveCategory> {
        self.state().categories.clone()
    }

    /// Every (category, groove) index pair in enumeration order.
    pub fn indices(&self) -> Vec<(usize, usize)> {
        self.state()
            .categories
            .iter()
            .enumerate()
            .flat_map(|(c, cat)| (0..cat.grooves.len()).map(move |g| (c, g)))
            .collect()
    }

    pub fn groove(&self, category: usize, groove: usize) -> Option<Arc<Groove>> {
        self.state()
            .categories
            .get(category)
            .and_then(|c| c.grooves.get(groove))
            .cloned()
    }

    /// Look up a groove by category and groove name (case-insensitive).
    pub fn find(&self, category: &str, groove: &str) -> Option<(usize, usize)> {
        let state = self.state();
        let c = state
            .categories
            .iter()
            .position(|cat| cat.name.eq_ignore_ascii_case(category))?;
        let g = state.categories[c]
            .grooves
            .iter()
            .position(|gr| gr.name.eq_ignore_ascii_case(groove))?;
        Some((c, g))
    }

    /// Parse a groove on first use and return the parsed copy.
    ///
    /// A no-op for grooves that are already parsed. Failures leave the stub
    /// in place, so a later call retries.
    pub fn load(&self, category: usize, groove: usize) -> Result<Arc<Groove>, LibraryError> {
        let stub = self
            .groove(category, groove)
            .ok_or(LibraryError::InvalidIndex { category, groove })?;
        if stub.is_parsed {
            return Ok(stub);
        }

        let parsed = match stub.parsed() {
            Ok(g) => Arc::new(g),
            Err(e) => {
                log::warn!("Failed to load groove '{}': {}", stub.name, e);
                return Err(e);
            }
        };

        let mut state = self.state();
        let slot = state
            .categories
            .get_mut(category)
            .and_then(|c| c.grooves.get_mut(groove));
        match slot {
            // Another thread may have beaten us to it, or a rescan swapped the slot.
            Some(current) if current.is_parsed && current.path == parsed.path => Ok(current.clone()),
            Some(current) if current.path == parsed.path => {
                *current = parsed.clone();
                Ok(parsed)
            }
            _ => Ok(parsed),
        }
    }
}

fn has_groove_extension(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    GROOVE_EXTENSIONS.contains(&ext.as_str())
}

fn scan_categories(root: &Path) -> Result<Vec<GrooveCategory>, LibraryError> {
    if !root.is_dir() {
        return Err(LibraryError::NotFound(root.to_path_buf()));
    }

    let mut categories = Vec::new();

    let dirs = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());

    for dir in dirs {
        let name = dir.file_name().to_string_lossy().to_string();

        let grooves: Vec<Arc<Groove>> = WalkDir::new(dir.path())
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && has_groove_extension(e.path()))
            .map(|e| {
                let stem = e
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                Arc::new(Groove::stub(&stem, &name, e.path()))
            })
            .collect();

        if grooves.is_empty() {
            continue;
        }
        log::debug!("Category '{}': {} grooves", name, grooves.len());
        categories.push(GrooveCategory { name, grooves });
    }

    Ok(categories)
}
