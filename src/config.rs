use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Groove library root (category subdirectories of MIDI files).
    pub grooves_dir: Option<PathBuf>,
    /// Where exported grooves and compositions are written.
    pub export_dir: Option<PathBuf>,
    /// Matches shown after an analysis. 0 = all.
    pub max_matches: usize,
    /// Internal clock tempo for previews.
    pub preview_bpm: f64,
    /// Sample rate used for offline previews.
    pub sample_rate: f64,
    /// Samples per block for offline previews.
    pub block_size: usize,
    /// Exports older than this are removed when a session starts.
    pub export_max_age_minutes: u64,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            grooves_dir: None,
            export_dir: None,
            max_matches: 15,
            preview_bpm: 120.0,
            sample_rate: 44_100.0,
            block_size: 512,
            export_max_age_minutes: 60,
            workers: 0,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/bandmate/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from a specific file, falling back to defaults on error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Groove library root: configured path, else the first default location
    /// that exists and has at least one subdirectory.
    pub fn resolve_grooves_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.grooves_dir {
            return Some(dir.clone());
        }
        default_grooves_candidates()
            .into_iter()
            .find(|dir| has_subdirectory(dir))
    }

    /// Export directory: configured path, else the XDG data dir, else the temp dir.
    pub fn resolve_export_dir(&self) -> PathBuf {
        if let Some(dir) = &self.export_dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.data_dir().join("exports"))
            .unwrap_or_else(|| std::env::temp_dir().join(format!("{}_exports", crate::APP_NAME)))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn default_grooves_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        candidates.push(dirs.data_dir().join("Grooves"));
    }
    candidates.push(PathBuf::from("Grooves"));
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join("Grooves"));
    }
    candidates
}

fn has_subdirectory(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).any(|e| e.path().is_dir()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_matches, 15);
        assert_eq!(config.preview_bpm, 120.0);
        assert_eq!(config.block_size, 512);
        assert_eq!(config.export_max_age_minutes, 60);
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new("config_partial");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "preview_bpm = 95.0\ngrooves_dir = \"/srv/grooves\"\n").unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.preview_bpm, 95.0);
        assert_eq!(config.grooves_dir, Some(PathBuf::from("/srv/grooves")));
        assert_eq!(config.max_matches, 15);
        assert_eq!(config.resolve_grooves_dir(), Some(PathBuf::from("/srv/grooves")));
    }

    #[test]
    fn test_bad_file_falls_back() {
        let dir = TempDir::new("config_bad");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_matches = \"lots\"").unwrap();
        assert_eq!(AppConfig::load_from(&path).max_matches, 15);
    }

    #[test]
    fn test_export_dir_override() {
        let config = AppConfig {
            export_dir: Some(PathBuf::from("/tmp/out")),
            ..AppConfig::default()
        };
        assert_eq!(config.resolve_export_dir(), PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_has_subdirectory() {
        let dir = TempDir::new("config_subdir");
        assert!(!has_subdirectory(dir.path()));
        std::fs::create_dir(dir.path().join("Rock")).unwrap();
        assert!(has_subdirectory(dir.path()));
        assert!(!has_subdirectory(&dir.path().join("missing")));
    }
}
