use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

pub const DEFAULT_HIT_TOLERANCE: f64 = 16.0;
pub const DEFAULT_CONTEXT_CHARS: usize = 64;
pub const DEFAULT_SEARCH_TICK: Duration = Duration::from_millis(100);

const CONFIG_FILE_NAME: &str = "config.toml";

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Proximity tolerance, in points, for character hit-testing.
    pub hit_tolerance: f64,
    /// Characters of context kept on each side of a search match.
    pub search_context_chars: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub search_tick_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub availability_poll_interval: Duration,
    /// Upper bound for busy-polling a random-access source that reports
    /// data as not yet available.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub availability_timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hit_tolerance: DEFAULT_HIT_TOLERANCE,
            search_context_chars: DEFAULT_CONTEXT_CHARS,
            search_tick_interval: DEFAULT_SEARCH_TICK,
            availability_poll_interval: Duration::from_millis(5),
            availability_timeout: Duration::from_secs(30),
            pdfium_library_path: None,
        }
    }
}

impl EngineConfig {
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("net", "pagewise", "pagewise")
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("failed to decode config file {:?}", path))
    }

    /// Loads `path` if it exists, falling back to defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {:?}", parent))?;
        }
        let payload = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, payload)
            .with_context(|| format!("failed to write temp config file {:?}", tmp))?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "search_context_chars = 20\nsearch_tick_interval = 250\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.search_context_chars, 20);
        assert_eq!(config.search_tick_interval, Duration::from_millis(250));
        assert_eq!(config.hit_tolerance, DEFAULT_HIT_TOLERANCE);
    }

    #[test]
    fn save_then_load_restores_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = EngineConfig {
            hit_tolerance: 6.0,
            pdfium_library_path: Some(PathBuf::from("/opt/pdfium/libpdfium.so")),
            ..EngineConfig::default()
        };

        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
