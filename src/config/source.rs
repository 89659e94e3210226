//! Where desired configuration comes from.
//!
//! A source reports a cheap, comparable [`ChangeIndicator`] and, on demand,
//! a parsed and validated [`BrokerConfig`] together with the indicator of
//! exactly the content that was parsed.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::BrokerConfig;

/// Comparable fingerprint of the source's current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeIndicator {
    pub modified: Option<SystemTime>,
    pub content_hash: u64,
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

pub trait ConfigSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    fn change_indicator(&self) -> Result<ChangeIndicator, ConfigError>;

    fn load(&self) -> Result<(ChangeIndicator, BrokerConfig), ConfigError>;
}

/// A TOML file on disk.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<(ChangeIndicator, String), ConfigError> {
        let modified = fs::metadata(&self.path)?.modified().ok();
        let content = fs::read_to_string(&self.path)?;
        let indicator = ChangeIndicator {
            modified,
            content_hash: hash_of(content.as_str()),
        };
        Ok((indicator, content))
    }
}

impl ConfigSource for FileConfigSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn change_indicator(&self) -> Result<ChangeIndicator, ConfigError> {
        self.read().map(|(indicator, _)| indicator)
    }

    fn load(&self) -> Result<(ChangeIndicator, BrokerConfig), ConfigError> {
        let (indicator, content) = self.read()?;
        Ok((indicator, parse_config(&content)?))
    }
}

/// An in-memory document for embedding and tests. Every
/// [`set`](MemoryConfigSource::set) counts as a change, even with
/// identical content.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    state: Mutex<(u64, String)>,
}

impl MemoryConfigSource {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            state: Mutex::new((0, content.into())),
        }
    }

    /// Replace the document.
    pub fn set(&self, content: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.0 += 1;
        state.1 = content.into();
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).0
    }

    fn snapshot(&self) -> (ChangeIndicator, String) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let indicator = ChangeIndicator {
            modified: None,
            content_hash: hash_of(&(state.0, state.1.as_str())),
        };
        (indicator, state.1.clone())
    }
}

impl ConfigSource for MemoryConfigSource {
    fn describe(&self) -> String {
        format!("memory (revision {})", self.revision())
    }

    fn change_indicator(&self) -> Result<ChangeIndicator, ConfigError> {
        Ok(self.snapshot().0)
    }

    fn load(&self) -> Result<(ChangeIndicator, BrokerConfig), ConfigError> {
        let (indicator, content) = self.snapshot();
        Ok((indicator, parse_config(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_indicator_follows_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.toml");
        fs::write(&path, "[reload]\nperiod_ms = 10\n").unwrap();

        let source = FileConfigSource::new(&path);
        let first = source.change_indicator().unwrap();
        assert_eq!(source.change_indicator().unwrap(), first);

        fs::write(&path, "[reload]\nperiod_ms = 20\n").unwrap();
        let (second, config) = source.load().unwrap();
        assert_ne!(second.content_hash, first.content_hash);
        assert_eq!(config.reload.period_ms, 20);
    }

    #[test]
    fn test_memory_set_is_a_change() {
        let source = MemoryConfigSource::new("");
        let before = source.change_indicator().unwrap();
        source.set("");
        assert_ne!(source.change_indicator().unwrap(), before);
        assert_eq!(source.revision(), 1);
    }

    #[test]
    fn test_invalid_document_fails_load_only() {
        let source = MemoryConfigSource::new("[reload");
        assert!(source.change_indicator().is_ok());
        assert!(matches!(source.load(), Err(ConfigError::Parse(_))));
    }
}
