//! src/config/audio_library.rs
//!
//! Keyword -> sound file mapping used by `!audio <keyword>`. Loaded once at
//! startup from a whitespace-delimited `key value key value ...` file and never
//! mutated afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioLibrary {
    entries: HashMap<String, PathBuf>,
}

impl AudioLibrary {
    /// Parse alternating keyword/path tokens. An unmatched trailing keyword is
    /// ignored; a repeated keyword keeps its last path.
    pub fn parse(content: &str) -> Self {
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() % 2 == 1 {
            debug!("Ignoring unmatched trailing keyword '{}'", tokens[tokens.len() - 1]);
        }

        let entries = tokens
            .chunks_exact(2)
            .map(|pair| (pair[0].to_string(), PathBuf::from(pair[1])))
            .collect();
        Self { entries }
    }

    pub async fn load(path: &Path) -> Result<Self, Error> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("could not read {}: {e}", path.display())))?;
        let library = Self::parse(&content);
        info!("Loaded {} audio keywords from {}", library.len(), path.display());
        Ok(library)
    }

    pub fn get(&self, keyword: &str) -> Option<&Path> {
        self.entries.get(keyword).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known keywords, sorted.
    pub fn keywords(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
