//! JSON-file persistence for job definitions and job state snapshots.

pub mod jobs;
pub mod state;

pub use jobs::JobRepository;
pub use state::StateStore;

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A JSON array on disk, always rewritten in full.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the array; a missing or empty file yields an empty list.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes through a sibling temp file and renames it over the target, so
    /// readers never observe a half-written array.
    pub fn save<T: Serialize>(&self, items: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(items)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} entries to {}", items.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_and_empty_files_load_empty() -> Result<()> {
        let temp = TempDir::new()?;
        let file = JsonFile::new(temp.path().join("absent.json"));
        assert!(file.load::<String>()?.is_empty());

        fs::write(file.path(), "  \n")?;
        assert!(file.load::<String>()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_replaces_contents() -> Result<()> {
        let temp = TempDir::new()?;
        let file = JsonFile::new(temp.path().join("nested/items.json"));
        file.save(&["a".to_string(), "b".to_string()])?;
        file.save(&["c".to_string()])?;
        assert_eq!(file.load::<String>()?, vec!["c".to_string()]);
        assert!(!temp.path().join("nested/items.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_an_error() -> Result<()> {
        let temp = TempDir::new()?;
        let file = JsonFile::new(temp.path().join("bad.json"));
        fs::write(file.path(), "{ not json")?;
        assert!(file.load::<String>().is_err());
        Ok(())
    }
}
