//! Project Store
//!
//! A project lives in a single JSON document. Saves go through a temp file
//! in the same directory, an fsync and a rename, so a crash mid-save leaves
//! either the old document or the new one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::Project;

const APP_DIR: &str = "reel-sync";
const PROJECTS_DIR: &str = "projects";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project file not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed project file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not determine the data directory")]
    NoDataDir,
}

/// Load and save one project document
#[derive(Debug, Clone)]
pub struct ProjectStore {
    path: PathBuf,
}

impl ProjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory bare project names resolve into
    pub fn default_dir() -> Result<PathBuf, StoreError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join(PROJECTS_DIR))
            .ok_or(StoreError::NoDataDir)
    }

    /// Use `arg` as a path if it looks like one, otherwise treat it as a
    /// project name under [`default_dir`](Self::default_dir)
    pub fn resolve(arg: &str) -> Result<Self, StoreError> {
        let looks_like_path =
            arg.contains(['/', '\\']) || arg.ends_with(".json") || Path::new(arg).is_absolute();
        if looks_like_path {
            return Ok(Self::new(arg));
        }
        Ok(Self::new(Self::default_dir()?.join(format!("{}.json", arg))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the document. One that breaks the tree invariants is reported
    /// as [`StoreError::Format`].
    pub fn load(&self) -> Result<Project, StoreError> {
        let data = fs::read(&self.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(self.path.clone())
            } else {
                StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })?;
        let project = serde_json::from_slice(&data).map_err(|e| StoreError::Format {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %self.path.display(), "Loaded project");
        Ok(project)
    }

    pub fn save(&self, project: &Project) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(project).map_err(|e| StoreError::Format {
            path: self.path.clone(),
            source: e,
        })?;
        atomic_write(&self.path, &data)?;
        tracing::debug!(path = %self.path.display(), bytes = data.len(), "Saved project");
        Ok(())
    }
}

/// Write `data` to `path` via a synced temp file and a rename
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(io_err(&parent))?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string()),
        std::process::id()
    ));

    let written = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(&temp_path)(e));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(path)(e));
    }

    sync_directory(&parent);
    Ok(())
}

/// Make the rename durable where the platform allows fsync on directories
fn sync_directory(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            tracing::warn!(dir = %dir.display(), "Directory sync failed: {}", e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path().join("nested").join("nightfall.json"));

        let mut project = Project::with_film_layout("Nightfall").unwrap();
        let seq01 = project.add_sequence("seq01").unwrap();
        project.add_asset(seq01, "shotA.mov", None).unwrap();

        store.save(&project).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.id(), project.id());
        assert_eq!(loaded.stats(), project.stats());
        assert_eq!(
            loaded.folder_path(seq01).unwrap(),
            "Nightfall/Sequences/seq01"
        );
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path().join("nightfall.json"));
        let project = Project::new("Nightfall").unwrap();

        store.save(&project).unwrap();
        store.save(&project).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["nightfall.json".to_string()]);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let missing = ProjectStore::new(dir.path().join("missing.json"));
        assert!(matches!(missing.load(), Err(StoreError::NotFound(_))));

        let corrupt_path = dir.path().join("corrupt.json");
        fs::write(&corrupt_path, b"{ not json").unwrap();
        let corrupt = ProjectStore::new(corrupt_path);
        assert!(matches!(corrupt.load(), Err(StoreError::Format { .. })));
    }

    #[test]
    fn test_load_rejects_broken_tree() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path().join("nightfall.json"));
        let mut project = Project::with_film_layout("Nightfall").unwrap();
        let seq01 = project.add_sequence("seq01").unwrap();
        let asset = project.add_asset(seq01, "shotA.mov", None).unwrap();
        store.save(&project).unwrap();
        let saved: serde_json::Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();

        let mut no_root = saved.clone();
        no_root["folders"] = serde_json::json!({});
        fs::write(store.path(), serde_json::to_vec(&no_root).unwrap()).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Format { .. })));

        let mut dangling = saved;
        dangling["assets"][asset.to_string()]["folder"] =
            serde_json::json!(crate::model::FolderId::new().to_string());
        fs::write(store.path(), serde_json::to_vec(&dangling).unwrap()).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Format { .. })));
    }

    #[test]
    fn test_resolve() {
        let explicit = ProjectStore::resolve("./films/nightfall.json").unwrap();
        assert_eq!(explicit.path(), Path::new("./films/nightfall.json"));

        if let Ok(dir) = ProjectStore::default_dir() {
            let named = ProjectStore::resolve("nightfall").unwrap();
            assert_eq!(named.path(), dir.join("nightfall.json"));
        }
    }
}
