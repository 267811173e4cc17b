//! Directory Import
//!
//! Builds the project tree from a local media directory:
//!
//! ```text
//! <dir>/seq01/          -> Sequences/seq01
//! <dir>/seq01/shotA/    -> Sequences/seq01/shotA
//! <dir>/seq01/a.mov     -> asset in Sequences/seq01
//! <dir>/draft.fdx       -> asset in Scripts/
//! <dir>/poster.png      -> asset in Media/
//! ```
//!
//! Hidden entries are ignored. Importing the same directory twice adds
//! nothing the second time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::model::{AssetCategory, FolderId, ModelError, Project};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// What an import added and what it left out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub folders_added: usize,
    pub assets_added: usize,
    /// Local path and the reason it was not imported
    pub skipped: Vec<(PathBuf, String)>,
}

/// Walk `dir` and add its sequences, shots and files to `project`
pub fn import_directory(project: &mut Project, dir: &Path) -> Result<ImportReport, ImportError> {
    if !dir.is_dir() {
        return Err(ImportError::NotADirectory(dir.to_path_buf()));
    }

    let mut report = ImportReport::default();
    let mut mapped: HashMap<PathBuf, FolderId> = HashMap::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                tracing::warn!(path = %path.display(), "Unreadable entry: {}", err);
                report.skipped.push((path, err.to_string()));
                continue;
            }
        };
        let path = entry.path().to_path_buf();
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type();

        let parent = if entry.depth() == 1 {
            None
        } else {
            match path.parent().and_then(|p| mapped.get(p)) {
                Some(id) => Some(*id),
                None => {
                    report.skipped.push((path, "parent folder not imported".to_string()));
                    continue;
                }
            }
        };

        if file_type.is_dir() {
            match import_folder(project, parent, &name) {
                Ok((id, added)) => {
                    mapped.insert(path, id);
                    if added {
                        report.folders_added += 1;
                    }
                }
                Err(err) => {
                    tracing::debug!(path = %path.display(), "Folder not imported: {}", err);
                    report.skipped.push((path, err.to_string()));
                }
            }
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).ok();
            match import_file(project, parent, &name, &path, size) {
                Ok(()) => report.assets_added += 1,
                Err(err) => {
                    tracing::debug!(path = %path.display(), "File not imported: {}", err);
                    report.skipped.push((path, err.to_string()));
                }
            }
        } else {
            report.skipped.push((path, "not a regular file".to_string()));
        }
    }

    tracing::info!(
        dir = %dir.display(),
        folders = report.folders_added,
        assets = report.assets_added,
        skipped = report.skipped.len(),
        "Directory imported"
    );
    Ok(report)
}

/// Top-level directories become sequences, deeper ones become folders under
/// their parent. An existing folder with the same name is reused.
fn import_folder(
    project: &mut Project,
    parent: Option<FolderId>,
    name: &str,
) -> Result<(FolderId, bool), ModelError> {
    let parent = match parent {
        Some(parent) => parent,
        None => project.top_level_folder(crate::model::SEQUENCES_FOLDER)?,
    };
    if let Some(existing) = project.find_child_folder(parent, name) {
        return Ok((existing, false));
    }
    Ok((project.add_folder(parent, name)?, true))
}

/// Loose top-level files are filed by category
fn import_file(
    project: &mut Project,
    parent: Option<FolderId>,
    name: &str,
    path: &Path,
    size: Option<u64>,
) -> Result<(), ModelError> {
    let source = Some(path.to_path_buf());
    let id = match parent {
        Some(folder) => project.add_asset(folder, name, source)?,
        None => project.file_asset(name, source, AssetCategory::from_filename(name))?,
    };
    if let Some(size) = size {
        project.set_asset_size(id, size)?;
    }
    Ok(())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn layout(dir: &Path) {
        touch(&dir.join("seq01/shotA/take1.mov"), b"take1");
        touch(&dir.join("seq01/board.png"), b"png");
        touch(&dir.join("seq02/shotB/take1.mov"), b"take1");
        touch(&dir.join("draft-v3.fdx"), b"INT. ROOFTOP");
        touch(&dir.join("poster.png"), b"png");
        touch(&dir.join(".DS_Store"), b"");
        touch(&dir.join(".cache/junk.mov"), b"");
    }

    fn paths(project: &Project) -> Vec<String> {
        let mut paths: Vec<String> = project
            .assets()
            .map(|a| format!("{}/{}", project.folder_path(a.folder()).unwrap(), a.filename()))
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_import_layout() {
        let dir = tempdir().unwrap();
        layout(dir.path());
        let mut project = Project::with_film_layout("Nightfall").unwrap();

        let report = import_directory(&mut project, dir.path()).unwrap();

        assert_eq!(report.folders_added, 4);
        assert_eq!(report.assets_added, 5);
        assert!(report.skipped.is_empty());
        assert_eq!(
            paths(&project),
            vec![
                "Nightfall/Media/poster.png",
                "Nightfall/Scripts/draft-v3.fdx",
                "Nightfall/Sequences/seq01/board.png",
                "Nightfall/Sequences/seq01/shotA/take1.mov",
                "Nightfall/Sequences/seq02/shotB/take1.mov",
            ]
        );

        let take = project
            .assets()
            .find(|a| a.filename() == "take1.mov")
            .unwrap();
        assert_eq!(take.size(), Some(5));
        assert!(take.source().unwrap().ends_with("take1.mov"));
    }

    #[test]
    fn test_reimport_adds_nothing() {
        let dir = tempdir().unwrap();
        layout(dir.path());
        let mut project = Project::new("Nightfall").unwrap();

        import_directory(&mut project, dir.path()).unwrap();
        let stats = project.stats();
        let report = import_directory(&mut project, dir.path()).unwrap();

        assert_eq!(report.folders_added, 0);
        assert_eq!(report.assets_added, 0);
        assert_eq!(report.skipped.len(), 5);
        assert_eq!(project.stats(), stats);
    }

    #[test]
    fn test_import_requires_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("poster.png");
        touch(&file, b"png");
        let mut project = Project::new("Nightfall").unwrap();

        let result = import_directory(&mut project, &file);
        assert!(matches!(result, Err(ImportError::NotADirectory(_))));
    }
}
