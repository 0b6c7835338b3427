//! Project discovery and structure

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marker directory holding the catalog database and configuration
pub const PROJECT_DIR: &str = ".formsync";

/// Directory downloaded form versions are promoted into
pub const FORMS_DIR: &str = "forms";

/// A local catalog mirror on disk
#[derive(Debug, Clone)]
pub struct Project {
    /// Root directory of the project (parent of .formsync/)
    root: PathBuf,
}

impl Project {
    /// Find project root by walking up from the current directory
    pub fn discover() -> Result<Self, ProjectError> {
        let current =
            std::env::current_dir().map_err(|e| ProjectError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find project root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, ProjectError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        loop {
            if current.join(PROJECT_DIR).is_dir() {
                return Ok(Self { root: current });
            }

            if !current.pop() {
                return Err(ProjectError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Create a new project structure at the given path
    pub fn init(path: &Path) -> Result<Self, ProjectError> {
        let root = Self::normalize(path)?;
        if root.join(PROJECT_DIR).exists() {
            return Err(ProjectError::AlreadyExists(root));
        }
        Self::create_layout(root, None)
    }

    /// Initialize even if .formsync/ exists; the catalog database is kept
    pub fn init_force(path: &Path) -> Result<Self, ProjectError> {
        let root = Self::normalize(path)?;
        Self::create_layout(root, None)
    }

    /// Initialize with a catalog location written into the project config
    pub fn init_with_catalog(path: &Path, catalog_url: &str) -> Result<Self, ProjectError> {
        let root = Self::normalize(path)?;
        if root.join(PROJECT_DIR).exists() {
            return Err(ProjectError::AlreadyExists(root));
        }
        Self::create_layout(root, Some(catalog_url))
    }

    fn normalize(path: &Path) -> Result<PathBuf, ProjectError> {
        std::fs::create_dir_all(path).map_err(|e| ProjectError::IoError(e.to_string()))?;
        Ok(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
    }

    fn create_layout(root: PathBuf, catalog_url: Option<&str>) -> Result<Self, ProjectError> {
        let project = Self { root };

        for dir in [project.formsync_dir(), project.staging_dir(), project.forms_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| ProjectError::IoError(e.to_string()))?;
        }

        std::fs::write(project.config_path(), Self::default_config(catalog_url))
            .map_err(|e| ProjectError::IoError(e.to_string()))?;

        Ok(project)
    }

    fn default_config(catalog_url: Option<&str>) -> String {
        let catalog_line = match catalog_url {
            Some(url) => format!("catalog_url: \"{}\"", url.replace('"', "\\\"")),
            None => "# catalog_url: \"file:///path/to/mirror/forms.json\"".to_string(),
        };

        format!(
            r#"# formsync project configuration

# Catalog listing used by `formsync sync` and `formsync preview`
{}

# Fail downloads of catalog entries that publish no content hash
# reject_unhashed_forms: false

# Name of the last-saved working file carried over between versions
# draft_filename: last-saved.xml
"#,
            catalog_line
        )
    }

    /// Get the project root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key identifying this project for locking and sync state
    pub fn id(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    /// Get the .formsync directory
    pub fn formsync_dir(&self) -> PathBuf {
        self.root.join(PROJECT_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.formsync_dir().join("config.yaml")
    }

    /// Advisory lock file held for the duration of a sync
    pub fn lock_path(&self) -> PathBuf {
        self.formsync_dir().join("sync.lock")
    }

    /// Scratch space for in-flight downloads
    pub fn staging_dir(&self) -> PathBuf {
        self.formsync_dir().join("staging")
    }

    pub fn forms_dir(&self) -> PathBuf {
        self.root.join(FORMS_DIR)
    }

    /// Leftover staging directories from interrupted runs
    pub fn stale_staging_dirs(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.staging_dir())
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.path().to_path_buf())
            .collect()
    }
}

/// Errors that can occur during project operations
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("not a formsync project (searched from {searched_from:?}). Run 'formsync init' to create one.")]
    NotFound { searched_from: PathBuf },

    #[error("formsync project already exists at {0:?}")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    IoError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_project_init_creates_structure() {
        let tmp = tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();

        assert!(project.formsync_dir().is_dir());
        assert!(project.config_path().exists());
        assert!(project.staging_dir().is_dir());
        assert!(project.forms_dir().is_dir());
    }

    #[test]
    fn test_project_init_fails_if_exists() {
        let tmp = tempdir().unwrap();
        Project::init(tmp.path()).unwrap();

        let err = Project::init(tmp.path()).unwrap_err();
        assert!(matches!(err, ProjectError::AlreadyExists(_)));

        // Forcing is allowed
        Project::init_force(tmp.path()).unwrap();
    }

    #[test]
    fn test_init_with_catalog_writes_url() {
        let tmp = tempdir().unwrap();
        let project = Project::init_with_catalog(tmp.path(), "file:///mirror/forms.json").unwrap();
        let config = std::fs::read_to_string(project.config_path()).unwrap();
        assert!(config.contains("catalog_url: \"file:///mirror/forms.json\""));
    }

    #[test]
    fn test_project_discover_finds_formsync_dir() {
        let tmp = tempdir().unwrap();
        Project::init(tmp.path()).unwrap();

        let subdir = tmp.path().join("some/nested/dir");
        std::fs::create_dir_all(&subdir).unwrap();

        let project = Project::discover_from(&subdir).unwrap();
        assert_eq!(
            project.root().canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_project_discover_fails_without_formsync_dir() {
        let tmp = tempdir().unwrap();
        let err = Project::discover_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ProjectError::NotFound { .. }));
    }

    #[test]
    fn test_stale_staging_dirs() {
        let tmp = tempdir().unwrap();
        let project = Project::init(tmp.path()).unwrap();
        assert!(project.stale_staging_dirs().is_empty());

        std::fs::create_dir_all(project.staging_dir().join("01ABC")).unwrap();
        assert_eq!(project.stale_staging_dirs().len(), 1);
    }
}
