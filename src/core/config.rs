//! Configuration management with layered hierarchy

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::catalog::is_plain_filename;
use crate::core::download::DownloadOptions;
use crate::core::draft::DEFAULT_DRAFT_FILENAME;
use crate::core::Project;

/// formsync configuration with layered hierarchy
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog listing URL used when none is given on the command line
    pub catalog_url: Option<String>,

    /// Refuse to download entries that publish no content hash
    pub reject_unhashed_forms: Option<bool>,

    /// Name of the last-saved working file
    pub draft_filename: Option<String>,
}

impl Config {
    /// Load configuration for a project (or only the global and env layers)
    pub fn load_for(project: Option<&Project>) -> Self {
        let mut config = Config::default();

        // 1. Built-in defaults (already in Default impl)

        // 2. Global user config (~/.config/formsync/config.yaml)
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::read_file(&global_path) {
                config.merge(global);
            }
        }

        // 3. Project config (.formsync/config.yaml)
        if let Some(project) = project {
            if let Some(project_config) = Self::read_file(&project.config_path()) {
                config.merge(project_config);
            }
        }

        // 4. Environment variables
        if let Ok(url) = std::env::var("FORMSYNC_CATALOG_URL") {
            if !url.is_empty() {
                config.catalog_url = Some(url);
            }
        }
        if let Ok(value) = std::env::var("FORMSYNC_REJECT_UNHASHED") {
            if let Some(flag) = parse_flag(&value) {
                config.reject_unhashed_forms = Some(flag);
            }
        }

        config
    }

    fn read_file(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_yml::from_str::<Config>(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
                None
            }
        }
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "formsync")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.catalog_url.is_some() {
            self.catalog_url = other.catalog_url;
        }
        if other.reject_unhashed_forms.is_some() {
            self.reject_unhashed_forms = other.reject_unhashed_forms;
        }
        if other.draft_filename.is_some() {
            self.draft_filename = other.draft_filename;
        }
    }

    /// The configured draft file name, or the default when unset or not a plain file name
    pub fn draft_filename(&self) -> &str {
        match self.draft_filename.as_deref() {
            Some(name) if !name.trim().is_empty() && is_plain_filename(name) => name,
            Some(name) if !name.trim().is_empty() => {
                tracing::warn!(draft_filename = name, "draft_filename must be a plain file name, using default");
                DEFAULT_DRAFT_FILENAME
            }
            _ => DEFAULT_DRAFT_FILENAME,
        }
    }

    /// Options handed to the downloader
    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            reject_unhashed_forms: self.reject_unhashed_forms.unwrap_or(false),
            draft_filename: self.draft_filename().to_string(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
