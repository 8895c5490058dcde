use crate::Result;
use crate::collect::{DEFAULT_PAGE_WORKERS, DEFAULT_PER_PAGE};
use crate::dataset::ProjectOverride;
use camino::Utf8Path;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File looked up in the working directory when no `--config` is given.
const CONFIG_FILE_NAME: &str = "harvest.toml";

/// The largest page size the hosting API honors.
const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pull requests requested per listing page
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Listing pages fetched concurrently
    #[serde(default = "default_page_workers")]
    pub page_workers: usize,

    /// Per-project additions to the language profile of the patch classifier.
    /// Leaving the key out keeps the shipped overrides; an empty list clears them.
    #[serde(default = "default_overrides")]
    pub classifier_overrides: Vec<ProjectOverride>,
}

const fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

const fn default_page_workers() -> usize {
    DEFAULT_PAGE_WORKERS
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// An explicit `config_path` must exist. Otherwise `harvest.toml` in `base_dir` is used
    /// when present, and the embedded defaults when it is not.
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading pr-harvest configuration file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e).into_app_err_with(|| format!("reading pr-harvest configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_PER_PAGE).contains(&self.per_page) {
            return Err(app_err!("per_page must be between 1 and {MAX_PER_PAGE}, got {}", self.per_page));
        }

        if self.page_workers == 0 {
            return Err(app_err!("page_workers must be at least 1"));
        }

        if let Some(o) = self.classifier_overrides.iter().find(|o| o.project.trim().is_empty()) {
            return Err(app_err!("classifier override accepting {:?} has an empty project name", o.accept_suffixes));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}

/// The classifier overrides that ship with the tool.
#[must_use]
pub fn default_overrides() -> Vec<ProjectOverride> {
    Config::default().classifier_overrides
}
