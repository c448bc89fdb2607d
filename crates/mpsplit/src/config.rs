//! Run configuration
//!
//! Configuration is read from a TOML file (`mpsplit.toml` by default) and then
//! overridden by command line flags. Everything downstream treats [`Config`] as
//! read-only.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use indexmap::IndexSet;
use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::walk::ExclusionFilter;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "mpsplit.toml";

/// Directory holding built npm packages in a mini-program project
pub const DEFAULT_MODULES_DIR: &str = "miniprogram_npm";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Root of the mini-program sources (the directory holding `app.json`)
    pub source_dir: PathBuf,
    /// Output directory; wiped at the start of every run
    pub target_dir: PathBuf,
    /// Extensions (with leading dot) copied verbatim wherever they are found
    pub static_extensions: Vec<String>,
    /// Directories or path fragments never visited by discovery
    pub exclude: Vec<String>,
    /// Name of the shared npm directory at the source root
    pub modules_dir: String,
    /// Alias accepted for the main bundle in deferred ownership keys
    pub main_package_name: String,
    /// Move npm packages used by a single sub-package into that sub-package
    pub split_modules: bool,
    /// Packages that must stay in the shared npm directory
    pub exclude_modules: IndexSet<String>,
    /// Where to write the dependency graph export, if anywhere
    pub analyse_dir: Option<PathBuf>,
    /// Active business group, selects the `replaceComponents` table
    pub group_name: String,
    pub group_code: GroupCodeConfig,
    pub retention: RetentionConfig,
    /// Value written to `extAppid` in the output `ext.json`
    pub ext_appid: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            target_dir: PathBuf::from("dist"),
            static_extensions: [
                ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".mp3", ".mp4", ".ttf", ".woff",
            ]
            .iter()
            .map(|ext| (*ext).to_owned())
            .collect(),
            exclude: Vec::new(),
            modules_dir: DEFAULT_MODULES_DIR.to_owned(),
            main_package_name: "main".to_owned(),
            split_modules: false,
            exclude_modules: IndexSet::new(),
            analyse_dir: None,
            group_name: String::new(),
            group_code: GroupCodeConfig::default(),
            retention: RetentionConfig::default(),
            ext_appid: None,
        }
    }
}

/// Patterns delimiting code that belongs to other business groups
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GroupCodeConfig {
    pub enabled: bool,
    pub markup_pattern: String,
    pub script_pattern: String,
}

impl Default for GroupCodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            markup_pattern: r"(?s)<!--\s*#group-code-start\s*-->.*?<!--\s*#group-code-end\s*-->"
                .to_owned(),
            script_pattern: r"(?s)/\*\s*#group-code-start\s*\*/.*?/\*\s*#group-code-end\s*\*/"
                .to_owned(),
        }
    }
}

impl GroupCodeConfig {
    pub fn markup_regex(&self) -> Result<Regex> {
        Regex::new(&self.markup_pattern)
            .with_context(|| format!("invalid group-code.markup-pattern `{}`", self.markup_pattern))
    }

    pub fn script_regex(&self) -> Result<Regex> {
        Regex::new(&self.script_pattern)
            .with_context(|| format!("invalid group-code.script-pattern `{}`", self.script_pattern))
    }
}

/// How the `subpackages` and `pages` lists of [`RetentionConfig`] are read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionMode {
    /// Keep everything
    #[default]
    All,
    /// Listed sub-packages and pages are removed
    Deny,
    /// Only listed sub-packages and pages survive
    Allow,
}

/// Which sub-packages and pages make it into the output
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetentionConfig {
    pub mode: RetentionMode,
    /// Sub-package roots
    pub subpackages: Option<Vec<String>>,
    /// Page paths as written in `app.json` (sub-package pages prefixed by their root)
    pub pages: Option<Vec<String>>,
}

impl RetentionConfig {
    /// Whether any filtering is configured at all
    pub fn is_active(&self) -> bool {
        self.mode != RetentionMode::All && (self.subpackages.is_some() || self.pages.is_some())
    }

    pub fn retains_subpackage(&self, root: &str) -> bool {
        let root = root.trim_matches('/');
        Self::retains(self.mode, self.subpackages.as_deref(), |listed| {
            listed.trim_matches('/') == root
        })
    }

    /// `page` is the full page path, e.g. `pages/index/index` or `subA/pages/detail`
    pub fn retains_page(&self, page: &str) -> bool {
        let page = page.trim_start_matches('/');
        Self::retains(self.mode, self.pages.as_deref(), |listed| {
            listed.trim_start_matches('/') == page
        })
    }

    fn retains(mode: RetentionMode, list: Option<&[String]>, matches: impl Fn(&str) -> bool) -> bool {
        match (mode, list) {
            (RetentionMode::All, _) | (_, None) => true,
            (RetentionMode::Deny, Some(list)) => !list.iter().any(|item| matches(item)),
            (RetentionMode::Allow, Some(list)) => list.iter().any(|item| matches(item)),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or from `mpsplit.toml` in the
    /// working directory when it exists, falling back to defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    debug!("No {DEFAULT_CONFIG_FILE} found, using default configuration");
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check the configuration before anything touches the file system
    pub fn validate(&self) -> Result<()> {
        if !self.source_dir.is_dir() {
            bail!(
                "source directory {} does not exist",
                self.source_dir.display()
            );
        }
        if self.target_dir.as_os_str().is_empty() {
            bail!("target directory must not be empty");
        }
        let source = path_clean::clean(&self.source_dir);
        let target = path_clean::clean(&self.target_dir);
        if source == target {
            bail!(
                "target directory {} must differ from the source directory",
                target.display()
            );
        }
        if source.starts_with(&target) {
            bail!(
                "target directory {} would contain the source directory",
                target.display()
            );
        }
        if target.starts_with(&source)
            && !ExclusionFilter::new(&source, &self.exclude).is_excluded(&target)
        {
            bail!(
                "target directory {} lies inside the source directory; list it in `exclude`",
                target.display()
            );
        }
        if self.group_code.enabled {
            self.group_code.markup_regex()?;
            self.group_code.script_regex()?;
        }
        for ext in &self.static_extensions {
            if !ext.starts_with('.') {
                bail!("static extension `{ext}` must start with a dot");
            }
        }
        Ok(())
    }

    /// Map a source path to its mirror in the output tree
    pub fn to_target(&self, source_path: &Path) -> Option<PathBuf> {
        source_path
            .strip_prefix(&self.source_dir)
            .ok()
            .map(|relative| self.target_dir.join(relative))
    }

    /// Whether `key` denotes the main bundle in a deferred ownership key
    pub fn is_main_key(&self, key: &str) -> bool {
        key.is_empty() || key == self.main_package_name
    }
}
