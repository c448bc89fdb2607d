//! Root manifest (`app.json`) model
//!
//! Only the fields that drive the split are modelled; rewriting works on the
//! raw JSON value so unknown fields survive untouched.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use indexmap::IndexSet;
use serde::Deserialize;

pub const APP_MANIFEST: &str = "app.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default, alias = "subpackages")]
    pub sub_packages: Vec<SubPackage>,
    #[serde(default)]
    pub tab_bar: Option<TabBar>,
    #[serde(default)]
    pub sitemap_location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubPackage {
    pub root: String,
    #[serde(default)]
    pub pages: Vec<String>,
}

impl SubPackage {
    /// Root without surrounding slashes, the bundle's identity
    pub fn root_dir(&self) -> &str {
        self.root.trim_matches('/')
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabBar {
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub list: Vec<TabBarItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabBarItem {
    pub page_path: String,
    #[serde(default)]
    pub icon_path: Option<String>,
    #[serde(default)]
    pub selected_icon_path: Option<String>,
}

impl AppManifest {
    /// Read and validate `app.json` from the source root
    pub fn load(source_dir: &Path) -> Result<Self> {
        let path = source_dir.join(APP_MANIFEST);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read root manifest {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse root manifest {}", path.display()))?;
        manifest
            .validate()
            .with_context(|| format!("invalid root manifest {}", path.display()))?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pages.is_empty() {
            bail!("`pages` must list at least one page");
        }
        let mut roots = IndexSet::new();
        for sub in &self.sub_packages {
            let root = sub.root_dir();
            if root.is_empty() {
                bail!("sub-package with an empty `root`");
            }
            if !roots.insert(root) {
                bail!("sub-package root `{root}` is declared twice");
            }
            if sub.pages.is_empty() {
                bail!("sub-package `{root}` lists no pages");
            }
        }
        Ok(())
    }

    /// Files the tab bar points at (icons)
    pub fn tab_bar_icons(&self) -> impl Iterator<Item = &str> {
        self.tab_bar
            .iter()
            .flat_map(|tab_bar| tab_bar.list.iter())
            .flat_map(|item| [item.icon_path.as_deref(), item.selected_icon_path.as_deref()])
            .flatten()
            .filter(|icon| !icon.is_empty())
    }

    pub fn has_custom_tab_bar(&self) -> bool {
        self.tab_bar.as_ref().is_some_and(|tab_bar| tab_bar.custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lowercase_subpackages_alias() -> Result<()> {
        let manifest: AppManifest = serde_json::from_str(
            r#"{
                "pages": ["pages/index/index"],
                "subpackages": [{ "root": "subA/", "pages": ["pages/detail"] }],
                "tabBar": { "list": [{ "pagePath": "pages/index/index", "iconPath": "img/home.png" }] }
            }"#,
        )?;
        manifest.validate()?;
        assert_eq!(manifest.sub_packages.len(), 1);
        assert_eq!(manifest.sub_packages[0].root_dir(), "subA");
        assert_eq!(manifest.tab_bar_icons().collect::<Vec<_>>(), vec!["img/home.png"]);
        Ok(())
    }

    #[test]
    fn test_duplicate_roots_rejected() -> Result<()> {
        let manifest: AppManifest = serde_json::from_str(
            r#"{
                "pages": ["pages/index/index"],
                "subPackages": [
                    { "root": "subA", "pages": ["a"] },
                    { "root": "/subA/", "pages": ["b"] }
                ]
            }"#,
        )?;
        assert!(manifest.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_missing_pages_rejected() -> Result<()> {
        let manifest: AppManifest = serde_json::from_str(r#"{ "pages": [] }"#)?;
        assert!(manifest.validate().is_err());
        Ok(())
    }
}
