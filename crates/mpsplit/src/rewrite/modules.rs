//! Isolated npm package relocation and reference remediation
//!
//! After the copy, packages isolated into a sub-package move from the shared
//! npm directory to `<root>/<root>_npm`. Every reference inside the sub-package
//! (relocated package files included) is then recomputed so it still points at
//! the same file. Targets are computed lexically; nothing is probed.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexSet;
use log::{debug, trace, warn};
use serde_json::Value;
use walkdir::WalkDir;

use crate::{
    resolver::{SpecifierStyle, normalize_path, package_name_below, package_name_of_specifier},
    scanner,
    util::{relative_key, relative_specifier},
};

/// Name of the bundle-local npm directory of a sub-package
pub fn local_modules_dir_name(root: &str) -> String {
    format!("{}_npm", root.trim_matches('/'))
}

/// Packages of one sub-package moving out of the shared npm directory
#[derive(Debug, Clone)]
pub struct Relocation {
    target_root: PathBuf,
    bundle_dir: PathBuf,
    shared_modules: PathBuf,
    local_modules: PathBuf,
    packages: IndexSet<String>,
}

impl Relocation {
    pub fn new(target_root: &Path, modules_dir: &str, root: &str, packages: IndexSet<String>) -> Self {
        let root = root.trim_matches('/');
        let bundle_dir = target_root.join(root);
        Self {
            target_root: target_root.to_path_buf(),
            shared_modules: target_root.join(modules_dir),
            local_modules: bundle_dir.join(local_modules_dir_name(root)),
            bundle_dir,
            packages,
        }
    }

    pub fn local_modules(&self) -> &Path {
        &self.local_modules
    }

    /// Where a path of the pre-relocation output tree lives now
    pub fn relocated(&self, path: &Path) -> PathBuf {
        self.moved_between(path, &self.shared_modules, &self.local_modules)
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// Where a path of the current output tree lived before relocation
    pub fn original(&self, path: &Path) -> PathBuf {
        self.moved_between(path, &self.local_modules, &self.shared_modules)
            .unwrap_or_else(|| path.to_path_buf())
    }

    fn moved_between(&self, path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
        let package = package_name_below(from, path)?;
        if !self.packages.contains(&package) {
            return None;
        }
        let relative = path.strip_prefix(from).ok()?;
        Some(to.join(relative))
    }

    /// Move every package directory; missing packages are logged and skipped
    pub fn apply(&self) -> Result<usize> {
        let mut moved = 0;
        for package in &self.packages {
            let source = self.shared_modules.join(package);
            let target = self.local_modules.join(package);
            if !source.is_dir() {
                warn!("Isolated package {} was not copied, nothing to move", source.display());
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::rename(&source, &target).with_context(|| {
                format!("failed to move {} to {}", source.display(), target.display())
            })?;
            debug!("Moved {} to {}", source.display(), target.display());
            moved += 1;

            // Drop a scope directory left empty by its last package
            if let Some(scope) = source.parent().filter(|dir| *dir != self.shared_modules)
                && fs::read_dir(scope).is_ok_and(|mut entries| entries.next().is_none())
            {
                fs::remove_dir(scope)
                    .with_context(|| format!("failed to remove {}", scope.display()))?;
            }
        }
        Ok(moved)
    }

    /// Rewrite references in every text file of the sub-package; returns the
    /// number of files written
    pub fn remediate(&self) -> Result<usize> {
        if self.packages.is_empty() || !self.bundle_dir.is_dir() {
            return Ok(0);
        }
        let mut rewritten = 0;
        for entry in WalkDir::new(&self.bundle_dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", self.bundle_dir.display()))?;
            if entry.file_type().is_file() && self.remediate_file(entry.path())? {
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    fn remediate_file(&self, path: &Path) -> Result<bool> {
        let ext = path.extension().and_then(|ext| ext.to_str());
        if !matches!(ext, Some("js" | "ts" | "wxs" | "wxml" | "wxss" | "json")) {
            return Ok(false);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let rewritten = match ext {
            Some("json") => self.remediate_manifest(path, &content)?,
            Some(ext) => {
                let spans = match ext {
                    "wxml" => scanner::markup_reference_spans(&content),
                    "wxss" => scanner::style_references(&content),
                    _ => scanner::script_references(&content)
                        .into_iter()
                        .map(|reference| (reference.specifier, reference.span))
                        .collect(),
                };
                let edits: Vec<_> = spans
                    .into_iter()
                    .filter_map(|(specifier, span)| Some((span, self.rewrite_specifier(path, &specifier)?)))
                    .collect();
                (!edits.is_empty()).then(|| scanner::splice(&content, edits))
            }
            None => None,
        };

        match rewritten {
            Some(output) => {
                fs::write(path, output)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                trace!("Remediated references in {}", path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remediate_manifest(&self, path: &Path, content: &str) -> Result<Option<String>> {
        let mut manifest: Value = serde_json::from_str(content)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        let mut changed = false;

        let mut rewrite = |value: &mut Value| {
            if let Some(new) = value.as_str().and_then(|spec| self.rewrite_specifier(path, spec)) {
                *value = Value::String(new);
                changed = true;
            }
        };
        if let Some(using) = manifest.get_mut("usingComponents").and_then(Value::as_object_mut) {
            using.values_mut().for_each(&mut rewrite);
        }
        if let Some(generics) = manifest
            .get_mut("componentGenerics")
            .and_then(Value::as_object_mut)
        {
            generics
                .values_mut()
                .filter_map(|generic| generic.get_mut("default"))
                .for_each(&mut rewrite);
        }

        if !changed {
            return Ok(None);
        }
        serde_json::to_string_pretty(&manifest)
            .map(Some)
            .with_context(|| format!("failed to serialize manifest {}", path.display()))
    }

    /// New text for `specifier` written in `file`, `None` when it still holds
    fn rewrite_specifier(&self, file: &Path, specifier: &str) -> Option<String> {
        let file_dir = file.parent()?;
        let original_dir = self.original(file).parent()?.to_path_buf();

        match SpecifierStyle::of(specifier) {
            SpecifierStyle::Ignored => None,
            SpecifierStyle::Bare => {
                let package = package_name_of_specifier(specifier)?;
                if !self.packages.contains(package) {
                    return None;
                }
                relative_specifier(file_dir, &self.local_modules.join(specifier))
            }
            SpecifierStyle::Relative => {
                let target = normalize_path(&original_dir.join(specifier));
                let relocated = self.relocated(&target);
                if relocated == target && original_dir == file_dir {
                    return None;
                }
                let spec = relative_specifier(file_dir, &relocated)?;
                (spec != specifier).then_some(spec)
            }
            SpecifierStyle::Absolute => {
                let target = self.target_root.join(specifier.trim_start_matches('/'));
                let relocated = self.relocated(&normalize_path(&target));
                (relocated != target).then(|| format!("/{}", relative_key(&self.target_root, &relocated)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn create_test_file(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn relocation(target: &Path, packages: &[&str]) -> Relocation {
        Relocation::new(
            target,
            "miniprogram_npm",
            "subA",
            packages.iter().map(|p| (*p).to_owned()).collect(),
        )
    }

    #[test]
    fn test_path_mapping() {
        let relocation = relocation(Path::new("/dist"), &["gamma", "@s/ui"]);
        assert_eq!(
            relocation.relocated(Path::new("/dist/miniprogram_npm/gamma/index.js")),
            PathBuf::from("/dist/subA/subA_npm/gamma/index.js")
        );
        assert_eq!(
            relocation.relocated(Path::new("/dist/miniprogram_npm/@s/ui/btn/index")),
            PathBuf::from("/dist/subA/subA_npm/@s/ui/btn/index")
        );
        assert_eq!(
            relocation.relocated(Path::new("/dist/miniprogram_npm/beta/index.js")),
            PathBuf::from("/dist/miniprogram_npm/beta/index.js")
        );
        assert_eq!(
            relocation.original(Path::new("/dist/subA/subA_npm/gamma/lib/a.js")),
            PathBuf::from("/dist/miniprogram_npm/gamma/lib/a.js")
        );
    }

    #[test]
    fn test_relocate_and_remediate() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path();
        create_test_file(
            &target.join("miniprogram_npm/gamma/index.js"),
            "module.exports = require('../beta/index');",
        )?;
        create_test_file(&target.join("miniprogram_npm/@s/ui/btn/index.json"), "{}")?;
        create_test_file(&target.join("miniprogram_npm/beta/index.js"), "")?;
        create_test_file(
            &target.join("subA/pages/detail.js"),
            "const g = require('gamma');\nconst b = require('beta');\nconst u = require('../util');\nimport x from '/miniprogram_npm/gamma/index';",
        )?;
        create_test_file(
            &target.join("subA/pages/detail.json"),
            r#"{"usingComponents":{"ui-btn":"@s/ui/btn/index","local":"../comp/index"}}"#,
        )?;

        let relocation = relocation(target, &["gamma", "@s/ui"]);
        assert_eq!(relocation.apply()?, 2);
        assert!(target.join("subA/subA_npm/gamma/index.js").is_file());
        assert!(!target.join("miniprogram_npm/gamma").exists());
        assert!(!target.join("miniprogram_npm/@s").exists());
        assert!(target.join("miniprogram_npm/beta").is_dir());

        assert_eq!(relocation.remediate()?, 3);
        assert_eq!(
            fs::read_to_string(target.join("subA/pages/detail.js"))?,
            "const g = require('../subA_npm/gamma');\nconst b = require('beta');\nconst u = require('../util');\nimport x from '/subA/subA_npm/gamma/index';"
        );
        assert_eq!(
            fs::read_to_string(target.join("subA/subA_npm/gamma/index.js"))?,
            "module.exports = require('../../../miniprogram_npm/beta/index');"
        );
        let manifest: Value =
            serde_json::from_str(&fs::read_to_string(target.join("subA/pages/detail.json"))?)?;
        assert_eq!(
            manifest["usingComponents"]["ui-btn"],
            "../subA_npm/@s/ui/btn/index"
        );
        assert_eq!(manifest["usingComponents"]["local"], "../comp/index");
        Ok(())
    }
}
