//! Source tree traversal
//!
//! [`SourceWalker`] yields the regular files below a root lazily. Calling
//! [`SourceWalker::files`] again restarts the traversal from scratch. The same
//! exclusion predicate is used by the dependency walk to skip references into
//! excluded directories.

use std::path::{Path, PathBuf};

use log::trace;
use walkdir::WalkDir;

/// Directory names never descended into
const ALWAYS_EXCLUDED: &[&str] = &["node_modules", ".git"];

/// Decides whether a path below the source root is out of bounds
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    root: PathBuf,
    patterns: Vec<String>,
}

impl ExclusionFilter {
    pub fn new(root: &Path, patterns: &[String]) -> Self {
        Self {
            root: root.to_path_buf(),
            patterns: patterns
                .iter()
                .map(|pattern| pattern.trim_matches('/').replace('\\', "/"))
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    /// A path is excluded when one of its components is always excluded, or
    /// when its root-relative form starts with or contains a configured pattern
    pub fn is_excluded(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if relative.components().any(|component| {
            ALWAYS_EXCLUDED
                .iter()
                .any(|name| component.as_os_str() == *name)
        }) {
            return true;
        }

        let relative = relative.to_string_lossy().replace('\\', "/");
        self.patterns.iter().any(|pattern| {
            relative == *pattern
                || relative.starts_with(&format!("{pattern}/"))
                || relative.contains(&format!("/{pattern}/"))
        })
    }
}

/// Lazy, restartable file traversal below a root directory
#[derive(Debug, Clone)]
pub struct SourceWalker {
    root: PathBuf,
    filter: ExclusionFilter,
}

impl SourceWalker {
    pub fn new(root: &Path, filter: ExclusionFilter) -> Self {
        Self {
            root: root.to_path_buf(),
            filter,
        }
    }

    /// Every regular file below the root that is not excluded
    pub fn files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.filter.is_excluded(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    trace!("Skipping unreadable entry: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
    }

    /// Files whose extension is one of `extensions` (given with a leading dot)
    pub fn files_with_extensions<'a>(
        &'a self,
        extensions: &'a [String],
    ) -> impl Iterator<Item = PathBuf> + 'a {
        self.files().filter(move |path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    extensions
                        .iter()
                        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    fn touch(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, "")?;
        Ok(())
    }

    #[test]
    fn test_walk_skips_excluded_directories() -> Result<()> {
        let temp = TempDir::new()?;
        let root = temp.path();
        touch(&root.join("images/logo.png"))?;
        touch(&root.join("node_modules/pkg/icon.png"))?;
        touch(&root.join("docs/draft/a.png"))?;
        touch(&root.join("pages/index/bg.jpg"))?;
        touch(&root.join("pages/index/index.js"))?;

        let walker = SourceWalker::new(root, ExclusionFilter::new(root, &["docs".to_owned()]));
        let extensions = vec![".png".to_owned(), ".jpg".to_owned()];
        let found: Vec<_> = walker
            .files_with_extensions(&extensions)
            .map(|path| path.strip_prefix(root).map(Path::to_path_buf))
            .collect::<Result<_, _>>()?;

        assert_eq!(
            found,
            vec![
                PathBuf::from("images/logo.png"),
                PathBuf::from("pages/index/bg.jpg")
            ]
        );

        // Restartable: a second pass sees the same files
        assert_eq!(walker.files_with_extensions(&extensions).count(), 2);
        Ok(())
    }

    #[test]
    fn test_exclusion_patterns() {
        let root = Path::new("/app");
        let filter = ExclusionFilter::new(root, &["mock/".to_owned(), "tmp".to_owned()]);
        assert!(filter.is_excluded(Path::new("/app/mock/data.js")));
        assert!(filter.is_excluded(Path::new("/app/pages/tmp/a.js")));
        assert!(filter.is_excluded(Path::new("/app/node_modules/x/index.js")));
        assert!(!filter.is_excluded(Path::new("/app/mockery/a.js")));
        assert!(!filter.is_excluded(Path::new("/app/pages/index/index.js")));
    }
}
