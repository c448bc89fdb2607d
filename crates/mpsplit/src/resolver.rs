use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;

use crate::config::Config;

/// Extensions tried, in order, for a script reference without extension
const SCRIPT_EXTENSIONS: &[&str] = &["js", "ts"];

/// Files that make a path a component (any one of them is enough)
const COMPONENT_EXTENSIONS: &[&str] = &["json", "js", "ts", "wxml"];

/// How a reference is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierStyle {
    /// `./x`, `../x`
    Relative,
    /// `/x`, relative to the source root
    Absolute,
    /// `pkg`, `pkg/sub`, `@scope/pkg`: an npm package or a root-relative path
    Bare,
    /// Plugins, remote URLs, template expressions
    Ignored,
}

impl SpecifierStyle {
    pub fn of(specifier: &str) -> Self {
        let specifier = specifier.trim();
        if specifier.is_empty()
            || specifier.contains("://")
            || specifier.contains("{{")
            || specifier.starts_with("data:")
        {
            Self::Ignored
        } else if specifier == "." || specifier.starts_with("./") || specifier.starts_with("../") {
            Self::Relative
        } else if specifier.starts_with('/') {
            Self::Absolute
        } else {
            Self::Bare
        }
    }
}

/// What kind of target a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// A script; extension and `index` file are optional
    Script,
    /// A component directory or base name shared by `.js/.json/.wxml/.wxss`
    Component,
    /// A file whose extension is optional and defaults to the given one
    File(&'static str),
}

/// Result of resolving a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedReference {
    /// A file (or component base path) in the project sources
    Local(PathBuf),
    /// A file (or component base path) inside a package of the shared npm directory
    Module { package: String, path: PathBuf },
}

impl ResolvedReference {
    pub fn path(&self) -> &Path {
        match self {
            Self::Local(path) | Self::Module { path, .. } => path,
        }
    }
}

/// Lexically normalize a path (`.` and `..` folded, no file system access)
pub fn normalize_path(path: &Path) -> PathBuf {
    path_clean::clean(path)
}

#[derive(Debug)]
pub struct ModuleResolver {
    source_root: PathBuf,
    modules_root: PathBuf,
    modules_dir_name: String,
    /// Cache of probed candidates: (candidate, kind) -> resolved path
    probe_cache: FxHashMap<(PathBuf, ProbeKind), Option<PathBuf>>,
}

impl ModuleResolver {
    pub fn new(config: &Config) -> Self {
        let source_root = normalize_path(&config.source_dir);
        Self {
            modules_root: source_root.join(&config.modules_dir),
            modules_dir_name: config.modules_dir.clone(),
            source_root,
            probe_cache: FxHashMap::default(),
        }
    }

    /// Name of the npm package owning `path`, if it lies in the shared npm directory
    pub fn package_of(&self, path: &Path) -> Option<String> {
        package_name_below(&self.modules_root, path)
    }

    /// Resolve `specifier` as written in `from`.
    ///
    /// Relative and absolute references to missing files are errors. Bare
    /// references that match neither an npm package nor a project file are
    /// logged and yield `None`, as do ignored references.
    pub fn resolve(
        &mut self,
        from: &Path,
        specifier: &str,
        kind: ProbeKind,
    ) -> Result<Option<ResolvedReference>> {
        let specifier = specifier.trim();
        let from_dir = from.parent().unwrap_or(&self.source_root).to_path_buf();

        match SpecifierStyle::of(specifier) {
            SpecifierStyle::Ignored => {
                trace!("Ignoring reference '{specifier}' in {}", from.display());
                Ok(None)
            }
            SpecifierStyle::Relative => {
                let candidate = self.within_root(&from_dir.join(specifier), from, specifier)?;
                self.require(from, specifier, &candidate, kind).map(Some)
            }
            SpecifierStyle::Absolute => {
                let candidate = self.source_root.join(specifier.trim_start_matches('/'));
                let candidate = self.within_root(&candidate, from, specifier)?;
                self.require(from, specifier, &candidate, kind).map(Some)
            }
            SpecifierStyle::Bare => Ok(self.resolve_bare(&from_dir, from, specifier, kind)),
        }
    }

    /// Bare references: npm directories from the referencing file upwards
    /// first, then the referencing directory, then the source root
    fn resolve_bare(
        &mut self,
        from_dir: &Path,
        from: &Path,
        specifier: &str,
        kind: ProbeKind,
    ) -> Option<ResolvedReference> {
        let mut candidates: Vec<PathBuf> = from_dir
            .ancestors()
            .take_while(|dir| dir.starts_with(&self.source_root))
            .map(|dir| dir.join(&self.modules_dir_name).join(specifier))
            .collect();
        candidates.push(from_dir.join(specifier));
        candidates.push(self.source_root.join(specifier));

        for candidate in candidates {
            let candidate = normalize_path(&candidate);
            if !candidate.starts_with(&self.source_root) {
                continue;
            }
            if let Some(found) = self.probe(&candidate, kind) {
                debug!(
                    "Resolved '{specifier}' from {} to {}",
                    from.display(),
                    found.display()
                );
                return Some(self.classify(found));
            }
        }

        warn!(
            "Cannot resolve module '{specifier}' referenced from {}, skipping",
            from.display()
        );
        None
    }

    fn require(
        &mut self,
        from: &Path,
        specifier: &str,
        candidate: &Path,
        kind: ProbeKind,
    ) -> Result<ResolvedReference> {
        match self.probe(candidate, kind) {
            Some(found) => Ok(self.classify(found)),
            None => bail!(
                "cannot resolve '{specifier}' referenced from {}: {} does not exist",
                from.display(),
                candidate.display()
            ),
        }
    }

    fn within_root(&self, candidate: &Path, from: &Path, specifier: &str) -> Result<PathBuf> {
        let normalized = normalize_path(candidate);
        if !normalized.starts_with(&self.source_root) {
            bail!(
                "reference '{specifier}' in {} escapes the source directory",
                from.display()
            );
        }
        Ok(normalized)
    }

    fn classify(&self, path: PathBuf) -> ResolvedReference {
        match self.package_of(&path) {
            Some(package) => ResolvedReference::Module { package, path },
            None => ResolvedReference::Local(path),
        }
    }

    /// Probe the file system for `candidate`, caching the outcome
    fn probe(&mut self, candidate: &Path, kind: ProbeKind) -> Option<PathBuf> {
        let key = (candidate.to_path_buf(), kind);
        if let Some(cached) = self.probe_cache.get(&key) {
            return cached.clone();
        }

        let found = match kind {
            ProbeKind::Script => probe_script(candidate),
            ProbeKind::Component => probe_component(candidate),
            ProbeKind::File(default_ext) => probe_file(candidate, default_ext),
        };
        self.probe_cache.insert(key, found.clone());
        found
    }
}

fn probe_script(candidate: &Path) -> Option<PathBuf> {
    if candidate.is_file() {
        return Some(candidate.to_path_buf());
    }
    for ext in SCRIPT_EXTENSIONS {
        let with_ext = append_extension(candidate, ext);
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    if candidate.is_dir() {
        for ext in SCRIPT_EXTENSIONS {
            let index = candidate.join(format!("index.{ext}"));
            if index.is_file() {
                return Some(index);
            }
        }
    }
    None
}

/// Components resolve to their base path (no extension)
fn probe_component(candidate: &Path) -> Option<PathBuf> {
    let is_component = |base: &Path| {
        COMPONENT_EXTENSIONS
            .iter()
            .any(|ext| append_extension(base, ext).is_file())
    };
    if is_component(candidate) {
        return Some(candidate.to_path_buf());
    }
    let index = candidate.join("index");
    if candidate.is_dir() && is_component(&index) {
        return Some(index);
    }
    None
}

fn probe_file(candidate: &Path, default_ext: &str) -> Option<PathBuf> {
    if candidate.is_file() {
        return Some(candidate.to_path_buf());
    }
    let with_ext = append_extension(candidate, default_ext);
    with_ext.is_file().then_some(with_ext)
}

/// `a/b` + `js` -> `a/b.js`, keeping dots already in the file name
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Package name of `path` below an npm directory: the first component, or the
/// first two for scoped packages
pub fn package_name_below(modules_root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(modules_root).ok()?;
    let mut parts = relative.components().filter_map(|component| match component {
        Component::Normal(part) => part.to_str(),
        _ => None,
    });
    let first = parts.next()?;
    if first.starts_with('@') {
        let second = parts.next()?;
        Some(format!("{first}/{second}"))
    } else {
        Some(first.to_owned())
    }
}

/// Package name addressed by a bare specifier: `lodash/get` -> `lodash`,
/// `@scope/pkg/x` -> `@scope/pkg`
pub fn package_name_of_specifier(specifier: &str) -> Option<&str> {
    if SpecifierStyle::of(specifier) != SpecifierStyle::Bare {
        return None;
    }
    if specifier.starts_with('@') {
        let mut slashes = specifier.match_indices('/').map(|(idx, _)| idx);
        let _scope_end = slashes.next()?;
        match slashes.next() {
            Some(end) => Some(&specifier[..end]),
            None => Some(specifier),
        }
    } else {
        Some(specifier.split('/').next().unwrap_or(specifier))
    }
}
