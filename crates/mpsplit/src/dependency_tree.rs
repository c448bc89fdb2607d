//! Per-bundle dependency trees
//!
//! One [`DependencyTree`] exists per bundle: the main package and every
//! sub-package. A tree walks from its entry pages through script requires,
//! markup imports, style imports and manifest component declarations, and
//! accumulates the files it reaches plus the npm packages those files live in.
//!
//! Files owned by another bundle are never walked by the current tree; they are
//! pushed onto the [`DeferredQueue`] and merged into their owner once every
//! tree has finished walking.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::Value;

use crate::{
    app_manifest::{APP_MANIFEST, AppManifest},
    config::Config,
    deferred::DeferredQueue,
    resolver::{ModuleResolver, ProbeKind, append_extension},
    rewrite::{components::substitute_source, group_code::GroupCodeMatcher},
    scanner,
    types::{BundleKind, BundleLayout, MAIN_BUNDLE_KEY},
    util::relative_key,
    walk::ExclusionFilter,
};

/// Files probed for a page or component, in this order; only the first
/// script extension that exists is taken
const SCRIPT_EXTENSIONS: &[&str] = &["js", "ts"];
const COMPANION_EXTENSIONS: &[&str] = &["json", "wxml", "wxss"];

/// Optional project-level files copied along with the main bundle
const PROJECT_FILES: &[&str] = &[
    "app.wxss",
    "project.config.json",
    "project.private.config.json",
    "ext.json",
];

/// How a file is scanned for further references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Script,
    Manifest,
    Markup,
    Style,
    Asset,
}

impl FileKind {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("js" | "ts" | "wxs") => Self::Script,
            Some("json") => Self::Manifest,
            Some("wxml") => Self::Markup,
            Some("wxss") => Self::Style,
            _ => Self::Asset,
        }
    }

    fn is_text(self) -> bool {
        !matches!(self, Self::Asset)
    }
}

/// Everything a walk needs besides the tree itself
#[derive(Debug)]
pub struct WalkContext<'a> {
    pub config: &'a Config,
    pub resolver: &'a mut ModuleResolver,
    pub layout: &'a BundleLayout,
    pub deferred: &'a mut DeferredQueue,
    pub filter: &'a ExclusionFilter,
    pub group_code: Option<&'a GroupCodeMatcher>,
}

/// Nested record of how the walk reached each file, keyed by source-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TreeNode(pub IndexMap<String, TreeNode>);

impl TreeNode {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One pending file in a walk
#[derive(Debug)]
struct WorkItem {
    path: PathBuf,
    /// Source-relative key of the file that referenced this one
    parent: Option<String>,
    /// Reached from a sub-package through shared main-package code
    via_shared: bool,
}

impl WorkItem {
    fn entry(path: PathBuf) -> Self {
        Self {
            path,
            parent: None,
            via_shared: false,
        }
    }
}

#[derive(Debug)]
pub struct DependencyTree {
    kind: BundleKind,
    /// Sub-package root, empty for the main bundle
    root_dir: String,
    root_path: PathBuf,
    source_root: PathBuf,
    entry_pages: Vec<String>,
    /// Visited set: every file reached from the entries
    files: IndexSet<PathBuf>,
    module_packages: IndexSet<String>,
    group_files: IndexSet<PathBuf>,
    isolated_modules: IndexSet<String>,
    /// First-discovery edges, used to build the exported tree
    roots: IndexSet<String>,
    children: IndexMap<String, Vec<String>>,
}

impl DependencyTree {
    pub fn main(layout: &BundleLayout) -> Self {
        Self::new(BundleKind::Main, MAIN_BUNDLE_KEY, layout)
    }

    pub fn sub(root: &str, layout: &BundleLayout) -> Self {
        Self::new(BundleKind::Sub, root.trim_matches('/'), layout)
    }

    fn new(kind: BundleKind, root_dir: &str, layout: &BundleLayout) -> Self {
        Self {
            kind,
            root_dir: root_dir.to_owned(),
            root_path: layout.root_path(root_dir),
            source_root: layout.source_root().to_path_buf(),
            entry_pages: Vec::new(),
            files: IndexSet::new(),
            module_packages: IndexSet::new(),
            group_files: IndexSet::new(),
            isolated_modules: IndexSet::new(),
            roots: IndexSet::new(),
            children: IndexMap::new(),
        }
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    pub fn entry_pages(&self) -> &[String] {
        &self.entry_pages
    }

    pub fn files(&self) -> &IndexSet<PathBuf> {
        &self.files
    }

    pub fn module_packages(&self) -> &IndexSet<String> {
        &self.module_packages
    }

    pub fn group_files(&self) -> &IndexSet<PathBuf> {
        &self.group_files
    }

    pub fn isolated_modules(&self) -> &IndexSet<String> {
        &self.isolated_modules
    }

    /// Apply the partitioner's outcome for this bundle
    pub fn set_isolated_modules(&mut self, modules: IndexSet<String>) {
        self.isolated_modules = modules;
    }

    /// Promoted modules become part of the main bundle's effective set
    pub fn extend_module_packages(&mut self, modules: impl IntoIterator<Item = String>) {
        self.module_packages.extend(modules);
    }

    /// Seed the main bundle from the application's global entry points
    pub fn run(&mut self, manifest: &AppManifest, ctx: &mut WalkContext<'_>) -> Result<()> {
        if self.kind.is_sub() {
            bail!("only the main bundle has global entry points");
        }

        let root = self.root_path.clone();
        let Some(app_script) = first_existing(&root.join("app"), SCRIPT_EXTENSIONS) else {
            bail!("missing app.js (or app.ts) in {}", root.display());
        };
        let mut seeds = vec![app_script, root.join(APP_MANIFEST)];
        seeds.extend(
            PROJECT_FILES
                .iter()
                .map(|name| root.join(name))
                .filter(|path| path.is_file()),
        );

        let sitemap = manifest.sitemap_location.as_deref().unwrap_or("sitemap.json");
        let sitemap = root.join(sitemap.trim_start_matches('/'));
        if sitemap.is_file() {
            seeds.push(sitemap);
        } else if manifest.sitemap_location.is_some() {
            warn!("Sitemap {} does not exist, skipping", sitemap.display());
        }

        for icon in manifest.tab_bar_icons() {
            let icon_path = root.join(icon.trim_start_matches('/'));
            if icon_path.is_file() {
                seeds.push(icon_path);
            } else {
                warn!("Tab bar icon {} does not exist, skipping", icon_path.display());
            }
        }

        if manifest.has_custom_tab_bar() {
            let custom = component_files(&root.join("custom-tab-bar/index"));
            if custom.is_empty() {
                bail!("tabBar.custom is set but custom-tab-bar/index does not exist");
            }
            seeds.extend(custom);
        }

        debug!("Seeding main bundle with {} global entries", seeds.len());
        self.walk(seeds.into_iter().map(WorkItem::entry).collect(), ctx)
    }

    /// Register an entry page (relative to the bundle root, without extension)
    /// and walk everything it references
    pub fn add_page(&mut self, page: &str, ctx: &mut WalkContext<'_>) -> Result<()> {
        let page = page.trim_matches('/');
        if self.entry_pages.iter().any(|known| known == page) {
            trace!("Page {page} already registered in {}", self.label());
            return Ok(());
        }

        let files = component_files(&self.root_path.join(page));
        if !files
            .iter()
            .any(|file| matches!(FileKind::of(file), FileKind::Script | FileKind::Markup))
        {
            bail!(
                "page `{page}` of the {} has neither a script nor a markup file",
                self.label()
            );
        }

        self.entry_pages.push(page.to_owned());
        debug!("Adding page {page} to the {}", self.label());
        self.walk(files.into_iter().map(WorkItem::entry).collect(), ctx)
            .with_context(|| format!("failed to resolve page `{page}` of the {}", self.label()))
    }

    /// Register one file. Entries are walked; anything else is only recorded
    /// as reachable, with its package and group-code status.
    pub fn add_to_tree(
        &mut self,
        file: &Path,
        is_entry: bool,
        ctx: &mut WalkContext<'_>,
    ) -> Result<()> {
        if is_entry {
            return self.walk(VecDeque::from([WorkItem::entry(file.to_path_buf())]), ctx);
        }
        if !self.register(file, None, ctx) {
            return Ok(());
        }
        let kind = FileKind::of(file);
        if kind.is_text() && ctx.group_code.is_some() {
            match fs::read_to_string(file) {
                Ok(content) => self.check_group_code(file, &content, ctx),
                Err(err) => warn!("Cannot read {} for group-code detection: {err}", file.display()),
            }
        }
        Ok(())
    }

    /// Nested structure of the walk, roots first
    pub fn tree(&self) -> TreeNode {
        TreeNode(
            self.roots
                .iter()
                .map(|root| (root.clone(), self.subtree(root)))
                .collect(),
        )
    }

    fn subtree(&self, key: &str) -> TreeNode {
        // Each file is recorded under its first discoverer only, so this terminates
        TreeNode(
            self.children
                .get(key)
                .into_iter()
                .flatten()
                .map(|child| (child.clone(), self.subtree(child)))
                .collect(),
        )
    }

    fn label(&self) -> String {
        match self.kind {
            BundleKind::Main => "main bundle".to_owned(),
            BundleKind::Sub => format!("sub-package `{}`", self.root_dir),
        }
    }

    /// Insert into the visited set; `false` when the file was already known
    fn register(&mut self, file: &Path, parent: Option<&str>, ctx: &WalkContext<'_>) -> bool {
        if !self.files.insert(file.to_path_buf()) {
            return false;
        }
        let key = relative_key(&self.source_root, file);
        match parent {
            Some(parent) => self.children.entry(parent.to_owned()).or_default().push(key),
            None => {
                self.roots.insert(key);
            }
        }
        if let Some(package) = ctx.resolver.package_of(file) {
            self.module_packages.insert(package);
        }
        true
    }

    fn check_group_code(&mut self, file: &Path, content: &str, ctx: &WalkContext<'_>) {
        if let Some(matcher) = ctx.group_code
            && matcher.is_group_file(file, content)
        {
            trace!("{} contains group code", file.display());
            self.group_files.insert(file.to_path_buf());
        }
    }

    fn walk(&mut self, mut worklist: VecDeque<WorkItem>, ctx: &mut WalkContext<'_>) -> Result<()> {
        while let Some(item) = worklist.pop_front() {
            if !self.register(&item.path, item.parent.as_deref(), ctx) {
                continue;
            }
            if item.via_shared {
                ctx.deferred.push(MAIN_BUNDLE_KEY, item.path.clone());
            }

            let targets = self
                .expand(&item.path, ctx)
                .with_context(|| format!("while walking {}", item.path.display()))?;
            let key = relative_key(&self.source_root, &item.path);
            for target in targets {
                if let Some(next) = self.route(&item, &key, target, ctx) {
                    worklist.push_back(next);
                }
            }
        }
        Ok(())
    }

    /// Decide who walks `target`: this tree, or the owner through the deferred queue
    fn route(
        &self,
        from: &WorkItem,
        from_key: &str,
        target: PathBuf,
        ctx: &mut WalkContext<'_>,
    ) -> Option<WorkItem> {
        if ctx.filter.is_excluded(&target) {
            debug!("Skipping excluded {}", target.display());
            return None;
        }

        let layout = ctx.layout;
        let owner = layout.owner_of(&target);
        let via_shared = match self.kind {
            BundleKind::Main if owner == MAIN_BUNDLE_KEY => false,
            BundleKind::Sub if owner == self.root_dir => false,
            BundleKind::Sub if owner == MAIN_BUNDLE_KEY => {
                // Shared code stays with main; npm files keep the excursion state
                ctx.resolver.package_of(&target).is_none() || from.via_shared
            }
            _ => {
                trace!(
                    "{} belongs to `{owner}`, deferring from the {}",
                    target.display(),
                    self.label()
                );
                ctx.deferred.push(owner, target);
                return None;
            }
        };

        Some(WorkItem {
            path: target,
            parent: Some(from_key.to_owned()),
            via_shared,
        })
    }

    /// Resolved files referenced by `path`
    fn expand(&mut self, path: &Path, ctx: &mut WalkContext<'_>) -> Result<Vec<PathBuf>> {
        let kind = FileKind::of(path);
        if !kind.is_text() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.check_group_code(path, &content, ctx);

        let mut targets = Vec::new();
        match kind {
            FileKind::Script => {
                for reference in scanner::script_references(&content) {
                    if let Some(resolved) =
                        ctx.resolver.resolve(path, &reference.specifier, ProbeKind::Script)?
                    {
                        targets.push(resolved.path().to_path_buf());
                    }
                }
            }
            FileKind::Markup => {
                for reference in scanner::markup_references(&scanner::scan_tags(&content)) {
                    let probe = if reference.is_module {
                        ProbeKind::File("wxs")
                    } else {
                        ProbeKind::File("wxml")
                    };
                    if let Some(resolved) = ctx.resolver.resolve(path, &reference.specifier, probe)? {
                        targets.push(resolved.path().to_path_buf());
                    }
                }
            }
            FileKind::Style => {
                for (specifier, _) in scanner::style_references(&content) {
                    if let Some(resolved) =
                        ctx.resolver.resolve(path, &specifier, ProbeKind::File("wxss"))?
                    {
                        targets.push(resolved.path().to_path_buf());
                    }
                }
            }
            FileKind::Manifest => {
                let manifest: Value = serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse manifest {}", path.display()))?;
                for specifier in component_specifiers(&manifest, &ctx.config.group_name) {
                    if let Some(resolved) =
                        ctx.resolver.resolve(path, &specifier, ProbeKind::Component)?
                    {
                        targets.extend(component_files(resolved.path()));
                    }
                }
            }
            FileKind::Asset => {}
        }
        Ok(targets)
    }
}

/// Component references declared by a manifest: `usingComponents` sources as
/// they read after the active group's substitution, and generic defaults
fn component_specifiers(manifest: &Value, group_name: &str) -> Vec<String> {
    let table = Some(group_name)
        .filter(|group| !group.is_empty())
        .and_then(|group| manifest.get("replaceComponents")?.get(group))
        .and_then(Value::as_object);

    let mut specifiers: Vec<String> = manifest
        .get("usingComponents")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(tag, source)| {
            let source = source.as_str()?;
            Some(
                table
                    .and_then(|table| substitute_source(tag, source, table))
                    .unwrap_or_else(|| source.to_owned()),
            )
        })
        .collect();

    if let Some(generics) = manifest.get("componentGenerics").and_then(Value::as_object) {
        specifiers.extend(
            generics
                .values()
                .filter_map(|generic| generic.get("default"))
                .filter_map(Value::as_str)
                .map(str::to_owned),
        );
    }
    specifiers
}

fn first_existing(base: &Path, extensions: &[&str]) -> Option<PathBuf> {
    extensions
        .iter()
        .map(|ext| append_extension(base, ext))
        .find(|path| path.is_file())
}

/// Existing files making up a page or component at `base` (no extension)
pub fn component_files(base: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = first_existing(base, SCRIPT_EXTENSIONS).into_iter().collect();
    files.extend(
        COMPANION_EXTENSIONS
            .iter()
            .map(|ext| append_extension(base, ext))
            .filter(|path| path.is_file()),
    );
    files
}

#[cfg(test)]
mod tests;
