//! Split pipeline
//!
//! [`BundleOrchestrator::run`] walks every bundle, merges deferred ownership
//! facts, partitions npm packages, copies the final file set and then runs the
//! rewriting passes over the output tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};

use crate::{
    app_manifest::AppManifest,
    config::Config,
    copier::{self, CopyReport},
    deferred::DeferredQueue,
    dependency_tree::{DependencyTree, WalkContext},
    export,
    partition::{ModulePartition, partition_modules},
    resolver::{ModuleResolver, normalize_path},
    rewrite::{self, GroupCodeMatcher, Relocation},
    types::BundleLayout,
    walk::{ExclusionFilter, SourceWalker},
};

/// Per-bundle line of the run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSummary {
    /// Empty for the main bundle
    pub root: String,
    pub pages: usize,
    pub files: usize,
    pub modules: usize,
}

/// What a successful run did
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files_copied: usize,
    pub bundles: Vec<BundleSummary>,
    pub promoted: IndexSet<String>,
    pub isolated: IndexMap<String, IndexSet<String>>,
    pub deferred_merged: usize,
}

impl RunSummary {
    fn log(&self) {
        info!("Copied {} files", self.files_copied);
        for bundle in &self.bundles {
            let name = if bundle.root.is_empty() { "main" } else { bundle.root.as_str() };
            info!(
                "  {name}: {} pages, {} files, {} npm packages",
                bundle.pages, bundle.files, bundle.modules
            );
        }
        if !self.promoted.is_empty() {
            info!("Shared npm packages promoted to main: {:?}", self.promoted);
        }
        for (root, modules) in self.isolated.iter().filter(|(_, modules)| !modules.is_empty()) {
            info!("Isolated into {root}: {modules:?}");
        }
    }
}

/// Main entry point of the splitter
#[derive(Debug)]
pub struct BundleOrchestrator {
    config: Config,
}

impl BundleOrchestrator {
    /// Resolve the configured directories and validate the configuration
    pub fn new(mut config: Config) -> Result<Self> {
        config.source_dir = absolute(&config.source_dir)?;
        config.target_dir = absolute(&config.target_dir)?;
        if let Some(dir) = config.analyse_dir.take() {
            config.analyse_dir = Some(absolute(&dir)?);
        }
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(&self) -> Result<RunSummary> {
        let config = &self.config;
        info!(
            "Splitting {} into {}",
            config.source_dir.display(),
            config.target_dir.display()
        );

        let manifest = AppManifest::load(&config.source_dir)?;
        let layout = BundleLayout::new(
            &config.source_dir,
            manifest
                .sub_packages
                .iter()
                .map(|sub| sub.root_dir().to_owned()),
        );
        self.clear_target()?;

        let filter = ExclusionFilter::new(&config.source_dir, &config.exclude);
        let group_code = GroupCodeMatcher::from_config(&config.group_code)?;
        let mut resolver = ModuleResolver::new(config);
        let mut deferred = DeferredQueue::new();
        let mut ctx = WalkContext {
            config,
            resolver: &mut resolver,
            layout: &layout,
            deferred: &mut deferred,
            filter: &filter,
            group_code: group_code.as_ref(),
        };

        info!("Resolving dependencies...");
        let (mut main, mut subs) = self.build_trees(&manifest, &layout, &mut ctx)?;
        let deferred_merged = Self::merge_deferred(config, &mut main, &mut subs, &mut ctx)?;

        let partition = if config.split_modules {
            let sub_sets: Vec<(&str, &IndexSet<String>)> = subs
                .iter()
                .map(|sub| (sub.root_dir(), sub.module_packages()))
                .collect();
            partition_modules(main.module_packages(), &sub_sets, &config.exclude_modules)?
        } else {
            ModulePartition::default()
        };
        main.extend_module_packages(partition.promoted.iter().cloned());
        for sub in &mut subs {
            if let Some(isolated) = partition.isolated_for(sub.root_dir()) {
                sub.set_isolated_modules(isolated.clone());
            }
        }

        let report = self.write_output(&main, &subs, &filter, &layout, group_code.as_ref())?;

        if let Some(dir) = &config.analyse_dir {
            let graph = export::dependency_graph(std::iter::once(&main).chain(&subs));
            export::write_graph(dir, &graph)?;
        }

        let summary = RunSummary {
            files_copied: report.copied,
            bundles: std::iter::once(&main).chain(&subs).map(summarize).collect(),
            promoted: partition.promoted,
            isolated: partition.isolated,
            deferred_merged,
        };
        summary.log();
        check_copy_report(&report)?;
        Ok(summary)
    }

    /// Copy the final file set and run every rewriting pass over the output
    fn write_output(
        &self,
        main: &DependencyTree,
        subs: &[DependencyTree],
        filter: &ExclusionFilter,
        layout: &BundleLayout,
        group_code: Option<&GroupCodeMatcher>,
    ) -> Result<CopyReport> {
        let config = &self.config;
        info!("Copying files...");
        let statics = self.static_files(filter, layout, subs);
        let files: Vec<PathBuf> = std::iter::once(main)
            .chain(subs)
            .flat_map(|tree| tree.files().iter().cloned())
            .chain(statics)
            .collect();
        let jobs = copier::plan_copy(&config.source_dir, &config.target_dir, &files);
        let report = copier::copy_files(&jobs);

        if let Some(matcher) = group_code {
            info!("Removing group code...");
            self.strip_group_code(matcher, main, subs)?;
        }

        info!("Rewriting component declarations...");
        for job in &jobs {
            if job.target.extension().is_some_and(|ext| ext == "json") && job.target.is_file() {
                rewrite::rewrite_component_manifest(&job.target, &config.group_name)?;
            }
        }

        if config.split_modules {
            info!("Relocating isolated npm packages...");
            for sub in subs {
                self.relocate_modules(sub)?;
            }
        }

        if config.retention.is_active() {
            info!("Trimming {}...", crate::app_manifest::APP_MANIFEST);
            rewrite::trim_app_manifest_file(&config.target_dir, &config.retention)?;
        }
        if let Some(appid) = &config.ext_appid {
            rewrite::write_ext_appid(&config.target_dir, appid)?;
        }

        Ok(report)
    }

    fn clear_target(&self) -> Result<()> {
        let target = &self.config.target_dir;
        if target.exists() {
            debug!("Clearing {}", target.display());
            fs::remove_dir_all(target)
                .with_context(|| format!("failed to clear target directory {}", target.display()))?;
        }
        fs::create_dir_all(target)
            .with_context(|| format!("failed to create target directory {}", target.display()))
    }

    /// Walk main first, then every retained sub-package in manifest order
    fn build_trees(
        &self,
        manifest: &AppManifest,
        layout: &BundleLayout,
        ctx: &mut WalkContext<'_>,
    ) -> Result<(DependencyTree, Vec<DependencyTree>)> {
        let retention = &self.config.retention;

        let mut main = DependencyTree::main(layout);
        main.run(manifest, ctx)?;
        for page in manifest.pages.iter().filter(|page| retention.retains_page(page)) {
            main.add_page(page, ctx)?;
        }

        let mut subs = Vec::new();
        for sub in &manifest.sub_packages {
            let root = sub.root_dir();
            if !retention.retains_subpackage(root) {
                debug!("Skipping sub-package `{root}`");
                continue;
            }
            let pages: Vec<&String> = sub
                .pages
                .iter()
                .filter(|page| {
                    retention.retains_page(&format!("{root}/{}", page.trim_start_matches('/')))
                })
                .collect();
            if pages.is_empty() {
                debug!("Skipping sub-package `{root}`: no retained pages");
                continue;
            }

            let mut tree = DependencyTree::sub(root, layout);
            for page in pages {
                tree.add_page(page, ctx)?;
            }
            subs.push(tree);
        }
        Ok((main, subs))
    }

    /// Drain the deferred queue into the owning trees without walking
    fn merge_deferred(
        config: &Config,
        main: &mut DependencyTree,
        subs: &mut [DependencyTree],
        ctx: &mut WalkContext<'_>,
    ) -> Result<usize> {
        let mut merged = 0;
        while let Some(item) = ctx.deferred.pop_next() {
            let owner = if config.is_main_key(&item.owner_key) {
                Some(&mut *main)
            } else {
                subs.iter_mut().find(|sub| sub.root_dir() == item.owner_key)
            };
            match owner {
                Some(tree) => {
                    tree.add_to_tree(&item.file, false, ctx)?;
                    merged += 1;
                }
                None => debug!(
                    "Dropping {}: bundle `{}` is not part of the output",
                    item.file.display(),
                    item.owner_key
                ),
            }
        }
        debug!("Merged {merged} deferred files");
        Ok(merged)
    }

    /// Static assets found by extension, except those of dropped sub-packages
    fn static_files(
        &self,
        filter: &ExclusionFilter,
        layout: &BundleLayout,
        subs: &[DependencyTree],
    ) -> Vec<PathBuf> {
        let config = &self.config;
        let walker = SourceWalker::new(&config.source_dir, filter.clone());
        walker
            .files_with_extensions(&config.static_extensions)
            .filter(|file| {
                let owner = layout.owner_of(file);
                owner.is_empty() || subs.iter().any(|sub| sub.root_dir() == owner)
            })
            .collect()
    }

    fn strip_group_code(
        &self,
        matcher: &GroupCodeMatcher,
        main: &DependencyTree,
        subs: &[DependencyTree],
    ) -> Result<()> {
        let group_files: IndexSet<&PathBuf> = std::iter::once(main)
            .chain(subs)
            .flat_map(|tree| tree.group_files())
            .collect();
        for file in group_files {
            let Some(target) = self.config.to_target(file) else {
                continue;
            };
            if target.is_file() {
                matcher.strip_file(&target)?;
            } else {
                warn!("Group file {} was not copied", target.display());
            }
        }
        Ok(())
    }

    fn relocate_modules(&self, sub: &DependencyTree) -> Result<()> {
        if sub.isolated_modules().is_empty() {
            return Ok(());
        }
        let relocation = Relocation::new(
            &self.config.target_dir,
            &self.config.modules_dir,
            sub.root_dir(),
            sub.isolated_modules().clone(),
        );
        let moved = relocation.apply()?;
        let rewritten = relocation.remediate()?;
        info!(
            "Moved {moved} npm packages into {}, rewrote {rewritten} files",
            relocation.local_modules().display()
        );
        Ok(())
    }
}

fn summarize(tree: &DependencyTree) -> BundleSummary {
    BundleSummary {
        root: tree.root_dir().to_owned(),
        pages: tree.entry_pages().len(),
        files: tree.files().len(),
        modules: tree.module_packages().len(),
    }
}

fn check_copy_report(report: &CopyReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let failures = report
        .failures
        .iter()
        .map(|failure| format!("  {failure}"))
        .collect::<Vec<_>>()
        .join("\n");
    bail!("{} files failed to copy:\n{failures}", report.failures.len())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Ok(normalize_path(&absolute))
}
