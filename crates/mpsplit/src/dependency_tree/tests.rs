use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;
use crate::config::GroupCodeConfig;

fn create_test_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Owned pieces a [`WalkContext`] borrows from
struct Fixture {
    config: Config,
    resolver: ModuleResolver,
    layout: BundleLayout,
    deferred: DeferredQueue,
    filter: ExclusionFilter,
    group_code: Option<GroupCodeMatcher>,
}

impl Fixture {
    fn new(root: &Path, config: Config) -> Result<Self> {
        let config = Config {
            source_dir: root.to_path_buf(),
            ..config
        };
        let manifest = AppManifest::load(root)?;
        Ok(Self {
            resolver: ModuleResolver::new(&config),
            layout: BundleLayout::new(
                root,
                manifest
                    .sub_packages
                    .iter()
                    .map(|sub| sub.root_dir().to_owned()),
            ),
            deferred: DeferredQueue::new(),
            filter: ExclusionFilter::new(root, &config.exclude),
            group_code: GroupCodeMatcher::from_config(&config.group_code)?,
            config,
        })
    }

    fn ctx(&mut self) -> WalkContext<'_> {
        WalkContext {
            config: &self.config,
            resolver: &mut self.resolver,
            layout: &self.layout,
            deferred: &mut self.deferred,
            filter: &self.filter,
            group_code: self.group_code.as_ref(),
        }
    }

    fn drain(&mut self) -> Vec<(String, PathBuf)> {
        std::iter::from_fn(|| self.deferred.pop_next())
            .map(|item| (item.owner_key, item.file))
            .collect()
    }
}

/// Main page `index` using `alpha`, sub-package `subA` using `gamma`, shared
/// `utils/shared.js` and an async require into `subB`
fn create_app(root: &Path) -> Result<()> {
    create_test_file(
        &root.join("app.json"),
        r#"{
            "pages": ["pages/index/index"],
            "subPackages": [
                { "root": "subA", "pages": ["pages/detail"] },
                { "root": "subB", "pages": ["list"] }
            ],
            "usingComponents": { "nav-bar": "/components/nav-bar/index" }
        }"#,
    )?;
    create_test_file(&root.join("app.js"), "App({});")?;
    create_test_file(&root.join("app.wxss"), "@import './styles/base.wxss';")?;
    create_test_file(&root.join("styles/base.wxss"), ".a{}")?;
    create_test_file(&root.join("components/nav-bar/index.js"), "Component({});")?;
    create_test_file(&root.join("components/nav-bar/index.json"), r#"{"component":true}"#)?;
    create_test_file(&root.join("components/nav-bar/index.wxml"), "<view/>")?;

    create_test_file(&root.join("pages/index/index.js"), "const a = require('alpha');")?;
    create_test_file(&root.join("pages/index/index.wxml"), "<nav-bar/>")?;
    create_test_file(&root.join("miniprogram_npm/alpha/index.js"), "module.exports = 1;")?;

    create_test_file(
        &root.join("subA/pages/detail.js"),
        "const g = require('gamma');\nconst s = require('../../utils/shared');\nrequire.async('../../subB/util');",
    )?;
    create_test_file(&root.join("subA/pages/detail.wxml"), "<view/>")?;
    create_test_file(&root.join("utils/shared.js"), "module.exports = require('beta');")?;
    create_test_file(&root.join("miniprogram_npm/gamma/index.js"), "")?;
    create_test_file(&root.join("miniprogram_npm/beta/index.js"), "")?;

    create_test_file(&root.join("subB/list.js"), "")?;
    create_test_file(&root.join("subB/util.js"), "")?;
    Ok(())
}

#[test]
fn test_main_run_and_page_walk() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;

    let mut fixture = Fixture::new(root, Config::default())?;
    let manifest = AppManifest::load(root)?;
    let mut main = DependencyTree::main(&fixture.layout);
    main.run(&manifest, &mut fixture.ctx())?;
    main.add_page("pages/index/index", &mut fixture.ctx())?;

    for file in [
        "app.js",
        "app.json",
        "app.wxss",
        "styles/base.wxss",
        "components/nav-bar/index.js",
        "components/nav-bar/index.wxml",
        "pages/index/index.js",
        "miniprogram_npm/alpha/index.js",
    ] {
        assert!(main.files().contains(&root.join(file)), "missing {file}");
    }
    assert_eq!(
        main.module_packages().iter().collect::<Vec<_>>(),
        vec!["alpha"]
    );
    assert!(fixture.deferred.is_empty());
    Ok(())
}

#[test]
fn test_add_page_is_idempotent_and_visited_set_unique() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;

    let mut fixture = Fixture::new(root, Config::default())?;
    let mut main = DependencyTree::main(&fixture.layout);
    main.add_page("pages/index/index", &mut fixture.ctx())?;
    let count = main.files().len();

    main.add_page("/pages/index/index", &mut fixture.ctx())?;
    main.add_to_tree(&root.join("pages/index/index.js"), false, &mut fixture.ctx())?;
    main.add_to_tree(&root.join("miniprogram_npm/alpha/index.js"), true, &mut fixture.ctx())?;

    assert_eq!(main.files().len(), count);
    assert_eq!(main.entry_pages(), ["pages/index/index".to_owned()]);
    Ok(())
}

#[test]
fn test_sub_walk_defers_foreign_files() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;

    let mut fixture = Fixture::new(root, Config::default())?;
    let mut sub_a = DependencyTree::sub("subA", &fixture.layout);
    sub_a.add_page("pages/detail", &mut fixture.ctx())?;

    // Own module plus the module reached through shared code
    assert!(sub_a.module_packages().contains("gamma"));
    assert!(sub_a.module_packages().contains("beta"));
    assert!(!sub_a.files().contains(&root.join("subB/util.js")));

    let deferred = fixture.drain();
    assert_eq!(
        deferred,
        vec![
            ("subB".to_owned(), root.join("subB/util.js")),
            (String::new(), root.join("utils/shared.js")),
            (String::new(), root.join("miniprogram_npm/beta/index.js")),
        ]
    );
    Ok(())
}

#[test]
fn test_deferred_merge_records_package_without_walking() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;
    create_test_file(
        &root.join("miniprogram_npm/@scope/ui/index.js"),
        "require('./not-walked');",
    )?;

    let mut fixture = Fixture::new(root, Config::default())?;
    let mut main = DependencyTree::main(&fixture.layout);
    main.add_to_tree(
        &root.join("miniprogram_npm/@scope/ui/index.js"),
        false,
        &mut fixture.ctx(),
    )?;

    assert_eq!(main.files().len(), 1);
    assert!(main.module_packages().contains("@scope/ui"));
    Ok(())
}

#[test]
fn test_missing_reference_is_fatal() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;
    create_test_file(&root.join("pages/index/index.js"), "require('./gone');")?;

    let mut fixture = Fixture::new(root, Config::default())?;
    let mut main = DependencyTree::main(&fixture.layout);
    let err = main
        .add_page("pages/index/index", &mut fixture.ctx())
        .expect_err("missing file must fail");
    assert!(format!("{err:#}").contains("./gone"));
    Ok(())
}

#[test]
fn test_page_without_script_or_markup() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;

    let mut fixture = Fixture::new(root, Config::default())?;
    let mut main = DependencyTree::main(&fixture.layout);
    assert!(main.add_page("pages/ghost/ghost", &mut fixture.ctx()).is_err());
    assert!(main.entry_pages().is_empty());
    Ok(())
}

#[test]
fn test_excluded_paths_are_skipped() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;

    let config = Config {
        exclude: vec!["miniprogram_npm/alpha".to_owned()],
        ..Default::default()
    };
    let mut fixture = Fixture::new(root, config)?;
    let mut main = DependencyTree::main(&fixture.layout);
    main.add_page("pages/index/index", &mut fixture.ctx())?;

    assert!(main.module_packages().is_empty());
    Ok(())
}

#[test]
fn test_group_files_and_tree_record() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    create_app(root)?;
    create_test_file(
        &root.join("pages/index/index.wxml"),
        "<nav-bar/><!-- #group-code-start --><x/><!-- #group-code-end -->",
    )?;

    let config = Config {
        group_code: GroupCodeConfig {
            enabled: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut fixture = Fixture::new(root, config)?;
    let mut main = DependencyTree::main(&fixture.layout);
    main.add_page("pages/index/index", &mut fixture.ctx())?;

    assert_eq!(
        main.group_files().iter().collect::<Vec<_>>(),
        vec![&root.join("pages/index/index.wxml")]
    );

    let tree = main.tree();
    let script = &tree.0["pages/index/index.js"];
    assert!(script.0.contains_key("miniprogram_npm/alpha/index.js"));
    assert!(tree.0["pages/index/index.wxml"].is_empty());
    Ok(())
}
