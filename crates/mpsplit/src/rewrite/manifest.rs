//! Root manifest trimming and extension manifest rewrite

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use indexmap::IndexSet;
use log::{debug, info};
use serde_json::{Map, Value};

use crate::{app_manifest::APP_MANIFEST, config::RetentionConfig};

pub const EXT_MANIFEST: &str = "ext.json";

/// `preloadRule` target naming the main package
const PRELOAD_APP_TARGET: &str = "__APP__";

const SUB_PACKAGE_KEYS: &[&str] = &["subPackages", "subpackages"];

/// Remove every page and sub-package the retention policy drops from a root
/// manifest, keeping `tabBar`, `preloadRule` and `entryPagePath` consistent
/// with what survives. Returns whether anything changed.
pub fn trim_app_manifest(manifest: &mut Value, retention: &RetentionConfig) -> Result<bool> {
    let Some(object) = manifest.as_object_mut() else {
        bail!("root manifest is not a JSON object");
    };
    let mut changed = false;

    let mut main_pages = IndexSet::new();
    if let Some(pages) = object.get_mut("pages").and_then(Value::as_array_mut) {
        let before = pages.len();
        pages.retain(|page| page.as_str().is_some_and(|page| retention.retains_page(page)));
        changed |= pages.len() != before;
        main_pages.extend(pages.iter().filter_map(Value::as_str).map(str::to_owned));
    }
    if main_pages.is_empty() {
        bail!("retention removes every page of the main package");
    }

    let mut all_pages = main_pages.clone();
    let mut preload_targets: IndexSet<String> = IndexSet::from([PRELOAD_APP_TARGET.to_owned()]);
    for key in SUB_PACKAGE_KEYS {
        if let Some(subs) = object.get_mut(*key).and_then(Value::as_array_mut) {
            changed |= trim_sub_packages(subs, retention, &mut all_pages, &mut preload_targets);
        }
    }

    if let Some(entry) = object.get("entryPagePath").and_then(Value::as_str)
        && !all_pages.contains(entry.trim_start_matches('/'))
    {
        debug!("Dropping entryPagePath {entry}");
        object.remove("entryPagePath");
        changed = true;
    }

    changed |= trim_tab_bar(object, &main_pages);
    changed |= trim_preload_rules(object, &all_pages, &preload_targets);
    Ok(changed)
}

fn trim_sub_packages(
    subs: &mut Vec<Value>,
    retention: &RetentionConfig,
    all_pages: &mut IndexSet<String>,
    preload_targets: &mut IndexSet<String>,
) -> bool {
    let mut changed = false;
    subs.retain_mut(|sub| {
        let Some(root) = sub.get("root").and_then(Value::as_str).map(|root| root.trim_matches('/').to_owned())
        else {
            return true;
        };
        if !retention.retains_subpackage(&root) {
            info!("Removing sub-package `{root}`");
            changed = true;
            return false;
        }
        let name = sub.get("name").and_then(Value::as_str).map(str::to_owned);
        let Some(pages) = sub.get_mut("pages").and_then(Value::as_array_mut) else {
            return true;
        };
        let before = pages.len();
        pages.retain(|page| {
            page.as_str()
                .is_some_and(|page| retention.retains_page(&format!("{root}/{}", page.trim_start_matches('/'))))
        });
        changed |= pages.len() != before;
        if pages.is_empty() {
            info!("Removing sub-package `{root}`: no pages left");
            changed = true;
            return false;
        }

        all_pages.extend(
            pages
                .iter()
                .filter_map(Value::as_str)
                .map(|page| format!("{root}/{}", page.trim_start_matches('/'))),
        );
        preload_targets.extend(name);
        preload_targets.insert(root);
        true
    });
    changed
}

/// Tab entries must point at surviving main-package pages
fn trim_tab_bar(object: &mut Map<String, Value>, main_pages: &IndexSet<String>) -> bool {
    let Some(list) = object
        .get_mut("tabBar")
        .and_then(|tab_bar| tab_bar.get_mut("list"))
        .and_then(Value::as_array_mut)
    else {
        return false;
    };
    let before = list.len();
    list.retain(|item| {
        item.get("pagePath")
            .and_then(Value::as_str)
            .is_some_and(|page| main_pages.contains(page.trim_start_matches('/')))
    });
    if list.len() == before {
        return false;
    }
    if list.is_empty() {
        debug!("No tab bar entries left, dropping tabBar");
        object.remove("tabBar");
    }
    true
}

fn trim_preload_rules(
    object: &mut Map<String, Value>,
    all_pages: &IndexSet<String>,
    targets: &IndexSet<String>,
) -> bool {
    let Some(rules) = object.get_mut("preloadRule").and_then(Value::as_object_mut) else {
        return false;
    };
    let before = rules.clone();
    rules.retain(|page, rule| {
        if !all_pages.contains(page.trim_start_matches('/')) {
            return false;
        }
        let Some(packages) = rule.get_mut("packages").and_then(Value::as_array_mut) else {
            return true;
        };
        packages.retain(|package| {
            package
                .as_str()
                .is_some_and(|package| targets.contains(package.trim_matches('/')))
        });
        !packages.is_empty()
    });
    *rules != before
}

/// Trim `app.json` in the output tree, writing it only when something changed
pub fn trim_app_manifest_file(target_root: &Path, retention: &RetentionConfig) -> Result<bool> {
    let path = target_root.join(APP_MANIFEST);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut manifest: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if !trim_app_manifest(&mut manifest, retention)
        .with_context(|| format!("failed to trim {}", path.display()))?
    {
        return Ok(false);
    }
    write_json(&path, &manifest)?;
    Ok(true)
}

/// Set `extAppid` in the output `ext.json`, creating the file when missing
pub fn write_ext_appid(target_root: &Path, appid: &str) -> Result<()> {
    let path = target_root.join(EXT_MANIFEST);
    let mut manifest = if path.is_file() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        Value::Object(Map::new())
    };
    let Some(object) = manifest.as_object_mut() else {
        bail!("{} is not a JSON object", path.display());
    };
    object.insert("extAppid".to_owned(), Value::String(appid.to_owned()));
    write_json(&path, &manifest)?;
    debug!("Set extAppid to {appid} in {}", path.display());
    Ok(())
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let output = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, output).with_context(|| format!("failed to write {}", path.display()))
}
