//! Component declaration pruning and group substitution
//!
//! Works on copied page and component manifests in the output tree.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexSet;
use log::{debug, trace};
use serde_json::{Map, Value};

use crate::{resolver::append_extension, scanner};

const USING_COMPONENTS: &str = "usingComponents";
const REPLACE_COMPONENTS: &str = "replaceComponents";

/// Rewrite the component declarations of `manifest` in place.
///
/// Declarations whose tag the sibling `markup` never uses are removed, unless
/// the markup pulls in other templates. Remaining sources are substituted from
/// the active group's `replaceComponents` table, and the table itself is always
/// dropped. Returns whether anything changed.
pub fn rewrite_components(manifest: &mut Value, markup: Option<&str>, group_name: &str) -> bool {
    let Some(object) = manifest.as_object_mut() else {
        return false;
    };
    let replace_table = object.remove(REPLACE_COMPONENTS);
    let mut changed = replace_table.is_some();

    let Some(using) = object
        .get_mut(USING_COMPONENTS)
        .and_then(Value::as_object_mut)
        .filter(|using| !using.is_empty())
    else {
        return changed;
    };

    if let Some(markup) = markup {
        let tags = scanner::scan_tags(markup);
        if scanner::has_inclusion_directive(&tags) {
            trace!("Markup includes other templates, keeping every component");
        } else {
            let removed = prune_components(using, &scanner::tag_names(&tags));
            if !removed.is_empty() {
                debug!("Pruned unused components {removed:?}");
                changed = true;
            }
        }
    }

    let table = replace_table
        .as_ref()
        .filter(|_| !group_name.is_empty())
        .and_then(|groups| groups.get(group_name))
        .and_then(Value::as_object)
        .filter(|table| !table.is_empty());
    if let Some(table) = table {
        for (tag, source) in using.iter_mut() {
            let Some(current) = source.as_str() else {
                continue;
            };
            if let Some(replacement) = substitute_source(tag, current, table)
                && replacement != current
            {
                trace!("Substituting component {tag}: {current} -> {replacement}");
                *source = Value::String(replacement);
                changed = true;
            }
        }
    }

    changed
}

/// Drop declarations whose tag is not used; tag names compare case-insensitively
pub fn prune_components(using: &mut Map<String, Value>, used_tags: &IndexSet<String>) -> Vec<String> {
    let unused: Vec<String> = using
        .keys()
        .filter(|tag| !used_tags.contains(&tag.to_lowercase()))
        .cloned()
        .collect();
    for tag in &unused {
        using.remove(tag);
    }
    unused
}

/// Replacement for a declared component: exact tag key, then exact source key,
/// then the longest key that is a path prefix of the source (remainder kept)
pub fn substitute_source(tag: &str, source: &str, table: &Map<String, Value>) -> Option<String> {
    if let Some(replacement) = table.get(tag).and_then(Value::as_str) {
        return Some(replacement.to_owned());
    }
    if let Some(replacement) = table.get(source).and_then(Value::as_str) {
        return Some(replacement.to_owned());
    }

    table
        .iter()
        .filter_map(|(key, value)| Some((key, value.as_str()?)))
        .filter_map(|(key, replacement)| {
            let prefix = key.trim_end_matches('/');
            let rest = source.strip_prefix(prefix)?;
            (!prefix.is_empty() && rest.starts_with('/')).then_some((prefix.len(), replacement, rest))
        })
        .max_by_key(|(len, _, _)| *len)
        .map(|(_, replacement, rest)| format!("{}{rest}", replacement.trim_end_matches('/')))
}

/// Apply [`rewrite_components`] to one output manifest, writing it back only
/// when something changed
pub fn rewrite_component_manifest(path: &Path, group_name: &str) -> Result<bool> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    if !content.contains(USING_COMPONENTS) && !content.contains(REPLACE_COMPONENTS) {
        return Ok(false);
    }
    let mut manifest: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse manifest {}", path.display()))?;

    let markup_path = append_extension(&path.with_extension(""), "wxml");
    let markup = if markup_path.is_file() {
        Some(
            fs::read_to_string(&markup_path)
                .with_context(|| format!("failed to read markup {}", markup_path.display()))?,
        )
    } else {
        None
    };

    if !rewrite_components(&mut manifest, markup.as_deref(), group_name) {
        return Ok(false);
    }
    let output = serde_json::to_string_pretty(&manifest)
        .with_context(|| format!("failed to serialize manifest {}", path.display()))?;
    fs::write(path, output).with_context(|| format!("failed to write manifest {}", path.display()))?;
    Ok(true)
}
