//! Dependency graph export
//!
//! Writes `tree.json` (every bundle's walk tree, keyed by bundle root with the
//! empty key for the main bundle) next to a static HTML viewer.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::info;

use crate::dependency_tree::{DependencyTree, TreeNode};

pub const TREE_FILE: &str = "tree.json";
pub const VIEWER_FILE: &str = "index.html";

static VIEWER_HTML: &str = include_str!("../assets/analyse/index.html");

/// Bundle root -> walk tree, main bundle first
pub fn dependency_graph<'a>(
    trees: impl IntoIterator<Item = &'a DependencyTree>,
) -> IndexMap<String, TreeNode> {
    trees
        .into_iter()
        .map(|tree| (tree.root_dir().to_owned(), tree.tree()))
        .collect()
}

pub fn write_graph(dir: &Path, graph: &IndexMap<String, TreeNode>) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;

    let tree_path = dir.join(TREE_FILE);
    let json = serde_json::to_string_pretty(graph).context("failed to serialize dependency graph")?;
    fs::write(&tree_path, json)
        .with_context(|| format!("failed to write {}", tree_path.display()))?;

    let viewer_path = dir.join(VIEWER_FILE);
    fs::write(&viewer_path, VIEWER_HTML)
        .with_context(|| format!("failed to write {}", viewer_path.display()))?;

    info!("Dependency graph written to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn node(children: &[(&str, TreeNode)]) -> TreeNode {
        TreeNode(
            children
                .iter()
                .map(|(key, child)| ((*key).to_owned(), child.clone()))
                .collect(),
        )
    }

    fn sample_graph() -> IndexMap<String, TreeNode> {
        IndexMap::from([
            (
                String::new(),
                node(&[
                    ("app.js", node(&[])),
                    (
                        "pages/index/index.js",
                        node(&[("miniprogram_npm/alpha/index.js", node(&[]))]),
                    ),
                ]),
            ),
            (
                "subA".to_owned(),
                node(&[("subA/pages/detail.js", node(&[]))]),
            ),
        ])
    }

    #[test]
    fn test_graph_snapshot() {
        insta::assert_json_snapshot!(sample_graph(), @r#"
        {
          "": {
            "app.js": {},
            "pages/index/index.js": {
              "miniprogram_npm/alpha/index.js": {}
            }
          },
          "subA": {
            "subA/pages/detail.js": {}
          }
        }
        "#);
    }

    #[test]
    fn test_write_graph() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path().join("analyse");
        write_graph(&dir, &sample_graph())?;

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(TREE_FILE))?)?;
        assert!(written[""]["pages/index/index.js"]
            .get("miniprogram_npm/alpha/index.js")
            .is_some());
        assert!(fs::read_to_string(dir.join(VIEWER_FILE))?.contains("tree.json"));
        Ok(())
    }
}
