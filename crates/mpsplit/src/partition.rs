//! Cross-bundle npm package partitioning
//!
//! Decides, from the package sets recorded by every tree, which packages stay
//! in the shared npm directory and which move into a single sub-package.

use anyhow::{Result, bail};
use indexmap::{IndexMap, IndexSet};
use log::debug;

/// Where every referenced package ends up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePartition {
    /// Main's own packages plus every promoted one
    pub main_effective: IndexSet<String>,
    /// Packages moved into the shared directory because several sub-packages
    /// (or the exclusion list) need them there
    pub promoted: IndexSet<String>,
    /// Sub-package root -> packages only that sub-package uses
    pub isolated: IndexMap<String, IndexSet<String>>,
}

impl ModulePartition {
    pub fn isolated_for(&self, root: &str) -> Option<&IndexSet<String>> {
        self.isolated.get(root)
    }

    pub fn isolated_count(&self) -> usize {
        self.isolated.values().map(IndexSet::len).sum()
    }

    /// Every package isolated into at most one bundle and never shared as well
    pub fn verify(&self) -> Result<()> {
        let mut owners: IndexMap<&str, &str> = IndexMap::new();
        for (root, modules) in &self.isolated {
            for module in modules {
                if let Some(previous) = owners.insert(module, root) {
                    bail!(
                        "module partition violated: `{module}` isolated into both `{previous}` and `{root}`"
                    );
                }
                if self.main_effective.contains(module) {
                    bail!(
                        "module partition violated: `{module}` is isolated into `{root}` and shared"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Partition packages between the main bundle and the sub-packages.
///
/// `subs` is in manifest order. A package used by one sub-package, absent from
/// main and not excluded, is isolated there; a package used by two or more
/// sub-packages, or listed in `exclude`, is promoted to main; anything else is
/// already satisfied by main.
pub fn partition_modules(
    main: &IndexSet<String>,
    subs: &[(&str, &IndexSet<String>)],
    exclude: &IndexSet<String>,
) -> Result<ModulePartition> {
    let mut promoted = IndexSet::new();
    let mut isolated: IndexMap<String, IndexSet<String>> = IndexMap::new();

    for (index, (root, modules)) in subs.iter().enumerate() {
        let used_elsewhere = |module: &String| {
            subs.iter()
                .enumerate()
                .any(|(other, (_, set))| other != index && set.contains(module))
        };

        let mut own = IndexSet::new();
        for module in modules.iter() {
            if used_elsewhere(module) || exclude.contains(module) {
                if !main.contains(module) {
                    promoted.insert(module.clone());
                }
            } else if !main.contains(module) {
                own.insert(module.clone());
            }
        }
        if !own.is_empty() {
            debug!("Isolating {own:?} into `{root}`");
        }
        isolated.insert((*root).to_owned(), own);
    }

    let mut main_effective = main.clone();
    main_effective.extend(promoted.iter().cloned());
    if !promoted.is_empty() {
        debug!("Promoting {promoted:?} to the shared npm directory");
    }

    let partition = ModulePartition {
        main_effective,
        promoted,
        isolated,
    };
    partition.verify()?;
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn set(items: &[&str]) -> IndexSet<String> {
        items.iter().map(|item| (*item).to_owned()).collect()
    }

    #[test]
    fn test_shared_module_is_promoted() -> Result<()> {
        let main = set(&["alpha"]);
        let sub_a = set(&["alpha", "beta"]);
        let sub_b = set(&["beta"]);

        let partition =
            partition_modules(&main, &[("subA", &sub_a), ("subB", &sub_b)], &IndexSet::new())?;

        assert_eq!(partition.promoted, set(&["beta"]));
        assert_eq!(partition.main_effective, set(&["alpha", "beta"]));
        assert_eq!(partition.isolated_count(), 0);
        Ok(())
    }

    #[test]
    fn test_single_use_module_is_isolated() -> Result<()> {
        let main = IndexSet::new();
        let sub_a = set(&["gamma", "delta"]);
        let sub_b = set(&["epsilon"]);
        let exclude = set(&["delta"]);

        let partition = partition_modules(&main, &[("subA", &sub_a), ("subB", &sub_b)], &exclude)?;

        assert_eq!(partition.isolated_for("subA"), Some(&set(&["gamma"])));
        assert_eq!(partition.isolated_for("subB"), Some(&set(&["epsilon"])));
        assert_eq!(partition.promoted, set(&["delta"]));
        Ok(())
    }

    #[test]
    fn test_partition_is_idempotent() -> Result<()> {
        let main = set(&["alpha"]);
        let sub_a = set(&["alpha", "beta", "gamma", "@s/ui"]);
        let sub_b = set(&["beta", "@s/ui", "zeta"]);
        let sub_c = set(&["eta"]);
        let subs = [("subA", &sub_a), ("subB", &sub_b), ("subC", &sub_c)];
        let exclude = set(&["eta"]);

        let first = partition_modules(&main, &subs, &exclude)?;
        let second = partition_modules(&main, &subs, &exclude)?;
        assert_eq!(first, second);

        // Every referenced module ends in exactly one place
        for module in sub_a.iter().chain(&sub_b).chain(&sub_c) {
            let isolated_in = first
                .isolated
                .values()
                .filter(|modules| modules.contains(module))
                .count();
            let shared = usize::from(first.main_effective.contains(module));
            assert_eq!(isolated_in + shared, 1, "{module} placed {isolated_in}+{shared} times");
        }
        Ok(())
    }

    #[test]
    fn test_verify_detects_double_isolation() {
        let partition = ModulePartition {
            isolated: IndexMap::from([
                ("subA".to_owned(), set(&["gamma"])),
                ("subB".to_owned(), set(&["gamma"])),
            ]),
            ..Default::default()
        };
        assert!(partition.verify().is_err());

        let shared_and_isolated = ModulePartition {
            main_effective: set(&["gamma"]),
            isolated: IndexMap::from([("subA".to_owned(), set(&["gamma"]))]),
            ..Default::default()
        };
        assert!(shared_and_isolated.verify().is_err());
    }
}
