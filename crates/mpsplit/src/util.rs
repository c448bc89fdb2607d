//! Path helpers shared by the walk and the rewriters

use std::path::Path;

/// `/app/pages/a.js` below `/app` -> `pages/a.js`, always with `/` separators
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Relative reference from `from_dir` to `target`, written the way mini-program
/// sources write them: `/` separators and an explicit `./` for siblings
pub fn relative_specifier(from_dir: &Path, target: &Path) -> Option<String> {
    let diff = pathdiff::diff_paths(target, from_dir)?;
    let spec = diff
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if spec.is_empty() {
        return None;
    }
    if spec.starts_with("../") || spec == ".." {
        Some(spec)
    } else {
        Some(format!("./{spec}"))
    }
}
