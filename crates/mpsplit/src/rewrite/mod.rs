//! Passes over the copied output tree
//!
//! Each pass works on files that are already in the target directory: group
//! code is stripped, component declarations pruned and substituted, isolated
//! packages relocated with their references fixed up, and the root manifests
//! trimmed.

pub mod components;
pub mod group_code;
pub mod manifest;
pub mod modules;

pub use components::{rewrite_component_manifest, rewrite_components};
pub use group_code::GroupCodeMatcher;
pub use manifest::{trim_app_manifest, trim_app_manifest_file, write_ext_appid};
pub use modules::Relocation;
