pub mod app_manifest;
pub mod config;
pub mod copier;
pub mod deferred;
pub mod dependency_tree;
pub mod export;
pub mod orchestrator;
pub mod partition;
pub mod resolver;
pub mod rewrite;
pub mod scanner;
pub mod types;
pub mod util;
pub mod walk;
