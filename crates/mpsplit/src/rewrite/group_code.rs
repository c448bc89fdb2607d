//! Group-code detection and stripping
//!
//! Files containing regions delimited by the configured markers are recorded
//! during the walk; after the copy, those regions are removed from the output.

use std::{borrow::Cow, fs, path::Path};

use anyhow::{Context, Result};
use log::debug;
use regex::Regex;

use crate::config::GroupCodeConfig;

#[derive(Debug, Clone)]
pub struct GroupCodeMatcher {
    markup: Regex,
    script: Regex,
}

impl GroupCodeMatcher {
    /// `None` when group-code handling is disabled
    pub fn from_config(config: &GroupCodeConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        Ok(Some(Self {
            markup: config.markup_regex()?,
            script: config.script_regex()?,
        }))
    }

    /// Markup files use the markup pattern, everything else the script pattern
    fn pattern_for(&self, path: &Path) -> &Regex {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("wxml") => &self.markup,
            _ => &self.script,
        }
    }

    pub fn is_group_file(&self, path: &Path, content: &str) -> bool {
        self.pattern_for(path).is_match(content)
    }

    pub fn strip<'a>(&self, path: &Path, content: &'a str) -> Cow<'a, str> {
        self.pattern_for(path).replace_all(content, "")
    }

    /// Strip every marked region from an output file in place
    pub fn strip_file(&self, path: &Path) -> Result<bool> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read group file {}", path.display()))?;
        let stripped = self.strip(path, &content);
        if let Cow::Owned(stripped) = stripped {
            fs::write(path, stripped)
                .with_context(|| format!("failed to write group file {}", path.display()))?;
            debug!("Stripped group code from {}", path.display());
            return Ok(true);
        }
        Ok(false)
    }
}
