//! CLI subcommand implementations.

pub mod check;
pub mod link;

use crate::manifest::TemplateSet;
use anyhow::Context;
use classlink::{ClassRegistry, LinkerOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Linker options from `--config`, or the defaults
pub(crate) fn load_options(config: Option<&Path>) -> anyhow::Result<LinkerOptions> {
    let Some(path) = config else {
        return Ok(LinkerOptions::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    LinkerOptions::from_toml_str(&content)
        .with_context(|| format!("Invalid config {}", path.display()))
}

/// Registry autoloading from the templates declared in `manifests`
pub(crate) fn open_registry(
    manifests: &[PathBuf],
    config: Option<&Path>,
) -> anyhow::Result<(ClassRegistry, Arc<TemplateSet>)> {
    let options = load_options(config)?;
    let templates = Arc::new(TemplateSet::from_files(manifests)?);
    tracing::debug!(classes = templates.len(), "loaded manifests");
    let registry = ClassRegistry::with_loader(options, templates.clone());
    Ok((registry, templates))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Write `json` to a manifest in a fresh temp dir
    pub fn manifest(json: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.json");
        std::fs::write(&path, json).unwrap();
        (dir, path)
    }
}
