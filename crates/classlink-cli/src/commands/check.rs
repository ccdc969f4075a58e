//! `classlink check`: Link classes and report errors only.

use super::open_registry;
use classlink::{ClassRegistry, ClassTemplate, LinkError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Links every declared class, printing one line per failure.
/// Returns the number of classes that failed to link.
pub fn execute(manifests: &[PathBuf], config: Option<&Path>) -> anyhow::Result<usize> {
    let (registry, templates) = open_registry(manifests, config)?;
    let failures = check_all(&registry, templates.templates());

    for (name, err) in &failures {
        eprintln!("{}", describe(name, err));
    }
    println!(
        "{} classes checked, {} failed",
        templates.len(),
        failures.len()
    );
    Ok(failures.len())
}

fn check_all(registry: &ClassRegistry, templates: &[Arc<ClassTemplate>]) -> Vec<(String, LinkError)> {
    templates
        .iter()
        .filter_map(|t| {
            registry
                .define(t)
                .err()
                .map(|err| (t.name().as_str().to_string(), err))
        })
        .collect()
}

fn describe(class: &str, err: &LinkError) -> String {
    format!("error[{:?}] {}: {}", err.kind(), class, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::manifest;

    #[test]
    fn test_clean_manifest_has_no_failures() {
        let (_dir, path) = manifest(
            r#"{ "classes": [
                { "name": "T", "kind": "trait", "methods": [{ "name": "hello" }] },
                { "name": "A", "traits": ["T"] }
            ] }"#,
        );
        assert_eq!(execute(&[path], None).unwrap(), 0);
    }

    #[test]
    fn test_failures_carry_their_kind() {
        let (_dir, path) = manifest(
            r#"{ "classes": [
                { "name": "Base", "methods": [{ "name": "f", "final": true }] },
                { "name": "Child", "parent": "Base", "methods": [{ "name": "f" }] },
                { "name": "Orphan", "parent": "Nowhere" }
            ] }"#,
        );
        let (registry, templates) = open_registry(&[path], None).unwrap();
        let failures = check_all(&registry, templates.templates());

        let lines: Vec<String> = failures.iter().map(|(n, e)| describe(n, e)).collect();
        assert_eq!(
            lines,
            [
                "error[Override] Child: Cannot override final method Base::f()",
                "error[Structural] Orphan: Undefined class: Nowhere",
            ]
        );
    }

    #[test]
    fn test_mock_attribute_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes.json");
        std::fs::write(
            &classes,
            r#"{ "classes": [
                { "name": "Base", "final": true },
                { "name": "Fake", "parent": "Base", "attributes": { "Mock": true } }
            ] }"#,
        )
        .unwrap();
        let config = dir.path().join("linker.toml");
        std::fs::write(&config, "mock_attribute = \"Mock\"\n").unwrap();

        assert_eq!(execute(&[classes.clone()], None).unwrap(), 1);
        assert_eq!(execute(&[classes], Some(&config)).unwrap(), 0);
    }
}
