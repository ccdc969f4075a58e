//! `classlink link`: Link classes and print their layouts.

use super::open_registry;
use anyhow::Context;
use classlink::{Class, ClassInfo};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub fn execute(manifests: &[PathBuf], config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let (registry, templates) = open_registry(manifests, config)?;

    let mut infos: Vec<ClassInfo> = Vec::new();
    for template in templates.templates() {
        let class = registry
            .define(template)
            .with_context(|| format!("Failed to link {}", template.name()))?;
        if json {
            infos.push(class.info());
        } else {
            print!("{}", render_layout(&class));
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    }
    Ok(())
}

/// Slot-ordered layout of one class
pub fn render_layout(class: &Class) -> String {
    let mut out = String::new();
    let _ = write!(out, "class {}", class.name());
    if let Some(parent) = class.parent() {
        let _ = write!(out, " extends {}", parent.name());
    }
    if !class.declared_interfaces().is_empty() {
        let names: Vec<&str> = class
            .declared_interfaces()
            .iter()
            .map(|i| i.name().as_str())
            .collect();
        let _ = write!(out, " implements {}", names.join(", "));
    }
    let _ = writeln!(out, " (depth {})", class.depth());

    if !class.methods().is_empty() {
        let _ = writeln!(out, "  methods:");
        for (slot, func) in class.methods().iter() {
            let _ = writeln!(
                out,
                "    [{}] {} {}::{}",
                slot,
                func.attrs().visibility(),
                func.cls().name,
                func.name()
            );
        }
    }

    if !class.props().is_empty() {
        let _ = writeln!(out, "  properties:");
        for (slot, prop) in class.props().iter() {
            let name = class.props().name_at(slot).map_or("<private>", |n| n.as_str());
            let _ = writeln!(
                out,
                "    [{}] {} ${} ({})",
                slot,
                prop.attrs.visibility(),
                name,
                prop.class.name
            );
        }
    }

    if !class.static_props().is_empty() {
        let _ = writeln!(out, "  static properties:");
        for (slot, sprop) in class.static_props().iter() {
            let _ = writeln!(
                out,
                "    [{}] {} ${} ({})",
                slot,
                sprop.attrs.visibility(),
                sprop.name,
                sprop.class.name
            );
        }
    }

    if !class.constants().is_empty() {
        let _ = writeln!(out, "  constants:");
        for (slot, c) in class.constants().iter() {
            let _ = writeln!(out, "    [{}] {} = {} ({})", slot, c.name, c.value, c.class.name);
        }
    }
    out
}
