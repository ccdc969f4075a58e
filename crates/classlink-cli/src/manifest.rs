//! Class manifests
//!
//! A manifest is a JSON document listing class declarations the way the
//! compiler would emit them:
//!
//! ```json
//! {
//!   "classes": [
//!     { "name": "Base", "methods": [{ "name": "f", "visibility": "protected" }] },
//!     { "name": "Child", "parent": "Base", "methods": [{ "name": "f" }] }
//!   ]
//! }
//! ```
//!
//! Each declaration becomes one [`ClassTemplate`]. A [`TemplateSet`] gathers
//! the templates from several manifests and serves them to the registry as
//! its autoloader, so classes may be listed in any order.

use classlink::{
    Attr, ClassTemplate, ClassTemplateBuilder, MethodDecl, Name, Param, TemplateLoader,
    TraitAliasRule, TraitPrecRule, Value, Visibility,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while reading manifests
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read a manifest file
    #[error("Failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse JSON
    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The same class is declared twice
    #[error("Class {0} is declared more than once")]
    DuplicateClass(String),

    /// A member is declared twice within one class
    #[error("Duplicate {member} {name} in class {class}")]
    DuplicateMember {
        class: String,
        member: &'static str,
        name: String,
    },

    /// A value that declarations cannot hold
    #[error("Unsupported value for {0}: objects are not allowed")]
    UnsupportedValue(String),
}

/// One manifest file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Declared classes, interfaces and traits
    #[serde(default)]
    pub classes: Vec<ClassEntry>,
}

/// Declaration kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Class,
    Interface,
    Trait,
}

/// Class declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassEntry {
    pub name: String,
    #[serde(default)]
    pub kind: EntryKind,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub methods: Vec<MethodEntry>,
    #[serde(default)]
    pub properties: Vec<PropEntry>,
    #[serde(default)]
    pub constants: Vec<ConstEntry>,
    /// `T::m insteadof U` rules
    #[serde(default)]
    pub insteadof: Vec<PrecEntry>,
    /// `T::m as n` rules
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
    /// User attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodEntry {
    pub name: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub params: Vec<ParamEntry>,
    #[serde(default)]
    pub static_locals: bool,
    #[serde(default)]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamEntry {
    pub name: String,
    #[serde(default, rename = "type")]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub by_ref: bool,
    #[serde(default)]
    pub variadic: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropEntry {
    pub name: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Omitted means the initializer computes it
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstEntry {
    pub name: String,
    /// Omitted means `86cinit` computes it
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrecEntry {
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub method: String,
    pub insteadof: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AliasEntry {
    #[serde(default, rename = "trait")]
    pub trait_name: Option<String>,
    pub method: String,
    /// New name; omitted for a pure visibility change
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

fn member_attrs(visibility: Option<Visibility>, flags: &[(bool, Attr)]) -> Attr {
    let mut attrs = visibility.map(Visibility::attr).unwrap_or(Attr::empty());
    for (set, bit) in flags {
        if *set {
            attrs |= *bit;
        }
    }
    attrs
}

/// Convert a JSON literal into a declared value
pub fn json_to_value(what: &str, json: &serde_json::Value) -> Result<Value, ManifestError> {
    use serde_json::Value as Json;
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Str(Name::new(s)),
        Json::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| json_to_value(what, item))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(_) => return Err(ManifestError::UnsupportedValue(what.to_string())),
    })
}

impl ClassEntry {
    /// Build the template this entry declares
    pub fn to_template(&self) -> Result<Arc<ClassTemplate>, ManifestError> {
        let kind = match self.kind {
            EntryKind::Class => Attr::empty(),
            EntryKind::Interface => Attr::INTERFACE,
            EntryKind::Trait => Attr::TRAIT,
        };
        let attrs = member_attrs(
            None,
            &[(self.is_abstract, Attr::ABSTRACT), (self.is_final, Attr::FINAL)],
        ) | kind;

        let mut b = ClassTemplateBuilder::new(&self.name, attrs);
        if let Some(parent) = &self.parent {
            b.parent(parent);
        }
        for iface in &self.interfaces {
            b.add_interface(iface);
        }
        for t in &self.traits {
            b.add_used_trait(t);
        }
        if let Some(doc) = &self.doc {
            b.doc_comment(doc);
        }

        for m in &self.methods {
            let mut attrs = member_attrs(
                m.visibility,
                &[
                    (m.is_static, Attr::STATIC),
                    (m.is_abstract, Attr::ABSTRACT),
                    (m.is_final, Attr::FINAL),
                ],
            );
            // Interface methods have no body
            if self.kind == EntryKind::Interface {
                attrs |= Attr::ABSTRACT;
            }
            let mut decl = MethodDecl::new(&m.name, attrs);
            for p in &m.params {
                let mut param = Param::new(&p.name);
                if let Some(hint) = &p.type_hint {
                    param = param.typed(hint);
                }
                if p.optional {
                    param = param.optional();
                }
                if p.by_ref {
                    param = param.by_ref();
                }
                if p.variadic {
                    param = param.variadic();
                }
                decl = decl.param(param);
            }
            if m.static_locals {
                decl = decl.with_static_locals();
            }
            if let Some(doc) = &m.doc {
                decl = decl.doc(doc);
            }
            if !b.add_method(decl) {
                return Err(self.duplicate("method", &m.name));
            }
        }

        for p in &self.properties {
            let attrs = member_attrs(p.visibility, &[(p.is_static, Attr::STATIC)]);
            let default = match &p.default {
                Some(json) => json_to_value(&format!("{}::${}", self.name, p.name), json)?,
                None => Value::Uninit,
            };
            if !b.add_property(&p.name, attrs, default) {
                return Err(self.duplicate("property", &p.name));
            }
        }

        for c in &self.constants {
            let value = match &c.value {
                Some(json) => json_to_value(&format!("{}::{}", self.name, c.name), json)?,
                None => Value::Uninit,
            };
            if !b.add_constant(&c.name, value, c.source.as_deref()) {
                return Err(self.duplicate("constant", &c.name));
            }
        }

        for rule in &self.insteadof {
            let excluded: Vec<&str> = rule.insteadof.iter().map(String::as_str).collect();
            b.add_trait_prec_rule(TraitPrecRule::new(&rule.trait_name, &rule.method, &excluded));
        }
        for rule in &self.aliases {
            let modifiers = member_attrs(rule.visibility, &[(rule.is_final, Attr::FINAL)]);
            b.add_trait_alias_rule(TraitAliasRule::new(
                rule.trait_name.as_deref(),
                &rule.method,
                rule.alias.as_deref().unwrap_or(&rule.method),
                modifiers,
            ));
        }

        for (name, json) in &self.attributes {
            let value = json_to_value(&format!("<<{}>>", name), json)?;
            b.add_user_attribute(name, value);
        }

        Ok(b.build())
    }

    fn duplicate(&self, member: &'static str, name: &str) -> ManifestError {
        ManifestError::DuplicateMember {
            class: self.name.clone(),
            member,
            name: name.to_string(),
        }
    }
}

impl Manifest {
    /// Load a manifest from a file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a manifest from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Templates gathered from one or more manifests, in declaration order
#[derive(Debug, Default)]
pub struct TemplateSet {
    order: Vec<Arc<ClassTemplate>>,
    by_name: BTreeMap<String, Arc<ClassTemplate>>,
}

impl TemplateSet {
    /// Read and merge every manifest in `paths`
    pub fn from_files(paths: &[impl AsRef<Path>]) -> Result<Self, ManifestError> {
        let mut set = Self::default();
        for path in paths {
            set.add_manifest(&Manifest::from_file(path.as_ref())?)?;
        }
        Ok(set)
    }

    /// Add every class of `manifest`
    pub fn add_manifest(&mut self, manifest: &Manifest) -> Result<(), ManifestError> {
        for entry in &manifest.classes {
            if self.by_name.contains_key(&entry.name) {
                return Err(ManifestError::DuplicateClass(entry.name.clone()));
            }
            let template = entry.to_template()?;
            self.by_name.insert(entry.name.clone(), template.clone());
            self.order.push(template);
        }
        Ok(())
    }

    /// Templates in declaration order
    pub fn templates(&self) -> &[Arc<ClassTemplate>] {
        &self.order
    }

    /// Number of declared classes
    pub fn len(&self) -> usize {
        self.order.len()
    }
}

impl TemplateLoader for TemplateSet {
    fn load(&self, name: &Name) -> Option<Arc<ClassTemplate>> {
        self.by_name.get(name.as_str()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest = Manifest::from_str(r#"{ "classes": [{ "name": "A" }] }"#).unwrap();
        assert_eq!(manifest.classes.len(), 1);
        assert_eq!(manifest.classes[0].kind, EntryKind::Class);

        let template = manifest.classes[0].to_template().unwrap();
        assert_eq!(template.name().as_str(), "A");
        assert!(template.parent().is_none());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(Manifest::from_str(r#"{ "classes": [{ "name": "A", "extends": "B" }] }"#).is_err());
    }

    #[test]
    fn test_members_become_template_entries() {
        let json = r#"{
            "classes": [{
                "name": "Counter",
                "parent": "Base",
                "interfaces": ["Countable"],
                "traits": ["Logs"],
                "methods": [
                    { "name": "count", "params": [{ "name": "mode", "type": "int", "optional": true }] },
                    { "name": "reset", "visibility": "protected", "final": true }
                ],
                "properties": [
                    { "name": "n", "visibility": "private", "default": 0 },
                    { "name": "total", "static": true, "default": [1, 2.5, "x", null] }
                ],
                "constants": [
                    { "name": "MAX", "value": 10 },
                    { "name": "NOW", "source": "time()" }
                ],
                "insteadof": [{ "trait": "Logs", "method": "log", "insteadof": ["Other"] }],
                "aliases": [{ "method": "log", "as": "write", "visibility": "protected" }],
                "attributes": { "__MockClass": true }
            }]
        }"#;
        let manifest = Manifest::from_str(json).unwrap();
        let t = manifest.classes[0].to_template().unwrap();

        assert_eq!(t.parent().map(Name::as_str), Some("Base"));
        assert_eq!(t.interfaces(), [Name::new("Countable")]);
        assert_eq!(t.used_traits(), [Name::new("Logs")]);

        let count = t.method(&Name::new("count")).unwrap();
        assert_eq!(count.visibility(), Visibility::Public);
        assert!(count.params[0].is_optional());
        assert_eq!(count.params[0].type_hint, Some(Name::new("int")));
        let reset = t.method(&Name::new("reset")).unwrap();
        assert!(reset.attrs.contains(Attr::PROTECTED | Attr::FINAL));

        let n = t.property(&Name::new("n")).unwrap();
        assert_eq!(n.attrs.visibility(), Visibility::Private);
        assert_eq!(n.default, Value::Int(0));
        let total = t.property(&Name::new("total")).unwrap();
        assert!(total.attrs.contains(Attr::STATIC | Attr::PUBLIC));
        assert_eq!(
            total.default,
            Value::Array(vec![
                Value::Int(1),
                Value::Double(2.5),
                Value::Str(Name::new("x")),
                Value::Null
            ])
        );

        assert_eq!(t.constant(&Name::new("MAX")).unwrap().value, Value::Int(10));
        let now = t.constant(&Name::new("NOW")).unwrap();
        assert!(now.value.is_uninit());
        assert_eq!(now.source.as_deref(), Some("time()"));

        let prec = &t.trait_prec_rules()[0];
        assert_eq!(prec.selected_trait, Name::new("Logs"));
        assert_eq!(prec.excluded_traits, [Name::new("Other")]);
        let alias = &t.trait_alias_rules()[0];
        assert!(alias.trait_name.is_none());
        assert_eq!(alias.new_name, Name::new("write"));
        assert_eq!(alias.modifiers, Attr::PROTECTED);

        assert!(t.has_user_attribute(&Name::new("__MockClass")));
    }

    #[test]
    fn test_interface_methods_are_abstract() {
        let json = r#"{ "classes": [{ "name": "I", "kind": "interface", "methods": [{ "name": "m" }] }] }"#;
        let t = Manifest::from_str(json).unwrap().classes[0].to_template().unwrap();
        assert!(t.is_interface());
        assert!(t.method(&Name::new("m")).unwrap().attrs.contains(Attr::ABSTRACT));
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let json = r#"{ "classes": [{ "name": "A", "methods": [{ "name": "f" }, { "name": "f" }] }] }"#;
        let err = Manifest::from_str(json).unwrap().classes[0]
            .to_template()
            .unwrap_err();
        assert_eq!(err.to_string(), "Duplicate method f in class A");
    }

    #[test]
    fn test_object_values_rejected() {
        let json = r#"{ "classes": [{ "name": "A", "constants": [{ "name": "C", "value": { "k": 1 } }] }] }"#;
        let err = Manifest::from_str(json).unwrap().classes[0]
            .to_template()
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnsupportedValue(ref what) if what == "A::C"));
    }

    #[test]
    fn test_template_set_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("child.json");
        let second = dir.path().join("base.json");
        std::fs::File::create(&first)
            .unwrap()
            .write_all(br#"{ "classes": [{ "name": "Child", "parent": "Base" }] }"#)
            .unwrap();
        std::fs::File::create(&second)
            .unwrap()
            .write_all(br#"{ "classes": [{ "name": "Base" }] }"#)
            .unwrap();

        let set = TemplateSet::from_files(&[&first, &second]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.templates()[0].name().as_str(), "Child");
        assert!(set.load(&Name::new("Base")).is_some());
        assert!(set.load(&Name::new("Missing")).is_none());
    }

    #[test]
    fn test_duplicate_class_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, r#"{ "classes": [{ "name": "A" }] }"#).unwrap();

        let err = TemplateSet::from_files(&[&path, &path]).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateClass(ref n) if n == "A"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemplateSet::from_files(&[dir.path().join("nope.json")]).unwrap_err();
        assert!(matches!(err, ManifestError::IoError(_)));
    }
}
