//! Reflection over linked classes
//!
//! [`ClassInfo`] is a serializable snapshot of what a class declares itself:
//! its methods in source order followed by the ones imported from traits,
//! plus the properties and constants whose owning class is this one.

use crate::attr::{Attr, Visibility};
use crate::class::{Class, ClassRef};
use crate::func::Func;
use crate::names::Name;
use crate::value::Value;
use indexmap::IndexSet;
use serde::Serialize;
use std::sync::Arc;

/// Kind of a class-like declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    /// Regular or abstract class
    Class,
    /// Interface
    Interface,
    /// Trait
    Trait,
}

/// Method summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodInfo {
    /// Name in this class
    pub name: Name,
    /// Class whose table introduced the method
    pub class: Name,
    /// Visibility
    pub visibility: Visibility,
    /// Static method
    pub is_static: bool,
    /// No body
    pub is_abstract: bool,
    /// Cannot be overridden
    pub is_final: bool,
    /// Parameter names in order
    pub params: Vec<Name>,
    /// Doc comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
}

/// Property summary (instance or static)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropInfo {
    /// Declared name
    pub name: Name,
    /// Visibility
    pub visibility: Visibility,
    /// Static property
    pub is_static: bool,
    /// Declared default
    pub default: Value,
    /// Doc comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
}

/// Constant summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstInfo {
    /// Constant name
    pub name: Name,
    /// Declared value (`uninit` when computed by an initializer)
    pub value: Value,
    /// Source text of the initializer expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Snapshot of one linked class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassInfo {
    /// Class name
    pub name: Name,
    /// Declaration kind
    pub kind: ClassKind,
    /// Declared abstract
    pub is_abstract: bool,
    /// Declared final
    pub is_final: bool,
    /// Parent class name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Name>,
    /// Directly declared interfaces
    pub interfaces: Vec<Name>,
    /// Every implemented interface, including the class itself when it is
    /// an interface
    pub all_interfaces: Vec<Name>,
    /// Used traits
    pub traits: Vec<Name>,
    /// `(alias, "Trait::method")` pairs
    pub trait_aliases: Vec<(Name, Name)>,
    /// Declared, then trait-imported methods
    pub methods: Vec<MethodInfo>,
    /// Properties this class declares
    pub properties: Vec<PropInfo>,
    /// Constants this class declares
    pub constants: Vec<ConstInfo>,
    /// Ancestry depth
    pub depth: usize,
    /// Doc comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
}

impl MethodInfo {
    fn of(func: &Func) -> Self {
        let attrs = func.attrs();
        Self {
            name: func.name().clone(),
            class: func.cls().name.clone(),
            visibility: attrs.visibility(),
            is_static: attrs.contains(Attr::STATIC),
            is_abstract: attrs.contains(Attr::ABSTRACT),
            is_final: attrs.contains(Attr::FINAL),
            params: func.params().iter().map(|p| p.name.clone()).collect(),
            doc_comment: func.decl().doc_comment.clone(),
        }
    }
}

impl Class {
    /// Build a reflection snapshot
    pub fn info(&self) -> ClassInfo {
        let attrs = self.attrs();
        let kind = if attrs.contains(Attr::INTERFACE) {
            ClassKind::Interface
        } else if attrs.contains(Attr::TRAIT) {
            ClassKind::Trait
        } else {
            ClassKind::Class
        };

        let declared = self
            .template
            .methods()
            .iter()
            .filter_map(|decl| self.lookup_method(&decl.name));
        let imported = self.methods.values()[self.traits_range.clone()].iter();
        let methods = declared
            .chain(imported)
            .filter(|f| !f.name().is_hidden())
            .map(|f| MethodInfo::of(f))
            .collect();

        let instance = self
            .props
            .values()
            .iter()
            .zip(self.prop_defaults.iter())
            .filter(|(p, _)| p.class.id == self.id)
            .map(|(p, default)| PropInfo {
                name: p.name.clone(),
                visibility: p.attrs.visibility(),
                is_static: false,
                default: default.clone(),
                doc_comment: p.doc_comment.clone(),
            });
        let statics = self
            .static_props
            .values()
            .iter()
            .filter(|s| s.class.id == self.id)
            .map(|s| PropInfo {
                name: s.name.clone(),
                visibility: s.attrs.visibility(),
                is_static: true,
                default: s.cell().initial().clone(),
                doc_comment: s.doc_comment.clone(),
            });

        ClassInfo {
            name: self.name().clone(),
            kind,
            is_abstract: attrs.contains(Attr::ABSTRACT),
            is_final: attrs.contains(Attr::FINAL),
            parent: self.parent.as_ref().map(|p| p.name().clone()),
            interfaces: names_of(&self.declared_interfaces),
            all_interfaces: self.interface_set.iter().map(|i| i.name.clone()).collect(),
            traits: names_of(&self.used_traits),
            trait_aliases: self.trait_aliases.clone(),
            methods,
            properties: instance.chain(statics).collect(),
            constants: self
                .constants
                .values()
                .iter()
                .filter(|c| c.class.id == self.id)
                .map(|c| ConstInfo {
                    name: c.name.clone(),
                    value: c.value.clone(),
                    source: c.source.clone(),
                })
                .collect(),
            depth: self.depth(),
            doc_comment: self.template.doc_comment().map(str::to_string),
        }
    }

    /// Names of the methods callable from `ctx`, walking this class, its
    /// parents and its interfaces. Each name appears once.
    pub fn method_names(&self, ctx: Option<&Class>) -> Vec<Name> {
        let mut names = IndexSet::new();
        self.collect_method_names(ctx, &mut names);
        names.into_iter().collect()
    }

    fn collect_method_names(&self, ctx: Option<&Class>, names: &mut IndexSet<Name>) {
        for decl in self.template.methods() {
            if decl.name.is_hidden() {
                continue;
            }
            if decl.visibility() != Visibility::Public {
                let Some(ctx) = ctx else {
                    continue;
                };
                if ctx.id != self.id {
                    if decl.attrs.contains(Attr::PRIVATE) {
                        continue;
                    }
                    let Some(func) = self.lookup_method(&decl.name) else {
                        continue;
                    };
                    if !self.related_to(ctx, func.base_cls()) {
                        continue;
                    }
                }
            }
            names.insert(decl.name.clone());
        }

        if let Some(parent) = &self.parent {
            parent.collect_method_names(ctx, names);
        }
        for iface in &self.declared_interfaces {
            iface.collect_method_names(ctx, names);
        }
    }

    /// `ctx` derives from `base`, or `base` (an ancestor of this class)
    /// derives from `ctx`.
    fn related_to(&self, ctx: &Class, base: &ClassRef) -> bool {
        ctx.derives_from(base)
            || (ctx.depth() <= base.depth && self.ancestry.get(ctx.depth()) == Some(&ctx.id))
    }

    /// Whether this class declared `method` itself; trait methods count as
    /// declared by the class that imports them.
    pub fn declared_method(&self, method: &Func) -> bool {
        if method.declaring_template().attrs.contains(Attr::TRAIT) {
            return self
                .find_method_base_class(method.name())
                .is_some_and(|base| base.id == self.id);
        }
        method.declaring_template().id == self.template.id()
    }

    /// Class establishing the override baseline for `name`
    pub fn find_method_base_class(&self, name: &Name) -> Option<&ClassRef> {
        self.lookup_method(name).map(|f| f.base_cls())
    }
}

fn names_of(classes: &[Arc<Class>]) -> Vec<Name> {
    classes.iter().map(|c| c.name().clone()).collect()
}
