//! Class templates
//!
//! A [`ClassTemplate`] is the immutable, per-unit description of one declared
//! class as produced by the compiler. Templates are built once through
//! [`ClassTemplateBuilder`], shared behind `Arc`, and may be linked into many
//! distinct runtime classes over the life of the process.

use crate::attr::{Attr, Visibility};
use crate::names::Name;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for generating unique template IDs
static NEXT_TEMPLATE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a built template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(u64);

impl TemplateId {
    fn next() -> Self {
        TemplateId(NEXT_TEMPLATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Declared method parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name
    pub name: Name,
    /// Declared type hint, if any
    pub type_hint: Option<Name>,
    /// Whether the parameter has a default value
    pub has_default: bool,
    /// Passed by reference
    pub by_ref: bool,
    /// Collects remaining arguments
    pub variadic: bool,
}

impl Param {
    /// Required, untyped, by-value parameter
    pub fn new(name: &str) -> Self {
        Self {
            name: Name::new(name),
            type_hint: None,
            has_default: false,
            by_ref: false,
            variadic: false,
        }
    }

    /// Set the type hint
    pub fn typed(mut self, hint: &str) -> Self {
        self.type_hint = Some(Name::new(hint));
        self
    }

    /// Mark as optional
    pub fn optional(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Mark as by-reference
    pub fn by_ref(mut self) -> Self {
        self.by_ref = true;
        self
    }

    /// Mark as variadic
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Whether a caller may omit this parameter
    pub fn is_optional(&self) -> bool {
        self.has_default || self.variadic
    }
}

/// Declared method
#[derive(Debug, Clone)]
pub struct MethodDecl {
    /// Method name
    pub name: Name,
    /// Declaration attributes
    pub attrs: Attr,
    /// Parameters in order
    pub params: Vec<Param>,
    /// Body declares `static` locals
    pub has_static_locals: bool,
    /// Doc comment
    pub doc_comment: Option<String>,
}

impl MethodDecl {
    /// New method with the given attributes and no parameters.
    ///
    /// A method declared without visibility is public.
    pub fn new(name: &str, attrs: Attr) -> Self {
        let attrs = if attrs.intersects(Attr::VISIBILITY) {
            attrs
        } else {
            attrs | Attr::PUBLIC
        };
        Self {
            name: Name::new(name),
            attrs,
            params: Vec::new(),
            has_static_locals: false,
            doc_comment: None,
        }
    }

    /// Append a parameter
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Mark the body as using static locals
    pub fn with_static_locals(mut self) -> Self {
        self.has_static_locals = true;
        self
    }

    /// Attach a doc comment
    pub fn doc(mut self, text: &str) -> Self {
        self.doc_comment = Some(text.to_string());
        self
    }

    /// Declared visibility
    pub fn visibility(&self) -> Visibility {
        self.attrs.visibility()
    }
}

/// Declared property (instance or static)
#[derive(Debug, Clone)]
pub struct PropDecl {
    /// Property name
    pub name: Name,
    /// Storage name incorporating visibility and declaring class
    pub mangled_name: Name,
    /// Declaration attributes
    pub attrs: Attr,
    /// Default value (`Uninit` when an initializer computes it)
    pub default: Value,
    /// Doc comment
    pub doc_comment: Option<String>,
}

/// Declared class constant
#[derive(Debug, Clone)]
pub struct ConstDecl {
    /// Constant name
    pub name: Name,
    /// Value (`Uninit` when `86cinit` computes it)
    pub value: Value,
    /// Source text of the initializer
    pub source: Option<String>,
}

/// `use A, B { A::m insteadof B; }`
#[derive(Debug, Clone)]
pub struct TraitPrecRule {
    /// Method the rule applies to
    pub method: Name,
    /// Trait whose implementation wins
    pub selected_trait: Name,
    /// Traits whose implementations are excluded
    pub excluded_traits: Vec<Name>,
}

impl TraitPrecRule {
    /// Build a precedence rule from string names
    pub fn new(selected_trait: &str, method: &str, excluded: &[&str]) -> Self {
        Self {
            method: Name::new(method),
            selected_trait: Name::new(selected_trait),
            excluded_traits: excluded.iter().map(|n| Name::new(n)).collect(),
        }
    }
}

/// `use A { A::m as protected n; }`
#[derive(Debug, Clone)]
pub struct TraitAliasRule {
    /// Trait named by the rule; `None` for the unqualified `m as n` form
    pub trait_name: Option<Name>,
    /// Method being aliased
    pub original: Name,
    /// Name it is imported under (equal to `original` for pure modifier changes)
    pub new_name: Name,
    /// Replacement modifiers (empty keeps the method's own)
    pub modifiers: Attr,
}

impl TraitAliasRule {
    /// Build an alias rule from string names
    pub fn new(trait_name: Option<&str>, original: &str, new_name: &str, modifiers: Attr) -> Self {
        Self {
            trait_name: trait_name.map(Name::new),
            original: Name::new(original),
            new_name: Name::new(new_name),
            modifiers,
        }
    }
}

/// Compute the storage name for a property.
///
/// Public properties are stored under their plain name, protected ones under
/// `\0*\0name`, private ones under `\0Class\0name`.
pub fn mangle_prop_name(class_name: &Name, prop_name: &Name, attrs: Attr) -> Name {
    match attrs.visibility() {
        Visibility::Public => prop_name.clone(),
        Visibility::Protected => Name::new(&format!("\0*\0{}", prop_name)),
        Visibility::Private => Name::new(&format!("\0{}\0{}", class_name, prop_name)),
    }
}

/// Immutable description of one declared class
#[derive(Debug)]
pub struct ClassTemplate {
    id: TemplateId,
    name: Name,
    attrs: Attr,
    parent: Option<Name>,
    interfaces: Vec<Name>,
    methods: Vec<Arc<MethodDecl>>,
    method_index: FxHashMap<Name, usize>,
    properties: Vec<PropDecl>,
    prop_index: FxHashMap<Name, usize>,
    constants: Vec<ConstDecl>,
    const_index: FxHashMap<Name, usize>,
    used_traits: Vec<Name>,
    trait_prec_rules: Vec<TraitPrecRule>,
    trait_alias_rules: Vec<TraitAliasRule>,
    user_attributes: FxHashMap<Name, Value>,
    doc_comment: Option<String>,
}

impl ClassTemplate {
    /// Unique identity
    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// Declared class name
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Class attributes
    pub fn attrs(&self) -> Attr {
        self.attrs
    }

    /// Parent class name
    pub fn parent(&self) -> Option<&Name> {
        self.parent.as_ref()
    }

    /// Implemented (or, for interfaces, extended) interface names
    pub fn interfaces(&self) -> &[Name] {
        &self.interfaces
    }

    /// Declared methods in source order
    pub fn methods(&self) -> &[Arc<MethodDecl>] {
        &self.methods
    }

    /// Declared properties in source order
    pub fn properties(&self) -> &[PropDecl] {
        &self.properties
    }

    /// Declared constants in source order
    pub fn constants(&self) -> &[ConstDecl] {
        &self.constants
    }

    /// Names of used traits
    pub fn used_traits(&self) -> &[Name] {
        &self.used_traits
    }

    /// `insteadof` rules
    pub fn trait_prec_rules(&self) -> &[TraitPrecRule] {
        &self.trait_prec_rules
    }

    /// `as` rules
    pub fn trait_alias_rules(&self) -> &[TraitAliasRule] {
        &self.trait_alias_rules
    }

    /// User attributes (`<<Name(value)>>`)
    pub fn user_attributes(&self) -> &FxHashMap<Name, Value> {
        &self.user_attributes
    }

    /// Whether a user attribute is present
    pub fn has_user_attribute(&self, name: &Name) -> bool {
        self.user_attributes.contains_key(name)
    }

    /// Doc comment
    pub fn doc_comment(&self) -> Option<&str> {
        self.doc_comment.as_deref()
    }

    /// Look up a declared method
    pub fn method(&self, name: &Name) -> Option<&Arc<MethodDecl>> {
        self.method_index.get(name).map(|&i| &self.methods[i])
    }

    /// Whether this template declares `name`
    pub fn has_method(&self, name: &Name) -> bool {
        self.method_index.contains_key(name)
    }

    /// Look up a declared property
    pub fn property(&self, name: &Name) -> Option<&PropDecl> {
        self.prop_index.get(name).map(|&i| &self.properties[i])
    }

    /// Whether this template declares property `name`
    pub fn has_property(&self, name: &Name) -> bool {
        self.prop_index.contains_key(name)
    }

    /// Look up a declared constant
    pub fn constant(&self, name: &Name) -> Option<&ConstDecl> {
        self.const_index.get(name).map(|&i| &self.constants[i])
    }

    /// Whether the template is an interface
    pub fn is_interface(&self) -> bool {
        self.attrs.contains(Attr::INTERFACE)
    }

    /// Whether the template is a trait
    pub fn is_trait(&self) -> bool {
        self.attrs.contains(Attr::TRAIT)
    }

    /// Whether the template may not be instantiated
    pub fn is_abstract_like(&self) -> bool {
        self.attrs
            .intersects(Attr::ABSTRACT | Attr::INTERFACE | Attr::TRAIT)
    }
}

/// Emitter for [`ClassTemplate`]s
#[derive(Debug)]
pub struct ClassTemplateBuilder {
    template: ClassTemplate,
}

impl ClassTemplateBuilder {
    /// Start a template for class `name`
    pub fn new(name: &str, attrs: Attr) -> Self {
        Self {
            template: ClassTemplate {
                id: TemplateId(0),
                name: Name::new(name),
                attrs,
                parent: None,
                interfaces: Vec::new(),
                methods: Vec::new(),
                method_index: FxHashMap::default(),
                properties: Vec::new(),
                prop_index: FxHashMap::default(),
                constants: Vec::new(),
                const_index: FxHashMap::default(),
                used_traits: Vec::new(),
                trait_prec_rules: Vec::new(),
                trait_alias_rules: Vec::new(),
                user_attributes: FxHashMap::default(),
                doc_comment: None,
            },
        }
    }

    /// Set the parent class name
    pub fn parent(&mut self, name: &str) -> &mut Self {
        self.template.parent = Some(Name::new(name));
        self
    }

    /// Declare an implemented interface
    pub fn add_interface(&mut self, name: &str) -> &mut Self {
        self.template.interfaces.push(Name::new(name));
        self
    }

    /// Declare a method. Returns `false` if the name is already declared.
    pub fn add_method(&mut self, method: MethodDecl) -> bool {
        if self.template.method_index.contains_key(&method.name) {
            return false;
        }
        self.template
            .method_index
            .insert(method.name.clone(), self.template.methods.len());
        self.template.methods.push(Arc::new(method));
        true
    }

    /// Declare a property. Returns `false` if the name is already declared.
    ///
    /// A property declared without visibility is public.
    pub fn add_property(&mut self, name: &str, attrs: Attr, default: Value) -> bool {
        let name = Name::new(name);
        if self.template.prop_index.contains_key(&name) {
            return false;
        }
        let attrs = if attrs.intersects(Attr::VISIBILITY) {
            attrs
        } else {
            attrs | Attr::PUBLIC
        };
        let mangled_name = mangle_prop_name(&self.template.name, &name, attrs);
        self.template
            .prop_index
            .insert(name.clone(), self.template.properties.len());
        self.template.properties.push(PropDecl {
            name,
            mangled_name,
            attrs,
            default,
            doc_comment: None,
        });
        true
    }

    /// Declare a constant. Returns `false` if the name is already declared.
    pub fn add_constant(&mut self, name: &str, value: Value, source: Option<&str>) -> bool {
        let name = Name::new(name);
        if self.template.const_index.contains_key(&name) {
            return false;
        }
        self.template
            .const_index
            .insert(name.clone(), self.template.constants.len());
        self.template.constants.push(ConstDecl {
            name,
            value,
            source: source.map(str::to_string),
        });
        true
    }

    /// Declare a used trait
    pub fn add_used_trait(&mut self, name: &str) -> &mut Self {
        self.template.used_traits.push(Name::new(name));
        self
    }

    /// Add an `insteadof` rule
    pub fn add_trait_prec_rule(&mut self, rule: TraitPrecRule) -> &mut Self {
        self.template.trait_prec_rules.push(rule);
        self
    }

    /// Add an `as` rule
    pub fn add_trait_alias_rule(&mut self, rule: TraitAliasRule) -> &mut Self {
        self.template.trait_alias_rules.push(rule);
        self
    }

    /// Attach a user attribute
    pub fn add_user_attribute(&mut self, name: &str, value: Value) -> &mut Self {
        self.template.user_attributes.insert(Name::new(name), value);
        self
    }

    /// Attach a doc comment
    pub fn doc_comment(&mut self, text: &str) -> &mut Self {
        self.template.doc_comment = Some(text.to_string());
        self
    }

    /// Finish the template, assigning it a fresh identity
    pub fn build(self) -> Arc<ClassTemplate> {
        let mut template = self.template;
        template.id = TemplateId::next();
        Arc::new(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_duplicates() {
        let mut b = ClassTemplateBuilder::new("Foo", Attr::empty());
        assert!(b.add_method(MethodDecl::new("f", Attr::PUBLIC)));
        assert!(!b.add_method(MethodDecl::new("f", Attr::PRIVATE)));
        assert!(b.add_property("x", Attr::PUBLIC, Value::Null));
        assert!(!b.add_property("x", Attr::PRIVATE, Value::Null));
        assert!(b.add_constant("C", Value::Int(1), Some("1")));
        assert!(!b.add_constant("C", Value::Int(2), None));

        let t = b.build();
        assert_eq!(t.methods().len(), 1);
        assert_eq!(t.properties().len(), 1);
        assert_eq!(t.constants().len(), 1);
        assert_eq!(t.method(&Name::new("f")).unwrap().visibility(), Visibility::Public);
    }

    #[test]
    fn test_default_visibility_is_public() {
        let m = MethodDecl::new("run", Attr::STATIC);
        assert!(m.attrs.contains(Attr::PUBLIC | Attr::STATIC));

        let mut b = ClassTemplateBuilder::new("Foo", Attr::empty());
        b.add_property("p", Attr::empty(), Value::Null);
        let t = b.build();
        assert_eq!(t.property(&Name::new("p")).unwrap().attrs, Attr::PUBLIC);
    }

    #[test]
    fn test_mangled_names() {
        let mut b = ClassTemplateBuilder::new("Foo", Attr::empty());
        b.add_property("a", Attr::PUBLIC, Value::Null);
        b.add_property("b", Attr::PROTECTED, Value::Null);
        b.add_property("c", Attr::PRIVATE, Value::Null);
        let t = b.build();

        assert_eq!(t.property(&Name::new("a")).unwrap().mangled_name.as_str(), "a");
        assert_eq!(t.property(&Name::new("b")).unwrap().mangled_name.as_str(), "\0*\0b");
        assert_eq!(t.property(&Name::new("c")).unwrap().mangled_name.as_str(), "\0Foo\0c");
    }

    #[test]
    fn test_template_ids_are_unique() {
        let a = ClassTemplateBuilder::new("A", Attr::empty()).build();
        let b = ClassTemplateBuilder::new("A", Attr::empty()).build();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_kind_predicates() {
        let i = ClassTemplateBuilder::new("I", Attr::INTERFACE).build();
        let t = ClassTemplateBuilder::new("T", Attr::TRAIT).build();
        let a = ClassTemplateBuilder::new("A", Attr::ABSTRACT).build();
        assert!(i.is_interface() && i.is_abstract_like());
        assert!(t.is_trait() && t.is_abstract_like());
        assert!(a.is_abstract_like() && !a.is_interface());
    }
}
