//! Linked classes
//!
//! A [`Class`] is the materialized form of a template: every table is
//! written once by the linker and never mutated afterwards, so interpreter
//! threads read it without locks. The only interior mutability is in
//! per-class caches (initial property vector, computed constants) and in the
//! static property cells shared along the inheritance chain.

use crate::attr::{Attr, ObjectCapabilities, Visibility};
use crate::error::{LinkError, LinkResult};
use crate::func::Func;
use crate::linker::ClassResolver;
use crate::names::{well_known, Name};
use crate::slots::{Slot, SlotMap};
use crate::template::ClassTemplate;
use crate::value::Value;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Global counter for generating unique class IDs
static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a linked class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

impl ClassId {
    pub(crate) fn next() -> Self {
        ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Non-owning reference to a linked class.
///
/// Member records point at their declaring class through a `ClassRef`
/// rather than an `Arc`, so tables never form reference cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRef {
    /// Class identity
    pub id: ClassId,
    /// Class name
    pub name: Name,
    /// Inheritance depth (0 for roots)
    pub depth: usize,
}

impl ClassRef {
    pub(crate) fn new(id: ClassId, name: Name, depth: usize) -> Self {
        Self { id, name, depth }
    }
}

/// Lifecycle of a class identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClassState {
    /// Template known, nothing linked
    Unlinked = 0,
    /// A thread is running the link phases
    Linking = 1,
    /// Published and resolvable
    Linked = 2,
    /// Replaced by a redefinition; existing readers may still use it
    Superseded = 3,
    /// Every reader that could have observed it has moved on
    Reclaimable = 4,
    /// Memory released
    Freed = 5,
}

impl ClassState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ClassState::Unlinked,
            1 => ClassState::Linking,
            2 => ClassState::Linked,
            3 => ClassState::Superseded,
            4 => ClassState::Reclaimable,
            _ => ClassState::Freed,
        }
    }
}

/// Instance property descriptor
#[derive(Debug, Clone)]
pub struct Prop {
    /// Declared name
    pub name: Name,
    /// Storage name in this class
    pub mangled_name: Name,
    /// Storage name as first declared (initializers key private props by it)
    pub original_mangled_name: Name,
    /// Effective attributes
    pub attrs: Attr,
    /// First class in the hierarchy to declare the property
    pub class: ClassRef,
    /// Doc comment
    pub doc_comment: Option<String>,
}

/// Storage behind a static property, shared by every class that aliases it
#[derive(Debug)]
pub struct StaticCell {
    initial: Value,
    value: RwLock<Value>,
}

impl StaticCell {
    pub(crate) fn new(initial: Value) -> Arc<Self> {
        Arc::new(Self {
            value: RwLock::new(initial.clone()),
            initial,
        })
    }

    /// Declared default
    pub fn initial(&self) -> &Value {
        &self.initial
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.value.read().clone()
    }

    /// Overwrite the current value
    pub fn set(&self, value: Value) {
        *self.value.write() = value;
    }

    fn reset(&self) {
        *self.value.write() = self.initial.clone();
    }
}

/// Static property descriptor
#[derive(Debug, Clone)]
pub struct SProp {
    /// Declared name
    pub name: Name,
    /// Effective attributes
    pub attrs: Attr,
    /// Class that owns the storage
    pub class: ClassRef,
    /// Doc comment
    pub doc_comment: Option<String>,
    pub(crate) cell: Arc<StaticCell>,
}

impl SProp {
    /// Storage cell
    pub fn cell(&self) -> &Arc<StaticCell> {
        &self.cell
    }

    /// Whether two descriptors alias the same storage
    pub fn shares_storage_with(&self, other: &SProp) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

/// Class constant descriptor
#[derive(Debug, Clone)]
pub struct Const {
    /// Constant name
    pub name: Name,
    /// Most specific declaring class or interface
    pub class: ClassRef,
    /// Declared value, `Uninit` when `86cinit` must compute it
    pub value: Value,
    /// Source text of the initializer
    pub source: Option<String>,
    pub(crate) initializer: Option<Arc<Func>>,
}

/// Initial instance property values, keyed like the `86pinit` argument
#[derive(Debug, Clone, PartialEq)]
pub struct PropInitVec {
    /// Values in slot order
    pub values: Vec<Value>,
    /// Keys in slot order (original mangled name for private props)
    pub keys: Vec<Name>,
}

impl PropInitVec {
    /// Value stored under `key`
    pub fn get(&self, key: &Name) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| &self.values[i])
    }

    /// Mutable value stored under `key`
    pub fn get_mut(&mut self, key: &Name) -> Option<&mut Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(move |i| &mut self.values[i])
    }
}

/// Result of an accessibility-aware instance property lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropLookup {
    /// Slot in the instance layout, if a declared property matched
    pub slot: Option<Slot>,
    /// Whether the calling context may access it
    pub accessible: bool,
}

/// Result of a static property lookup
#[derive(Debug, Clone)]
pub struct StaticPropAccess {
    /// Slot in the static property table
    pub slot: Slot,
    /// Whether the calling context may access it
    pub accessible: bool,
    /// Shared storage
    pub cell: Arc<StaticCell>,
}

/// Failure reported by an [`ExecutionContext`]
pub type ExecError = Box<dyn std::error::Error + Send + Sync>;

/// Interpreter hooks invoked to run user initializers
pub trait ExecutionContext {
    /// Run one `86pinit`, completing non-scalar entries of `props`
    fn run_prop_initializer(
        &self,
        init: &Func,
        class: &Class,
        props: &mut PropInitVec,
    ) -> Result<(), ExecError>;

    /// Run one `86sinit`, writing through the class's static cells
    fn run_static_initializer(&self, init: &Func, class: &Class) -> Result<(), ExecError>;

    /// Evaluate constant `name` through `86cinit`
    fn eval_constant(&self, init: &Func, class: &Class, name: &Name) -> Result<Value, ExecError>;
}

/// Outcome of checking whether a cached class can be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Every dependency still resolves to what the class was built against
    Available,
    /// Some dependency now resolves to a different class
    Unavailable,
    /// The named dependency does not resolve at all
    Indeterminate(Name),
}

/// A linked, runtime-usable class
pub struct Class {
    pub(crate) id: ClassId,
    pub(crate) template: Arc<ClassTemplate>,
    pub(crate) parent: Option<Arc<Class>>,
    pub(crate) declared_interfaces: Vec<Arc<Class>>,
    pub(crate) all_interfaces: Vec<Arc<Class>>,
    pub(crate) interface_set: Box<[ClassRef]>,
    pub(crate) used_traits: Vec<Arc<Class>>,
    pub(crate) trait_aliases: Vec<(Name, Name)>,
    pub(crate) methods: SlotMap<Arc<Func>>,
    pub(crate) traits_range: Range<Slot>,
    pub(crate) props: SlotMap<Prop>,
    pub(crate) prop_defaults: Box<[Value]>,
    pub(crate) num_accessible_props: usize,
    pub(crate) static_props: SlotMap<SProp>,
    pub(crate) constants: SlotMap<Const>,
    pub(crate) pinit: Vec<Arc<Func>>,
    pub(crate) sinit: Vec<Arc<Func>>,
    pub(crate) ancestry: Box<[ClassId]>,
    pub(crate) ctor: Arc<Func>,
    pub(crate) to_string: Option<Arc<Func>>,
    pub(crate) capabilities: ObjectCapabilities,
    pub(crate) state: AtomicU8,
    pub(crate) prop_init: OnceCell<Arc<PropInitVec>>,
    pub(crate) static_init: OnceCell<()>,
    /// Evaluated values of uninit constants, by constant slot
    pub(crate) const_cache: Box<[OnceCell<Value>]>,
}

impl Class {
    /// Identity
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name
    pub fn name(&self) -> &Name {
        self.template.name()
    }

    /// Non-owning reference to this class
    pub fn class_ref(&self) -> ClassRef {
        ClassRef::new(self.id, self.name().clone(), self.depth())
    }

    /// Template this class was linked from
    pub fn template(&self) -> &Arc<ClassTemplate> {
        &self.template
    }

    /// Class attributes
    pub fn attrs(&self) -> Attr {
        self.template.attrs()
    }

    /// Whether the class is an interface
    pub fn is_interface(&self) -> bool {
        self.attrs().contains(Attr::INTERFACE)
    }

    /// Whether the class is a trait
    pub fn is_trait(&self) -> bool {
        self.attrs().contains(Attr::TRAIT)
    }

    /// Whether the class is declared abstract
    pub fn is_abstract(&self) -> bool {
        self.attrs().contains(Attr::ABSTRACT)
    }

    /// Whether the class is declared final
    pub fn is_final(&self) -> bool {
        self.attrs().contains(Attr::FINAL)
    }

    /// Lifecycle state
    pub fn state(&self) -> ClassState {
        ClassState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ClassState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Parent class
    pub fn parent(&self) -> Option<&Arc<Class>> {
        self.parent.as_ref()
    }

    /// Interfaces named in the declaration
    pub fn declared_interfaces(&self) -> &[Arc<Class>] {
        &self.declared_interfaces
    }

    /// Every interface implemented directly or indirectly. An interface
    /// includes itself, ahead of the interfaces it extends.
    pub fn interfaces(&self) -> &[ClassRef] {
        &self.interface_set
    }

    /// Used traits in declaration order
    pub fn used_traits(&self) -> &[Arc<Class>] {
        &self.used_traits
    }

    /// `(alias, "Trait::original")` pairs recorded from alias rules
    pub fn trait_aliases(&self) -> &[(Name, Name)] {
        &self.trait_aliases
    }

    /// Inheritance depth (0 for roots)
    pub fn depth(&self) -> usize {
        self.ancestry.len() - 1
    }

    /// Depth-indexed ancestry; the last entry is this class
    pub fn ancestry(&self) -> &[ClassId] {
        &self.ancestry
    }

    /// Method table
    pub fn methods(&self) -> &SlotMap<Arc<Func>> {
        &self.methods
    }

    /// Method by name
    pub fn lookup_method(&self, name: &Name) -> Option<&Arc<Func>> {
        self.methods.get(name)
    }

    /// Method by slot
    pub fn method(&self, slot: Slot) -> Option<&Arc<Func>> {
        self.methods.at(slot)
    }

    /// Slot of a method
    pub fn method_slot(&self, name: &Name) -> Option<Slot> {
        self.methods.find(name)
    }

    /// Number of method slots
    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    /// Slots holding trait-imported methods
    pub fn traits_range(&self) -> Range<Slot> {
        self.traits_range.clone()
    }

    /// Instance property layout
    pub fn props(&self) -> &SlotMap<Prop> {
        &self.props
    }

    /// Slot of a visible instance property
    pub fn lookup_prop(&self, name: &Name) -> Option<Slot> {
        self.props.find(name)
    }

    /// Instance property by slot
    pub fn prop(&self, slot: Slot) -> Option<&Prop> {
        self.props.at(slot)
    }

    /// Number of instance property slots, placeholders included
    pub fn num_props(&self) -> usize {
        self.props.len()
    }

    /// Number of instance property slots that are not placeholders
    pub fn num_accessible_props(&self) -> usize {
        self.num_accessible_props
    }

    /// Declared defaults in slot order
    pub fn prop_defaults(&self) -> &[Value] {
        &self.prop_defaults
    }

    /// Static property table
    pub fn static_props(&self) -> &SlotMap<SProp> {
        &self.static_props
    }

    /// Slot of a static property
    pub fn lookup_static_prop(&self, name: &Name) -> Option<Slot> {
        self.static_props.find(name)
    }

    /// Static property by slot
    pub fn static_prop(&self, slot: Slot) -> Option<&SProp> {
        self.static_props.at(slot)
    }

    /// Constant table
    pub fn constants(&self) -> &SlotMap<Const> {
        &self.constants
    }

    /// Constant by name
    pub fn lookup_constant(&self, name: &Name) -> Option<&Const> {
        self.constants.get(name)
    }

    /// Constant by slot
    pub fn constant(&self, slot: Slot) -> Option<&Const> {
        self.constants.at(slot)
    }

    /// `86pinit` chain, least-derived first
    pub fn pinit_chain(&self) -> &[Arc<Func>] {
        &self.pinit
    }

    /// `86sinit` chain
    pub fn sinit_chain(&self) -> &[Arc<Func>] {
        &self.sinit
    }

    /// Bound constructor
    pub fn ctor(&self) -> &Arc<Func> {
        &self.ctor
    }

    /// `__toString`, if defined
    pub fn to_string_method(&self) -> Option<&Arc<Func>> {
        self.to_string.as_ref()
    }

    /// Magic-method capability mask
    pub fn capabilities(&self) -> ObjectCapabilities {
        self.capabilities
    }

    /// Whether `self` is `other` or derives from it.
    ///
    /// Class-to-class checks index the ancestry vector; interfaces and
    /// traits fall back to [`classof`](Self::classof).
    pub fn is_instance_of(&self, other: &Class) -> bool {
        if self.attrs().is_interface_or_trait() || other.attrs().is_interface_or_trait() {
            return self
                .classof(&other.template)
                .is_some_and(|c| c.id == other.id);
        }
        self.derives_from(&other.class_ref())
    }

    /// Ancestry-vector test against a class reference
    pub(crate) fn derives_from(&self, other: &ClassRef) -> bool {
        self.ancestry.get(other.depth) == Some(&other.id)
    }

    /// Find the class linked from `template` among this class, its
    /// interfaces (recursively) and its ancestors.
    pub fn classof(&self, template: &ClassTemplate) -> Option<&Class> {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.template.id() == template.id() {
                return Some(class);
            }
            for iface in &class.declared_interfaces {
                if let Some(found) = iface.classof(template) {
                    return Some(found);
                }
            }
            current = class.parent.as_deref();
        }
        None
    }

    /// Decide whether this cached class can be reused given what its
    /// dependency names resolve to now.
    ///
    /// `known_parent` saves a lookup when the caller already resolved the
    /// parent name.
    pub fn check_available(
        &self,
        resolver: &dyn ClassResolver,
        known_parent: Option<&Arc<Class>>,
        autoload: bool,
    ) -> Availability {
        if let Some(ours) = &self.parent {
            let current = match known_parent {
                Some(p) => Some(p.clone()),
                None => resolver.resolve_class(ours.name(), autoload),
            };
            match current {
                None => return Availability::Indeterminate(ours.name().clone()),
                Some(p) if p.id != ours.id => return Availability::Unavailable,
                Some(_) => {}
            }
        }
        for dep in self.declared_interfaces.iter().chain(&self.used_traits) {
            match resolver.resolve_class(dep.name(), autoload) {
                None => return Availability::Indeterminate(dep.name().clone()),
                Some(c) if c.id != dep.id => return Availability::Unavailable,
                Some(_) => {}
            }
        }
        Availability::Available
    }

    /// Accessibility-aware lookup of an instance property from `ctx`.
    ///
    /// A private property declared by `ctx` itself shadows whatever this
    /// class exposes under the same name.
    pub fn decl_prop_index(&self, ctx: Option<&Class>, name: &Name) -> PropLookup {
        let found = self.props.find(name);
        let mut accessible = false;

        if let Some(slot) = found {
            let prop = &self.props.values()[slot];
            if prop.attrs.visibility() == Visibility::Public {
                accessible = true;
                if ctx.is_some_and(|c| c.id == self.id) {
                    return PropLookup { slot: found, accessible };
                }
            } else {
                let base = &prop.class;
                let Some(ctx) = ctx else {
                    return PropLookup { slot: found, accessible: false };
                };
                if ctx.id == base.id {
                    return PropLookup { slot: found, accessible: true };
                }
                if prop.attrs.visibility() == Visibility::Protected {
                    if ctx.derives_from(base) {
                        return PropLookup { slot: found, accessible: true };
                    }
                    // ctx is neither an ancestor nor a descendant of base.
                    let ctx_is_ancestor_of_base = ctx.depth() <= base.depth
                        && self.ancestry.get(ctx.depth()) == Some(&ctx.id);
                    if !ctx_is_ancestor_of_base {
                        return PropLookup { slot: found, accessible: false };
                    }
                    accessible = true;
                }
            }
        }

        if let Some(ctx) = ctx {
            if self.derives_from(&ctx.class_ref()) {
                if let Some(ctx_slot) = ctx.props.find(name) {
                    let ctx_prop = &ctx.props.values()[ctx_slot];
                    if ctx_prop.class.id == ctx.id && ctx_prop.attrs.contains(Attr::PRIVATE) {
                        return PropLookup {
                            slot: Some(ctx_slot),
                            accessible: true,
                        };
                    }
                }
            }
        }
        PropLookup { slot: found, accessible }
    }

    /// Visibility-aware static property lookup from `ctx`.
    ///
    /// Does not run initializers; call [`init_static_props`](Self::init_static_props)
    /// first when the values matter.
    pub fn static_prop_access(&self, ctx: Option<&Class>, name: &Name) -> Option<StaticPropAccess> {
        let slot = self.static_props.find(name)?;
        let sprop = &self.static_props.values()[slot];
        let visibility = sprop.attrs.visibility();
        let accessible = match ctx {
            Some(c) if c.id == self.id => true,
            Some(c) if self.is_instance_of(c) || c.is_instance_of(self) => {
                visibility != Visibility::Private
            }
            _ => visibility == Visibility::Public,
        };
        Some(StaticPropAccess {
            slot,
            accessible,
            cell: sprop.cell.clone(),
        })
    }

    /// Initial instance property values with every `86pinit` applied.
    ///
    /// Initializers run most-derived first; the result is cached per class.
    pub fn init_props(&self, exec: &dyn ExecutionContext) -> LinkResult<Arc<PropInitVec>> {
        self.prop_init
            .get_or_try_init(|| {
                let keys = self
                    .props
                    .values()
                    .iter()
                    .map(|p| {
                        if p.attrs.contains(Attr::PRIVATE) {
                            p.original_mangled_name.clone()
                        } else {
                            p.name.clone()
                        }
                    })
                    .collect();
                let mut props = PropInitVec {
                    values: self.prop_defaults.to_vec(),
                    keys,
                };
                for init in self.pinit.iter().rev() {
                    exec.run_prop_initializer(init, self, &mut props)
                        .map_err(|e| self.initializer_error(init.name(), e))?;
                }
                Ok(Arc::new(props))
            })
            .cloned()
    }

    /// Reset owned static cells to their defaults and run the `86sinit`
    /// chain. Ancestors are initialized first, since aliased cells belong to
    /// them. Runs at most once per class.
    pub fn init_static_props(&self, exec: &dyn ExecutionContext) -> LinkResult<()> {
        if let Some(parent) = &self.parent {
            parent.init_static_props(exec)?;
        }
        self.static_init
            .get_or_try_init(|| {
                for sprop in self.static_props.values() {
                    if sprop.class.id == self.id {
                        sprop.cell.reset();
                    }
                }
                for init in &self.sinit {
                    exec.run_static_initializer(init, self)
                        .map_err(|e| self.initializer_error(init.name(), e))?;
                }
                Ok(())
            })
            .copied()
    }

    /// Value of constant `name`, evaluating non-scalar constants through the
    /// declaring class's `86cinit` on first use.
    pub fn constant_value(&self, name: &Name, exec: &dyn ExecutionContext) -> LinkResult<Option<Value>> {
        let Some(slot) = self.constants.find(name) else {
            return Ok(None);
        };
        let cns = &self.constants.values()[slot];
        if !cns.value.is_uninit() {
            return Ok(Some(cns.value.clone()));
        }

        self.const_cache[slot]
            .get_or_try_init(|| {
                let init = cns.initializer.as_ref().ok_or_else(|| LinkError::Initializer {
                    class: cns.class.name.clone(),
                    initializer: well_known::CINIT.clone(),
                    reason: format!("no initializer for constant {}", name),
                })?;
                exec.eval_constant(init, self, name)
                    .map_err(|e| self.initializer_error(init.name(), e))
            })
            .map(|value| Some(value.clone()))
    }

    fn initializer_error(&self, init: &Name, err: ExecError) -> LinkError {
        LinkError::Initializer {
            class: self.name().clone(),
            initializer: init.clone(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", self.name())
            .field("depth", &self.depth())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().as_str())
    }
}

impl Drop for Class {
    fn drop(&mut self) {
        tracing::trace!(class = %self.name(), id = self.id.as_u64(), "class freed");
    }
}
