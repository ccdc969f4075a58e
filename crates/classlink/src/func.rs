//! Method records
//!
//! A [`Func`] is one entry of a linked class's method table. Parent entries
//! are shared by `Arc` between a class and its descendants; an entry is only
//! re-created when a class declares, imports or clones the method.

use crate::attr::Attr;
use crate::class::ClassRef;
use crate::names::Name;
use crate::override_check::MemberView;
use crate::slots::Slot;
use crate::template::{ClassTemplate, MethodDecl, Param, TemplateId};
use crate::value::Value;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for generating unique function IDs
static NEXT_FUNC_ID: AtomicU64 = AtomicU64::new(1);

/// Identity used by translation caches.
///
/// Entries cloned only to get private static-local storage keep the id of
/// the entry they were cloned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u64);

impl FuncId {
    fn next() -> Self {
        FuncId(NEXT_FUNC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Storage for a method's `static` locals
#[derive(Debug, Default)]
pub struct StaticLocals {
    values: Mutex<FxHashMap<Name, Value>>,
}

impl StaticLocals {
    /// Current value of a static local
    pub fn get(&self, name: &Name) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    /// Overwrite a static local
    pub fn set(&self, name: Name, value: Value) {
        self.values.lock().insert(name, value);
    }
}

/// Template that declared a method body
#[derive(Debug, Clone)]
pub struct DeclaringTemplate {
    /// Template identity
    pub id: TemplateId,
    /// Template name
    pub name: Name,
    /// Template attributes
    pub attrs: Attr,
}

impl DeclaringTemplate {
    pub(crate) fn of(template: &ClassTemplate) -> Self {
        Self {
            id: template.id(),
            name: template.name().clone(),
            attrs: template.attrs(),
        }
    }
}

/// Override baseline of a method: the declaration in its base class
#[derive(Debug, Clone)]
struct BaseDecl {
    class: ClassRef,
    attrs: Attr,
    decl: Arc<MethodDecl>,
}

/// One linked method
#[derive(Debug)]
pub struct Func {
    name: Name,
    attrs: Attr,
    decl: Arc<MethodDecl>,
    declaring: DeclaringTemplate,
    cls: ClassRef,
    base: BaseDecl,
    has_private_ancestor: bool,
    id: FuncId,
    slot: Slot,
    static_locals: StaticLocals,
}

impl Func {
    /// Entry for a method first declared (or first imported) by `cls`.
    pub(crate) fn declare(
        name: Name,
        attrs: Attr,
        decl: Arc<MethodDecl>,
        declaring: DeclaringTemplate,
        cls: ClassRef,
        slot: Slot,
    ) -> Self {
        let base = BaseDecl {
            class: cls.clone(),
            attrs,
            decl: decl.clone(),
        };
        Self {
            name,
            attrs,
            decl,
            declaring,
            cls,
            base,
            has_private_ancestor: false,
            id: FuncId::next(),
            slot,
            static_locals: StaticLocals::default(),
        }
    }

    /// Entry for a method declared by `cls` that overrides `parent`.
    ///
    /// The override baseline moves to `cls` when either side is private.
    pub(crate) fn override_of(
        parent: &Func,
        name: Name,
        attrs: Attr,
        decl: Arc<MethodDecl>,
        declaring: DeclaringTemplate,
        cls: ClassRef,
    ) -> Self {
        let mut func = Self::declare(name, attrs, decl, declaring, cls, parent.slot);
        if !parent.attrs.contains(Attr::PRIVATE) && !attrs.contains(Attr::PRIVATE) {
            func.base = parent.base.clone();
        }
        func.has_private_ancestor =
            parent.has_private_ancestor || parent.attrs.contains(Attr::PRIVATE);
        func
    }

    /// Copy of an inherited entry with its own static-local storage.
    ///
    /// `CLONE` methods are re-homed into `cls` and get a fresh identity;
    /// everything else keeps its owner and its [`FuncId`].
    pub(crate) fn clone_for(&self, cls: &ClassRef) -> Self {
        let rehome = self.attrs.contains(Attr::CLONE);
        Self {
            name: self.name.clone(),
            attrs: self.attrs,
            decl: self.decl.clone(),
            declaring: self.declaring.clone(),
            cls: if rehome { cls.clone() } else { self.cls.clone() },
            base: self.base.clone(),
            has_private_ancestor: self.has_private_ancestor,
            id: if rehome { FuncId::next() } else { self.id },
            slot: self.slot,
            static_locals: StaticLocals::default(),
        }
    }

    /// Method name (the alias name for aliased trait methods)
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Effective attributes in this class
    pub fn attrs(&self) -> Attr {
        self.attrs
    }

    /// Source declaration
    pub fn decl(&self) -> &Arc<MethodDecl> {
        &self.decl
    }

    /// Declared parameters
    pub fn params(&self) -> &[Param] {
        &self.decl.params
    }

    /// Template whose source declared the body
    pub fn declaring_template(&self) -> &DeclaringTemplate {
        &self.declaring
    }

    /// Class whose method table introduced this entry
    pub fn cls(&self) -> &ClassRef {
        &self.cls
    }

    /// Class whose declaration established the override baseline
    pub fn base_cls(&self) -> &ClassRef {
        &self.base.class
    }

    /// View of this entry as the inherited side of an override check
    pub fn member_view(&self) -> MemberView<'_> {
        MemberView {
            name: &self.name,
            attrs: self.attrs,
            params: &self.decl.params,
            base_class: &self.base.class.name,
            base_attrs: self.base.attrs,
            base_params: &self.base.decl.params,
        }
    }

    /// Some ancestor declared a private method of the same name
    pub fn has_private_ancestor(&self) -> bool {
        self.has_private_ancestor
    }

    /// Translation-cache identity
    pub fn id(&self) -> FuncId {
        self.id
    }

    /// Slot in the owning method table
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Static-local storage of this entry
    pub fn static_locals(&self) -> &StaticLocals {
        &self.static_locals
    }

    /// Body declares `static` locals
    pub fn has_static_locals(&self) -> bool {
        self.decl.has_static_locals
    }

    /// Whether the entry has no body
    pub fn is_abstract(&self) -> bool {
        self.attrs.contains(Attr::ABSTRACT)
    }

    /// Whether the entry is a class-level method
    pub fn is_static(&self) -> bool {
        self.attrs.contains(Attr::STATIC)
    }
}
