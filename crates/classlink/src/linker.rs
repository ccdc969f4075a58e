//! Class linking
//!
//! Turns a [`ClassTemplate`] plus its already-linked dependencies into a
//! [`Class`]. The phases run in a fixed order and each one may fail:
//!
//! 1. parent validation
//! 2. used-trait resolution
//! 3. method table (parent copy, own overlay, trait splice)
//! 4. special method binding and capability mask
//! 5. interfaces and interface conformance
//! 6. constants
//! 7. instance and static property layouts
//! 8. initializer chains
//! 9. ancestry vector

use crate::attr::{Attr, ObjectCapabilities, Visibility};
use crate::class::{Class, ClassId, ClassRef, ClassState, Const, Prop, SProp, StaticCell};
use crate::error::{DependencyKind, LinkError, LinkResult};
use crate::func::{DeclaringTemplate, Func};
use crate::names::{well_known, Name};
use crate::options::LinkerOptions;
use crate::override_check::{
    check_interface_impl, check_override, check_property_override, MemberView, OverrideContext,
};
use crate::slots::{Slot, SlotMap, SlotMapBuilder};
use crate::template::{ClassTemplate, MethodDecl};
use crate::traits::{import_trait_method, import_trait_props, TraitComposer};
use crate::value::Value;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashSet;
use std::ops::Range;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use tracing::{debug, debug_span};

/// Resolves a class name to the currently active linked class
pub trait ClassResolver {
    /// Active class for `name`, loading it first when `autoload` is set
    fn resolve_class(&self, name: &Name, autoload: bool) -> Option<Arc<Class>>;
}

impl<F> ClassResolver for F
where
    F: Fn(&Name, bool) -> Option<Arc<Class>>,
{
    fn resolve_class(&self, name: &Name, autoload: bool) -> Option<Arc<Class>> {
        self(name, autoload)
    }
}

/// Class linker
#[derive(Debug, Clone)]
pub struct Linker {
    options: LinkerOptions,
    mock_attribute: Name,
}

impl Default for Linker {
    fn default() -> Self {
        Self::new(LinkerOptions::default())
    }
}

impl Linker {
    /// Create a linker with the given options
    pub fn new(options: LinkerOptions) -> Self {
        let mock_attribute = Name::new(&options.mock_attribute);
        Self {
            options,
            mock_attribute,
        }
    }

    /// Active options
    pub fn options(&self) -> &LinkerOptions {
        &self.options
    }

    /// Link `template`, raising the first rule violation as an error.
    ///
    /// # Arguments
    /// * `template` - Template to link
    /// * `parent` - Already-resolved parent, or `None` to resolve the
    ///   template's parent name through `resolver`
    /// * `resolver` - Source of interfaces, traits and (optionally) the parent
    ///
    /// # Returns
    /// * `Ok(class)` - Fully linked class in the `Linked` state
    /// * `Err(LinkError)` - The phase that failed and why
    pub fn link(
        &self,
        template: &Arc<ClassTemplate>,
        parent: Option<Arc<Class>>,
        resolver: &dyn ClassResolver,
    ) -> LinkResult<Arc<Class>> {
        let span = debug_span!("link_class", class = %template.name());
        let _enter = span.enter();

        match self.link_class(template, parent, resolver) {
            Ok(class) => {
                debug!(
                    methods = class.num_methods(),
                    props = class.num_props(),
                    static_props = class.static_props().len(),
                    constants = class.constants().len(),
                    depth = class.depth(),
                    "linked"
                );
                Ok(Arc::new(class))
            }
            Err(err) => {
                debug!(error = %err, kind = ?err.kind(), "link failed");
                Err(err)
            }
        }
    }

    /// Speculative link: any failure yields `None` so the caller can retry
    /// after loading missing dependencies.
    pub fn try_link(
        &self,
        template: &Arc<ClassTemplate>,
        parent: Option<Arc<Class>>,
        resolver: &dyn ClassResolver,
    ) -> Option<Arc<Class>> {
        self.link(template, parent, resolver).ok()
    }

    fn link_class(
        &self,
        template: &Arc<ClassTemplate>,
        parent: Option<Arc<Class>>,
        resolver: &dyn ClassResolver,
    ) -> LinkResult<Class> {
        let mock_exempt = template.has_user_attribute(&self.mock_attribute);
        let parent = self.set_parent(template, parent, resolver, mock_exempt)?;
        let depth = parent.as_ref().map_or(0, |p| p.depth() + 1);
        let this = ClassRef::new(ClassId::next(), template.name().clone(), depth);
        let parent_name = parent
            .as_ref()
            .map_or_else(|| template.name().clone(), |p| p.name().clone());

        let cx = LinkContext {
            linker: self,
            template,
            parent: parent.as_ref(),
            resolver,
            this,
            parent_name,
            mock_exempt,
        };

        let used_traits = cx.set_used_traits()?;
        let methods = cx.set_methods(&used_traits)?;
        let (ctor, to_string) = cx.set_special(&methods);
        let capabilities = object_capabilities(&methods.map);
        let (declared_interfaces, all_interfaces) = cx.set_interfaces(&methods.map)?;
        let constants = cx.set_constants(&declared_interfaces, &methods.map)?;
        let layout = cx.set_properties(&used_traits)?;
        let (pinit, sinit) = cx.set_initializers(&methods.map, &used_traits);
        let ancestry = cx.set_ancestry();
        let interface_set = cx.interface_set(&all_interfaces);
        let const_cache = (0..constants.len()).map(|_| OnceCell::new()).collect();

        Ok(Class {
            id: cx.this.id,
            template: template.clone(),
            parent,
            declared_interfaces,
            all_interfaces,
            interface_set,
            used_traits,
            trait_aliases: methods.aliases,
            methods: methods.map,
            traits_range: methods.traits_range,
            props: layout.props,
            prop_defaults: layout.defaults.into_boxed_slice(),
            num_accessible_props: layout.num_accessible,
            static_props: layout.static_props,
            constants,
            pinit,
            sinit,
            ancestry,
            ctor,
            to_string,
            capabilities,
            state: AtomicU8::new(ClassState::Linked as u8),
            prop_init: OnceCell::new(),
            static_init: OnceCell::new(),
            const_cache,
        })
    }

    fn set_parent(
        &self,
        template: &ClassTemplate,
        parent: Option<Arc<Class>>,
        resolver: &dyn ClassResolver,
        mock_exempt: bool,
    ) -> LinkResult<Option<Arc<Class>>> {
        let parent = match (template.parent(), parent) {
            (None, None) => return Ok(None),
            (None, Some(given)) => {
                return Err(LinkError::ParentMismatch {
                    class: template.name().clone(),
                    expected: None,
                    given: given.name().clone(),
                })
            }
            (Some(expected), Some(given)) => {
                if given.name() != expected {
                    return Err(LinkError::ParentMismatch {
                        class: template.name().clone(),
                        expected: Some(expected.clone()),
                        given: given.name().clone(),
                    });
                }
                given
            }
            (Some(expected), None) => resolver
                .resolve_class(expected, self.options.autoload)
                .ok_or_else(|| LinkError::UnknownClass {
                    kind: DependencyKind::Parent,
                    name: expected.clone(),
                })?,
        };

        let attrs = parent.attrs();
        if attrs.intersects(Attr::FINAL | Attr::INTERFACE | Attr::TRAIT)
            && (!attrs.contains(Attr::FINAL) || attrs.is_interface_or_trait() || !mock_exempt)
        {
            let what = if attrs.contains(Attr::INTERFACE) {
                "interface"
            } else if attrs.contains(Attr::TRAIT) {
                "trait"
            } else {
                "final class"
            };
            return Err(LinkError::InvalidParent {
                class: template.name().clone(),
                parent: parent.name().clone(),
                what,
            });
        }
        Ok(Some(parent))
    }
}

/// Method table produced by the method phase
struct MethodTable {
    map: SlotMap<Arc<Func>>,
    traits_range: Range<Slot>,
    aliases: Vec<(Name, Name)>,
    default_ctor: Slot,
}

/// Property layouts produced by the property phase
struct PropLayout {
    props: SlotMap<Prop>,
    defaults: Vec<Value>,
    num_accessible: usize,
    static_props: SlotMap<SProp>,
}

/// State shared by the phases of one link attempt
struct LinkContext<'a> {
    linker: &'a Linker,
    template: &'a Arc<ClassTemplate>,
    parent: Option<&'a Arc<Class>>,
    resolver: &'a dyn ClassResolver,
    this: ClassRef,
    parent_name: Name,
    mock_exempt: bool,
}

impl<'a> LinkContext<'a> {
    fn override_context(&self) -> OverrideContext<'_> {
        OverrideContext {
            class: &self.this.name,
            parent_class: &self.parent_name,
            mock_exempt: self.mock_exempt,
            check_signatures: self.linker.options.check_signatures,
        }
    }

    fn declaring(&self) -> DeclaringTemplate {
        DeclaringTemplate::of(self.template)
    }

    fn resolve(&self, kind: DependencyKind, name: &Name) -> LinkResult<Arc<Class>> {
        self.resolver
            .resolve_class(name, self.linker.options.autoload)
            .ok_or_else(|| LinkError::UnknownClass {
                kind,
                name: name.clone(),
            })
    }

    fn set_used_traits(&self) -> LinkResult<Vec<Arc<Class>>> {
        self.template
            .used_traits()
            .iter()
            .map(|name| {
                let class = self.resolve(DependencyKind::Trait, name)?;
                if !class.is_trait() {
                    return Err(LinkError::NotATrait {
                        class: self.this.name.clone(),
                        name: class.name().clone(),
                    });
                }
                Ok(class)
            })
            .collect()
    }

    fn set_methods(&self, used_traits: &[Arc<Class>]) -> LinkResult<MethodTable> {
        let ctx = self.override_context();
        let mut builder = match self.parent {
            Some(parent) => SlotMapBuilder::from_map(parent.methods()),
            None => SlotMapBuilder::new(),
        };

        // Inherited entries that need their own static-local storage; cloned
        // last since they may still be overridden below.
        let clone_slots: Vec<Slot> = self.parent.map_or_else(Vec::new, |parent| {
            parent
                .methods()
                .iter()
                .filter(|(_, f)| {
                    f.attrs().contains(Attr::CLONE)
                        || (!f.attrs().contains(Attr::PRIVATE) && f.has_static_locals())
                })
                .map(|(slot, _)| slot)
                .collect()
        });

        for decl in self.template.methods() {
            let existing = builder
                .find(&decl.name)
                .and_then(|slot| builder.get(slot).cloned().map(|f| (slot, f)));
            match existing {
                Some((slot, parent_fn)) => {
                    let child = declared_view(decl, &self.this.name);
                    check_override(&ctx, &parent_fn.member_view(), &child)?;
                    let func = Func::override_of(
                        &parent_fn,
                        decl.name.clone(),
                        decl.attrs,
                        decl.clone(),
                        self.declaring(),
                        self.this.clone(),
                    );
                    if let Some(entry) = builder.get_mut(slot) {
                        *entry = Arc::new(func);
                    }
                }
                None => {
                    let slot = builder.len();
                    let func = Func::declare(
                        decl.name.clone(),
                        decl.attrs,
                        decl.clone(),
                        self.declaring(),
                        self.this.clone(),
                        slot,
                    );
                    builder.add(decl.name.clone(), Arc::new(func));
                }
            }
        }

        let default_ctor = match builder.find(&well_known::DEFAULT_CTOR) {
            Some(slot) => slot,
            None => {
                let slot = builder.len();
                let decl = Arc::new(MethodDecl::new(well_known::DEFAULT_CTOR.as_str(), Attr::PUBLIC));
                let func = Func::declare(
                    decl.name.clone(),
                    decl.attrs,
                    decl,
                    self.declaring(),
                    self.this.clone(),
                    slot,
                );
                builder.add(well_known::DEFAULT_CTOR.clone(), Arc::new(func))
            }
        };

        let traits_begin = builder.len();
        let mut aliases = Vec::new();
        if !used_traits.is_empty() {
            let composed = TraitComposer::new(self.template, used_traits).compose()?;
            for (name, method) in &composed.methods {
                import_trait_method(name.clone(), method, &mut builder, &self.this, &ctx)?;
            }
            aliases = composed.aliases;
        }
        let traits_end = builder.len();

        for slot in clone_slots {
            let Some(func) = builder.get(slot).cloned() else {
                continue;
            };
            if func.cls().id != self.this.id {
                if let Some(entry) = builder.get_mut(slot) {
                    *entry = Arc::new(func.clone_for(&self.this));
                }
            }
        }

        let map = builder.build();
        if !self.template.is_abstract_like() {
            if let Some(func) = map.values().iter().find(|f| f.is_abstract()) {
                return Err(LinkError::AbstractMethod {
                    class: self.this.name.clone(),
                    method: func.name().clone(),
                });
            }
        }

        Ok(MethodTable {
            map,
            traits_range: traits_begin..traits_end,
            aliases,
            default_ctor,
        })
    }

    fn set_special(&self, methods: &MethodTable) -> (Arc<Func>, Option<Arc<Func>>) {
        let to_string = methods.map.get(&well_known::TO_STRING).cloned();
        let template_id = self.template.id();

        if let Some(f) = methods.map.get(&well_known::CONSTRUCT) {
            let declaring = f.declaring_template();
            if declaring.id == template_id || declaring.attrs.contains(Attr::TRAIT) {
                return (f.clone(), to_string);
            }
        }

        if !self.template.is_trait() && self.linker.options.named_constructors {
            if let Some(f) = methods.map.get(self.template.name()) {
                if f.declaring_template().id == template_id && !f.attrs().contains(Attr::TRAIT) {
                    return (f.clone(), to_string);
                }
            }
        }

        if let Some(parent) = self.parent {
            if *parent.ctor().name() != *well_known::DEFAULT_CTOR {
                return (parent.ctor().clone(), to_string);
            }
        }

        (methods.map.values()[methods.default_ctor].clone(), to_string)
    }

    fn set_interfaces(
        &self,
        methods: &SlotMap<Arc<Func>>,
    ) -> LinkResult<(Vec<Arc<Class>>, Vec<Arc<Class>>)> {
        let mut seen = FxHashSet::default();
        let mut all = Vec::new();
        let mut add = |class: &Arc<Class>, all: &mut Vec<Arc<Class>>| {
            if seen.insert(class.id()) {
                all.push(class.clone());
            }
        };

        if let Some(parent) = self.parent {
            for iface in &parent.all_interfaces {
                add(iface, &mut all);
            }
        }

        let mut declared = Vec::with_capacity(self.template.interfaces().len());
        for name in self.template.interfaces() {
            let iface = self.resolve(DependencyKind::Interface, name)?;
            if !iface.is_interface() {
                return Err(LinkError::NotAnInterface {
                    class: self.this.name.clone(),
                    name: iface.name().clone(),
                });
            }
            add(&iface, &mut all);
            for inherited in &iface.all_interfaces {
                add(inherited, &mut all);
            }
            declared.push(iface);
        }

        self.check_interface_methods(&all, methods)?;
        Ok((declared, all))
    }

    /// Every implemented interface as seen by reflection; an interface
    /// lists itself first.
    fn interface_set(&self, all: &[Arc<Class>]) -> Box<[ClassRef]> {
        let own = self
            .template
            .attrs()
            .contains(Attr::INTERFACE)
            .then(|| self.this.clone());
        own.into_iter()
            .chain(all.iter().map(|iface| iface.class_ref()))
            .collect()
    }

    fn check_interface_methods(
        &self,
        interfaces: &[Arc<Class>],
        methods: &SlotMap<Arc<Func>>,
    ) -> LinkResult<()> {
        let ctx = self.override_context();
        let lenient = self.template.is_abstract_like();

        for iface in interfaces {
            for required in iface.methods().values() {
                let name = required.name();
                if name.is_special() {
                    continue;
                }
                let implementation = match methods.get(name) {
                    Some(f) if lenient || !f.is_abstract() => f,
                    None if lenient => continue,
                    _ => {
                        return Err(LinkError::AbstractMethod {
                            class: self.this.name.clone(),
                            method: name.clone(),
                        })
                    }
                };
                check_interface_impl(
                    &ctx,
                    iface.name(),
                    &required.member_view(),
                    &implementation.member_view(),
                )?;
            }
        }
        Ok(())
    }

    fn set_constants(
        &self,
        declared_interfaces: &[Arc<Class>],
        methods: &SlotMap<Arc<Func>>,
    ) -> LinkResult<SlotMap<Const>> {
        let mut builder = match self.parent {
            Some(parent) => SlotMapBuilder::from_map(parent.constants()),
            None => SlotMapBuilder::new(),
        };

        for iface in declared_interfaces {
            for cns in iface.constants().values() {
                match builder.find(&cns.name).and_then(|slot| builder.get(slot)) {
                    Some(existing) if existing.class.id != cns.class.id => {
                        return Err(LinkError::ConstantConflict {
                            name: cns.name.clone(),
                        })
                    }
                    Some(_) => {}
                    None => {
                        builder.add(cns.name.clone(), cns.clone());
                    }
                }
            }
        }

        let initializer = methods.get(&well_known::CINIT).cloned();
        for decl in self.template.constants() {
            match builder.find(&decl.name) {
                Some(slot) => {
                    if let Some(cns) = builder.get_mut(slot) {
                        cns.class = self.this.clone();
                        cns.value = decl.value.clone();
                        cns.source = decl.source.clone();
                        cns.initializer = initializer.clone();
                    }
                }
                None => {
                    builder.add(
                        decl.name.clone(),
                        Const {
                            name: decl.name.clone(),
                            class: self.this.clone(),
                            value: decl.value.clone(),
                            source: decl.source.clone(),
                            initializer: initializer.clone(),
                        },
                    );
                }
            }
        }
        Ok(builder.build())
    }

    fn set_properties(&self, used_traits: &[Arc<Class>]) -> LinkResult<PropLayout> {
        let ctx = self.override_context();
        let mut props: SlotMapBuilder<Prop> = SlotMapBuilder::new();
        let mut static_props: SlotMapBuilder<SProp> = SlotMapBuilder::new();
        let mut defaults = Vec::new();
        let mut num_inaccessible = 0;

        if let Some(parent) = self.parent {
            for prop in parent.props().values() {
                if prop.attrs.contains(Attr::PRIVATE) {
                    props.add_unnamed(prop.clone());
                    num_inaccessible += 1;
                } else {
                    props.add(prop.name.clone(), prop.clone());
                }
            }
            defaults.extend_from_slice(parent.prop_defaults());
            for sprop in parent.static_props().values() {
                if !sprop.attrs.contains(Attr::PRIVATE) {
                    static_props.add(sprop.name.clone(), sprop.clone());
                }
            }
        }

        for decl in self.template.properties() {
            if !decl.attrs.contains(Attr::STATIC) {
                if let Some(existing) = static_props.find(&decl.name).and_then(|s| static_props.get(s)) {
                    return Err(LinkError::StaticToInstance {
                        owner: existing.class.name.clone(),
                        prop: decl.name.clone(),
                        class: self.this.name.clone(),
                    });
                }
                if let Some(parent_prop) = self.parent.and_then(|p| {
                    p.lookup_prop(&decl.name).and_then(|slot| p.prop(slot))
                }) {
                    check_property_override(&ctx, &decl.name, parent_prop.attrs, decl.attrs)?;
                }

                let existing = match decl.attrs.visibility() {
                    Visibility::Private => None,
                    _ => props.find(&decl.name),
                };
                match existing {
                    Some(slot) => {
                        if let Some(prop) = props.get_mut(slot) {
                            if decl.attrs.visibility() == Visibility::Public
                                && prop.attrs.visibility() == Visibility::Protected
                            {
                                prop.mangled_name = decl.mangled_name.clone();
                                prop.original_mangled_name = decl.mangled_name.clone();
                                prop.attrs = prop.attrs.with_visibility(Visibility::Public);
                            }
                        }
                        defaults[slot] = decl.default.clone();
                    }
                    None => {
                        props.add(
                            decl.name.clone(),
                            Prop {
                                name: decl.name.clone(),
                                mangled_name: decl.mangled_name.clone(),
                                original_mangled_name: decl.mangled_name.clone(),
                                attrs: decl.attrs,
                                class: self.this.clone(),
                                doc_comment: decl.doc_comment.clone(),
                            },
                        );
                        defaults.push(decl.default.clone());
                    }
                }
            } else {
                if let Some(existing) = props.find(&decl.name).and_then(|s| props.get(s)) {
                    return Err(LinkError::InstanceToStatic {
                        owner: existing.class.name.clone(),
                        prop: decl.name.clone(),
                        class: self.this.name.clone(),
                    });
                }
                let sprop = SProp {
                    name: decl.name.clone(),
                    attrs: decl.attrs,
                    class: self.this.clone(),
                    doc_comment: decl.doc_comment.clone(),
                    cell: StaticCell::new(decl.default.clone()),
                };
                match static_props.find(&decl.name) {
                    Some(slot) => {
                        if let Some(existing) = static_props.get_mut(slot) {
                            check_property_override(&ctx, &decl.name, existing.attrs, decl.attrs)?;
                            *existing = sprop;
                        }
                    }
                    None => {
                        static_props.add(decl.name.clone(), sprop);
                    }
                }
            }
        }

        import_trait_props(
            self.template,
            used_traits,
            &self.this,
            &mut props,
            &mut defaults,
            &mut static_props,
        )?;

        let props = props.build();
        Ok(PropLayout {
            num_accessible: props.len() - num_inaccessible,
            props,
            defaults,
            static_props: static_props.build(),
        })
    }

    fn set_initializers(
        &self,
        methods: &SlotMap<Arc<Func>>,
        used_traits: &[Arc<Class>],
    ) -> (Vec<Arc<Func>>, Vec<Arc<Func>>) {
        fn push_unique(chain: &mut Vec<Arc<Func>>, func: &Arc<Func>) {
            if !chain.iter().any(|f| f.id() == func.id()) {
                chain.push(func.clone());
            }
        }

        let expand_traits = !self.template.attrs().contains(Attr::NO_EXPAND_TRAIT);

        let mut pinit = self.parent.map_or_else(Vec::new, |p| p.pinit_chain().to_vec());
        if let Some(f) = methods.get(&well_known::PINIT) {
            push_unique(&mut pinit, f);
        }
        let mut sinit = Vec::new();
        if let Some(f) = methods.get(&well_known::SINIT) {
            if f.cls().id == self.this.id {
                sinit.push(f.clone());
            }
        }

        if expand_traits {
            for trait_class in used_traits {
                for f in trait_class.pinit_chain() {
                    push_unique(&mut pinit, f);
                }
                for f in trait_class.sinit_chain() {
                    push_unique(&mut sinit, f);
                }
            }
        }
        (pinit, sinit)
    }

    fn set_ancestry(&self) -> Box<[ClassId]> {
        let mut ancestry = Vec::with_capacity(self.this.depth + 1);
        if let Some(parent) = self.parent {
            ancestry.extend_from_slice(parent.ancestry());
        }
        ancestry.push(self.this.id);
        ancestry.into_boxed_slice()
    }
}

/// Child side of an override check for a method declared in the template
fn declared_view<'d>(decl: &'d MethodDecl, class: &'d Name) -> MemberView<'d> {
    MemberView {
        name: &decl.name,
        attrs: decl.attrs,
        params: &decl.params,
        base_class: class,
        base_attrs: decl.attrs,
        base_params: &decl.params,
    }
}

/// Capability mask from the magic methods present in the table
fn object_capabilities(methods: &SlotMap<Arc<Func>>) -> ObjectCapabilities {
    let table = [
        (&*well_known::SLEEP, ObjectCapabilities::HAS_SLEEP),
        (&*well_known::GET, ObjectCapabilities::USE_GET),
        (&*well_known::SET, ObjectCapabilities::USE_SET),
        (&*well_known::ISSET, ObjectCapabilities::USE_ISSET),
        (&*well_known::UNSET, ObjectCapabilities::USE_UNSET),
        (&*well_known::LVAL, ObjectCapabilities::HAS_LVAL),
        (&*well_known::CALL, ObjectCapabilities::HAS_CALL),
        (&*well_known::CALL_STATIC, ObjectCapabilities::HAS_CALL_STATIC),
    ];
    table
        .into_iter()
        .filter(|(name, _)| methods.contains(name))
        .fold(ObjectCapabilities::empty(), |acc, (_, cap)| acc | cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::override_check::OverrideError;
    use crate::template::{ClassTemplateBuilder, Param};
    use rustc_hash::FxHashMap;

    fn resolver(classes: &[Arc<Class>]) -> impl Fn(&Name, bool) -> Option<Arc<Class>> {
        let map: FxHashMap<Name, Arc<Class>> = classes
            .iter()
            .map(|c| (c.name().clone(), c.clone()))
            .collect();
        move |name: &Name, _: bool| map.get(name).cloned()
    }

    fn link(builder: ClassTemplateBuilder, deps: &[Arc<Class>]) -> LinkResult<Arc<Class>> {
        Linker::default().link(&builder.build(), None, &resolver(deps))
    }

    fn class(name: &str, parent: Option<&str>) -> ClassTemplateBuilder {
        let mut b = ClassTemplateBuilder::new(name, Attr::empty());
        if let Some(parent) = parent {
            b.parent(parent);
        }
        b
    }

    #[test]
    fn test_root_class() {
        let mut b = class("Root", None);
        b.add_method(MethodDecl::new("run", Attr::PUBLIC));
        let root = link(b, &[]).unwrap();

        assert_eq!(root.depth(), 0);
        assert_eq!(root.ancestry(), &[root.id()]);
        assert_eq!(root.method_slot(&Name::new("run")), Some(0));
        assert_eq!(*root.ctor().name(), *well_known::DEFAULT_CTOR);
        assert_eq!(root.traits_range(), 2..2);
        assert_eq!(root.state(), ClassState::Linked);
    }

    #[test]
    fn test_method_slots_are_stable_in_children() {
        let mut b = class("Base", None);
        b.add_method(MethodDecl::new("a", Attr::PUBLIC));
        b.add_method(MethodDecl::new("b", Attr::PUBLIC));
        let base = link(b, &[]).unwrap();

        let mut c = class("Child", Some("Base"));
        c.add_method(MethodDecl::new("c", Attr::PUBLIC));
        c.add_method(MethodDecl::new("b", Attr::PUBLIC));
        let child = link(c, &[base.clone()]).unwrap();

        for name in ["a", "b"] {
            let name = Name::new(name);
            assert_eq!(child.method_slot(&name), base.method_slot(&name));
        }
        let b = child.lookup_method(&Name::new("b")).unwrap();
        assert_eq!(b.cls().id, child.id());
        assert_eq!(b.base_cls().id, base.id());
        let a = child.lookup_method(&Name::new("a")).unwrap();
        assert!(Arc::ptr_eq(a, base.lookup_method(&Name::new("a")).unwrap()));
        assert_eq!(child.ancestry(), &[base.id(), child.id()]);
    }

    #[test]
    fn test_final_parent() {
        let base = link(ClassTemplateBuilder::new("Sealed", Attr::FINAL), &[]).unwrap();

        let err = link(class("Child", Some("Sealed")), &[base.clone()]).unwrap_err();
        assert!(matches!(err, LinkError::InvalidParent { what: "final class", .. }));

        let mut mock = class("Mock", Some("Sealed"));
        mock.add_user_attribute("__MockClass", Value::Null);
        assert!(link(mock, &[base]).is_ok());
    }

    #[test]
    fn test_interface_parent_rejected() {
        let iface = link(ClassTemplateBuilder::new("I", Attr::INTERFACE), &[]).unwrap();
        let err = link(class("C", Some("I")), &[iface]).unwrap_err();
        assert!(matches!(err, LinkError::InvalidParent { what: "interface", .. }));
    }

    #[test]
    fn test_missing_parent() {
        let err = link(class("C", Some("Nowhere")), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(err.missing_dependency(), Some(&Name::new("Nowhere")));
        assert!(Linker::default()
            .try_link(&class("C", Some("Nowhere")).build(), None, &resolver(&[]))
            .is_none());
    }

    #[test]
    fn test_parent_mismatch() {
        let other = link(class("Other", None), &[]).unwrap();
        let err = Linker::default()
            .link(&class("C", Some("Base")).build(), Some(other), &resolver(&[]))
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::ParentMismatch { expected: Some(ref e), .. } if e.as_str() == "Base"
        ));
    }

    #[test]
    fn test_parent_given_to_root_class() {
        let other = link(class("Other", None), &[]).unwrap();
        let err = Linker::default()
            .link(&class("Root", None).build(), Some(other), &resolver(&[]))
            .unwrap_err();
        assert!(matches!(err, LinkError::ParentMismatch { expected: None, .. }));
        assert_eq!(err.to_string(), "Class Root declares no parent, but was linked against Other");
    }

    #[test]
    fn test_final_method_override() {
        let mut b = class("Base", None);
        b.add_method(MethodDecl::new("f", Attr::PUBLIC | Attr::FINAL));
        let base = link(b, &[]).unwrap();

        let mut c = class("Child", Some("Base"));
        c.add_method(MethodDecl::new("f", Attr::PUBLIC));
        let err = link(c, &[base]).unwrap_err();
        assert!(matches!(err, LinkError::Override(OverrideError::FinalOverride { .. })));
        assert_eq!(err.to_string(), "Cannot override final method Base::f()");
    }

    #[test]
    fn test_signature_checked_against_abstract_baseline() {
        let mut b = ClassTemplateBuilder::new("Shape", Attr::ABSTRACT);
        b.add_method(
            MethodDecl::new("scale", Attr::PUBLIC | Attr::ABSTRACT).param(Param::new("factor").typed("float")),
        );
        let base = link(b, &[]).unwrap();

        let mut c = class("Square", Some("Shape"));
        c.add_method(MethodDecl::new("scale", Attr::PUBLIC));
        let err = link(c, &[base.clone()]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Override(OverrideError::IncompatibleSignature { .. })
        ));

        let mut c = class("Square", Some("Shape"));
        c.add_method(MethodDecl::new("scale", Attr::PUBLIC).param(Param::new("f").typed("float")));
        assert!(link(c, &[base.clone()]).is_ok());

        let options = LinkerOptions {
            check_signatures: false,
            ..LinkerOptions::default()
        };
        let mut c = class("Square", Some("Shape"));
        c.add_method(MethodDecl::new("scale", Attr::PUBLIC));
        assert!(Linker::new(options)
            .link(&c.build(), None, &resolver(&[base]))
            .is_ok());
    }

    #[test]
    fn test_concrete_class_with_abstract_method() {
        let mut b = ClassTemplateBuilder::new("Shape", Attr::ABSTRACT);
        b.add_method(MethodDecl::new("area", Attr::PUBLIC | Attr::ABSTRACT));
        let base = link(b, &[]).unwrap();

        let err = link(class("Blob", Some("Shape")), &[base]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Abstractness);
        assert!(err.to_string().contains("abstract method (area)"));
    }

    #[test]
    fn test_constructor_priority() {
        let mut b = class("Base", None);
        b.add_method(MethodDecl::new("__construct", Attr::PUBLIC));
        let base = link(b, &[]).unwrap();
        assert_eq!(base.ctor().name().as_str(), "__construct");

        // Inherited __construct is still the constructor.
        let child = link(class("Child", Some("Base")), &[base.clone()]).unwrap();
        assert!(Arc::ptr_eq(child.ctor(), base.ctor()));

        // A named constructor wins over the inherited one.
        let mut c = class("Named", Some("Base"));
        c.add_method(MethodDecl::new("Named", Attr::PUBLIC));
        let named = link(c, &[base.clone()]).unwrap();
        assert_eq!(named.ctor().name().as_str(), "Named");

        let options = LinkerOptions {
            named_constructors: false,
            ..LinkerOptions::default()
        };
        let mut c = class("Named", Some("Base"));
        c.add_method(MethodDecl::new("Named", Attr::PUBLIC));
        let named = Linker::new(options)
            .link(&c.build(), None, &resolver(&[base.clone()]))
            .unwrap();
        assert!(Arc::ptr_eq(named.ctor(), base.ctor()));
    }

    #[test]
    fn test_capabilities() {
        let mut b = class("Magic", None);
        b.add_method(MethodDecl::new("__get", Attr::PUBLIC).param(Param::new("name")));
        b.add_method(MethodDecl::new("__call", Attr::PUBLIC));
        b.add_method(MethodDecl::new("__toString", Attr::PUBLIC));
        let magic = link(b, &[]).unwrap();

        assert_eq!(
            magic.capabilities(),
            ObjectCapabilities::USE_GET | ObjectCapabilities::HAS_CALL
        );
        assert!(magic.to_string_method().is_some());
    }

    #[test]
    fn test_interfaces_are_flattened() {
        let base_iface = link(ClassTemplateBuilder::new("Countable", Attr::INTERFACE), &[]).unwrap();
        let mut i = ClassTemplateBuilder::new("Collection", Attr::INTERFACE);
        i.add_interface("Countable");
        i.add_method(MethodDecl::new("count", Attr::PUBLIC | Attr::ABSTRACT));
        let iface = link(i, &[base_iface.clone()]).unwrap();

        let mut c = class("Bag", None);
        c.add_interface("Collection");
        c.add_method(MethodDecl::new("count", Attr::PUBLIC));
        let bag = link(c, &[base_iface.clone(), iface.clone()]).unwrap();

        let names: Vec<_> = bag.interfaces().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Collection", "Countable"]);

        let names: Vec<_> = iface.interfaces().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Collection", "Countable"]);
        assert_eq!(iface.interfaces()[0].id, iface.id());
        assert_eq!(iface.declared_interfaces().len(), 1);
        assert!(bag.is_instance_of(&base_iface));
        assert!(bag.is_instance_of(&iface));
    }

    #[test]
    fn test_interface_static_mismatch() {
        let mut i = ClassTemplateBuilder::new("Factory", Attr::INTERFACE);
        i.add_method(MethodDecl::new("make", Attr::PUBLIC | Attr::STATIC | Attr::ABSTRACT));
        let iface = link(i, &[]).unwrap();

        let mut c = class("Impl", None);
        c.add_interface("Factory");
        c.add_method(MethodDecl::new("make", Attr::PUBLIC));
        let err = link(c, &[iface]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Override(OverrideError::InterfaceStaticMismatch { .. })
        ));
    }

    #[test]
    fn test_not_an_interface() {
        let plain = link(class("Plain", None), &[]).unwrap();
        let mut c = class("C", None);
        c.add_interface("Plain");
        let err = link(c, &[plain]).unwrap_err();
        assert!(matches!(err, LinkError::NotAnInterface { .. }));
    }

    #[test]
    fn test_constants() {
        let mut i = ClassTemplateBuilder::new("HasLimit", Attr::INTERFACE);
        i.add_constant("LIMIT", Value::Int(10), None);
        let iface = link(i, &[]).unwrap();

        let mut b = class("Base", None);
        b.add_interface("HasLimit");
        b.add_constant("NAME", Value::Str(Name::new("base")), None);
        let base = link(b, &[iface.clone()]).unwrap();
        assert_eq!(base.lookup_constant(&Name::new("LIMIT")).unwrap().class.id, iface.id());

        let mut c = class("Child", Some("Base"));
        c.add_constant("NAME", Value::Str(Name::new("child")), None);
        let child = link(c, &[base.clone()]).unwrap();
        let name = child.lookup_constant(&Name::new("NAME")).unwrap();
        assert_eq!(name.class.id, child.id());
        assert_eq!(name.value, Value::Str(Name::new("child")));
        assert_eq!(
            child.constants().find(&Name::new("NAME")),
            base.constants().find(&Name::new("NAME"))
        );

        // Re-implementing the same interface is fine; a different origin is not.
        let mut c = class("Again", Some("Base"));
        c.add_interface("HasLimit");
        assert!(link(c, &[base.clone(), iface]).is_ok());

        let mut other = ClassTemplateBuilder::new("AlsoLimit", Attr::INTERFACE);
        other.add_constant("LIMIT", Value::Int(20), None);
        let other = link(other, &[]).unwrap();
        let mut c = class("Clash", Some("Base"));
        c.add_interface("AlsoLimit");
        let err = link(c, &[base, other]).unwrap_err();
        assert!(matches!(err, LinkError::ConstantConflict { .. }));
        assert_eq!(err.kind(), ErrorKind::Redeclaration);
    }

    #[test]
    fn test_property_layout() {
        let mut b = class("Base", None);
        b.add_property("secret", Attr::PRIVATE, Value::Int(1));
        b.add_property("shared", Attr::PROTECTED, Value::Int(2));
        let base = link(b, &[]).unwrap();

        let mut c = class("Child", Some("Base"));
        c.add_property("shared", Attr::PUBLIC, Value::Int(3));
        c.add_property("secret", Attr::PRIVATE, Value::Int(4));
        let child = link(c, &[base.clone()]).unwrap();

        assert_eq!(child.num_props(), 3);
        assert_eq!(child.num_accessible_props(), 2);
        // Slot 0 is the parent's private placeholder.
        assert!(child.props().name_at(0).is_none());
        assert_eq!(child.lookup_prop(&Name::new("shared")), Some(1));
        assert_eq!(child.lookup_prop(&Name::new("secret")), Some(2));
        assert_eq!(child.prop_defaults(), &[Value::Int(1), Value::Int(3), Value::Int(4)]);

        let shared = child.prop(1).unwrap();
        assert_eq!(shared.attrs.visibility(), Visibility::Public);
        assert_eq!(shared.class.id, base.id());
        assert_eq!(shared.mangled_name.as_str(), "shared");
    }

    #[test]
    fn test_property_narrowing_rejected() {
        let mut b = class("Base", None);
        b.add_property("x", Attr::PUBLIC, Value::Null);
        let base = link(b, &[]).unwrap();

        let mut c = class("Child", Some("Base"));
        c.add_property("x", Attr::PROTECTED, Value::Null);
        let err = link(c, &[base]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Override(OverrideError::PropertyVisibilityNarrowed { .. })
        ));
    }

    #[test]
    fn test_static_instance_flip() {
        let mut b = class("Base", None);
        b.add_property("count", Attr::PUBLIC | Attr::STATIC, Value::Int(0));
        b.add_property("size", Attr::PUBLIC, Value::Int(0));
        let base = link(b, &[]).unwrap();

        let mut c = class("Child", Some("Base"));
        c.add_property("count", Attr::PUBLIC, Value::Int(0));
        let err = link(c, &[base.clone()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot redeclare static Base::$count as non-static Child::$count"
        );

        let mut c = class("Child", Some("Base"));
        c.add_property("size", Attr::PUBLIC | Attr::STATIC, Value::Int(0));
        let err = link(c, &[base]).unwrap_err();
        assert!(matches!(err, LinkError::InstanceToStatic { .. }));
    }

    #[test]
    fn test_static_redeclaration_gets_own_storage() {
        let mut b = class("Base", None);
        b.add_property("count", Attr::PUBLIC | Attr::STATIC, Value::Int(0));
        b.add_property("hidden", Attr::PRIVATE | Attr::STATIC, Value::Int(0));
        let base = link(b, &[]).unwrap();

        let mut c = class("Child", Some("Base"));
        c.add_property("count", Attr::PUBLIC | Attr::STATIC, Value::Int(5));
        let child = link(c, &[base.clone()]).unwrap();

        let mine = child.static_prop(0).unwrap();
        let theirs = base.static_prop(0).unwrap();
        assert!(!mine.shares_storage_with(theirs));
        assert_eq!(mine.cell().get(), Value::Int(5));
        assert!(child.lookup_static_prop(&Name::new("hidden")).is_none());
    }

    #[test]
    fn test_initializer_chains() {
        let mut b = class("Base", None);
        b.add_method(MethodDecl::new("86pinit", Attr::PRIVATE));
        b.add_method(MethodDecl::new("86sinit", Attr::PRIVATE));
        let base = link(b, &[]).unwrap();
        assert_eq!(base.pinit_chain().len(), 1);
        assert_eq!(base.sinit_chain().len(), 1);

        // Inherits the pinit without running it twice, and never the sinit.
        let child = link(class("Child", Some("Base")), &[base.clone()]).unwrap();
        assert_eq!(child.pinit_chain().len(), 1);
        assert!(child.sinit_chain().is_empty());

        let mut c = class("Own", Some("Base"));
        c.add_method(MethodDecl::new("86pinit", Attr::PRIVATE));
        let own = link(c, &[base]).unwrap();
        assert_eq!(own.pinit_chain().len(), 2);
        assert_eq!(own.pinit_chain()[1].cls().id, own.id());
    }

    #[test]
    fn test_static_locals_are_cloned() {
        let mut b = class("Base", None);
        b.add_method(MethodDecl::new("counter", Attr::PUBLIC).with_static_locals());
        b.add_method(MethodDecl::new("plain", Attr::PUBLIC));
        let base = link(b, &[]).unwrap();
        let child = link(class("Child", Some("Base")), &[base.clone()]).unwrap();

        let name = Name::new("counter");
        let inherited = child.lookup_method(&name).unwrap();
        let original = base.lookup_method(&name).unwrap();
        assert!(!Arc::ptr_eq(inherited, original));
        assert_eq!(inherited.id(), original.id());

        original.static_locals().set(Name::new("n"), Value::Int(7));
        assert_eq!(inherited.static_locals().get(&Name::new("n")), None);

        let plain = Name::new("plain");
        assert!(Arc::ptr_eq(
            child.lookup_method(&plain).unwrap(),
            base.lookup_method(&plain).unwrap()
        ));
    }
}
