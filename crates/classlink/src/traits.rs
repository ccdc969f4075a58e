//! Trait composition
//!
//! Flattens the methods and properties of used traits into the class being
//! linked. Methods go through four steps: collect every candidate per name,
//! apply `insteadof`/`as` rules, drop spare abstract declarations, then
//! require exactly one survivor per name unless the class declares the name
//! itself. Survivors are imported with the same override rules a parent
//! method is subject to.

use crate::attr::Attr;
use crate::class::{Class, ClassRef, Prop, SProp, StaticCell};
use crate::error::{LinkError, LinkResult};
use crate::func::{DeclaringTemplate, Func};
use crate::names::Name;
use crate::override_check::{check_override, MemberView, OverrideContext};
use crate::slots::SlotMapBuilder;
use crate::template::{mangle_prop_name, ClassTemplate, TraitAliasRule, TraitPrecRule};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// One trait method offered for import under some name
#[derive(Debug, Clone)]
pub struct TraitMethod {
    /// Trait providing the method
    pub trait_class: Arc<Class>,
    /// Method entry in the trait
    pub func: Arc<Func>,
    /// Modifiers the import should carry (empty keeps the method's own)
    pub modifiers: Attr,
}

impl TraitMethod {
    fn is_abstract(&self) -> bool {
        self.modifiers.contains(Attr::ABSTRACT)
    }
}

/// Methods selected for import, plus alias bookkeeping
#[derive(Debug, Default)]
pub struct ComposedTraits {
    /// `(import name, method)` in deterministic order
    pub methods: Vec<(Name, TraitMethod)>,
    /// `(alias, "Trait::original")` pairs
    pub aliases: Vec<(Name, Name)>,
}

/// Method composition over the used traits of one class
#[derive(Debug)]
pub struct TraitComposer<'a> {
    template: &'a ClassTemplate,
    used_traits: &'a [Arc<Class>],
    candidates: IndexMap<Name, Vec<TraitMethod>>,
    aliases: Vec<(Name, Name)>,
}

impl<'a> TraitComposer<'a> {
    /// Collect every trait method as a candidate under its own name
    pub fn new(template: &'a ClassTemplate, used_traits: &'a [Arc<Class>]) -> Self {
        let mut composer = Self {
            template,
            used_traits,
            candidates: IndexMap::new(),
            aliases: Vec::new(),
        };
        for trait_class in used_traits {
            for func in trait_class.methods().values() {
                composer.add_candidate(
                    func.name().clone(),
                    TraitMethod {
                        trait_class: trait_class.clone(),
                        func: func.clone(),
                        modifiers: func.attrs(),
                    },
                );
            }
        }
        composer
    }

    /// Run every step and return the methods to import
    pub fn compose(mut self) -> LinkResult<ComposedTraits> {
        self.apply_rules()?;
        self.remove_spare_abstracts();
        self.resolve()
    }

    fn add_candidate(&mut self, name: Name, method: TraitMethod) {
        if !name.is_special() {
            self.candidates.entry(name).or_default().push(method);
        }
    }

    /// Apply precedence rules, then alias rules, in declaration order
    pub fn apply_rules(&mut self) -> LinkResult<()> {
        for rule in self.template.trait_prec_rules() {
            self.apply_prec_rule(rule)?;
        }
        for rule in self.template.trait_alias_rules() {
            self.apply_alias_rule(rule)?;
        }
        Ok(())
    }

    fn apply_prec_rule(&mut self, rule: &TraitPrecRule) -> LinkResult<()> {
        let list = self
            .candidates
            .get_mut(&rule.method)
            .ok_or_else(|| LinkError::UnknownTraitMethod {
                method: rule.method.clone(),
            })?;

        let mut excluded = rule.excluded_traits.clone();
        let mut found_selected = false;
        list.retain(|candidate| {
            let name = candidate.trait_class.name();
            if *name == rule.selected_trait {
                found_selected = true;
                return true;
            }
            match excluded.iter().position(|n| n == name) {
                Some(i) => {
                    excluded.swap_remove(i);
                    false
                }
                None => true,
            }
        });

        if !found_selected {
            return Err(LinkError::UnknownTrait {
                name: rule.selected_trait.clone(),
            });
        }
        if let Some(name) = excluded.into_iter().next() {
            return Err(LinkError::UnknownTrait { name });
        }
        Ok(())
    }

    fn find_single_trait_with_method(&self, method: &Name) -> Option<Arc<Class>> {
        let mut providers = self
            .used_traits
            .iter()
            .filter(|t| t.lookup_method(method).is_some());
        let first = providers.next()?;
        match providers.next() {
            Some(_) => None,
            None => Some(first.clone()),
        }
    }

    fn apply_alias_rule(&mut self, rule: &TraitAliasRule) -> LinkResult<()> {
        let trait_class = match &rule.trait_name {
            Some(name) => self.used_traits.iter().find(|t| t.name() == name).cloned(),
            None => self.find_single_trait_with_method(&rule.original),
        }
        .ok_or_else(|| LinkError::UnknownTrait {
            name: rule.trait_name.clone().unwrap_or_else(|| Name::new("")),
        })?;

        self.aliases.push((
            rule.new_name.clone(),
            Name::new(&format!("{}::{}", trait_class.name(), rule.original)),
        ));

        let func = trait_class
            .lookup_method(&rule.original)
            .cloned()
            .ok_or_else(|| LinkError::UnknownTraitMethod {
                method: rule.original.clone(),
            })?;

        if rule.modifiers.contains(Attr::STATIC) {
            return Err(LinkError::StaticAliasModifier);
        }

        if rule.new_name == rule.original {
            if let Some(list) = self.candidates.get_mut(&rule.original) {
                if let Some(candidate) = list
                    .iter_mut()
                    .find(|c| c.trait_class.id() == trait_class.id())
                {
                    candidate.modifiers = rule.modifiers;
                }
            }
        } else {
            self.add_candidate(
                rule.new_name.clone(),
                TraitMethod {
                    trait_class,
                    func,
                    modifiers: rule.modifiers,
                },
            );
        }
        Ok(())
    }

    /// Drop abstract candidates that another trait implements, and
    /// duplicate abstract declarations.
    pub fn remove_spare_abstracts(&mut self) {
        for list in self.candidates.values_mut() {
            let has_concrete = list.iter().any(|c| !c.is_abstract());
            let mut kept_abstract = false;
            list.retain(|c| {
                if !c.is_abstract() {
                    return true;
                }
                if has_concrete || kept_abstract {
                    return false;
                }
                kept_abstract = true;
                true
            });
        }
    }

    /// Pick the single surviving candidate for each name.
    ///
    /// Names the class declares itself may stay ambiguous; the class's own
    /// method wins regardless.
    pub fn resolve(self) -> LinkResult<ComposedTraits> {
        let mut methods = Vec::with_capacity(self.candidates.len());
        for (name, mut list) in self.candidates {
            match list.len() {
                0 => {}
                1 => {
                    if let Some(method) = list.pop() {
                        methods.push((name, method));
                    }
                }
                _ if self.template.has_method(&name) => {}
                _ => return Err(LinkError::TraitConflict { method: name }),
            }
        }
        Ok(ComposedTraits {
            methods,
            aliases: self.aliases,
        })
    }
}

/// Install one composed trait method into the method table being built.
///
/// Abstract imports never displace an existing entry, and a method the class
/// declared itself is never replaced.
pub(crate) fn import_trait_method(
    name: Name,
    method: &TraitMethod,
    builder: &mut SlotMapBuilder<Arc<Func>>,
    this: &ClassRef,
    ctx: &OverrideContext<'_>,
) -> LinkResult<()> {
    let existing = builder.find(&name);
    if method.is_abstract() && existing.is_some() {
        return Ok(());
    }

    let func_attrs = method.func.attrs();
    let modifiers = if method.modifiers.is_empty() {
        func_attrs
    } else {
        let kept = Attr::REFERENCE | Attr::STATIC;
        (method.modifiers - kept) | (func_attrs & kept)
    };
    let decl = method.func.decl().clone();
    let declaring: DeclaringTemplate = method.func.declaring_template().clone();

    match existing.and_then(|slot| builder.get(slot).cloned().map(|f| (slot, f))) {
        Some((slot, parent)) => {
            if parent.cls().id == this.id {
                return Ok(());
            }
            let child = MemberView {
                name: &name,
                attrs: modifiers,
                params: &decl.params,
                base_class: &this.name,
                base_attrs: modifiers,
                base_params: &decl.params,
            };
            check_override(ctx, &parent.member_view(), &child)?;
            let func = Func::override_of(&parent, name, modifiers, decl, declaring, this.clone());
            if let Some(entry) = builder.get_mut(slot) {
                *entry = Arc::new(func);
            }
        }
        None => {
            let slot = builder.len();
            let func = Func::declare(name.clone(), modifiers, decl, declaring, this.clone(), slot);
            builder.add(name, Arc::new(func));
        }
    }
    Ok(())
}

/// Merge trait instance and static properties into the layouts being built.
///
/// The first declaration of a name wins; later ones must agree on attributes
/// and carry a compatible scalar default.
pub(crate) fn import_trait_props(
    template: &ClassTemplate,
    used_traits: &[Arc<Class>],
    this: &ClassRef,
    props: &mut SlotMapBuilder<Prop>,
    prop_defaults: &mut Vec<Value>,
    static_props: &mut SlotMapBuilder<SProp>,
) -> LinkResult<()> {
    if template.attrs().contains(Attr::NO_EXPAND_TRAIT) {
        return Ok(());
    }

    for trait_class in used_traits {
        for (slot, trait_prop) in trait_class.props().iter() {
            let trait_default = &trait_class.prop_defaults()[slot];
            match props.find(&trait_prop.name) {
                None => {
                    let mut prop = trait_prop.clone();
                    prop.class = this.clone();
                    if prop.attrs.contains(Attr::PRIVATE) {
                        prop.mangled_name = mangle_prop_name(template.name(), &prop.name, prop.attrs);
                    }
                    props.add(prop.name.clone(), prop);
                    prop_defaults.push(trait_default.clone());
                }
                Some(prev_slot) => {
                    let compatible = props.get(prev_slot).is_some_and(|prev| {
                        prev.attrs == trait_prop.attrs
                            && Value::compatible_trait_init(&prop_defaults[prev_slot], trait_default)
                    });
                    if !compatible {
                        return Err(LinkError::IncompatibleTraitProperty {
                            prop: trait_prop.name.clone(),
                        });
                    }
                }
            }
        }

        for trait_sprop in trait_class.static_props().values() {
            if props.find(&trait_sprop.name).is_some() {
                return Err(LinkError::IncompatibleTraitProperty {
                    prop: trait_sprop.name.clone(),
                });
            }
            match static_props.find(&trait_sprop.name) {
                None => {
                    let sprop = SProp {
                        name: trait_sprop.name.clone(),
                        attrs: trait_sprop.attrs,
                        class: this.clone(),
                        doc_comment: trait_sprop.doc_comment.clone(),
                        cell: StaticCell::new(trait_sprop.cell.initial().clone()),
                    };
                    static_props.add(sprop.name.clone(), sprop);
                }
                Some(prev_slot) => {
                    let Some(prev) = static_props.get_mut(prev_slot) else {
                        continue;
                    };
                    let prev_initial = prev.cell.initial().clone();
                    if prev.attrs != trait_sprop.attrs
                        || !Value::compatible_trait_init(trait_sprop.cell.initial(), &prev_initial)
                    {
                        return Err(LinkError::IncompatibleTraitProperty {
                            prop: trait_sprop.name.clone(),
                        });
                    }
                    prev.class = this.clone();
                    prev.cell = StaticCell::new(prev_initial);
                }
            }
        }
    }
    Ok(())
}
