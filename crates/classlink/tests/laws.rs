//! Properties that must hold for every successful link

mod common;

use classlink::{
    Attr, Class, ClassRegistry, ClassTemplate, LinkError, Linker, MethodDecl, Name, OverrideError,
    TraitPrecRule, Value, Visibility,
};
use common::{class, trait_with};
use std::sync::Arc;

const VISIBILITIES: [Visibility; 3] = [Visibility::Public, Visibility::Protected, Visibility::Private];

fn chain(registry: &ClassRegistry, depth: usize) -> Vec<Arc<Class>> {
    let mut classes = Vec::with_capacity(depth);
    for level in 0..depth {
        let name = format!("Level{}", level);
        let parent = level.checked_sub(1).map(|p| format!("Level{}", p));
        let mut b = class(&name, parent.as_deref());
        b.add_method(MethodDecl::new(&format!("m{}", level), Attr::PUBLIC));
        b.add_method(MethodDecl::new("shared", Attr::PUBLIC));
        b.add_property(&format!("p{}", level), Attr::PROTECTED, Value::Int(level as i64));
        classes.push(registry.define(&b.build()).unwrap());
    }
    classes
}

#[test]
fn ancestry_vector_indexes_every_ancestor() {
    let registry = ClassRegistry::default();
    let classes = chain(&registry, 8);

    for (i, derived) in classes.iter().enumerate() {
        assert_eq!(derived.depth(), i);
        assert_eq!(derived.ancestry().len(), i + 1);
        for (j, other) in classes.iter().enumerate() {
            let expected = j <= i;
            assert_eq!(derived.is_instance_of(other), expected, "{} vs {}", derived, other);
            if expected {
                assert_eq!(derived.ancestry()[other.depth()], other.id());
            }
        }
    }
}

#[test]
fn overrides_never_narrow_visibility() {
    for parent_vis in VISIBILITIES {
        for child_vis in VISIBILITIES {
            let registry = ClassRegistry::default();
            let mut base = class("Base", None);
            base.add_method(MethodDecl::new("f", parent_vis.attr()));
            registry.define(&base.build()).unwrap();

            let mut child = class("Child", Some("Base"));
            child.add_method(MethodDecl::new("f", child_vis.attr()));
            let result = registry.define(&child.build());

            if child_vis > parent_vis {
                assert!(
                    matches!(
                        result,
                        Err(LinkError::Override(OverrideError::VisibilityNarrowed { .. }))
                    ),
                    "{} -> {} should be rejected",
                    parent_vis,
                    child_vis
                );
            } else {
                let child = result.unwrap();
                let f = child.lookup_method(&Name::new("f")).unwrap();
                assert!(f.attrs().visibility() <= parent_vis);
            }
        }
    }
}

#[test]
fn trait_precedence_ignores_use_order() {
    let registry = ClassRegistry::default();
    let t1 = registry.define(&trait_with("T1", &["m", "x"])).unwrap();
    let t2 = registry.define(&trait_with("T2", &["m", "y"])).unwrap();

    for (first, second) in [("T1", "T2"), ("T2", "T1")] {
        for selected in [&t1, &t2] {
            let excluded = if Arc::ptr_eq(selected, &t1) { "T2" } else { "T1" };
            let mut k = class("K", None);
            k.add_used_trait(first).add_used_trait(second);
            k.add_trait_prec_rule(TraitPrecRule::new(
                selected.name().as_str(),
                "m",
                &[excluded],
            ));
            let k = Linker::default().link(&k.build(), None, &registry).unwrap();
            let m = k.lookup_method(&Name::new("m")).unwrap();
            assert_eq!(m.declaring_template().id, selected.template().id());
            assert!(k.lookup_method(&Name::new("x")).is_some());
            assert!(k.lookup_method(&Name::new("y")).is_some());
        }
    }
}

/// Slot → name assignment of the method, property, static and constant tables
fn layout(class: &Class) -> [Vec<Option<Name>>; 4] {
    let methods = (0..class.num_methods())
        .map(|s| class.methods().name_at(s).cloned())
        .collect();
    let props = (0..class.num_props())
        .map(|s| class.props().name_at(s).cloned())
        .collect();
    let statics = (0..class.static_props().len())
        .map(|s| class.static_props().name_at(s).cloned())
        .collect();
    let constants = (0..class.constants().len())
        .map(|s| class.constants().name_at(s).cloned())
        .collect();
    [methods, props, statics, constants]
}

fn rich_template() -> Arc<ClassTemplate> {
    let mut b = class("Rich", Some("Level1"));
    b.add_used_trait("Helpers");
    b.add_method(MethodDecl::new("own", Attr::PUBLIC));
    b.add_method(MethodDecl::new("shared", Attr::PUBLIC));
    b.add_property("mine", Attr::PRIVATE, Value::Null);
    b.add_property("count", Attr::PUBLIC | Attr::STATIC, Value::Int(0));
    b.add_constant("KIND", Value::Str(Name::new("rich")), None);
    b.build()
}

#[test]
fn relinking_is_idempotent() {
    let registry = ClassRegistry::default();
    chain(&registry, 2);
    registry.define(&trait_with("Helpers", &["help", "assist"])).unwrap();
    let template = rich_template();

    let linker = Linker::default();
    let first = linker.link(&template, None, &registry).unwrap();
    let second = linker.link(&template, None, &registry).unwrap();

    assert_ne!(first.id(), second.id());
    assert_eq!(layout(&first), layout(&second));
    assert_eq!(first.traits_range(), second.traits_range());
    assert_eq!(first.prop_defaults(), second.prop_defaults());
    assert_eq!(first.ancestry()[..first.depth()], second.ancestry()[..second.depth()]);
    assert_eq!(first.info().methods, second.info().methods);
}
