//! Shared fixtures for integration tests

#![allow(dead_code)]

use classlink::{
    Attr, Class, ClassRegistry, ClassTemplate, ClassTemplateBuilder, ExecError, ExecutionContext,
    Func, LinkerOptions, MethodDecl, Name, PropInitVec, TemplateLoader, Value,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Builder for a plain class, optionally extending `parent`
pub fn class(name: &str, parent: Option<&str>) -> ClassTemplateBuilder {
    let mut b = ClassTemplateBuilder::new(name, Attr::empty());
    if let Some(parent) = parent {
        b.parent(parent);
    }
    b
}

/// Builder for a trait declaring the given public methods
pub fn trait_with(name: &str, methods: &[&str]) -> Arc<ClassTemplate> {
    let mut b = ClassTemplateBuilder::new(name, Attr::TRAIT);
    for m in methods {
        b.add_method(MethodDecl::new(m, Attr::PUBLIC));
    }
    b.build()
}

/// Builder for an interface declaring the given abstract methods
pub fn interface_with(name: &str, methods: &[&str]) -> Arc<ClassTemplate> {
    let mut b = ClassTemplateBuilder::new(name, Attr::INTERFACE);
    for m in methods {
        b.add_method(MethodDecl::new(m, Attr::PUBLIC | Attr::ABSTRACT));
    }
    b.build()
}

/// Mutable name → template map that can be swapped mid-test
#[derive(Default)]
pub struct Templates {
    map: Mutex<FxHashMap<Name, Arc<ClassTemplate>>>,
}

impl Templates {
    pub fn add(&self, template: &Arc<ClassTemplate>) {
        self.map
            .lock()
            .insert(template.name().clone(), template.clone());
    }
}

impl TemplateLoader for Templates {
    fn load(&self, name: &Name) -> Option<Arc<ClassTemplate>> {
        self.map.lock().get(name).cloned()
    }
}

/// Registry autoloading from the returned template map
pub fn autoloading_registry() -> (ClassRegistry, Arc<Templates>) {
    let templates = Arc::new(Templates::default());
    let registry = ClassRegistry::with_loader(LinkerOptions::default(), templates.clone());
    (registry, templates)
}

/// Execution context that fills every uninitialized property/constant with
/// a marker string and records the initializers it ran.
#[derive(Default)]
pub struct RecordingExec {
    pub calls: Mutex<Vec<String>>,
    pub fail_on: Option<&'static str>,
}

impl RecordingExec {
    fn record(&self, init: &Func, class: &Class) -> Result<(), ExecError> {
        let call = format!("{}::{}", init.cls().name, init.name());
        if self.fail_on == Some(init.cls().name.as_str()) {
            return Err(format!("{} threw", call).into());
        }
        self.calls.lock().push(format!("{} for {}", call, class.name()));
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl ExecutionContext for RecordingExec {
    fn run_prop_initializer(
        &self,
        init: &Func,
        class: &Class,
        props: &mut PropInitVec,
    ) -> Result<(), ExecError> {
        self.record(init, class)?;
        let owner = init.cls().name.clone();
        for value in props.values.iter_mut().filter(|v| v.is_uninit()) {
            *value = Value::Str(Name::new(&format!("from {}", owner)));
        }
        Ok(())
    }

    fn run_static_initializer(&self, init: &Func, class: &Class) -> Result<(), ExecError> {
        self.record(init, class)?;
        for sprop in class.static_props().values() {
            if sprop.class.id == class.id() && sprop.cell().get().is_uninit() {
                sprop.cell().set(Value::Int(42));
            }
        }
        Ok(())
    }

    fn eval_constant(&self, init: &Func, class: &Class, name: &Name) -> Result<Value, ExecError> {
        self.record(init, class)?;
        Ok(Value::Str(Name::new(&format!("{}::{}", class.name(), name))))
    }
}
