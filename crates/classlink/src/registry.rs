//! Name → class registry
//!
//! Binds each class name to its active [`Class`] for the current request,
//! keeps previously linked classes around for reuse, and retires classes
//! whose template was superseded.
//!
//! Readers go through [`ClassHandle::get`], which only pins the current
//! epoch. Writers (define, invalidate, retire) are serialized by one
//! reentrant lock so autoloading a dependency from inside a link is allowed.
//! A class that is unbound is never freed directly: the registry hands its
//! reference to `crossbeam::epoch`, which runs the release once no pinned
//! reader can still be looking at the old binding.

use crate::class::{Availability, Class, ClassState};
use crate::error::{LinkError, LinkResult};
use crate::linker::{ClassResolver, Linker};
use crate::names::Name;
use crate::options::LinkerOptions;
use crate::template::ClassTemplate;
use crossbeam::epoch::{self, Atomic, Guard, Owned};
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Supplies class templates by name
pub trait TemplateLoader: Send + Sync {
    /// Template currently defining `name`, if any
    fn load(&self, name: &Name) -> Option<Arc<ClassTemplate>>;
}

impl<F> TemplateLoader for F
where
    F: Fn(&Name) -> Option<Arc<ClassTemplate>> + Send + Sync,
{
    fn load(&self, name: &Name) -> Option<Arc<ClassTemplate>> {
        self(name)
    }
}

/// Callback fired when a name's binding is invalidated
pub type InvalidationHook = Box<dyn Fn(&Name) + Send + Sync>;

/// Registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// `define` calls
    pub defined: u64,
    /// Definitions satisfied by a cached class
    pub reused: u64,
    /// Successful link runs
    pub linked: u64,
    /// Failed link runs
    pub failed: u64,
    /// Classes retired, by `retire_template` or because a cached class went
    /// stale
    pub retired: u64,
    /// Retired classes whose deferred release has run
    pub reclaimed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    defined: AtomicU64,
    reused: AtomicU64,
    linked: AtomicU64,
    failed: AtomicU64,
    retired: AtomicU64,
    reclaimed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            defined: self.defined.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            linked: self.linked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Per-name registry slot
struct NamedEntry {
    name: Name,
    /// Active binding; null when unbound
    active: Atomic<Arc<Class>>,
    /// Every class linked under this name that has not been retired
    cached: Mutex<Vec<Arc<Class>>>,
    state: AtomicU8,
}

impl NamedEntry {
    fn new(name: Name) -> Self {
        Self {
            name,
            active: Atomic::null(),
            cached: Mutex::new(Vec::new()),
            state: AtomicU8::new(ClassState::Unlinked as u8),
        }
    }

    fn state(&self) -> ClassState {
        ClassState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ClassState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn load(&self) -> Option<Arc<Class>> {
        let guard = epoch::pin();
        let shared = self.active.load(Ordering::Acquire, &guard);
        // SAFETY: bindings are only released through `defer_destroy`, so the
        // box stays valid while `guard` is pinned.
        unsafe { shared.as_ref() }.cloned()
    }

    /// Replace the binding, deferring release of the previous one
    fn bind(&self, class: Option<Arc<Class>>, guard: &Guard) -> Option<Arc<Class>> {
        let new = match class {
            Some(class) => Owned::new(class).into_shared(guard),
            None => epoch::Shared::null(),
        };
        let old = self.active.swap(new, Ordering::AcqRel, guard);
        if old.is_null() {
            return None;
        }
        // SAFETY: `old` was just unlinked, so no new reader can reach it, and
        // readers that already loaded it are pinned to an earlier epoch.
        let previous = unsafe { old.as_ref() }.cloned();
        unsafe { guard.defer_destroy(old) };
        previous
    }
}

impl Drop for NamedEntry {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no handle or reader can still reach the
        // entry.
        unsafe {
            let guard = epoch::unprotected();
            let shared = self.active.load(Ordering::Relaxed, guard);
            if !shared.is_null() {
                drop(shared.into_owned());
            }
        }
    }
}

/// Cheap, cloneable reference to a name's binding
#[derive(Clone)]
pub struct ClassHandle {
    entry: Arc<NamedEntry>,
}

impl ClassHandle {
    /// Name this handle tracks
    pub fn name(&self) -> &Name {
        &self.entry.name
    }

    /// Currently bound class, without taking any lock
    pub fn get(&self) -> Option<Arc<Class>> {
        self.entry.load()
    }
}

impl std::fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassHandle")
            .field("name", &self.entry.name)
            .field("state", &self.entry.state())
            .finish()
    }
}

/// Registry of linked classes for one runtime instance
pub struct ClassRegistry {
    linker: Linker,
    loader: Option<Arc<dyn TemplateLoader>>,
    entries: DashMap<Name, Arc<NamedEntry>>,
    link_lock: ReentrantMutex<()>,
    hooks: RwLock<Vec<InvalidationHook>>,
    counters: Arc<Counters>,
}

impl ClassRegistry {
    /// Registry without a loader; dependencies must be defined up front
    pub fn new(options: LinkerOptions) -> Self {
        Self {
            linker: Linker::new(options),
            loader: None,
            entries: DashMap::new(),
            link_lock: ReentrantMutex::new(()),
            hooks: RwLock::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Registry that autoloads missing dependencies through `loader`
    pub fn with_loader(options: LinkerOptions, loader: Arc<dyn TemplateLoader>) -> Self {
        Self {
            loader: Some(loader),
            ..Self::new(options)
        }
    }

    /// Linker used by `define`
    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    fn entry(&self, name: &Name) -> Arc<NamedEntry> {
        self.entries
            .entry(name.clone())
            .or_insert_with(|| Arc::new(NamedEntry::new(name.clone())))
            .clone()
    }

    /// Handle for `name`, valid before and after the name is defined
    pub fn handle(&self, name: &Name) -> ClassHandle {
        ClassHandle {
            entry: self.entry(name),
        }
    }

    /// Active class for `name`; never loads
    pub fn lookup(&self, name: &Name) -> Option<Arc<Class>> {
        self.entries.get(name).and_then(|entry| entry.load())
    }

    /// Registration state of `name`
    pub fn state(&self, name: &Name) -> ClassState {
        self.entries
            .get(name)
            .map_or(ClassState::Unlinked, |entry| entry.state())
    }

    /// Bind `template`'s name to a linked class.
    ///
    /// Reuses a cached class built from the same template when all of its
    /// dependencies still resolve to the classes it was linked against;
    /// otherwise links afresh.
    pub fn define(&self, template: &Arc<ClassTemplate>) -> LinkResult<Arc<Class>> {
        let _link = self.link_lock.lock();
        let name = template.name();
        let entry = self.entry(name);
        Counters::bump(&self.counters.defined);

        if entry.state() == ClassState::Linking {
            // The link lock is held, so only this thread can be linking it.
            return Err(LinkError::CircularDependency { name: name.clone() });
        }
        if let Some(active) = entry.load() {
            if active.template().id() == template.id() {
                return Ok(active);
            }
            return Err(LinkError::ClassRedeclared { name: name.clone() });
        }

        if let Some(class) = self.reusable(&entry, template) {
            trace!(class = %name, id = class.id().as_u64(), "reusing cached class");
            Counters::bump(&self.counters.reused);
            self.publish(&entry, class.clone());
            return Ok(class);
        }

        entry.set_state(ClassState::Linking);
        match self.linker.link(template, None, self) {
            Ok(class) => {
                Counters::bump(&self.counters.linked);
                entry.cached.lock().push(class.clone());
                self.publish(&entry, class.clone());
                Ok(class)
            }
            Err(err) => {
                Counters::bump(&self.counters.failed);
                entry.set_state(ClassState::Unlinked);
                Err(err)
            }
        }
    }

    /// Speculative [`define`](Self::define): failure is `None`
    pub fn try_define(&self, template: &Arc<ClassTemplate>) -> Option<Arc<Class>> {
        self.define(template).ok()
    }

    /// Newest cached class from `template` whose dependencies still
    /// resolve to what it was linked against. Candidates that went stale are
    /// retired on the way.
    fn reusable(&self, entry: &NamedEntry, template: &ClassTemplate) -> Option<Arc<Class>> {
        let candidates: Vec<Arc<Class>> = entry
            .cached
            .lock()
            .iter()
            .filter(|c| c.template().id() == template.id())
            .cloned()
            .collect();

        let autoload = self.linker.options().autoload;
        let mut stale = Vec::new();
        let mut found = None;
        for candidate in candidates.into_iter().rev() {
            match candidate.check_available(self, None, autoload) {
                Availability::Available => {
                    found = Some(candidate);
                    break;
                }
                Availability::Unavailable => stale.push(candidate),
                Availability::Indeterminate(blocking) => {
                    debug!(class = %entry.name, blocking = %blocking, "cached class indeterminate");
                }
            }
        }

        if !stale.is_empty() {
            entry
                .cached
                .lock()
                .retain(|c| !stale.iter().any(|s| Arc::ptr_eq(c, s)));
            trace!(class = %entry.name, count = stale.len(), "stale cached classes dropped");
            self.retire(stale);
        }
        found
    }

    /// Move unlinked classes to `Superseded` and defer their release until
    /// no pinned reader can still observe them.
    fn retire(&self, classes: Vec<Arc<Class>>) {
        let guard = epoch::pin();
        for class in classes {
            class.set_state(ClassState::Superseded);
            Counters::bump(&self.counters.retired);
            let counters = self.counters.clone();
            guard.defer(move || {
                class.set_state(ClassState::Reclaimable);
                Counters::bump(&counters.reclaimed);
                trace!(class = %class.name(), "class reclaimable");
            });
        }
        guard.flush();
    }

    fn publish(&self, entry: &NamedEntry, class: Arc<Class>) {
        let guard = epoch::pin();
        trace!(class = %entry.name, id = class.id().as_u64(), "binding published");
        entry.bind(Some(class), &guard);
        entry.set_state(ClassState::Linked);
    }

    /// Drop the binding for `name` and fire invalidation hooks.
    ///
    /// Returns the class that was bound. Cached classes stay available for
    /// reuse.
    pub fn invalidate(&self, name: &Name) -> Option<Arc<Class>> {
        let previous = {
            let _link = self.link_lock.lock();
            let entry = self.entries.get(name).map(|e| Arc::clone(e.value()))?;
            let guard = epoch::pin();
            let previous = entry.bind(None, &guard);
            entry.set_state(ClassState::Unlinked);
            previous
        };
        trace!(class = %name, "binding invalidated");
        for hook in self.hooks.read().iter() {
            hook(name);
        }
        previous
    }

    /// Register a callback run by [`invalidate`](Self::invalidate)
    pub fn on_invalidate(&self, hook: InvalidationHook) {
        self.hooks.write().push(hook);
    }

    /// Drop every active binding; the next lookup has to define again
    pub fn end_request(&self) {
        let _link = self.link_lock.lock();
        let guard = epoch::pin();
        for entry in self.entries.iter() {
            entry.bind(None, &guard);
            entry.set_state(ClassState::Unlinked);
        }
        debug!(entries = self.entries.len(), "request bindings cleared");
    }

    /// Unlink every class built from `template`.
    ///
    /// The classes move to `Superseded` immediately. Their release is
    /// deferred until every pinned reader has moved on, at which point they
    /// become `Reclaimable`; the memory goes away when the last outstanding
    /// `Arc` is dropped. Returns the number of classes retired.
    pub fn retire_template(&self, template: &ClassTemplate) -> usize {
        let _link = self.link_lock.lock();
        let Some(entry) = self.entries.get(template.name()).map(|e| Arc::clone(e.value())) else {
            return 0;
        };

        let retired: Vec<Arc<Class>> = {
            let mut cached = entry.cached.lock();
            let (retired, kept) = cached
                .drain(..)
                .partition(|c| c.template().id() == template.id());
            *cached = kept;
            retired
        };

        if entry
            .load()
            .is_some_and(|active| active.template().id() == template.id())
        {
            entry.bind(None, &epoch::pin());
            entry.set_state(ClassState::Unlinked);
        }

        let count = retired.len();
        self.retire(retired);
        debug!(class = %template.name(), count, "template retired");
        count
    }

    /// Currently bound classes, sorted by name
    pub fn classes(&self) -> Vec<Arc<Class>> {
        let mut classes: Vec<Arc<Class>> =
            self.entries.iter().filter_map(|entry| entry.load()).collect();
        classes.sort_by(|a, b| a.name().as_str().cmp(b.name().as_str()));
        classes
    }

    /// Counter snapshot
    pub fn stats(&self) -> RegistryStats {
        self.counters.snapshot()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new(LinkerOptions::default())
    }
}

impl ClassResolver for ClassRegistry {
    fn resolve_class(&self, name: &Name, autoload: bool) -> Option<Arc<Class>> {
        if let Some(class) = self.lookup(name) {
            return Some(class);
        }
        if !autoload && self.state(name) != ClassState::Linking {
            return None;
        }

        // Wait out a link running on another thread. The lock is reentrant,
        // so a name still `Linking` once it is held is part of this thread's
        // own dependency chain.
        let _link = self.link_lock.lock();
        if let Some(class) = self.lookup(name) {
            return Some(class);
        }
        if !autoload || self.state(name) == ClassState::Linking {
            return None;
        }
        let template = self.loader.as_ref()?.load(name)?;
        trace!(class = %name, "autoloading");
        self.define(&template).ok()
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("entries", &self.entries.len())
            .field("autoload", &self.loader.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}
