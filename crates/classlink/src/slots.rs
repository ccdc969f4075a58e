//! Name/slot tables
//!
//! Every per-class member table (methods, instance properties, static
//! properties, constants) is a [`SlotMap`]: an append-only vector indexed by
//! slot plus a name index. Slots are assigned in first-declaration order and
//! never move once the map is built, which is what lets the interpreter cache
//! slot numbers and derived property offsets.

use crate::names::Name;
use rustc_hash::FxHashMap;

/// Index into a [`SlotMap`]
pub type Slot = usize;

/// Immutable slot-indexed table with name lookup
#[derive(Debug, Clone)]
pub struct SlotMap<V> {
    entries: Box<[V]>,
    names: Box<[Option<Name>]>,
    index: FxHashMap<Name, Slot>,
}

impl<V> Default for SlotMap<V> {
    fn default() -> Self {
        Self {
            entries: Box::default(),
            names: Box::default(),
            index: FxHashMap::default(),
        }
    }
}

impl<V> SlotMap<V> {
    /// Number of slots (named and unnamed)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slot bound to `name`
    #[inline]
    pub fn find(&self, name: &Name) -> Option<Slot> {
        self.index.get(name).copied()
    }

    /// Entry bound to `name`
    #[inline]
    pub fn get(&self, name: &Name) -> Option<&V> {
        self.find(name).map(|slot| &self.entries[slot])
    }

    /// Entry at `slot`
    #[inline]
    pub fn at(&self, slot: Slot) -> Option<&V> {
        self.entries.get(slot)
    }

    /// Name bound to `slot`, `None` for unnamed placeholders
    pub fn name_at(&self, slot: Slot) -> Option<&Name> {
        self.names.get(slot).and_then(Option::as_ref)
    }

    /// Whether `name` is bound
    pub fn contains(&self, name: &Name) -> bool {
        self.index.contains_key(name)
    }

    /// All entries in slot order
    pub fn values(&self) -> &[V] {
        &self.entries
    }

    /// `(slot, entry)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &V)> {
        self.entries.iter().enumerate()
    }
}

/// Mutable builder for a [`SlotMap`], used only while linking
#[derive(Debug)]
pub struct SlotMapBuilder<V> {
    entries: Vec<V>,
    names: Vec<Option<Name>>,
    index: FxHashMap<Name, Slot>,
}

impl<V> Default for SlotMapBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SlotMapBuilder<V> {
    /// Empty builder
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            names: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Builder starting from a copy of an existing table
    pub fn from_map(map: &SlotMap<V>) -> Self
    where
        V: Clone,
    {
        Self {
            entries: map.entries.to_vec(),
            names: map.names.to_vec(),
            index: map.index.clone(),
        }
    }

    /// Append a named entry.
    ///
    /// The name must not already be bound; callers check with [`find`](Self::find)
    /// and overlay through [`get_mut`](Self::get_mut) instead.
    pub fn add(&mut self, name: Name, value: V) -> Slot {
        let slot = self.entries.len();
        debug_assert!(!self.index.contains_key(&name), "duplicate slot name {}", name);
        self.index.entry(name.clone()).or_insert(slot);
        self.names.push(Some(name));
        self.entries.push(value);
        slot
    }

    /// Append an entry that cannot be found by name
    pub fn add_unnamed(&mut self, value: V) -> Slot {
        let slot = self.entries.len();
        self.names.push(None);
        self.entries.push(value);
        slot
    }

    /// Slot bound to `name`
    pub fn find(&self, name: &Name) -> Option<Slot> {
        self.index.get(name).copied()
    }

    /// Entry at `slot`
    pub fn get(&self, slot: Slot) -> Option<&V> {
        self.entries.get(slot)
    }

    /// Mutable entry at `slot`
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut V> {
        self.entries.get_mut(slot)
    }

    /// Number of slots so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no slot was added yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into an immutable table
    pub fn build(self) -> SlotMap<V> {
        SlotMap {
            entries: self.entries.into_boxed_slice(),
            names: self.names.into_boxed_slice(),
            index: self.index,
        }
    }
}
