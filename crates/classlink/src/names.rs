//! Interned names
//!
//! Every class, method, property and constant name handled by the linker is a
//! [`Name`]: a canonical handle into a process-wide intern table. Equal
//! content always yields the same handle, so comparison is a pointer check
//! and hashing never touches the string bytes.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Process-wide intern table
static INTERNER: Lazy<Interner> = Lazy::new(Interner::new);

/// Interned string handle.
///
/// Handles are cheap to clone and compare. They stay valid for the lifetime
/// of the process; interned strings are never evicted.
#[derive(Clone)]
pub struct Name(Arc<str>);

impl Name {
    /// Intern `s`, returning the canonical handle for its content.
    pub fn new(s: &str) -> Self {
        INTERNER.intern(s)
    }

    /// Borrow the underlying string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty name
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compiler-synthesized methods (`86ctor`, `86pinit`, ...) are special:
    /// they are exempt from override rules and never imported from traits.
    pub fn is_special(&self) -> bool {
        self.0.starts_with("86")
    }

    /// Whether the name starts with an ASCII digit (hidden from reflection)
    pub(crate) fn is_hidden(&self) -> bool {
        self.0.as_bytes().first().is_some_and(u8::is_ascii_digit)
    }
}

impl PartialEq for Name {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Canonical handles: the address identifies the content.
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Deduplicating string table behind [`Name::new`].
struct Interner {
    strings: RwLock<FxHashSet<Arc<str>>>,
}

impl Interner {
    fn new() -> Self {
        Self {
            strings: RwLock::new(FxHashSet::default()),
        }
    }

    fn intern(&self, s: &str) -> Name {
        if let Some(existing) = self.strings.read().get(s) {
            return Name(existing.clone());
        }

        let mut strings = self.strings.write();
        // Another thread may have won the race between the two locks.
        if let Some(existing) = strings.get(s) {
            return Name(existing.clone());
        }
        let interned: Arc<str> = Arc::from(s);
        strings.insert(interned.clone());
        Name(interned)
    }
}

/// Well-known method names the linker binds specially
pub mod well_known {
    use super::Name;
    use once_cell::sync::Lazy;

    macro_rules! names {
        ($($(#[$doc:meta])* $ident:ident => $text:literal,)*) => {
            $(
                $(#[$doc])*
                pub static $ident: Lazy<Name> = Lazy::new(|| Name::new($text));
            )*
        };
    }

    names! {
        /// Explicit constructor
        CONSTRUCT => "__construct",
        /// Synthesized default constructor
        DEFAULT_CTOR => "86ctor",
        /// Non-scalar instance property initializer
        PINIT => "86pinit",
        /// Non-scalar static property initializer
        SINIT => "86sinit",
        /// Non-scalar class constant initializer
        CINIT => "86cinit",
        /// String conversion
        TO_STRING => "__toString",
        /// Serialization hook
        SLEEP => "__sleep",
        /// Magic property read
        GET => "__get",
        /// Magic property write
        SET => "__set",
        /// Magic property isset
        ISSET => "__isset",
        /// Magic property unset
        UNSET => "__unset",
        /// Magic lvalue property access
        LVAL => "___lval",
        /// Magic instance call
        CALL => "__call",
        /// Magic static call
        CALL_STATIC => "__callStatic",
    }
}
