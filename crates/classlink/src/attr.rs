//! Declaration attributes
//!
//! One bitset covers classes, methods, properties and constants, mirroring
//! the way the compiler emits them.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Attribute bits attached to classes and their members
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Attr: u32 {
        /// Visible everywhere
        const PUBLIC = 1 << 0;
        /// Visible to the declaring class hierarchy
        const PROTECTED = 1 << 1;
        /// Visible to the declaring class only
        const PRIVATE = 1 << 2;
        /// Class-level member
        const STATIC = 1 << 3;
        /// Declared without a body / class cannot be instantiated
        const ABSTRACT = 1 << 4;
        /// Cannot be overridden / extended
        const FINAL = 1 << 5;
        /// Class is an interface
        const INTERFACE = 1 << 6;
        /// Class is a trait, or method was inlined from one
        const TRAIT = 1 << 7;
        /// Returns by reference
        const REFERENCE = 1 << 8;
        /// Method is re-homed into every class that inherits it
        const CLONE = 1 << 9;
        /// Trait properties were already flattened into the class
        const NO_EXPAND_TRAIT = 1 << 10;
    }
}

impl Attr {
    /// Mask of the three visibility bits
    pub const VISIBILITY: Attr = Attr::PUBLIC.union(Attr::PROTECTED).union(Attr::PRIVATE);

    /// Visibility carried by these attributes (public when none is set).
    pub fn visibility(self) -> Visibility {
        if self.contains(Attr::PRIVATE) {
            Visibility::Private
        } else if self.contains(Attr::PROTECTED) {
            Visibility::Protected
        } else {
            Visibility::Public
        }
    }

    /// Replace the visibility bits.
    pub fn with_visibility(self, visibility: Visibility) -> Attr {
        (self - Attr::VISIBILITY) | visibility.attr()
    }

    /// Whether the bits describe an interface or a trait
    pub fn is_interface_or_trait(self) -> bool {
        self.intersects(Attr::INTERFACE | Attr::TRAIT)
    }
}

/// Member visibility.
///
/// Ordered from least to most restrictive: overriding members may move down
/// this order (widen) but never up (narrow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Accessible from anywhere
    Public,
    /// Accessible within the class hierarchy
    Protected,
    /// Accessible within the declaring class
    Private,
}

impl Visibility {
    /// Attribute bit for this visibility
    pub fn attr(self) -> Attr {
        match self {
            Visibility::Public => Attr::PUBLIC,
            Visibility::Protected => Attr::PROTECTED,
            Visibility::Private => Attr::PRIVATE,
        }
    }

    /// Keyword spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Per-class dispatch capabilities, computed once at link time so the
    /// interpreter never looks magic methods up by name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    #[serde(transparent)]
    pub struct ObjectCapabilities: u16 {
        /// Defines `__sleep`
        const HAS_SLEEP = 1 << 0;
        /// Defines `__get`
        const USE_GET = 1 << 1;
        /// Defines `__set`
        const USE_SET = 1 << 2;
        /// Defines `__isset`
        const USE_ISSET = 1 << 3;
        /// Defines `__unset`
        const USE_UNSET = 1 << 4;
        /// Defines `___lval`
        const HAS_LVAL = 1 << 5;
        /// Defines `__call`
        const HAS_CALL = 1 << 6;
        /// Defines `__callStatic`
        const HAS_CALL_STATIC = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_order() {
        assert!(Visibility::Public < Visibility::Protected);
        assert!(Visibility::Protected < Visibility::Private);
    }

    #[test]
    fn test_visibility_from_attrs() {
        assert_eq!(Attr::empty().visibility(), Visibility::Public);
        assert_eq!((Attr::PROTECTED | Attr::STATIC).visibility(), Visibility::Protected);
        assert_eq!(Attr::PRIVATE.visibility(), Visibility::Private);
    }

    #[test]
    fn test_with_visibility_replaces_bits() {
        let attrs = Attr::PROTECTED | Attr::FINAL;
        let widened = attrs.with_visibility(Visibility::Public);
        assert!(widened.contains(Attr::PUBLIC | Attr::FINAL));
        assert!(!widened.contains(Attr::PROTECTED));
    }

    #[test]
    fn test_interface_or_trait() {
        assert!(Attr::INTERFACE.is_interface_or_trait());
        assert!(Attr::TRAIT.is_interface_or_trait());
        assert!(!(Attr::ABSTRACT | Attr::FINAL).is_interface_or_trait());
    }
}
