//! Link errors
//!
//! Every failure the linker can report, plus the coarse classification callers
//! use to decide between retrying (after loading a missing dependency) and
//! surfacing a fatal error.

use crate::names::Name;
use crate::override_check::OverrideError;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type LinkResult<T> = Result<T, LinkError>;

/// Role a dependency plays for the class being linked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// `extends`
    Parent,
    /// `implements` / interface `extends`
    Interface,
    /// `use`
    Trait,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Parent => f.write_str("class"),
            DependencyKind::Interface => f.write_str("interface"),
            DependencyKind::Trait => f.write_str("trait"),
        }
    }
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown or wrong-kind parent/interface/trait
    Structural,
    /// Visibility, staticness, finality or signature violation
    Override,
    /// Ambiguous or incompatible trait member
    TraitConflict,
    /// Concrete class with unimplemented abstract methods
    Abstractness,
    /// Static/instance flip or divergent constant origin
    Redeclaration,
    /// User initializer failed while materializing values
    Initialization,
}

/// Errors that can occur while linking a class
#[derive(Debug, Error)]
pub enum LinkError {
    /// A dependency could not be resolved
    #[error("Undefined {kind}: {name}")]
    UnknownClass {
        /// Role of the missing dependency
        kind: DependencyKind,
        /// Name that did not resolve
        name: Name,
    },

    /// A class was defined again while its own link was still running
    #[error("Class {name} depends on itself")]
    CircularDependency {
        /// Class whose link was re-entered
        name: Name,
    },

    /// Parent passed to the linker is not the one the template names
    #[error("Class {class} {}, but was linked against {given}", extends_clause(.expected))]
    ParentMismatch {
        /// Class being linked
        class: Name,
        /// Parent named by the template, if any
        expected: Option<Name>,
        /// Parent the caller supplied
        given: Name,
    },

    /// Parent is final, an interface or a trait
    #[error("Class {class} may not inherit from {what} ({parent})")]
    InvalidParent {
        /// Class being linked
        class: Name,
        /// Rejected parent
        parent: Name,
        /// What the parent is
        what: &'static str,
    },

    /// A `use` names something that is not a trait
    #[error("{class} cannot use {name} - it is not a trait")]
    NotATrait {
        /// Class being linked
        class: Name,
        /// Used name
        name: Name,
    },

    /// An `implements` names something that is not an interface
    #[error("{class} cannot implement {name} - it is not an interface")]
    NotAnInterface {
        /// Class being linked
        class: Name,
        /// Implemented name
        name: Name,
    },

    /// Override rule violation
    #[error(transparent)]
    Override(#[from] OverrideError),

    /// Trait rule names a method no used trait provides
    #[error("unknown trait method '{method}'")]
    UnknownTraitMethod {
        /// Method named by the rule
        method: Name,
    },

    /// Trait rule names a trait that is not used or lacks the method
    #[error("unknown trait '{name}'")]
    UnknownTrait {
        /// Trait named by the rule
        name: Name,
    },

    /// Alias rule tries to change staticness
    #[error("cannot use 'static' as access modifier")]
    StaticAliasModifier,

    /// Method left ambiguous after applying trait rules
    #[error("method '{method}' declared in multiple traits")]
    TraitConflict {
        /// Ambiguous method
        method: Name,
    },

    /// Trait property clashes with an earlier declaration
    #[error("trait declaration of property '{prop}' is incompatible with previous declaration")]
    IncompatibleTraitProperty {
        /// Clashing property
        prop: Name,
    },

    /// Concrete class left with an abstract method
    #[error(
        "Class {class} contains abstract method ({method}) and must therefore be declared \
         abstract or implement the remaining methods"
    )]
    AbstractMethod {
        /// Concrete class
        class: Name,
        /// Unimplemented method
        method: Name,
    },

    /// Instance property redeclares an inherited static one
    #[error("Cannot redeclare static {owner}::${prop} as non-static {class}::${prop}")]
    StaticToInstance {
        /// Class declaring the static property
        owner: Name,
        /// Property name
        prop: Name,
        /// Redeclaring class
        class: Name,
    },

    /// Static property redeclares an inherited instance one
    #[error("Cannot redeclare non-static {owner}::${prop} as static {class}::${prop}")]
    InstanceToStatic {
        /// Class declaring the instance property
        owner: Name,
        /// Property name
        prop: Name,
        /// Redeclaring class
        class: Name,
    },

    /// Same constant inherited from two different origins
    #[error("Cannot inherit previously-inherited constant {name}")]
    ConstantConflict {
        /// Constant name
        name: Name,
    },

    /// Another definition of the name is already bound
    #[error("Cannot redeclare class {name}")]
    ClassRedeclared {
        /// Class name
        name: Name,
    },

    /// An `86pinit`/`86sinit`/`86cinit` call failed or is missing
    #[error("{initializer} failed for class {class}: {reason}")]
    Initializer {
        /// Class the initializer ran for
        class: Name,
        /// Initializer method
        initializer: Name,
        /// Failure reported by the execution context
        reason: String,
    },
}

fn extends_clause(expected: &Option<Name>) -> String {
    match expected {
        Some(parent) => format!("extends {}", parent),
        None => "declares no parent".to_string(),
    }
}

impl LinkError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::UnknownClass { .. }
            | LinkError::CircularDependency { .. }
            | LinkError::ParentMismatch { .. }
            | LinkError::InvalidParent { .. }
            | LinkError::NotATrait { .. }
            | LinkError::NotAnInterface { .. }
            | LinkError::UnknownTraitMethod { .. }
            | LinkError::UnknownTrait { .. }
            | LinkError::StaticAliasModifier => ErrorKind::Structural,
            LinkError::Override(e) => e.kind(),
            LinkError::TraitConflict { .. } | LinkError::IncompatibleTraitProperty { .. } => {
                ErrorKind::TraitConflict
            }
            LinkError::AbstractMethod { .. } => ErrorKind::Abstractness,
            LinkError::StaticToInstance { .. }
            | LinkError::InstanceToStatic { .. }
            | LinkError::ConstantConflict { .. }
            | LinkError::ClassRedeclared { .. } => ErrorKind::Redeclaration,
            LinkError::Initializer { .. } => ErrorKind::Initialization,
        }
    }

    /// Name of the dependency whose absence caused the failure, if any.
    ///
    /// Callers use this to load the dependency and retry.
    pub fn missing_dependency(&self) -> Option<&Name> {
        match self {
            LinkError::UnknownClass { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = LinkError::UnknownClass {
            kind: DependencyKind::Interface,
            name: Name::new("Countable"),
        };
        assert_eq!(e.to_string(), "Undefined interface: Countable");
        assert_eq!(e.kind(), ErrorKind::Structural);
        assert_eq!(e.missing_dependency(), Some(&Name::new("Countable")));

        let e = LinkError::TraitConflict {
            method: Name::new("m"),
        };
        assert_eq!(e.to_string(), "method 'm' declared in multiple traits");
        assert_eq!(e.kind(), ErrorKind::TraitConflict);
        assert!(e.missing_dependency().is_none());

        let e = LinkError::StaticToInstance {
            owner: Name::new("P"),
            prop: Name::new("s"),
            class: Name::new("C"),
        };
        assert_eq!(e.to_string(), "Cannot redeclare static P::$s as non-static C::$s");
        assert_eq!(e.kind(), ErrorKind::Redeclaration);
    }

    #[test]
    fn test_parent_mismatch_messages() {
        let e = LinkError::ParentMismatch {
            class: Name::new("C"),
            expected: Some(Name::new("Base")),
            given: Name::new("Other"),
        };
        assert_eq!(e.to_string(), "Class C extends Base, but was linked against Other");

        let e = LinkError::ParentMismatch {
            class: Name::new("C"),
            expected: None,
            given: Name::new("Other"),
        };
        assert_eq!(e.to_string(), "Class C declares no parent, but was linked against Other");
    }

    #[test]
    fn test_circular_dependency_is_not_retryable() {
        let e = LinkError::CircularDependency {
            name: Name::new("Loop"),
        };
        assert_eq!(e.to_string(), "Class Loop depends on itself");
        assert_eq!(e.kind(), ErrorKind::Structural);
        assert!(e.missing_dependency().is_none());
    }
}
