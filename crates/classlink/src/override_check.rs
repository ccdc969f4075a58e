//! Visibility and override rules
//!
//! Pure validation shared by parent overrides, interface conformance and
//! trait imports. Nothing here interns names or touches linker state; the
//! caller describes both members with [`MemberView`]s and gets back either
//! `Ok(())` or the first rule that failed.

use crate::attr::{Attr, Visibility};
use crate::error::ErrorKind;
use crate::names::Name;
use crate::template::Param;
use thiserror::Error;

/// Override rule violations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OverrideError {
    /// Parent member is final
    #[error("Cannot override final method {parent}::{method}()")]
    FinalOverride {
        /// Parent class
        parent: Name,
        /// Final method
        method: Name,
    },

    /// Child member is abstract
    #[error(
        "Cannot re-declare {}abstract method {parent}::{method}() abstract in class {class}",
        non(.parent_abstract)
    )]
    Reabstract {
        /// Parent class
        parent: Name,
        /// Redeclared method
        method: Name,
        /// Class redeclaring it
        class: Name,
        /// Whether the parent declaration was abstract too
        parent_abstract: bool,
    },

    /// Child member is less visible than the parent member
    #[error("Access level to {class}::{method}() must be {required} (as in class {parent}) or weaker")]
    VisibilityNarrowed {
        /// Overriding class
        class: Name,
        /// Overridden method
        method: Name,
        /// Weakest visibility allowed
        required: Visibility,
        /// Parent class
        parent: Name,
    },

    /// Static/instance mismatch between parent and child
    #[error(
        "Cannot change {}static method {base}::{method}() to {}static in {class}",
        non(.parent_static),
        non_unless(.parent_static)
    )]
    StaticMismatch {
        /// Class of the baseline declaration
        base: Name,
        /// Overridden method
        method: Name,
        /// Overriding class
        class: Name,
        /// Whether the baseline is static
        parent_static: bool,
    },

    /// Child parameters cannot accept every call the base declaration accepts
    #[error("Declaration of {class}::{method}() must be compatible with that of {base}::{method}()")]
    IncompatibleSignature {
        /// Overriding class
        class: Name,
        /// Overridden method
        method: Name,
        /// Class of the abstract baseline
        base: Name,
    },

    /// Implementation staticness differs from the interface
    #[error(
        "Cannot make {}static method {interface}::{method}() {}static in class {class}",
        non(.interface_static),
        non_unless(.interface_static)
    )]
    InterfaceStaticMismatch {
        /// Interface declaring the method
        interface: Name,
        /// Interface method
        method: Name,
        /// Implementing class
        class: Name,
        /// Whether the interface method is static
        interface_static: bool,
    },

    /// Implementation of an interface method is not public
    #[error("Access level to {class}::{method}() must be public (as in interface {interface})")]
    InterfaceVisibility {
        /// Implementing class
        class: Name,
        /// Interface method
        method: Name,
        /// Interface declaring it
        interface: Name,
    },

    /// Property is less visible than the inherited declaration
    #[error("Access level to {class}::${prop} must be {required} (as in class {parent}) or weaker")]
    PropertyVisibilityNarrowed {
        /// Redeclaring class
        class: Name,
        /// Property name
        prop: Name,
        /// Weakest visibility allowed
        required: Visibility,
        /// Parent class
        parent: Name,
    },
}

/// `"non-"` prefix for a flag that is off
fn non(flag: &bool) -> &'static str {
    if *flag {
        ""
    } else {
        "non-"
    }
}

/// `"non-"` prefix for a flag that is on
fn non_unless(flag: &bool) -> &'static str {
    non(&!*flag)
}

impl OverrideError {
    /// Classification used by [`LinkError::kind`](crate::LinkError::kind)
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Override
    }
}

/// Class-level facts the rules depend on
#[derive(Debug, Clone, Copy)]
pub struct OverrideContext<'a> {
    /// Class being linked
    pub class: &'a Name,
    /// Its parent, named in final/abstract diagnostics
    pub parent_class: &'a Name,
    /// Class carries the mock attribute and may override final members
    pub mock_exempt: bool,
    /// Whether to run the parameter compatibility rule
    pub check_signatures: bool,
}

/// One side of an override check
#[derive(Debug, Clone, Copy)]
pub struct MemberView<'a> {
    /// Member name
    pub name: &'a Name,
    /// Member attributes
    pub attrs: Attr,
    /// Declared parameters
    pub params: &'a [Param],
    /// Class whose declaration established the override baseline
    pub base_class: &'a Name,
    /// Attributes of the baseline declaration
    pub base_attrs: Attr,
    /// Parameters of the baseline declaration
    pub base_params: &'a [Param],
}

/// Validate `child` overriding `parent`.
///
/// Rules run in a fixed order and the first failure is returned.
pub fn check_override(
    ctx: &OverrideContext<'_>,
    parent: &MemberView<'_>,
    child: &MemberView<'_>,
) -> Result<(), OverrideError> {
    if child.name.is_special() {
        return Ok(());
    }

    if parent.attrs.contains(Attr::FINAL) && !ctx.mock_exempt {
        return Err(OverrideError::FinalOverride {
            parent: ctx.parent_class.clone(),
            method: parent.name.clone(),
        });
    }

    if child.attrs.contains(Attr::ABSTRACT) {
        return Err(OverrideError::Reabstract {
            parent: ctx.parent_class.clone(),
            method: parent.name.clone(),
            class: ctx.class.clone(),
            parent_abstract: parent.attrs.contains(Attr::ABSTRACT),
        });
    }

    if child.attrs.visibility() > parent.attrs.visibility() {
        return Err(OverrideError::VisibilityNarrowed {
            class: ctx.class.clone(),
            method: child.name.clone(),
            required: parent.attrs.visibility(),
            parent: ctx.parent_class.clone(),
        });
    }

    let parent_static = parent.attrs.contains(Attr::STATIC);
    if child.attrs.contains(Attr::STATIC) != parent_static {
        return Err(OverrideError::StaticMismatch {
            base: parent.base_class.clone(),
            method: child.name.clone(),
            class: ctx.class.clone(),
            parent_static,
        });
    }

    if ctx.check_signatures
        && parent.base_attrs.contains(Attr::ABSTRACT)
        && !parameters_compat(child.params, parent.base_params)
    {
        return Err(OverrideError::IncompatibleSignature {
            class: ctx.class.clone(),
            method: child.name.clone(),
            base: parent.base_class.clone(),
        });
    }

    Ok(())
}

/// Validate `implementation` against interface method `required`.
pub fn check_interface_impl(
    ctx: &OverrideContext<'_>,
    interface: &Name,
    required: &MemberView<'_>,
    implementation: &MemberView<'_>,
) -> Result<(), OverrideError> {
    let interface_static = required.attrs.contains(Attr::STATIC);
    if implementation.attrs.contains(Attr::STATIC) != interface_static {
        return Err(OverrideError::InterfaceStaticMismatch {
            interface: interface.clone(),
            method: required.name.clone(),
            class: ctx.class.clone(),
            interface_static,
        });
    }

    if required.attrs.contains(Attr::PUBLIC) && !implementation.attrs.contains(Attr::PUBLIC) {
        return Err(OverrideError::InterfaceVisibility {
            class: ctx.class.clone(),
            method: required.name.clone(),
            interface: interface.clone(),
        });
    }

    if ctx.check_signatures && !parameters_compat(implementation.params, required.params) {
        return Err(OverrideError::IncompatibleSignature {
            class: ctx.class.clone(),
            method: implementation.name.clone(),
            base: interface.clone(),
        });
    }

    Ok(())
}

/// Validate a property redeclaration against the inherited one.
///
/// Static/instance flips are reported by the linker itself, since the
/// message names the class that first declared the property.
pub fn check_property_override(
    ctx: &OverrideContext<'_>,
    prop: &Name,
    parent_attrs: Attr,
    child_attrs: Attr,
) -> Result<(), OverrideError> {
    if child_attrs.visibility() > parent_attrs.visibility() {
        return Err(OverrideError::PropertyVisibilityNarrowed {
            class: ctx.class.clone(),
            prop: prop.clone(),
            required: parent_attrs.visibility(),
            parent: ctx.parent_class.clone(),
        });
    }
    Ok(())
}

/// Whether a method declared with `child` parameters can stand in for one
/// declared with `base` parameters.
///
/// The child must accept at least as many parameters, every extra one must
/// be optional, and each shared parameter must keep its type hint and
/// by-reference flag.
pub fn parameters_compat(child: &[Param], base: &[Param]) -> bool {
    if child.len() < base.len() {
        return false;
    }
    if !child[base.len()..].iter().all(Param::is_optional) {
        return false;
    }
    child
        .iter()
        .zip(base)
        .all(|(c, b)| c.type_hint == b.type_hint && c.by_ref == b.by_ref)
}
