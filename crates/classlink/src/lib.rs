//! Class linking engine
//!
//! Turns immutable class templates into runtime classes:
//! - **Templates**: declarations produced once per compilation unit (`template`)
//! - **Linker**: the phased build of a class from its template and already
//!   linked dependencies (`linker`, `override_check`, `traits`)
//! - **Classes**: the immutable result, with slot-indexed method, property
//!   and constant tables plus an ancestry vector for O(1) subclass tests
//!   (`class`)
//! - **Registry**: name bindings, reuse of cached classes across requests and
//!   epoch-deferred retirement of superseded ones (`registry`)
//!
//! # Example
//!
//! ```rust,ignore
//! use classlink::{Attr, ClassRegistry, ClassTemplateBuilder, LinkerOptions, MethodDecl};
//!
//! let mut base = ClassTemplateBuilder::new("Base", Attr::empty());
//! base.add_method(MethodDecl::new("f", Attr::PROTECTED));
//!
//! let mut child = ClassTemplateBuilder::new("Child", Attr::empty());
//! child.parent("Base");
//! child.add_method(MethodDecl::new("f", Attr::PUBLIC));
//!
//! let registry = ClassRegistry::new(LinkerOptions::default());
//! registry.define(&base.build())?;
//! let child = registry.define(&child.build())?;
//! assert_eq!(child.depth(), 1);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Declarations
// ============================================================================

/// Interned names
pub mod names;

/// Attribute bits and visibility
pub mod attr;

/// Declared default and constant values
pub mod value;

/// Class templates and their builder
pub mod template;

// ============================================================================
// Linking
// ============================================================================

/// Name-indexed slot tables
pub mod slots;

/// Link errors and their classification
pub mod error;

/// Override and interface conformance rules
pub mod override_check;

/// Linked method records
pub mod func;

/// Trait flattening
pub mod traits;

/// Phased class linker
pub mod linker;

/// Linker configuration
pub mod options;

// ============================================================================
// Runtime
// ============================================================================

/// Linked classes and their runtime accessors
pub mod class;

/// Name bindings and reclamation
pub mod registry;

/// Reflection snapshots
pub mod reflect;

pub use attr::{Attr, ObjectCapabilities, Visibility};
pub use class::{
    Availability, Class, ClassId, ClassRef, ClassState, Const, ExecError, ExecutionContext, Prop,
    PropInitVec, PropLookup, SProp, StaticCell, StaticPropAccess,
};
pub use error::{DependencyKind, ErrorKind, LinkError, LinkResult};
pub use func::{Func, FuncId};
pub use linker::{ClassResolver, Linker};
pub use names::Name;
pub use options::LinkerOptions;
pub use override_check::OverrideError;
pub use reflect::{ClassInfo, ClassKind, ConstInfo, MethodInfo, PropInfo};
pub use registry::{ClassHandle, ClassRegistry, InvalidationHook, RegistryStats, TemplateLoader};
pub use slots::{Slot, SlotMap};
pub use template::{
    ClassTemplate, ClassTemplateBuilder, ConstDecl, MethodDecl, Param, PropDecl, TemplateId,
    TraitAliasRule, TraitPrecRule,
};
pub use value::Value;
