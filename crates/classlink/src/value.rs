//! Default and constant values
//!
//! The linker only needs the subset of the runtime's value model that can
//! appear in declarations: scalars, literal arrays, and the `Uninit` marker
//! for initializers that must run user code.

use crate::names::Name;
use serde::Serialize;
use std::fmt;

/// Declared default or constant value
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// Not computable at compile time; filled in by an initializer
    #[default]
    Uninit,
    /// `null`
    Null,
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Int(i64),
    /// Floating-point literal
    Double(f64),
    /// String literal
    Str(Name),
    /// Literal array of values
    Array(Vec<Value>),
}

impl Value {
    /// Whether the value still needs an initializer to run
    pub fn is_uninit(&self) -> bool {
        matches!(self, Value::Uninit)
    }

    /// Two trait property defaults are compatible when they are the same
    /// scalar. Anything non-scalar is never considered compatible, since the
    /// initializers may produce different values.
    pub fn compatible_trait_init(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Double(x), Value::Double(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uninit => f.write_str("<uninit>"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}
