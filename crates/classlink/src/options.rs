//! Linker configuration
//!
//! Read from a TOML document such as:
//!
//! ```toml
//! mock_attribute = "__MockClass"
//! named_constructors = false
//! ```

use serde::{Deserialize, Serialize};

/// Switches that change how classes are linked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LinkerOptions {
    /// User attribute that lets a class extend a final parent or override a
    /// final method (default: "__MockClass")
    pub mock_attribute: String,

    /// Fall back to a method named like the class when there is no
    /// `__construct`
    pub named_constructors: bool,

    /// Let dependency resolution invoke the template loader
    pub autoload: bool,

    /// Enforce parameter compatibility between overriding methods
    pub check_signatures: bool,
}

fn default_mock_attribute() -> String {
    "__MockClass".to_string()
}

impl Default for LinkerOptions {
    fn default() -> Self {
        Self {
            mock_attribute: default_mock_attribute(),
            named_constructors: true,
            autoload: true,
            check_signatures: true,
        }
    }
}

impl LinkerOptions {
    /// Parse options from TOML; omitted keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
