//! Identifier categories.

use std::fmt;

/// The class of principal an identifier names.
///
/// Each category has its own limits, and counters of different categories
/// never share a key even when the identifier strings are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Identified by client network address
    Ip,
    /// Identified by API token
    Token,
}

impl Category {
    /// Short name used in store keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ip => "ip",
            Category::Token => "token",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
