//! Diagnostic codes with category prefixes for structured identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of a diagnostic code, determining its prefix letter.
///
/// Each category maps to a single-character prefix used in diagnostic code
/// display (e.g., `P101` for a placement diagnostic, `R203` for routing).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Category {
    /// General error diagnostics, prefixed with `E`.
    Error,
    /// General warning diagnostics, prefixed with `W`.
    Warning,
    /// Placement diagnostics, prefixed with `P`.
    Placement,
    /// Routing diagnostics, prefixed with `R`.
    Routing,
    /// Timing diagnostics, prefixed with `T`.
    Timing,
}

impl Category {
    /// Returns the single-character prefix for this category.
    pub fn prefix(self) -> char {
        match self {
            Category::Error => 'E',
            Category::Warning => 'W',
            Category::Placement => 'P',
            Category::Routing => 'R',
            Category::Timing => 'T',
        }
    }
}

/// A structured diagnostic code combining a category prefix and a numeric
/// identifier.
///
/// Displayed as the category prefix followed by a zero-padded 3-digit number,
/// e.g., `P101`, `R203`, `T305`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// The category of this diagnostic.
    pub category: Category,
    /// The numeric identifier within the category.
    pub number: u16,
}

impl DiagnosticCode {
    /// Creates a new diagnostic code.
    pub fn new(category: Category, number: u16) -> Self {
        Self { category, number }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.category.prefix(), self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_prefixes() {
        assert_eq!(Category::Error.prefix(), 'E');
        assert_eq!(Category::Warning.prefix(), 'W');
        assert_eq!(Category::Placement.prefix(), 'P');
        assert_eq!(Category::Routing.prefix(), 'R');
        assert_eq!(Category::Timing.prefix(), 'T');
    }

    #[test]
    fn display_format() {
        let code = DiagnosticCode::new(Category::Placement, 101);
        assert_eq!(format!("{code}"), "P101");

        let code = DiagnosticCode::new(Category::Routing, 3);
        assert_eq!(format!("{code}"), "R003");
    }

    #[test]
    fn equality() {
        let a = DiagnosticCode::new(Category::Timing, 5);
        let b = DiagnosticCode::new(Category::Timing, 5);
        let c = DiagnosticCode::new(Category::Timing, 6);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serde_roundtrip() {
        let code = DiagnosticCode::new(Category::Routing, 42);
        let json = serde_json::to_string(&code).unwrap();
        let restored: DiagnosticCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, restored);
    }
}
