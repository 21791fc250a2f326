//! The diagnostic message type.

use crate::code::DiagnosticCode;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single diagnostic message emitted during placement or routing.
///
/// Unlike a compiler diagnostic there is no source location; messages refer
/// to design objects (cells, bels, nets, wires) by name in the message text
/// and in the optional notes. Notes carry supplementary detail such as a
/// route backtrace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The structured code identifying this kind of diagnostic.
    pub code: DiagnosticCode,
    /// How severe this diagnostic is.
    pub severity: Severity,
    /// The primary human-readable message.
    pub message: String,
    /// Supplementary detail lines (e.g. a route backtrace).
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Creates an error-severity diagnostic.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Creates a warning-severity diagnostic.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Creates a note-severity diagnostic (progress and statistics lines).
    pub fn note(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Note,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Appends a supplementary note line.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}
