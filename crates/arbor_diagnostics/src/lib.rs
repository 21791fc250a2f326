//! Diagnostics for the Arbor place-and-route toolkit.
//!
//! Placement and routing run for many iterations and across many threads;
//! this crate provides the structured messages they emit: a [`Diagnostic`]
//! with a [`Severity`] and a [`DiagnosticCode`], accumulated in a
//! thread-safe [`DiagnosticSink`]. Progress statistics (per-iteration
//! temperature, wirelength, congestion counts) are emitted as note-severity
//! diagnostics so hosts can render or discard them uniformly.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use severity::Severity;
pub use sink::DiagnosticSink;
