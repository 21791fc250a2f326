//! Shared foundational types used across the Arbor place-and-route toolkit.
//!
//! This crate provides interned identifiers, the internal result type, a
//! deterministic random number generator, and a small streaming hash used for
//! state checksums.

#![warn(missing_docs)]

pub mod hash;
pub mod ident;
pub mod result;
pub mod rng;

pub use hash::Fnv1a;
pub use ident::{Ident, Interner};
pub use result::{ArborResult, InternalError};
pub use rng::DeterministicRng;
