//! Opaque ID newtypes for device and netlist entities.
//!
//! All IDs are thin `u32` wrappers used as arena indices. They are `Copy`,
//! `Hash`, `Ord`, and `Serialize`/`Deserialize`. Device IDs ([`BelId`],
//! [`WireId`], [`PipId`]) index into the architecture's own tables; netlist
//! handles ([`CellId`], [`NetId`], [`RegionId`]) index the caller's arenas
//! and are treated as opaque by the architecture's binding tables.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Creates an ID from a raw `u32` index.
            pub fn from_raw(index: u32) -> Self {
                Self(index)
            }

            /// Returns the raw `u32` index.
            pub fn as_raw(self) -> u32 {
                self.0
            }

            /// Returns the raw index as a `usize`, for arena indexing.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Opaque, copyable ID for a bel (basic element of logic) in the device.
    BelId
);

define_id!(
    /// Opaque, copyable ID for a routing wire in the device.
    WireId
);

define_id!(
    /// Opaque, copyable ID for a pip (programmable interconnect point).
    PipId
);

define_id!(
    /// Opaque handle for a cell in the caller's netlist.
    CellId
);

define_id!(
    /// Opaque handle for a net in the caller's netlist.
    NetId
);

define_id!(
    /// Opaque handle for a placement region in the caller's netlist.
    RegionId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn roundtrip() {
        let id = BelId::from_raw(42);
        assert_eq!(id.as_raw(), 42);
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn equality() {
        let a = WireId::from_raw(3);
        let b = WireId::from_raw(3);
        let c = WireId::from_raw(4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_in_set() {
        let mut set = HashSet::new();
        set.insert(NetId::from_raw(1));
        set.insert(NetId::from_raw(2));
        set.insert(NetId::from_raw(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ordering() {
        assert!(PipId::from_raw(1) < PipId::from_raw(2));
    }

    #[test]
    fn serde_roundtrip() {
        let id = CellId::from_raw(55);
        let json = serde_json::to_string(&id).unwrap();
        let restored: CellId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", RegionId::from_raw(7)), "7");
    }
}
