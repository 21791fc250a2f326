//! Shared data types for device architecture models.
//!
//! This module defines the value types exchanged across the [`Architecture`]
//! (crate::Architecture) trait: grid locations, timing delays, binding
//! strengths, pin directions, timing port classes, bel pins, and the
//! bounding box used throughout placement and routing.

use crate::ids::BelId;
use arbor_common::Ident;
use serde::{Deserialize, Serialize};

/// An integer location in the device grid.
///
/// `x`/`y` address a tile; `z` distinguishes bels stacked within one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Loc {
    /// Column (0-based, left to right).
    pub x: i32,
    /// Row (0-based, bottom to top).
    pub y: i32,
    /// Slot index within the tile.
    pub z: i32,
}

impl Loc {
    /// Creates a location from its components.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A timing delay with min/typical/max corners, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delay {
    /// Minimum delay (fast corner).
    pub min_ns: f64,
    /// Typical delay (nominal corner).
    pub typ_ns: f64,
    /// Maximum delay (slow corner).
    pub max_ns: f64,
}

impl Delay {
    /// A zero delay (no propagation time).
    pub const ZERO: Self = Self {
        min_ns: 0.0,
        typ_ns: 0.0,
        max_ns: 0.0,
    };

    /// Creates a new delay with the given min/typ/max values.
    pub fn new(min_ns: f64, typ_ns: f64, max_ns: f64) -> Self {
        Self {
            min_ns,
            typ_ns,
            max_ns,
        }
    }

    /// Creates a delay with all corners equal.
    pub fn flat(ns: f64) -> Self {
        Self::new(ns, ns, ns)
    }

    /// The worst-case (max corner) delay in nanoseconds. Placement and
    /// routing cost models work exclusively on this corner.
    pub fn ns(self) -> f64 {
        self.max_ns
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::ops::Add for Delay {
    type Output = Delay;

    fn add(self, rhs: Delay) -> Delay {
        Delay {
            min_ns: self.min_ns + rhs.min_ns,
            typ_ns: self.typ_ns + rhs.typ_ns,
            max_ns: self.max_ns + rhs.max_ns,
        }
    }
}

/// How firmly a cell, wire, or pip binding is held.
///
/// The placer only displaces bindings strictly weaker than
/// [`Strong`](BindStrength::Strong); [`User`](BindStrength::User) marks
/// bindings pinned by the user that nothing may move.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum BindStrength {
    /// Unbound or implicitly bound.
    #[default]
    None,
    /// A normal binding the optimiser is free to rearrange.
    Weak,
    /// A binding the optimiser must preserve (e.g. legalised chains).
    Strong,
    /// A user-pinned binding; immovable.
    User,
}

/// The direction of a port or bel pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDir {
    /// Signal flows into the cell/bel.
    Input,
    /// Signal flows out of the cell/bel.
    Output,
    /// Bidirectional.
    Inout,
}

/// Static timing classification of a cell port.
///
/// The placer's timing cost model skips arcs whose driver port is classed
/// [`Ignore`](TimingPortClass::Ignore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimingPortClass {
    /// A clock input pin.
    ClockInput,
    /// A data input captured by a register.
    RegisterInput,
    /// A registered output.
    RegisterOutput,
    /// A combinational input.
    CombInput,
    /// A combinational output.
    CombOutput,
    /// Not relevant for timing analysis.
    Ignore,
}

/// A (bel, pin) pair identifying one physical connection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BelPin {
    /// The bel.
    pub bel: BelId,
    /// The pin name on that bel.
    pub pin: Ident,
}

/// An axis-aligned inclusive bounding box over grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Leftmost column.
    pub x0: i32,
    /// Bottom row.
    pub y0: i32,
    /// Rightmost column.
    pub x1: i32,
    /// Top row.
    pub y1: i32,
}

impl BoundingBox {
    /// Creates a box from its corners.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// A degenerate box containing exactly one point.
    pub fn point(x: i32, y: i32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x,
            y1: y,
        }
    }

    /// Half-perimeter wirelength of the box.
    pub fn hpwl(&self) -> i64 {
        i64::from(self.x1 - self.x0) + i64::from(self.y1 - self.y0)
    }

    /// Whether `(x, y)` lies inside the box (inclusive).
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// Whether `(x, y)` lies on any edge of the box.
    pub fn touches_edge(&self, x: i32, y: i32) -> bool {
        x == self.x0 || x == self.x1 || y == self.y0 || y == self.y1
    }

    /// Grows the box to include `(x, y)`.
    pub fn extend(&mut self, x: i32, y: i32) {
        self.x0 = self.x0.min(x);
        self.x1 = self.x1.max(x);
        self.y0 = self.y0.min(y);
        self.y1 = self.y1.max(y);
    }

    /// Width in tiles (inclusive span).
    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    /// Height in tiles (inclusive span).
    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_add() {
        let a = Delay::new(0.1, 0.2, 0.3);
        let b = Delay::new(0.2, 0.3, 0.4);
        let c = a + b;
        assert!((c.max_ns - 0.7).abs() < 1e-12);
        assert!((c.min_ns - 0.3).abs() < 1e-12);
    }

    #[test]
    fn delay_ns_is_max_corner() {
        assert_eq!(Delay::new(0.1, 0.2, 0.3).ns(), 0.3);
        assert_eq!(Delay::flat(0.5).ns(), 0.5);
    }

    #[test]
    fn strength_ordering() {
        assert!(BindStrength::None < BindStrength::Weak);
        assert!(BindStrength::Weak < BindStrength::Strong);
        assert!(BindStrength::Strong < BindStrength::User);
    }

    #[test]
    fn bounding_box_hpwl() {
        let bb = BoundingBox::new(1, 2, 4, 6);
        assert_eq!(bb.hpwl(), 3 + 4);
        assert_eq!(BoundingBox::point(3, 3).hpwl(), 0);
    }

    #[test]
    fn bounding_box_contains() {
        let bb = BoundingBox::new(1, 1, 3, 3);
        assert!(bb.contains(1, 1));
        assert!(bb.contains(2, 3));
        assert!(!bb.contains(0, 2));
        assert!(!bb.contains(2, 4));
    }

    #[test]
    fn bounding_box_touches_edge() {
        let bb = BoundingBox::new(0, 0, 4, 4);
        assert!(bb.touches_edge(0, 2));
        assert!(bb.touches_edge(4, 1));
        assert!(bb.touches_edge(2, 0));
        assert!(!bb.touches_edge(2, 2));
    }

    #[test]
    fn bounding_box_extend() {
        let mut bb = BoundingBox::point(2, 2);
        bb.extend(5, 1);
        assert_eq!(bb, BoundingBox::new(2, 1, 5, 2));
        bb.extend(0, 7);
        assert_eq!(bb, BoundingBox::new(0, 1, 5, 7));
    }

    #[test]
    fn loc_new() {
        let l = Loc::new(1, 2, 3);
        assert_eq!((l.x, l.y, l.z), (1, 2, 3));
    }

    #[test]
    fn serde_roundtrip() {
        let bb = BoundingBox::new(0, 1, 2, 3);
        let json = serde_json::to_string(&bb).unwrap();
        let restored: BoundingBox = serde_json::from_str(&json).unwrap();
        assert_eq!(bb, restored);
    }
}
