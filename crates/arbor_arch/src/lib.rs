//! FPGA device architecture abstraction for the Arbor place-and-route toolkit.
//!
//! This crate provides the [`Architecture`] trait that the placer and router
//! consume: enumeration of bels, wires, and pips; geometry and identity
//! queries; binding of cells, wires, and pips with strengths; and timing
//! estimates. The [`grid`] module provides a synthetic grid device used by
//! tests and demos.
//!
//! # Threading
//!
//! The trait is `Send + Sync` and every method takes `&self`; architectures
//! keep their binding tables behind interior mutability (the grid device uses
//! an `RwLock`). The placer and router guarantee a single-writer discipline:
//! only the controller thread calls binding methods, while evaluator threads
//! perform read-only queries concurrently.

#![warn(missing_docs)]

pub mod grid;
pub mod ids;
pub mod types;

use arbor_common::{Fnv1a, Ident};

pub use grid::GridArch;
pub use ids::{BelId, CellId, NetId, PipId, RegionId, WireId};
pub use types::{BelPin, BindStrength, BoundingBox, Delay, Loc, PinDir, TimingPortClass};

/// The device abstraction consumed by placement and routing.
///
/// An architecture enumerates the placement sites (bels) and the routing
/// graph (wires connected by pips), answers geometry/validity/delay queries,
/// and owns the authoritative record of which cell occupies which bel and
/// which net occupies which wire or pip.
pub trait Architecture: Send + Sync {
    /// Returns the device name (e.g. a part number).
    fn device_name(&self) -> &str;

    /// Returns the grid dimensions as `(columns, rows)`.
    fn grid_dimensions(&self) -> (i32, i32);

    // --- Enumeration ---

    /// Returns all bels in the device.
    fn bels(&self) -> &[BelId];

    /// Returns all routing wires in the device.
    fn wires(&self) -> &[WireId];

    /// Returns all pips in the device.
    fn pips(&self) -> &[PipId];

    /// Returns the pips whose destination is `wire` (drivers of `wire`).
    fn pips_uphill(&self, wire: WireId) -> &[PipId];

    /// Returns the pips whose source is `wire` (driven by `wire`).
    fn pips_downhill(&self, wire: WireId) -> &[PipId];

    /// Returns the bel pins attached to `wire`.
    fn wire_bel_pins(&self, wire: WireId) -> &[BelPin];

    /// Returns the direction of `pin` on `bel`, or `None` if no such pin.
    fn bel_pin_type(&self, bel: BelId, pin: Ident) -> Option<PinDir>;

    // --- Identity and geometry ---

    /// Returns the type tag of a bel. Cells may only be placed on bels whose
    /// type equals the cell's type.
    fn bel_type(&self, bel: BelId) -> Ident;

    /// Returns the grid location of a bel.
    fn bel_location(&self, bel: BelId) -> Loc;

    /// Returns the name of a bel.
    fn bel_name(&self, bel: BelId) -> Ident;

    /// Looks up a bel by name.
    fn bel_by_name(&self, name: Ident) -> Option<BelId>;

    /// Looks up a bel by exact grid location.
    fn bel_by_location(&self, loc: Loc) -> Option<BelId>;

    /// Returns the name of a wire.
    fn wire_name(&self, wire: WireId) -> Ident;

    /// Returns the grid location of a pip.
    fn pip_location(&self, pip: PipId) -> Loc;

    /// Returns the wire driving this pip.
    fn pip_src_wire(&self, pip: PipId) -> WireId;

    /// Returns the wire this pip drives.
    fn pip_dst_wire(&self, pip: PipId) -> WireId;

    /// Returns the fabric wire attached to `pin` of `bel`, if any.
    fn bel_pin_wire(&self, bel: BelId, pin: Ident) -> Option<WireId>;

    // --- Binding ---

    /// Records that `cell` occupies `bel` with the given strength.
    fn bind_bel(&self, bel: BelId, cell: CellId, strength: BindStrength);

    /// Releases the cell bound to `bel`.
    fn unbind_bel(&self, bel: BelId);

    /// Returns the cell currently bound to `bel`, if any.
    fn bound_bel_cell(&self, bel: BelId) -> Option<CellId>;

    /// Returns the strength of the binding on `bel`.
    fn bel_bind_strength(&self, bel: BelId) -> BindStrength;

    /// Returns `true` if no cell is bound to `bel`.
    fn check_bel_avail(&self, bel: BelId) -> bool;

    /// Records that `net` occupies `wire` with the given strength.
    fn bind_wire(&self, wire: WireId, net: NetId, strength: BindStrength);

    /// Releases the net bound to `wire`.
    fn unbind_wire(&self, wire: WireId);

    /// Records that `net` uses `pip`. Also binds the pip's destination wire.
    fn bind_pip(&self, pip: PipId, net: NetId, strength: BindStrength);

    /// Releases `pip` and its destination wire.
    fn unbind_pip(&self, pip: PipId);

    /// Returns the net currently bound to `wire`, if any.
    fn bound_wire_net(&self, wire: WireId) -> Option<NetId>;

    /// Returns the net currently routed through `pip`, if any.
    fn bound_pip_net(&self, pip: PipId) -> Option<NetId>;

    /// Returns `true` if no net is bound to `wire`.
    fn check_wire_avail(&self, wire: WireId) -> bool;

    /// Returns `true` if `pip` is free and may be enabled.
    fn check_pip_avail(&self, pip: PipId) -> bool;

    /// Returns `true` if a cell of type `cell_type` may be placed on `bel`.
    fn is_valid_bel_for_cell(&self, cell_type: Ident, bel: BelId) -> bool;

    /// Checks architectural validity at `bel` given the current bindings in
    /// its neighbourhood (e.g. shared control sets within a tile).
    fn is_bel_location_valid(&self, bel: BelId) -> bool;

    /// Returns `true` if `bel` is a global buffer; nets it drives are
    /// excluded from the wirelength cost model.
    fn bel_global_buf(&self, bel: BelId) -> bool;

    // --- Delay ---

    /// Returns the delay through `pip` when enabled.
    fn pip_delay(&self, pip: PipId) -> Delay;

    /// Returns the delay along `wire`.
    fn wire_delay(&self, wire: WireId) -> Delay;

    /// Returns the architecture's delay resolution floor, added to base
    /// costs so that zero-delay resources still have positive cost.
    fn delay_epsilon(&self) -> Delay;

    /// Estimates the routing delay from `src` to `dst` without routing.
    fn estimate_delay(&self, src: WireId, dst: WireId) -> Delay;

    /// Predicts the routed delay between two placed bel pins.
    fn predict_delay(&self, src: BelPin, dst: BelPin) -> Delay;

    /// Returns the static timing class of `port` on cells of `cell_type`.
    fn port_timing_class(&self, cell_type: Ident, port: Ident) -> TimingPortClass;

    /// Returns a conservative box that routing for `src → dst` may use.
    fn route_bounding_box(&self, src: WireId, dst: WireId) -> BoundingBox;

    // --- Utilities ---

    /// Returns a checksum of the current binding state; used to verify
    /// determinism across runs.
    fn checksum(&self) -> u64;

    /// Returns a per-bel checksum folded into evaluator thread seeds.
    fn bel_checksum(&self, bel: BelId) -> u32 {
        let mut h = Fnv1a::new();
        h.write_u32(bel.as_raw());
        (h.finish() >> 32) as u32
    }

    /// Cooperative hand-off point for host UIs, honoured between
    /// iterations. The default does nothing.
    fn yield_point(&self) {}
}
