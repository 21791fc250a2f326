//! Simulated-annealing placement and negotiated-congestion routing.
//!
//! This crate is the physical-design core of the Arbor toolkit. Given a
//! flat [`Netlist`] and a device exposed through the
//! [`Architecture`](arbor_arch::Architecture) trait, it assigns every cell
//! to a legal bel of matching type and realises every net as a tree of
//! wires and pips, committed back into the architecture's binding tables.
//!
//! # Pipeline
//!
//! 1. **Place**: constraint pass, deterministic random initial placement,
//!    parallel simulated-annealing refinement ([`placement`]).
//! 2. **Route**: negotiated-congestion routing with rip-up-and-reroute
//!    ([`routing`]), or the simple fallback router ([`routing::simple`]).
//!
//! # Usage
//!
//! ```ignore
//! use arbor_pnr::{place_and_route, PlacerConfig, RouterConfig};
//!
//! place_and_route(&mut netlist, &arch, &PlacerConfig::default(),
//!                 &RouterConfig::default(), &timing, &interner, &sink)?;
//! assert!(netlist.is_fully_placed());
//! assert!(netlist.is_fully_routed());
//! ```

#![warn(missing_docs)]

pub mod data;
pub mod error;
pub mod placement;
pub mod routing;
pub mod timing;

pub use data::{Cell, Net, NetWire, Netlist, Port, PortRef, Region};
pub use error::{PnrError, PnrResult};
pub use placement::{parallel_refine, place, PlacerConfig};
pub use routing::simple::SimpleRouterConfig;
pub use routing::{route, RouterConfig};
pub use timing::{FanoutEstimator, NetCriticality, NetCriticalityMap, TimingEstimator};

use arbor_arch::Architecture;
use arbor_common::Interner;
use arbor_diagnostics::DiagnosticSink;

/// Performs the complete place-and-route pipeline on a netlist.
///
/// Places all cells with the annealing placer, then routes all nets with
/// the negotiated-congestion router. On success the netlist is fully
/// placed and routed and the architecture holds the committed bindings.
#[allow(clippy::too_many_arguments)]
pub fn place_and_route(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    placer_cfg: &PlacerConfig,
    router_cfg: &RouterConfig,
    timing: &dyn TimingEstimator,
    interner: &Interner,
    sink: &DiagnosticSink,
) -> PnrResult<()> {
    place(netlist, arch, placer_cfg, timing, interner, sink)?;
    route(netlist, arch, router_cfg, interner, sink)?;
    Ok(())
}
