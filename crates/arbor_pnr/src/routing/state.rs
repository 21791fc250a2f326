//! Soft routing state: per-net, per-arc, and per-wire bookkeeping.
//!
//! The negotiated router allows overlap while it iterates, so the
//! architecture's binding tables cannot hold the working state; each wire
//! instead carries a ref-counted `bound_nets` table together with its
//! historical congestion cost, and each arc records its wire→driving-pip
//! tree. Only when no wire is overused does the controller commit the trees
//! into the architecture.

use arbor_arch::{BoundingBox, PipId, WireId};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Routing state of one arc (driver→user connection).
#[derive(Debug)]
pub(crate) struct PerArcData {
    /// The arc's tree: each wire and the pip driving it (`None` at source).
    pub wires: HashMap<WireId, Option<PipId>>,
    /// Box the arc's search is confined to (plus margin).
    pub bb: BoundingBox,
    /// The sink wire of this arc.
    pub dst_wire: WireId,
}

/// Immutable per-net geometry computed at router entry.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NetGeom {
    /// Union of the arcs' boxes.
    pub bb: BoundingBox,
    /// Centroid of driver and users, for the bias cost.
    pub cx: i32,
    /// Centroid of driver and users, for the bias cost.
    pub cy: i32,
    /// Net half-perimeter, floored at 1.
    pub hpwl: i32,
    /// The net's source wire, if it has a placed driver.
    pub src_wire: Option<WireId>,
    /// Number of users.
    pub fanout: usize,
}

/// Soft binding state of one wire.
#[derive(Debug)]
pub(crate) struct PerWireData {
    /// net udata → (ref count, driving pip).
    pub bound_nets: HashMap<u32, (u32, Option<PipId>)>,
    /// Historical congestion cost, grown every overused iteration.
    pub hist_cong_cost: f32,
    /// Wire is locked to something stronger than the router may touch.
    pub unavailable: bool,
    /// Wire must stay available to this net (unique sink/source approach).
    pub reserved_net: Option<u32>,
}

impl Default for PerWireData {
    fn default() -> Self {
        Self {
            bound_nets: HashMap::new(),
            hist_cong_cost: 1.0,
            unavailable: false,
            reserved_net: None,
        }
    }
}

/// Partial path cost of a queued wire.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WireScore {
    /// Congestion-weighted cost from the source.
    pub cost: f32,
    /// Estimated remaining cost to the sink.
    pub togo_cost: f32,
    /// Accumulated real delay from the source, in nanoseconds.
    pub delay: f64,
}

impl WireScore {
    pub fn total(&self) -> f32 {
        self.cost + self.togo_cost
    }
}

/// Outcome of routing one arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArcRouteResult {
    Success,
    /// Forward search exhausted its budget inside the bounding box.
    RetryWithoutBb,
    /// Irrecoverable; only reported on the single-threaded pass.
    Fatal,
}

/// Priority-queue entry for the forward A* search.
///
/// Ordered so that a `BinaryHeap` pops the lowest `cost + togo_cost` first,
/// with a random tag breaking ties to diversify equal-cost path choices.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueuedWire {
    pub wire: WireId,
    pub pip: Option<PipId>,
    pub score: WireScore,
    pub randtag: u32,
}

impl PartialEq for QueuedWire {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedWire {}

impl Ord for QueuedWire {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we want the cheapest wire.
        other
            .score
            .total()
            .partial_cmp(&self.score.total())
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.randtag.cmp(&self.randtag))
    }
}

impl PartialOrd for QueuedWire {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
