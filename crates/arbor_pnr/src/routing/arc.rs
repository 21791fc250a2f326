//! Per-arc routing: bounded backwards BFS seeding, then forward A*.
//!
//! The backwards pass walks uphill from the sink for a handful of
//! expansions; sinks with a short dedicated approach (or an existing
//! uncontested route to tack onto) resolve here without touching the
//! priority queue. Everything else goes through congestion-weighted A*
//! confined to the arc's bounding box.

use crate::data::Netlist;
use crate::error::{PnrError, PnrResult};
use crate::routing::state::{ArcRouteResult, PerArcData, QueuedWire, WireScore};
use crate::routing::Router;
use arbor_arch::{Architecture, BindStrength, Loc, NetId, PipId, WireId};
use arbor_common::DeterministicRng;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Weight applied to the remaining-cost estimate during forward expansion;
/// trades admissibility for speed.
const TOGO_WEIGHT: f32 = 1.75;

pub(crate) struct VisitInfo {
    pub score: WireScore,
    pub pip: Option<PipId>,
}

/// Scratch state owned by one routing thread.
pub(crate) struct ThreadContext {
    pub queue: BinaryHeap<QueuedWire>,
    pub visited: HashMap<WireId, VisitInfo>,
    pub backwards_queue: VecDeque<WireId>,
    pub backwards_pip: HashMap<WireId, PipId>,
    /// Physical sinks already reached this pass (several logical arcs may
    /// share one sink wire).
    pub processed_sinks: HashSet<WireId>,
    pub route_arcs: Vec<usize>,
    pub rng: DeterministicRng,
}

impl ThreadContext {
    pub fn new(seed: u64) -> Self {
        Self {
            queue: BinaryHeap::new(),
            visited: HashMap::new(),
            backwards_queue: VecDeque::new(),
            backwards_pip: HashMap::new(),
            processed_sinks: HashSet::new(),
            route_arcs: Vec::new(),
            rng: DeterministicRng::new(seed),
        }
    }
}

impl<'a> Router<'a> {
    /// Soft-binds `wire` into the arc's tree, ref-counting the wire's use
    /// by this net and recording the driving pip.
    pub(crate) fn bind_pip_internal(
        &self,
        ud: u32,
        arcs: &mut [PerArcData],
        user: usize,
        wire: WireId,
        pip: Option<PipId>,
    ) {
        {
            let mut wd = self.wire(wire);
            let b = wd.bound_nets.entry(ud).or_insert((0, None));
            b.0 += 1;
            if b.0 == 1 {
                b.1 = pip;
            } else {
                debug_assert_eq!(b.1, pip);
            }
        }
        arcs[user].wires.insert(wire, pip);
    }

    /// Releases one wire of the arc, dropping the net's ref count.
    pub(crate) fn unbind_pip_internal(
        &self,
        ud: u32,
        arcs: &mut [PerArcData],
        user: usize,
        wire: WireId,
        dont_touch_arc: bool,
    ) {
        {
            let mut wd = self.wire(wire);
            if let Some(b) = wd.bound_nets.get_mut(&ud) {
                b.0 -= 1;
                if b.0 == 0 {
                    wd.bound_nets.remove(&ud);
                }
            }
        }
        if !dont_touch_arc {
            arcs[user].wires.remove(&wire);
        }
    }

    /// Releases the whole arc tree.
    pub(crate) fn ripup_arc(&self, ud: u32, user: usize, arcs: &mut [PerArcData]) {
        let wires: Vec<WireId> = arcs[user].wires.keys().copied().collect();
        for wire in wires {
            self.unbind_pip_internal(ud, arcs, user, wire, true);
        }
        arcs[user].wires.clear();
    }

    /// Whether the arc's recorded tree is a sole-occupant path to source.
    pub(crate) fn check_arc_routing(&self, src: Option<WireId>, ad: &PerArcData) -> bool {
        let mut cursor = ad.dst_wire;
        while let Some(&pip) = ad.wires.get(&cursor) {
            if self.wire(cursor).bound_nets.len() != 1 {
                return false;
            }
            match pip {
                None => break,
                Some(p) => cursor = self.arch.pip_src_wire(p),
            }
        }
        src == Some(cursor)
    }

    fn hit_test_pip(&self, bb: &arbor_arch::BoundingBox, l: Loc) -> bool {
        l.x >= bb.x0 - self.cfg.bb_margin_x
            && l.x <= bb.x1 + self.cfg.bb_margin_x
            && l.y >= bb.y0 - self.cfg.bb_margin_y
            && l.y <= bb.y1 + self.cfg.bb_margin_y
    }

    /// Congestion-weighted cost of entering `wire` through `pip`.
    pub(crate) fn score_wire_for_arc(
        &self,
        ud: u32,
        wire: WireId,
        pip: Option<PipId>,
    ) -> f32 {
        let nd = &self.geom[ud as usize];
        let base_delay = match pip {
            Some(p) => self.arch.pip_delay(p) + self.arch.wire_delay(wire),
            None => self.arch.wire_delay(wire),
        } + self.arch.delay_epsilon();
        let base_cost = base_delay.ns() as f32;
        let (present_cost, hist_cost, source_uses) = {
            let wd = self.wire(wire);
            let mut others = wd.bound_nets.len();
            if wd.bound_nets.contains_key(&ud) {
                others -= 1;
            }
            let present = if others == 0 {
                1.0
            } else {
                1.0 + others as f32 * self.curr_cong_weight
            };
            let uses = wd.bound_nets.get(&ud).map_or(0, |b| b.0);
            (present, wd.hist_cong_cost, uses)
        };
        let mut bias_cost = 0.0;
        if let Some(p) = pip {
            let pl = self.arch.pip_location(p);
            bias_cost = 0.5 * (base_cost / nd.fanout.max(1) as f32)
                * (((pl.x - nd.cx).abs() + (pl.y - nd.cy).abs()) as f32 / nd.hpwl as f32);
        }
        base_cost * hist_cost * present_cost / (1 + source_uses) as f32 + bias_cost
    }

    /// Estimated remaining cost from `wire` to `sink`, discounted by how
    /// much of the net's existing fan-out already runs through `wire`.
    pub(crate) fn get_togo_cost(&self, ud: u32, wire: WireId, sink: WireId) -> f32 {
        let source_uses = self.wire(wire).bound_nets.get(&ud).map_or(0, |b| b.0);
        let ipin_cost = (self.arch.wire_delay(sink) + self.arch.delay_epsilon()).ns() as f32;
        let est = self.arch.estimate_delay(wire, sink).ns() as f32;
        (est - ipin_cost).max(0.0) / (1 + source_uses) as f32 + ipin_cost
    }

    /// Routes one arc; see module docs for the two phases.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn route_arc(
        &self,
        t: &mut ThreadContext,
        net_id: NetId,
        ud: u32,
        arcs: &mut [PerArcData],
        i: usize,
        is_bb: bool,
    ) -> ArcRouteResult {
        let Some(src_wire) = self.geom[ud as usize].src_wire else {
            return ArcRouteResult::Fatal;
        };
        let dst_wire = arcs[i].dst_wire;

        if t.processed_sinks.contains(&dst_wire) {
            return ArcRouteResult::Success;
        }

        t.queue.clear();
        t.backwards_queue.clear();
        t.backwards_pip.clear();

        // Phase 1: strongly iteration-limited backwards BFS. This deals
        // with dedicated sink approaches faster than forward A* would, at
        // minimal cost for everything else.
        let backwards_limit = self.cfg.backwards_limit;
        let mut backwards_iter = 0usize;
        t.backwards_queue.push_back(dst_wire);
        while backwards_iter < backwards_limit {
            let Some(cursor) = t.backwards_queue.pop_front() else {
                break;
            };
            let mut cpip: Option<PipId> = None;
            if let Some((_, bound_pip)) = self.wire_bound(cursor, ud) {
                // Tack onto existing routing, but only if it is uncontested
                // all the way back to the source.
                let mut cursor2 = cursor;
                let mut merge_fail = false;
                loop {
                    let pip = {
                        let wd = self.wire(cursor2);
                        let Some(&(_, p)) = wd.bound_nets.get(&ud) else {
                            break;
                        };
                        if wd.bound_nets.len() > 1 {
                            merge_fail = true;
                            break;
                        }
                        p
                    };
                    let Some(p) = pip else { break };
                    cursor2 = self.arch.pip_src_wire(p);
                }
                if !merge_fail && cursor2 == src_wire {
                    let mut cursor2 = cursor;
                    loop {
                        let Some((_, pip)) = self.wire_bound(cursor2, ud) else {
                            break;
                        };
                        let Some(p) = pip else { break };
                        cursor2 = self.arch.pip_src_wire(p);
                        t.backwards_pip.insert(cursor2, p);
                    }
                    break;
                }
                cpip = bound_pip;
            }
            let mut did_something = false;
            for &uh in self.arch.pips_uphill(cursor) {
                did_something = true;
                if !self.arch.check_pip_avail(uh) && self.arch.bound_pip_net(uh) != Some(net_id)
                {
                    continue;
                }
                if let Some(cp) = cpip {
                    // A wire may only have one driving pip per net.
                    if cp != uh {
                        continue;
                    }
                }
                let next = self.arch.pip_src_wire(uh);
                if t.backwards_pip.contains_key(&next) {
                    continue;
                }
                let usable = {
                    let wd = self.wire(next);
                    !wd.unavailable
                        && wd.reserved_net.map_or(true, |r| r == ud)
                        // Never create congestion while routing backwards.
                        && (wd.bound_nets.is_empty()
                            || (wd.bound_nets.len() == 1 && wd.bound_nets.contains_key(&ud)))
                };
                if !usable {
                    continue;
                }
                t.backwards_queue.push_back(next);
                t.backwards_pip.insert(next, uh);
            }
            if did_something {
                backwards_iter += 1;
            }
        }

        if t.backwards_pip.contains_key(&src_wire) {
            let mut cursor_fwd = src_wire;
            self.bind_pip_internal(ud, arcs, i, src_wire, None);
            while let Some(&p) = t.backwards_pip.get(&cursor_fwd) {
                cursor_fwd = self.arch.pip_dst_wire(p);
                self.bind_pip_internal(ud, arcs, i, cursor_fwd, Some(p));
            }
            debug_assert_eq!(cursor_fwd, dst_wire);
            t.processed_sinks.insert(dst_wire);
            return ArcRouteResult::Success;
        }

        // Phase 2: forward A*.
        t.visited.clear();
        let base_score = WireScore {
            cost: 0.0,
            togo_cost: self.get_togo_cost(ud, src_wire, dst_wire),
            delay: self.arch.wire_delay(src_wire).ns(),
        };
        t.queue.push(QueuedWire {
            wire: src_wire,
            pip: None,
            score: base_score,
            randtag: 0,
        });
        t.visited.insert(
            src_wire,
            VisitInfo {
                score: base_score,
                pip: None,
            },
        );

        let bb = arcs[i].bb;
        let mut toexplore = self.cfg.astar_budget_factor
            * (((bb.x1 - bb.x0) + (bb.y1 - bb.y0)) as i64).max(1);
        let mut iter: i64 = 0;
        while !is_bb || iter < toexplore {
            let Some(curr) = t.queue.pop() else {
                break;
            };
            iter += 1;
            for &dh in self.arch.pips_downhill(curr.wire) {
                if is_bb && !self.hit_test_pip(&bb, self.arch.pip_location(dh)) {
                    continue;
                }
                if !self.arch.check_pip_avail(dh) && self.arch.bound_pip_net(dh) != Some(net_id)
                {
                    continue;
                }
                let next = self.arch.pip_dst_wire(dh);
                let usable = {
                    let wd = self.wire(next);
                    !wd.unavailable
                        && wd.reserved_net.map_or(true, |r| r == ud)
                        && wd.bound_nets.get(&ud).map_or(true, |&(_, p)| p == Some(dh))
                };
                if !usable {
                    continue;
                }
                let next_score = WireScore {
                    cost: curr.score.cost + self.score_wire_for_arc(ud, next, Some(dh)),
                    togo_cost: TOGO_WEIGHT * self.get_togo_cost(ud, next, dst_wire),
                    delay: curr.score.delay
                        + (self.arch.pip_delay(dh) + self.arch.wire_delay(next)).ns(),
                };
                let better = match t.visited.get(&next) {
                    Some(v) => v.score.total() > next_score.total(),
                    None => true,
                };
                if better {
                    t.queue.push(QueuedWire {
                        wire: next,
                        pip: Some(dh),
                        score: next_score,
                        randtag: (t.rng.rng64() & 0x3FFF_FFFF) as u32,
                    });
                    t.visited.insert(
                        next,
                        VisitInfo {
                            score: next_score,
                            pip: Some(dh),
                        },
                    );
                    if next == dst_wire {
                        // Sink reached: drain a few more pops, then stop.
                        toexplore = toexplore.min(iter + 5);
                    }
                }
            }
        }

        if t.visited.contains_key(&dst_wire) {
            let mut cursor_bwd = dst_wire;
            loop {
                let Some(v) = t.visited.get(&cursor_bwd) else {
                    break;
                };
                let pip = v.pip;
                self.bind_pip_internal(ud, arcs, i, cursor_bwd, pip);
                match pip {
                    None => {
                        debug_assert_eq!(cursor_bwd, src_wire);
                        break;
                    }
                    Some(p) => cursor_bwd = self.arch.pip_src_wire(p),
                }
            }
            t.processed_sinks.insert(dst_wire);
            ArcRouteResult::Success
        } else {
            ArcRouteResult::RetryWithoutBb
        }
    }

    /// Routes every dirty arc of a net. In multi-threaded mode failures are
    /// reported back for a single-threaded retry; in single-threaded mode a
    /// bounding-box failure retries unbounded and an irrecoverable arc is a
    /// hard error.
    pub(crate) fn route_net(
        &self,
        netlist: &Netlist,
        t: &mut ThreadContext,
        ud: u32,
        is_mt: bool,
    ) -> PnrResult<bool> {
        let net_id = self.nets_by_udata[ud as usize];
        let net = netlist.net(net_id);
        if net.is_global || net.driver.is_none() {
            return Ok(true);
        }

        t.processed_sinks.clear();
        t.route_arcs.clear();
        let arcs_mutex = &self.arcs[ud as usize];
        let mut arcs = arcs_mutex.lock().unwrap();
        let src = self.geom[ud as usize].src_wire;
        for i in 0..net.users.len() {
            if self.check_arc_routing(src, &arcs[i]) {
                continue;
            }
            // Arcs pre-routed stronger than the router may touch stay as-is.
            let dst = arcs[i].dst_wire;
            if net
                .wires
                .get(&dst)
                .is_some_and(|nw| nw.strength > BindStrength::Strong)
            {
                continue;
            }
            self.ripup_arc(ud, i, &mut arcs);
            t.route_arcs.push(i);
        }

        let mut have_failures = false;
        let route_arcs = std::mem::take(&mut t.route_arcs);
        for &i in &route_arcs {
            match self.route_arc(t, net_id, ud, &mut arcs, i, true) {
                ArcRouteResult::Success => {}
                ArcRouteResult::Fatal => {
                    if is_mt {
                        return Ok(false);
                    }
                    return Err(self.unroutable(netlist, ud, i, &arcs));
                }
                ArcRouteResult::RetryWithoutBb => {
                    if is_mt {
                        // Can't leave the bounding box while partitioned.
                        have_failures = true;
                    } else {
                        let res = self.route_arc(t, net_id, ud, &mut arcs, i, false);
                        if res != ArcRouteResult::Success {
                            return Err(self.unroutable(netlist, ud, i, &arcs));
                        }
                    }
                }
            }
        }
        t.route_arcs = route_arcs;
        Ok(!have_failures)
    }

    fn unroutable(
        &self,
        netlist: &Netlist,
        ud: u32,
        arc: usize,
        arcs: &[PerArcData],
    ) -> PnrError {
        let net = netlist.net(self.nets_by_udata[ud as usize]);
        let from = match self.geom[ud as usize].src_wire {
            Some(w) => self.interner.resolve(self.arch.wire_name(w)).to_string(),
            None => "<no source>".to_string(),
        };
        PnrError::Unroutable {
            net: self.interner.resolve(net.name).to_string(),
            arc,
            from,
            to: self
                .interner
                .resolve(self.arch.wire_name(arcs[arc].dst_wire))
                .to_string(),
        }
    }
}
