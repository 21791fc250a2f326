//! Negotiated-congestion routing.
//!
//! The router realises every net as a tree of wires and pips. It first
//! routes with overlap allowed, tracking per-wire use in soft state; after
//! each pass every overused wire's historical cost grows and the nets
//! crossing it are re-queued, with the present-congestion weight doubling
//! each iteration, until no wire is shared. Only then are the trees
//! committed through the architecture's binding API, and any arc the arch
//! refuses is ripped up and re-queued.
//!
//! Spatially disjoint quadrants of the device are routed on worker threads
//! under strict bounding boxes; nets crossing the partition boundary, and
//! any worker failure, re-route single-threaded where the bounding box may
//! be lifted.
//!
//! A first-generation rip-up router is kept in [`simple`] as a fallback.

pub(crate) mod arc;
pub mod simple;
pub(crate) mod state;

use crate::data::Netlist;
use crate::error::{PnrError, PnrResult};
use arbor_arch::{Architecture, BindStrength, BoundingBox, NetId, PipId, WireId};
use arbor_common::{DeterministicRng, Interner};
use arbor_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink};
use self::arc::ThreadContext;
use self::state::{NetGeom, PerArcData, PerWireData};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

/// Worker threads in the partitioned phase; one per device quadrant.
const ROUTE_WORKERS: usize = 4;

fn code(n: u16) -> DiagnosticCode {
    DiagnosticCode::new(Category::Routing, n)
}

/// Configuration for the negotiated-congestion router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Initial present-congestion weight; doubles each outer iteration.
    pub curr_cong_weight: f32,
    /// Historical cost added per unit of overuse per iteration.
    pub hist_cong_weight: f32,
    /// Horizontal slack outside an arc's bounding box.
    pub bb_margin_x: i32,
    /// Vertical slack outside an arc's bounding box.
    pub bb_margin_y: i32,
    /// Expansion budget of the backwards BFS seed.
    pub backwards_limit: usize,
    /// Forward A* iteration budget per unit of bounding-box perimeter.
    pub astar_budget_factor: i64,
    /// Enable the partitioned multi-threaded phase.
    pub threads: usize,
    /// Queue size below which everything routes single-threaded.
    pub mt_min_nets: usize,
    /// Seed for the deterministic rng.
    pub seed: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            curr_cong_weight: 0.5,
            hist_cong_weight: 1.0,
            bb_margin_x: 4,
            bb_margin_y: 4,
            backwards_limit: 10,
            astar_budget_factor: 25_000,
            threads: ROUTE_WORKERS,
            mt_min_nets: 200,
            seed: 0x4142_4F52_5F52_5432,
        }
    }
}

pub(crate) struct Router<'a> {
    pub arch: &'a dyn Architecture,
    pub cfg: &'a RouterConfig,
    pub interner: &'a Interner,
    pub sink: &'a DiagnosticSink,
    pub nets_by_udata: Vec<NetId>,
    pub geom: Vec<NetGeom>,
    pub arcs: Vec<Mutex<Vec<PerArcData>>>,
    pub wires: HashMap<WireId, Mutex<PerWireData>>,
    pub curr_cong_weight: f32,
    mid_x: i32,
    mid_y: i32,
    pub total_wire_use: usize,
    pub overused_wires: usize,
    pub total_overuse: usize,
    pub arch_fail: usize,
    pub failed_nets: BTreeSet<u32>,
}

impl<'a> Router<'a> {
    pub fn new(
        netlist: &Netlist,
        arch: &'a dyn Architecture,
        cfg: &'a RouterConfig,
        interner: &'a Interner,
        sink: &'a DiagnosticSink,
    ) -> PnrResult<Self> {
        let mut router = Self {
            arch,
            cfg,
            interner,
            sink,
            nets_by_udata: netlist.nets.iter().map(|n| n.id).collect(),
            geom: Vec::new(),
            arcs: Vec::new(),
            wires: HashMap::new(),
            curr_cong_weight: cfg.curr_cong_weight,
            mid_x: 0,
            mid_y: 0,
            total_wire_use: 0,
            overused_wires: 0,
            total_overuse: 0,
            arch_fail: 0,
            failed_nets: BTreeSet::new(),
        };
        router.setup_nets(netlist)?;
        router.setup_wires(netlist);
        Ok(router)
    }

    fn setup_nets(&mut self, netlist: &Netlist) -> PnrResult<()> {
        for net in &netlist.nets {
            let src_wire = netlist.source_wire(self.arch, self.interner, net)?;
            let mut geom = NetGeom {
                src_wire,
                fanout: net.users.len(),
                ..NetGeom::default()
            };
            let mut bb: Option<BoundingBox> = None;
            let mut cx = 0i64;
            let mut cy = 0i64;
            if let Some(driver) = &net.driver {
                if let Some(bel) = netlist.cell(driver.cell).bel {
                    let loc = self.arch.bel_location(bel);
                    cx += i64::from(loc.x);
                    cy += i64::from(loc.y);
                }
            }
            let mut arcs = Vec::with_capacity(net.users.len());
            for user in &net.users {
                let missing_pin = || PnrError::MissingPinWire {
                    cell: self
                        .interner
                        .resolve(netlist.cell(user.cell).name)
                        .to_string(),
                    port: self.interner.resolve(user.port).to_string(),
                };
                let Some(ubel) = netlist.cell(user.cell).bel else {
                    return Err(missing_pin());
                };
                let Some(dst_wire) = netlist.sink_wire(self.arch, self.interner, user)? else {
                    return Err(missing_pin());
                };
                let arc_bb = self
                    .arch
                    .route_bounding_box(src_wire.unwrap_or(dst_wire), dst_wire);
                match &mut bb {
                    Some(bb) => {
                        bb.extend(arc_bb.x0, arc_bb.y0);
                        bb.extend(arc_bb.x1, arc_bb.y1);
                    }
                    None => bb = Some(arc_bb),
                }
                let uloc = self.arch.bel_location(ubel);
                cx += i64::from(uloc.x);
                cy += i64::from(uloc.y);
                arcs.push(PerArcData {
                    wires: HashMap::new(),
                    bb: arc_bb,
                    dst_wire,
                });
            }
            let bb = bb.unwrap_or_default();
            geom.bb = bb;
            geom.hpwl = ((bb.x1 - bb.x0).abs() + (bb.y1 - bb.y0).abs()).max(1);
            let endpoints = net.users.len() as i64 + 1;
            geom.cx = (cx / endpoints) as i32;
            geom.cy = (cy / endpoints) as i32;
            self.geom.push(geom);
            self.arcs.push(Mutex::new(arcs));
        }
        Ok(())
    }

    fn setup_wires(&mut self, netlist: &Netlist) {
        for &wire in self.arch.wires() {
            let mut wd = PerWireData::default();
            if let Some(bound) = self.arch.bound_wire_net(wire) {
                let net = netlist.net(bound);
                if let Some(nw) = net.wires.get(&wire) {
                    wd.bound_nets.insert(net.udata, (1, nw.pip));
                    if nw.strength > BindStrength::Strong {
                        wd.unavailable = true;
                    }
                }
            }
            self.wires.insert(wire, Mutex::new(wd));
        }
    }

    pub(crate) fn wire(&self, wire: WireId) -> MutexGuard<'_, PerWireData> {
        self.wires[&wire].lock().unwrap()
    }

    pub(crate) fn wire_bound(&self, wire: WireId, ud: u32) -> Option<(u32, Option<PipId>)> {
        self.wire(wire).bound_nets.get(&ud).copied()
    }

    /// A wire with no output bel pin and no uphill pip can never be driven.
    fn is_wire_undriveable(&self, wire: WireId) -> bool {
        for bp in self.arch.wire_bel_pins(wire) {
            if self.arch.bel_pin_type(bp.bel, bp.pin) != Some(arbor_arch::PinDir::Input) {
                return false;
            }
        }
        self.arch.pips_uphill(wire).is_empty()
    }

    /// Walks uphill from one sink; every wire on the unique approach is
    /// reserved so other nets cannot poach it. Handles "diamonds" by
    /// stopping at the first branch point.
    fn reserve_wires_for_arc(&self, ud: u32, arc: usize) {
        let src = self.geom[ud as usize].src_wire;
        let sink = self.arcs[ud as usize].lock().unwrap()[arc].dst_wire;
        let mut cursor = sink;
        loop {
            self.wire(cursor).reserved_net = Some(ud);
            if Some(cursor) == src {
                break;
            }
            let mut next_cursor = None;
            let mut branched = false;
            for &uh in self.arch.pips_uphill(cursor) {
                let w = self.arch.pip_src_wire(uh);
                if self.is_wire_undriveable(w) {
                    continue;
                }
                if next_cursor.is_some() {
                    branched = true;
                    break;
                }
                next_cursor = Some(w);
            }
            match next_cursor {
                Some(next) if !branched => cursor = next,
                _ => break,
            }
        }
    }

    pub fn find_all_reserved_wires(&self) {
        for ud in 0..self.nets_by_udata.len() {
            if self.geom[ud].src_wire.is_none() {
                continue;
            }
            let arcs = self.arcs[ud].lock().unwrap().len();
            for i in 0..arcs {
                self.reserve_wires_for_arc(ud as u32, i);
            }
        }
    }

    /// Finds the median split point used by the partitioned phase.
    pub fn partition_nets(&mut self) {
        let mut cxs: BTreeMap<i32, usize> = BTreeMap::new();
        let mut cys: BTreeMap<i32, usize> = BTreeMap::new();
        for g in &self.geom {
            *cxs.entry(g.cx).or_insert(0) += 1;
            *cys.entry(g.cy).or_insert(0) += 1;
        }
        let halfway = self.geom.len() / 2;
        let mut accum = 0;
        for (&x, &count) in &cxs {
            if accum < halfway && accum + count >= halfway {
                self.mid_x = x;
            }
            accum += count;
        }
        accum = 0;
        for (&y, &count) in &cys {
            if accum < halfway && accum + count >= halfway {
                self.mid_y = y;
            }
            accum += count;
        }
        self.sink.note(
            code(1),
            format!("x splitpoint: {}, y splitpoint: {}", self.mid_x, self.mid_y),
        );
        let mut bins = [0usize; 5];
        for g in &self.geom {
            bins[self.bin_for(&g.bb, 0, 0)] += 1;
        }
        for (i, n) in bins.iter().enumerate() {
            self.sink.note(code(2), format!("bin {i} N={n}"));
        }
    }

    fn bin_for(&self, bb: &BoundingBox, margin_x: i32, margin_y: i32) -> usize {
        let le_x = self.mid_x - margin_x;
        let rs_x = self.mid_x + margin_x;
        let le_y = self.mid_y - margin_y;
        let rs_y = self.mid_y + margin_y;
        if bb.x0 < le_x && bb.x1 < le_x && bb.y0 < le_y && bb.y1 < le_y {
            0
        } else if bb.x0 >= rs_x && bb.x1 >= rs_x && bb.y0 < le_y && bb.y1 < le_y {
            1
        } else if bb.x0 < le_x && bb.x1 < le_x && bb.y0 >= rs_y && bb.y1 >= rs_y {
            2
        } else if bb.x0 >= rs_x && bb.x1 >= rs_x && bb.y0 >= rs_y && bb.y1 >= rs_y {
            3
        } else {
            4
        }
    }

    /// Routes the queue: partitioned worker threads on the quadrant bins,
    /// then the cross-boundary bin and all worker failures single-threaded.
    pub fn do_route(
        &self,
        netlist: &Netlist,
        queue: &[u32],
        rng: &mut DeterministicRng,
    ) -> PnrResult<()> {
        if queue.len() < self.cfg.mt_min_nets || self.cfg.threads < 2 {
            let mut st = ThreadContext::new(rng.rng64());
            for &ud in queue {
                self.route_net(netlist, &mut st, ud, false)?;
            }
            return Ok(());
        }

        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); ROUTE_WORKERS + 1];
        for &ud in queue {
            let bin = self.bin_for(
                &self.geom[ud as usize].bb,
                self.cfg.bb_margin_x,
                self.cfg.bb_margin_y,
            );
            bins[bin].push(ud);
        }
        self.sink.note(
            code(3),
            format!(
                "{}/{} nets not multi-threadable",
                bins[ROUTE_WORKERS].len(),
                queue.len()
            ),
        );
        let seeds: Vec<u64> = (0..=ROUTE_WORKERS).map(|_| rng.rng64()).collect();

        let failed: Vec<Vec<u32>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..ROUTE_WORKERS)
                .map(|k| {
                    let bin = &bins[k];
                    let seed = seeds[k];
                    s.spawn(move || {
                        let mut t = ThreadContext::new(seed);
                        let mut failed = Vec::new();
                        for &ud in bin {
                            match self.route_net(netlist, &mut t, ud, true) {
                                Ok(true) => {}
                                _ => failed.push(ud),
                            }
                        }
                        failed
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let mut st = ThreadContext::new(seeds[ROUTE_WORKERS]);
        for &ud in &bins[ROUTE_WORKERS] {
            self.route_net(netlist, &mut st, ud, false)?;
        }
        for bin_failed in failed {
            for ud in bin_failed {
                self.route_net(netlist, &mut st, ud, false)?;
            }
        }
        Ok(())
    }

    /// Recomputes wire overuse, grows historical costs, and collects the
    /// nets crossing any overused wire.
    pub fn update_congestion(&mut self) {
        self.total_overuse = 0;
        self.overused_wires = 0;
        self.total_wire_use = 0;
        self.failed_nets.clear();
        for wire in self.wires.values() {
            let mut wd = wire.lock().unwrap();
            self.total_wire_use += wd.bound_nets.len();
            let overuse = wd.bound_nets.len() as i64 - 1;
            if overuse > 0 {
                wd.hist_cong_cost += overuse as f32 * self.cfg.hist_cong_weight;
                self.total_overuse += overuse as usize;
                self.overused_wires += 1;
                for &ud in wd.bound_nets.keys() {
                    self.failed_nets.insert(ud);
                }
            }
        }
    }

    /// Commits one arc's recorded tree through the arch. An arch refusal
    /// rips the arc up and re-queues the net; an inconsistent tree is a
    /// hard error with a backtrace.
    fn bind_and_check(&mut self, netlist: &mut Netlist, ud: u32, usr_idx: usize) -> PnrResult<bool> {
        let net_id = self.nets_by_udata[ud as usize];
        if netlist.net(net_id).is_global {
            return Ok(true);
        }
        let Some(src) = self.geom[ud as usize].src_wire else {
            return Ok(true);
        };
        let (dst, wires_empty) = {
            let arcs = self.arcs[ud as usize].lock().unwrap();
            (arcs[usr_idx].dst_wire, arcs[usr_idx].wires.is_empty())
        };
        if self.arch.bound_wire_net(dst) == Some(net_id) {
            return Ok(true);
        }
        if wires_empty {
            return Ok(true);
        }

        let mut success = true;
        let mut to_bind: Vec<PipId> = Vec::new();
        {
            let arcs = self.arcs[ud as usize].lock().unwrap();
            let ad = &arcs[usr_idx];
            let mut cursor = dst;
            while cursor != src {
                if !self.arch.check_wire_avail(cursor) {
                    if self.arch.bound_wire_net(cursor) == Some(net_id) {
                        // Hit the part of the net that is already bound.
                        break;
                    }
                    success = false;
                    break;
                }
                let pip = match ad.wires.get(&cursor) {
                    Some(&Some(p)) => p,
                    _ => {
                        let net_name = self.interner.resolve(netlist.net(net_id).name);
                        let mut diag = Diagnostic::error(
                            code(4),
                            format!(
                                "incomplete route tree for arc {usr_idx} of net '{net_name}'"
                            ),
                        )
                        .with_note(format!(
                            "cursor: {}",
                            self.interner.resolve(self.arch.wire_name(cursor))
                        ));
                        for (&w, &p) in &ad.wires {
                            let from = match p {
                                Some(p) => self
                                    .interner
                                    .resolve(self.arch.wire_name(self.arch.pip_src_wire(p)))
                                    .to_string(),
                                None => "<source>".to_string(),
                            };
                            diag = diag.with_note(format!(
                                "route backtrace: {} <- {from}",
                                self.interner.resolve(self.arch.wire_name(w))
                            ));
                        }
                        self.sink.emit(diag);
                        return Err(PnrError::CorruptRouteTree {
                            net: net_name.to_string(),
                            arc: usr_idx,
                        });
                    }
                };
                if !self.arch.check_pip_avail(pip) {
                    success = false;
                    break;
                }
                to_bind.push(pip);
                cursor = self.arch.pip_src_wire(pip);
            }
        }

        if success {
            if self.arch.bound_wire_net(src).is_none() {
                netlist.bind_wire(self.arch, net_id, src, BindStrength::Weak);
            }
            for pip in to_bind {
                netlist.bind_pip(self.arch, net_id, pip, BindStrength::Weak);
            }
        } else {
            let mut arcs = self.arcs[ud as usize].lock().unwrap();
            self.ripup_arc(ud, usr_idx, &mut arcs);
            self.failed_nets.insert(ud);
        }
        Ok(success)
    }

    /// Commits every net's trees through the arch, first releasing the
    /// nets' stale weak bindings.
    pub fn bind_and_check_all(&mut self, netlist: &mut Netlist) -> PnrResult<bool> {
        let mut success = true;
        for ud in 0..self.nets_by_udata.len() {
            let net_id = self.nets_by_udata[ud];
            if netlist.net(net_id).is_global {
                continue;
            }
            let stale: Vec<WireId> = netlist
                .net(net_id)
                .wires
                .iter()
                .filter(|(_, nw)| nw.strength <= BindStrength::Strong)
                .map(|(&w, _)| w)
                .collect();
            for w in stale {
                netlist.unbind_wire(self.arch, net_id, w);
            }
            let users = netlist.net(net_id).users.len();
            for i in 0..users {
                if !self.bind_and_check(netlist, ud as u32, i)? {
                    self.arch_fail += 1;
                    success = false;
                }
            }
        }
        Ok(success)
    }

    /// Writes a CSV heatmap of wire use (or overuse) by estimated location.
    pub fn write_heatmap(&self, out: &mut dyn Write, congestion: bool) -> std::io::Result<()> {
        let mut hm_xy: Vec<Vec<i64>> = Vec::new();
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        for wire in self.wires.values() {
            let wd = wire.lock().unwrap();
            if wd.bound_nets.is_empty() {
                continue;
            }
            let val = wd.bound_nets.len() as i64 - i64::from(congestion);
            // Estimate the wire's location by its driving pip.
            let Some(drv) = wd.bound_nets.values().find_map(|&(_, p)| p) else {
                continue;
            };
            let l = self.arch.pip_location(drv);
            let (x, y) = (l.x.max(0) as usize, l.y.max(0) as usize);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            if hm_xy.len() <= y {
                hm_xy.resize(y + 1, Vec::new());
            }
            if hm_xy[y].len() <= x {
                hm_xy[y].resize(x + 1, 0);
            }
            if val > 0 {
                hm_xy[y][x] += val;
            }
        }
        for y in 0..=max_y {
            for x in 0..=max_x {
                let v = hm_xy
                    .get(y)
                    .and_then(|row| row.get(x))
                    .copied()
                    .unwrap_or(0);
                write!(out, "{v},")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Routes every net with the negotiated-congestion router, committing the
/// final trees into the architecture.
pub fn route(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &RouterConfig,
    interner: &Interner,
    sink: &DiagnosticSink,
) -> PnrResult<()> {
    let old_udata: Vec<u32> = netlist.nets.iter().map(|n| n.udata).collect();
    for (i, net) in netlist.nets.iter_mut().enumerate() {
        net.udata = i as u32;
    }
    let result = route_inner(netlist, arch, cfg, interner, sink);
    for (i, net) in netlist.nets.iter_mut().enumerate() {
        net.udata = old_udata[i];
    }
    result
}

fn route_inner(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &RouterConfig,
    interner: &Interner,
    sink: &DiagnosticSink,
) -> PnrResult<()> {
    let mut rng = DeterministicRng::new(cfg.seed);
    let mut router = Router::new(netlist, arch, cfg, interner, sink)?;
    router.find_all_reserved_wires();
    router.partition_nets();

    let mut route_queue: Vec<u32> = (0..router.nets_by_udata.len() as u32).collect();
    let mut iter = 1;
    loop {
        rng.sorted_shuffle(&mut route_queue);
        router.do_route(netlist, &route_queue, &mut rng)?;
        route_queue.clear();
        router.update_congestion();
        if router.overused_wires == 0 {
            router.bind_and_check_all(netlist)?;
        }
        route_queue.extend(router.failed_nets.iter().copied());
        sink.note(
            code(5),
            format!(
                "iter={iter} wires={} overused={} overuse={} archfail={}",
                router.total_wire_use,
                router.overused_wires,
                router.total_overuse,
                if router.overused_wires > 0 {
                    "NA".to_string()
                } else {
                    router.arch_fail.to_string()
                }
            ),
        );
        iter += 1;
        router.curr_cong_weight *= 2.0;
        if router.failed_nets.is_empty() {
            break;
        }
        arch.yield_point();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::{place, PlacerConfig};
    use crate::timing::FanoutEstimator;
    use arbor_arch::{GridArch, Loc, PinDir};

    fn route_cfg() -> RouterConfig {
        RouterConfig::default()
    }

    /// One LUT driving two FFs, placed by hand.
    fn placed_fanout(
        interner: &Interner,
        arch: &GridArch,
    ) -> (Netlist, NetId) {
        let mut nl = Netlist::new();
        let lut = nl.add_cell(interner.get_or_intern("l0"), arch.lut_type());
        let f0 = nl.add_cell(interner.get_or_intern("f0"), arch.ff_type());
        let f1 = nl.add_cell(interner.get_or_intern("f1"), arch.ff_type());
        let net = nl.add_net(interner.get_or_intern("n0"));
        nl.connect(lut, interner.get_or_intern("O"), PinDir::Output, net);
        nl.connect(f0, interner.get_or_intern("D"), PinDir::Input, net);
        nl.connect(f1, interner.get_or_intern("D"), PinDir::Input, net);
        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        nl.bind_bel(arch, lut, b(0, 0, 0), BindStrength::Weak);
        nl.bind_bel(arch, f0, b(2, 0, 1), BindStrength::Weak);
        nl.bind_bel(arch, f1, b(0, 2, 1), BindStrength::Weak);
        (nl, net)
    }

    fn check_tree_invariants(
        nl: &Netlist,
        arch: &GridArch,
        interner: &Interner,
        net: NetId,
    ) {
        // Walking each sink back through the committed pips must reach the
        // source wire, and every pip must be bound to this net in the arch.
        let n = nl.net(net);
        let src = nl.source_wire(arch, interner, n).unwrap().unwrap();
        for user in &n.users {
            let mut cursor = nl.sink_wire(arch, interner, user).unwrap().unwrap();
            let mut hops = 0;
            while cursor != src {
                let nw = n
                    .wires
                    .get(&cursor)
                    .unwrap_or_else(|| panic!("wire {cursor} missing from tree"));
                let pip = nw.pip.expect("non-source wire without driving pip");
                assert_eq!(arch.bound_pip_net(pip), Some(net));
                assert_eq!(arch.bound_wire_net(cursor), Some(net));
                cursor = arch.pip_src_wire(pip);
                hops += 1;
                assert!(hops < 1000, "cycle in committed route");
            }
        }
        assert_eq!(arch.bound_wire_net(src), Some(net));
    }

    #[test]
    fn routes_single_fanout_net() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 2, 2);
        let (mut nl, net) = placed_fanout(&interner, &arch);
        let sink = DiagnosticSink::new();
        route(&mut nl, &arch, &route_cfg(), &interner, &sink).unwrap();
        assert!(nl.is_fully_routed());
        check_tree_invariants(&nl, &arch, &interner, net);
    }

    #[test]
    fn competing_nets_negotiate() {
        // Two nets forced through the same single-channel tile must end up
        // sharing nothing after negotiation.
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 5, 1, 4, 1);
        let mut nl = Netlist::new();
        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        let l0 = nl.add_cell(interner.get_or_intern("l0"), arch.lut_type());
        let l1 = nl.add_cell(interner.get_or_intern("l1"), arch.lut_type());
        let f0 = nl.add_cell(interner.get_or_intern("f0"), arch.ff_type());
        let f1 = nl.add_cell(interner.get_or_intern("f1"), arch.ff_type());
        let n0 = nl.add_net(interner.get_or_intern("n0"));
        let n1 = nl.add_net(interner.get_or_intern("n1"));
        let o = interner.get_or_intern("O");
        let d = interner.get_or_intern("D");
        nl.connect(l0, o, PinDir::Output, n0);
        nl.connect(f0, d, PinDir::Input, n0);
        nl.connect(l1, o, PinDir::Output, n1);
        nl.connect(f1, d, PinDir::Input, n1);
        // Both nets span the full row through the single channel.
        nl.bind_bel(&arch, l0, b(0, 0, 0), BindStrength::Weak);
        nl.bind_bel(&arch, l1, b(0, 0, 2), BindStrength::Weak);
        nl.bind_bel(&arch, f0, b(4, 0, 1), BindStrength::Weak);
        nl.bind_bel(&arch, f1, b(4, 0, 3), BindStrength::Weak);

        // A single-channel row cannot carry both nets; they must negotiate
        // and the run must either converge with disjoint wires or fail.
        let sink = DiagnosticSink::new();
        for (i, net) in nl.nets.iter_mut().enumerate() {
            net.udata = i as u32;
        }
        let cfg = route_cfg();
        let mut router = Router::new(&nl, &arch, &cfg, &interner, &sink).unwrap();
        let mut rng = DeterministicRng::new(1);
        let mut st = ThreadContext::new(rng.rng64());
        router.route_net(&nl, &mut st, 0, false).unwrap();
        router.route_net(&nl, &mut st, 1, false).unwrap();
        router.update_congestion();
        // First pass: both nets routed through the shared channel.
        assert!(router.overused_wires > 0);
        assert_eq!(router.failed_nets.len(), 2);
        // The overused wire's history cost grew by hist_cong_weight.
        let grown = router.wires.values().any(|w| {
            let wd = w.lock().unwrap();
            (wd.hist_cong_cost - (1.0 + cfg.hist_cong_weight)).abs() < 1e-6
        });
        assert!(grown);
    }

    #[test]
    fn backwards_seed_skips_forward_search() {
        // A sink one hop from its source resolves in the backwards BFS; the
        // forward A* never runs (its visited map stays untouched) and the
        // committed tree is exactly the three-wire chain pin→channel→pin.
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 2, 2, 2, 1);
        let mut nl = Netlist::new();
        let lut = nl.add_cell(interner.get_or_intern("l"), arch.lut_type());
        let ff = nl.add_cell(interner.get_or_intern("f"), arch.ff_type());
        let net = nl.add_net(interner.get_or_intern("n"));
        nl.connect(lut, interner.get_or_intern("O"), PinDir::Output, net);
        nl.connect(ff, interner.get_or_intern("D"), PinDir::Input, net);
        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        nl.bind_bel(&arch, lut, b(0, 0, 0), BindStrength::Weak);
        nl.bind_bel(&arch, ff, b(0, 0, 1), BindStrength::Weak);
        for (i, n) in nl.nets.iter_mut().enumerate() {
            n.udata = i as u32;
        }

        let sink = DiagnosticSink::new();
        let cfg = route_cfg();
        let router = Router::new(&nl, &arch, &cfg, &interner, &sink).unwrap();
        let mut st = ThreadContext::new(7);
        assert!(router.route_net(&nl, &mut st, 0, false).unwrap());
        assert!(st.visited.is_empty(), "forward A* should not have run");

        let arcs = router.arcs[0].lock().unwrap();
        assert_eq!(arcs[0].wires.len(), 3);
        let src = nl.source_wire(&arch, &interner, nl.net(net)).unwrap().unwrap();
        assert_eq!(arcs[0].wires[&src], None);
        // Every wire of the path is singly bound to this net.
        for (&w, _) in &arcs[0].wires {
            let wd = router.wire(w);
            assert_eq!(wd.bound_nets.len(), 1);
            assert_eq!(wd.bound_nets[&0].0, 1);
        }
    }

    #[test]
    fn reserved_wires_mark_unique_sink_approach() {
        // The dedicated pin wire into each sink is reserved for its net.
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 2, 2);
        let (mut nl, _net) = placed_fanout(&interner, &arch);
        for (i, net) in nl.nets.iter_mut().enumerate() {
            net.udata = i as u32;
        }
        let sink = DiagnosticSink::new();
        let cfg = route_cfg();
        let router = Router::new(&nl, &arch, &cfg, &interner, &sink).unwrap();
        router.find_all_reserved_wires();

        let n = nl.net(nl.nets[0].id).clone();
        for user in &n.users {
            let dst = nl.sink_wire(&arch, &interner, user).unwrap().unwrap();
            assert_eq!(router.wire(dst).reserved_net, Some(0));
        }
    }

    #[test]
    fn place_then_route_end_to_end() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 5, 5, 4, 3);
        let mut nl = Netlist::new();
        let o = interner.get_or_intern("O");
        let d = interner.get_or_intern("D");
        let q = interner.get_or_intern("Q");
        let i0 = interner.get_or_intern("I0");
        let mut luts = Vec::new();
        let mut ffs = Vec::new();
        for k in 0..8 {
            luts.push(nl.add_cell(interner.get_or_intern(&format!("lut_{k}")), arch.lut_type()));
            ffs.push(nl.add_cell(interner.get_or_intern(&format!("ff_{k}")), arch.ff_type()));
        }
        for k in 0..8 {
            let n1 = nl.add_net(interner.get_or_intern(&format!("a_{k}")));
            nl.connect(luts[k], o, PinDir::Output, n1);
            nl.connect(ffs[k], d, PinDir::Input, n1);
            let n2 = nl.add_net(interner.get_or_intern(&format!("b_{k}")));
            nl.connect(ffs[k], q, PinDir::Output, n2);
            nl.connect(luts[(k + 1) % 8], i0, PinDir::Input, n2);
        }

        let sink = DiagnosticSink::new();
        let pcfg = PlacerConfig {
            min_bels_for_grid_pick: 4,
            threads: 2,
            ..PlacerConfig::default()
        };
        place(
            &mut nl,
            &arch,
            &pcfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();
        route(&mut nl, &arch, &route_cfg(), &interner, &sink).unwrap();
        assert!(nl.is_fully_routed());
        assert!(!sink.has_errors());
        let net_ids: Vec<NetId> = nl.nets.iter().map(|n| n.id).collect();
        for net in net_ids {
            check_tree_invariants(&nl, &arch, &interner, net);
        }
    }

    #[test]
    fn routing_is_deterministic() {
        let mut checksums = Vec::new();
        for _ in 0..2 {
            let interner = Interner::new();
            let arch = GridArch::new(&interner, 4, 4, 2, 2);
            let (mut nl, _net) = placed_fanout(&interner, &arch);
            let sink = DiagnosticSink::new();
            route(&mut nl, &arch, &route_cfg(), &interner, &sink).unwrap();
            checksums.push(arch.checksum());
        }
        assert_eq!(checksums[0], checksums[1]);
    }

    #[test]
    fn heatmap_writes_csv() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 2, 2);
        let (mut nl, _net) = placed_fanout(&interner, &arch);
        for (i, net) in nl.nets.iter_mut().enumerate() {
            net.udata = i as u32;
        }
        let sink = DiagnosticSink::new();
        let cfg = route_cfg();
        let router = Router::new(&nl, &arch, &cfg, &interner, &sink).unwrap();
        let mut rng = DeterministicRng::new(1);
        let mut st = ThreadContext::new(rng.rng64());
        router.route_net(&nl, &mut st, 0, false).unwrap();

        let mut out = Vec::new();
        router.write_heatmap(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().count() >= 1);
        assert!(text.contains(','));
    }
}
