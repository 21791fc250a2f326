//! Placement cost model: net bounding boxes, per-arc timing cost, and
//! incremental recomputation for proposed moves.
//!
//! The wirelength metric is the sum of per-net half-perimeter bounding
//! boxes. A move only changes a net's box if it moves a cell off a box edge
//! or outside the box, so the evaluator flags affected nets instead of
//! recomputing everything. Timing cost is per arc,
//! `delay_ns · criticality^crit_exp` (or a budget-overdraft exponential in
//! budget mode), and is likewise recomputed only for flagged arcs.

use crate::data::Netlist;
use crate::placement::{PlacerConfig, CRIT_EXP};
use crate::timing::NetCriticalityMap;
use arbor_arch::{
    Architecture, BelId, BelPin, BoundingBox, CellId, NetId, PinDir, TimingPortClass,
};
use arbor_common::Ident;
use std::collections::HashMap;

/// Integer wirelength unit (HPWL sums).
pub(crate) type Wirelen = i64;

/// Immutable context shared by all cost computations.
pub(crate) struct CostModel<'a> {
    pub arch: &'a dyn Architecture,
    pub cfg: &'a PlacerConfig,
    /// Net for each dense scratch index.
    pub net_by_udata: Vec<NetId>,
    /// `(cell, input port) → user index` in the port's net.
    pub port_user_index: HashMap<(CellId, Ident), usize>,
}

/// Mutable cost accounting, indexed by net udata.
pub(crate) struct CostState {
    pub net_bounds: Vec<BoundingBox>,
    pub net_arc_tcost: Vec<Vec<f64>>,
    pub net_crit: NetCriticalityMap,
    pub curr_wirelen_cost: Wirelen,
    pub curr_timing_cost: f64,
    pub last_wirelen_cost: f64,
    pub last_timing_cost: f64,
}

impl CostState {
    pub fn new(netlist: &Netlist) -> Self {
        Self {
            net_bounds: vec![BoundingBox::default(); netlist.net_count()],
            net_arc_tcost: netlist
                .nets
                .iter()
                .map(|n| vec![0.0; n.users.len()])
                .collect(),
            net_crit: NetCriticalityMap::new(),
            curr_wirelen_cost: 0,
            curr_timing_cost: 0.0,
            last_wirelen_cost: 0.0,
            last_timing_cost: 0.0,
        }
    }

    /// Total wirelength recomputed from the recorded bounding boxes.
    pub fn total_wirelen_cost(&self) -> Wirelen {
        self.net_bounds.iter().map(BoundingBox::hpwl).sum()
    }

    /// Total timing cost recomputed from the recorded arc costs.
    pub fn total_timing_cost(&self) -> f64 {
        self.net_arc_tcost
            .iter()
            .map(|arcs| arcs.iter().sum::<f64>())
            .sum()
    }

    /// Applies a computed move delta to the running accumulators.
    pub fn commit_cost_changes(&mut self, mc: &MoveChangeData) {
        for &(ud, bb) in &mc.new_net_bounds {
            self.net_bounds[ud as usize] = bb;
        }
        for &((ud, usr), cost) in &mc.new_arc_costs {
            self.net_arc_tcost[ud as usize][usr] = cost;
        }
        self.curr_wirelen_cost += mc.wirelen_delta;
        self.curr_timing_cost += mc.timing_delta;
    }
}

/// Scratchpad describing everything a proposed move touches.
///
/// The `already_*` bitmaps deduplicate nets/arcs flagged through several
/// moved cells; `reset` clears them through the recorded lists so the cost
/// of a move stays proportional to what it touched.
pub(crate) struct MoveChangeData {
    bounds_changed_nets: Vec<u32>,
    changed_arcs: Vec<(u32, usize)>,
    already_bounds_changed: Vec<bool>,
    already_changed_arcs: Vec<Vec<bool>>,
    new_net_bounds: Vec<(u32, BoundingBox)>,
    new_arc_costs: Vec<((u32, usize), f64)>,
    pub wirelen_delta: Wirelen,
    pub timing_delta: f64,
}

impl MoveChangeData {
    pub fn new(netlist: &Netlist) -> Self {
        Self {
            bounds_changed_nets: Vec::new(),
            changed_arcs: Vec::new(),
            already_bounds_changed: vec![false; netlist.net_count()],
            already_changed_arcs: netlist
                .nets
                .iter()
                .map(|n| vec![false; n.users.len()])
                .collect(),
            new_net_bounds: Vec::new(),
            new_arc_costs: Vec::new(),
            wirelen_delta: 0,
            timing_delta: 0.0,
        }
    }

    pub fn reset(&mut self) {
        for &bc in &self.bounds_changed_nets {
            self.already_bounds_changed[bc as usize] = false;
        }
        for &(ud, usr) in &self.changed_arcs {
            self.already_changed_arcs[ud as usize][usr] = false;
        }
        self.bounds_changed_nets.clear();
        self.changed_arcs.clear();
        self.new_net_bounds.clear();
        self.new_arc_costs.clear();
        self.wirelen_delta = 0;
        self.timing_delta = 0.0;
    }
}

impl<'a> CostModel<'a> {
    /// Nets excluded from the cost model entirely: undriven, driver
    /// unplaced, or driven from a global buffer.
    pub fn ignore_net(&self, netlist: &Netlist, net_id: NetId) -> bool {
        let net = netlist.net(net_id);
        match &net.driver {
            None => true,
            Some(driver) => match netlist.cell(driver.cell).bel {
                None => true,
                Some(bel) => self.arch.bel_global_buf(bel),
            },
        }
    }

    /// The bel of `cell`, seen through a thread-local move overlay.
    pub fn cell_bel(
        &self,
        netlist: &Netlist,
        moved: &HashMap<CellId, BelId>,
        cell: CellId,
    ) -> Option<BelId> {
        moved.get(&cell).copied().or(netlist.cell(cell).bel)
    }

    /// Recomputes a net's bounding box over driver and placed users.
    ///
    /// Driverless or unplaced-driver nets yield a degenerate box; callers
    /// filter those out through [`ignore_net`](Self::ignore_net) first.
    pub fn get_net_bounds(
        &self,
        netlist: &Netlist,
        net_id: NetId,
        moved: &HashMap<CellId, BelId>,
    ) -> BoundingBox {
        let net = netlist.net(net_id);
        let Some(driver) = &net.driver else {
            return BoundingBox::default();
        };
        let Some(dbel) = self.cell_bel(netlist, moved, driver.cell) else {
            return BoundingBox::default();
        };
        let dloc = self.arch.bel_location(dbel);
        let mut bb = BoundingBox::point(dloc.x, dloc.y);
        for user in &net.users {
            let Some(ubel) = self.cell_bel(netlist, moved, user.cell) else {
                continue;
            };
            let uloc = self.arch.bel_location(ubel);
            bb.extend(uloc.x, uloc.y);
        }
        bb
    }

    /// Timing cost of one arc under the current (possibly shadowed) board.
    pub fn get_timing_cost(
        &self,
        netlist: &Netlist,
        net_crit: &NetCriticalityMap,
        net_id: NetId,
        user_idx: usize,
        moved: &HashMap<CellId, BelId>,
    ) -> f64 {
        let net = netlist.net(net_id);
        let Some(driver) = &net.driver else {
            return 0.0;
        };
        let drv_cell = netlist.cell(driver.cell);
        if self.arch.port_timing_class(drv_cell.ty, driver.port) == TimingPortClass::Ignore {
            return 0.0;
        }
        let user = &net.users[user_idx];
        if self.cfg.budget_based {
            let delay = self.predicted_arc_delay(netlist, driver, user);
            (delay - user.budget.ns()).exp().min(10.0)
        } else {
            let Some(crit) = net_crit.get(&net_id) else {
                return 0.0;
            };
            if crit.criticality.is_empty() {
                return 0.0;
            }
            let delay = if moved.contains_key(&driver.cell) || moved.contains_key(&user.cell) {
                // Endpoints shadowed by a thread-local move: the arch's
                // prediction would read stale positions, so estimate from
                // the shadowed pin wires instead.
                let (Some(src_bel), Some(dst_bel)) = (
                    self.cell_bel(netlist, moved, driver.cell),
                    self.cell_bel(netlist, moved, user.cell),
                ) else {
                    return 0.0;
                };
                match (
                    self.arch.bel_pin_wire(src_bel, driver.port),
                    self.arch.bel_pin_wire(dst_bel, user.port),
                ) {
                    (Some(src), Some(dst)) => self.arch.estimate_delay(src, dst).ns(),
                    _ => self
                        .arch
                        .predict_delay(
                            BelPin {
                                bel: src_bel,
                                pin: driver.port,
                            },
                            BelPin {
                                bel: dst_bel,
                                pin: user.port,
                            },
                        )
                        .ns(),
                }
            } else {
                self.predicted_arc_delay(netlist, driver, user)
            };
            delay * f64::from(crit.criticality[user_idx]).powf(CRIT_EXP)
        }
    }

    fn predicted_arc_delay(
        &self,
        netlist: &Netlist,
        driver: &crate::data::PortRef,
        user: &crate::data::PortRef,
    ) -> f64 {
        let (Some(src_bel), Some(dst_bel)) =
            (netlist.cell(driver.cell).bel, netlist.cell(user.cell).bel)
        else {
            return 0.0;
        };
        self.arch
            .predict_delay(
                BelPin {
                    bel: src_bel,
                    pin: driver.port,
                },
                BelPin {
                    bel: dst_bel,
                    pin: user.port,
                },
            )
            .ns()
    }

    /// Rebuilds every net's bounds and arc costs from scratch.
    pub fn setup_costs(&self, netlist: &Netlist, costs: &mut CostState) {
        for &net_id in &self.net_by_udata {
            if self.ignore_net(netlist, net_id) {
                continue;
            }
            let net = netlist.net(net_id);
            let ud = net.udata as usize;
            costs.net_bounds[ud] = self.get_net_bounds(netlist, net_id, &HashMap::new());
            if self.cfg.timing_driven && net.users.len() < self.cfg.timing_fanout_thresh {
                for i in 0..net.users.len() {
                    costs.net_arc_tcost[ud][i] =
                        self.get_timing_cost(netlist, &costs.net_crit, net_id, i, &HashMap::new());
                }
            }
        }
    }

    /// Flags the nets and arcs affected by moving `cell` from `old_bel`.
    pub fn add_move_cell(
        &self,
        netlist: &Netlist,
        costs: &CostState,
        mc: &mut MoveChangeData,
        cell: CellId,
        old_bel: BelId,
        moved: &HashMap<CellId, BelId>,
    ) {
        let Some(curr_bel) = self.cell_bel(netlist, moved, cell) else {
            return;
        };
        let curr_loc = self.arch.bel_location(curr_bel);
        let old_loc = self.arch.bel_location(old_bel);
        let c = netlist.cell(cell);
        for port in &c.ports {
            let Some(net_id) = port.net else { continue };
            if self.ignore_net(netlist, net_id) {
                continue;
            }
            let net = netlist.net(net_id);
            let ud = net.udata as usize;
            let curr_bounds = &costs.net_bounds[ud];
            // The box only changes if the cell left an edge or escaped the box.
            if curr_bounds.touches_edge(old_loc.x, old_loc.y)
                || !curr_bounds.contains(curr_loc.x, curr_loc.y)
            {
                if !mc.already_bounds_changed[ud] {
                    mc.bounds_changed_nets.push(net.udata);
                    mc.already_bounds_changed[ud] = true;
                }
            }
            if self.cfg.timing_driven && net.users.len() < self.cfg.timing_fanout_thresh {
                match port.dir {
                    PinDir::Output => {
                        let cls = self.arch.port_timing_class(c.ty, port.name);
                        if cls != TimingPortClass::Ignore {
                            for i in 0..net.users.len() {
                                if !mc.already_changed_arcs[ud][i] {
                                    mc.changed_arcs.push((net.udata, i));
                                    mc.already_changed_arcs[ud][i] = true;
                                }
                            }
                        }
                    }
                    PinDir::Input | PinDir::Inout => {
                        if let Some(&usr) = self.port_user_index.get(&(cell, port.name)) {
                            if !mc.already_changed_arcs[ud][usr] {
                                mc.changed_arcs.push((net.udata, usr));
                                mc.already_changed_arcs[ud][usr] = true;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Recomputes every flagged net/arc, accumulating the move deltas.
    pub fn compute_cost_changes(
        &self,
        netlist: &Netlist,
        costs: &CostState,
        mc: &mut MoveChangeData,
        moved: &HashMap<CellId, BelId>,
    ) {
        for i in 0..mc.bounds_changed_nets.len() {
            let ud = mc.bounds_changed_nets[i];
            let old_hpwl = costs.net_bounds[ud as usize].hpwl();
            let bounds = self.get_net_bounds(netlist, self.net_by_udata[ud as usize], moved);
            mc.new_net_bounds.push((ud, bounds));
            mc.wirelen_delta += bounds.hpwl() - old_hpwl;
            mc.already_bounds_changed[ud as usize] = false;
        }
        if self.cfg.timing_driven {
            for i in 0..mc.changed_arcs.len() {
                let (ud, usr) = mc.changed_arcs[i];
                let old_cost = costs.net_arc_tcost[ud as usize][usr];
                let new_cost = self.get_timing_cost(
                    netlist,
                    &costs.net_crit,
                    self.net_by_udata[ud as usize],
                    usr,
                    moved,
                );
                mc.new_arc_costs.push(((ud, usr), new_cost));
                mc.timing_delta += new_cost - old_cost;
                mc.already_changed_arcs[ud as usize][usr] = false;
            }
        }
    }
}
