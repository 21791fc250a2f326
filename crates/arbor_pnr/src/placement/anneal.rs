//! Parallel simulated-annealing placement refinement.
//!
//! One controller thread owns the board; a fixed pool of evaluator threads
//! proposes and scores moves against a read-only view of it. Each batch of
//! cells is sliced across the workers, every worker scoring its cells
//! against a thread-local shadow (`moved` overlay) with a rng derived only
//! from the batch seed and the cell's own identity, so results do not
//! depend on thread scheduling. Accepted proposals are then replayed
//! serially on the live board, re-scored, and re-tested under the
//! Metropolis criterion, which keeps the run deterministic and leaves the
//! architecture single-writer.

use crate::data::Netlist;
use crate::error::{PnrError, PnrResult};
use crate::placement::cost::{CostModel, CostState, MoveChangeData};
use crate::placement::fast_bels::FastBels;
use crate::placement::legalise;
use crate::placement::{PlacerConfig, LAMBDA, LEGALISE_DIA};
use crate::timing::TimingEstimator;
use arbor_arch::{
    Architecture, BelId, BindStrength, BoundingBox, CellId, Loc, RegionId,
};
use arbor_common::{DeterministicRng, Interner};
use arbor_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, RwLock};
use std::time::Instant;

const EPSILON: f64 = 1e-20;
/// Cells per dispatch batch; a balance between annealing quality and the
/// overhead of handing work to threads.
const BATCH: usize = 32;
/// Proposer attempts before giving up on a cell this move.
const PROPOSE_ATTEMPTS: usize = 100_000;

fn code(n: u16) -> DiagnosticCode {
    DiagnosticCode::new(Category::Placement, n)
}

/// The mutable board: netlist positions plus cost accounting, shared with
/// evaluator threads behind a reader-writer lock.
pub(crate) struct Board<'a> {
    pub netlist: &'a mut Netlist,
    pub costs: CostState,
    pub temp: f64,
    pub diameter: i32,
}

/// Everything immutable during annealing, shared freely with workers.
pub(crate) struct PlacerShared<'a> {
    pub arch: &'a dyn Architecture,
    pub cfg: &'a PlacerConfig,
    pub model: CostModel<'a>,
    pub fast_bels: FastBels,
    pub region_bounds: HashMap<RegionId, BoundingBox>,
    pub locked_bels: HashSet<BelId>,
}

struct SlotState {
    ready: bool,
    processed: bool,
    die: bool,
    seed: u64,
    eval: Vec<(CellId, Option<BelId>)>,
    moves: u64,
    accepted: u64,
}

struct WorkerSlot {
    state: Mutex<SlotState>,
    cv: Condvar,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                ready: false,
                processed: false,
                die: false,
                seed: 0,
                eval: Vec::new(),
                moves: 0,
                accepted: 0,
            }),
            cv: Condvar::new(),
        }
    }
}

impl<'a> PlacerShared<'a> {
    /// Whether `bel` satisfies `cell`'s region constraint.
    pub fn check_cell_bel_region(&self, netlist: &Netlist, cell: CellId, bel: BelId) -> bool {
        match netlist.cell(cell).region {
            Some(r) => netlist.region(r).contains(bel),
            None => true,
        }
    }

    /// Manhattan violation of the cell's region and chain constraints.
    pub fn constraints_distance(&self, netlist: &Netlist, cell: CellId) -> i64 {
        let c = netlist.cell(cell);
        let Some(bel) = c.bel else { return 0 };
        let loc = self.arch.bel_location(bel);
        let mut dist: i64 = 0;
        if let Some(r) = c.region {
            if let Some(bb) = self.region_bounds.get(&r) {
                if loc.x < bb.x0 {
                    dist += i64::from(bb.x0 - loc.x);
                } else if loc.x > bb.x1 {
                    dist += i64::from(loc.x - bb.x1);
                }
                if loc.y < bb.y0 {
                    dist += i64::from(bb.y0 - loc.y);
                } else if loc.y > bb.y1 {
                    dist += i64::from(loc.y - bb.y1);
                }
            }
        }
        if let Some(parent) = c.constr_parent {
            if let Some(pbel) = netlist.cell(parent).bel {
                let ploc = self.arch.bel_location(pbel);
                dist += i64::from((loc.x - ploc.x).abs() + (loc.y - ploc.y).abs());
            }
        }
        if let Some(z) = c.constr_z {
            dist += i64::from((loc.z - z).abs());
        }
        dist
    }

    /// Picks a random bel of the cell's type within the current search
    /// diameter, honouring region bounds, an optional forced z, and the
    /// locked-bel set.
    pub fn random_bel_for_cell(
        &self,
        netlist: &Netlist,
        diameter: i32,
        cell: CellId,
        rng: &mut DeterministicRng,
        force_z: Option<i32>,
    ) -> Option<BelId> {
        let c = netlist.cell(cell);
        let (type_idx, type_cnt) = self.fast_bels.type_info(c.ty)?;
        let mut curr_loc = self.arch.bel_location(c.bel?);

        let mut dx = diameter;
        let mut dy = diameter;
        if let Some(r) = c.region {
            if let Some(bb) = self.region_bounds.get(&r) {
                if netlist.region(r).bels.is_some() {
                    dx = dx.min(bb.width() + 1);
                    dy = dy.min(bb.height() + 1);
                    curr_loc.x = curr_loc.x.clamp(bb.x0, bb.x1);
                    curr_loc.y = curr_loc.y.clamp(bb.y0, bb.y1);
                }
            }
        }

        for _ in 0..PROPOSE_ATTEMPTS {
            let mut nx =
                rng.bounded(2 * dx as usize + 1) as i32 + (curr_loc.x - dx).max(0);
            let mut ny =
                rng.bounded(2 * dy as usize + 1) as i32 + (curr_loc.y - dy).max(0);
            if type_cnt < self.cfg.min_bels_for_grid_pick {
                nx = 0;
                ny = 0;
            }
            let bucket = self.fast_bels.bucket(type_idx, nx, ny);
            if bucket.is_empty() {
                continue;
            }
            let bel = bucket[rng.bounded(bucket.len())];
            if let Some(z) = force_z {
                if self.arch.bel_location(bel).z != z {
                    continue;
                }
            }
            if !self.check_cell_bel_region(netlist, cell, bel) {
                continue;
            }
            if self.locked_bels.contains(&bel) {
                continue;
            }
            return Some(bel);
        }
        None
    }

    /// Scores one batch slice on a worker thread. Proposals never touch the
    /// board; accepted candidates are reported back for serial replay.
    fn evaluate_cells(
        &self,
        board: &Board,
        seed: u64,
        eval: &mut [(CellId, Option<BelId>)],
        mc: &mut MoveChangeData,
        moved: &mut HashMap<CellId, BelId>,
    ) -> (u64, u64) {
        let mut moves = 0;
        let mut accepted = 0;
        for (cell, proposal) in eval.iter_mut() {
            let Some(old_bel) = board.netlist.cell(*cell).bel else {
                continue;
            };
            // Seeded only from the batch seed and the cell's own identity,
            // so the outcome is independent of thread assignment.
            let name = board.netlist.cell(*cell).name;
            let mut rng = DeterministicRng::new(
                seed ^ u64::from(name.as_raw())
                    ^ (u64::from(self.arch.bel_checksum(old_bel)) << 32),
            );

            let Some(try_bel) =
                self.random_bel_for_cell(board.netlist, board.diameter, *cell, &mut rng, None)
            else {
                continue;
            };
            if try_bel == old_bel {
                continue;
            }
            let bound = self.arch.bound_bel_cell(try_bel);
            if let Some(b) = bound {
                if self.arch.bel_bind_strength(try_bel) >= BindStrength::Strong
                    || board.netlist.cell(b).is_constrained()
                {
                    continue;
                }
            }

            moved.insert(*cell, try_bel);
            self.model
                .add_move_cell(board.netlist, &board.costs, mc, *cell, old_bel, moved);
            if let Some(b) = bound {
                moved.insert(b, old_bel);
                self.model
                    .add_move_cell(board.netlist, &board.costs, mc, b, try_bel, moved);
            }
            self.model
                .compute_cost_changes(board.netlist, &board.costs, mc, moved);
            let delta = LAMBDA * (mc.timing_delta / board.costs.last_timing_cost.max(EPSILON))
                + (1.0 - LAMBDA)
                    * (mc.wirelen_delta as f64 / board.costs.last_wirelen_cost.max(EPSILON));
            moved.clear();
            mc.reset();

            moves += 1;
            if delta < 0.0
                || (board.temp > 1e-9 && rng.unit() <= (-delta / board.temp).exp())
            {
                *proposal = Some(try_bel);
                accepted += 1;
            }
        }
        (moves, accepted)
    }

    /// Attempts a position swap for real: rebinds, revalidates, re-scores
    /// against the live board, and re-applies the Metropolis criterion.
    pub fn try_swap_position(
        &self,
        board: &mut Board,
        rng: &mut DeterministicRng,
        mc: &mut MoveChangeData,
        cell: CellId,
        new_bel: BelId,
    ) -> bool {
        mc.reset();
        if board.netlist.cell(cell).is_constrained() {
            return false;
        }
        let Some(old_bel) = board.netlist.cell(cell).bel else {
            return false;
        };
        let other_cell = self.arch.bound_bel_cell(new_bel);
        if let Some(other) = other_cell {
            if board.netlist.cell(other).is_constrained()
                || self.arch.bel_bind_strength(new_bel) > BindStrength::Weak
            {
                return false;
            }
        }
        let mut old_dist = self.constraints_distance(board.netlist, cell);
        if let Some(other) = other_cell {
            old_dist += self.constraints_distance(board.netlist, other);
        }

        board.netlist.unbind_bel(self.arch, cell);
        if let Some(other) = other_cell {
            board.netlist.unbind_bel(self.arch, other);
        }
        board
            .netlist
            .bind_bel(self.arch, cell, new_bel, BindStrength::Weak);
        if let Some(other) = other_cell {
            board
                .netlist
                .bind_bel(self.arch, other, old_bel, BindStrength::Weak);
        }

        let no_overlay = HashMap::new();
        self.model
            .add_move_cell(board.netlist, &board.costs, mc, cell, old_bel, &no_overlay);
        if let Some(other) = other_cell {
            self.model
                .add_move_cell(board.netlist, &board.costs, mc, other, new_bel, &no_overlay);
        }

        let valid = self.arch.is_bel_location_valid(new_bel)
            && (other_cell.is_none() || self.arch.is_bel_location_valid(old_bel));
        if valid {
            self.model
                .compute_cost_changes(board.netlist, &board.costs, mc, &no_overlay);
            let mut new_dist = self.constraints_distance(board.netlist, cell);
            if let Some(other) = other_cell {
                new_dist += self.constraints_distance(board.netlist, other);
            }
            let mut delta = LAMBDA
                * (mc.timing_delta / board.costs.last_timing_cost.max(EPSILON))
                + (1.0 - LAMBDA)
                    * (mc.wirelen_delta as f64 / board.costs.last_wirelen_cost.max(EPSILON));
            delta += (self.cfg.constraint_weight / board.temp) * (new_dist - old_dist) as f64
                / board.costs.last_wirelen_cost.max(EPSILON);
            if delta < 0.0
                || (board.temp > 1e-8 && rng.unit() <= (-delta / board.temp).exp())
            {
                board.costs.commit_cost_changes(mc);
                return true;
            }
        }

        // Swap failed or was rejected: unbind in reverse of bind, then
        // restore the original assignment.
        if let Some(other) = other_cell {
            board.netlist.unbind_bel(self.arch, other);
        }
        board.netlist.unbind_bel(self.arch, cell);
        board
            .netlist
            .bind_bel(self.arch, cell, old_bel, BindStrength::Weak);
        if let Some(other) = other_cell {
            board
                .netlist
                .bind_bel(self.arch, other, new_bel, BindStrength::Weak);
        }
        false
    }

    /// Swaps a cell onto `new_bel` (displacing any occupant back onto the
    /// cell's old bel) and returns the old bel, or `None` if the cell was
    /// not placed.
    fn swap_cell_bels(
        &self,
        netlist: &mut Netlist,
        cell: CellId,
        new_bel: BelId,
    ) -> Option<BelId> {
        let old_bel = netlist.cell(cell).bel?;
        let bound = self.arch.bound_bel_cell(new_bel);
        if let Some(b) = bound {
            netlist.unbind_bel(self.arch, b);
        }
        netlist.unbind_bel(self.arch, cell);
        let strength = |constrained: bool| {
            if constrained {
                BindStrength::Strong
            } else {
                BindStrength::Weak
            }
        };
        let cell_constrained = netlist.cell(cell).is_constrained();
        netlist.bind_bel(self.arch, cell, new_bel, strength(cell_constrained));
        if let Some(b) = bound {
            let b_constrained = netlist.cell(b).is_constrained();
            netlist.bind_bel(self.arch, b, old_bel, strength(b_constrained));
        }
        Some(old_bel)
    }

    /// Collects the relative positions of every cell in a chain.
    ///
    /// `x`/`y` are relative to the base; `z` stays absolute, since chain
    /// slots are fixed within their tile. Returns `false` if any member is
    /// unplaced, in which case the chain cannot be moved this round.
    pub fn discover_chain(
        &self,
        netlist: &Netlist,
        base_loc: Loc,
        cell: CellId,
        out: &mut Vec<(CellId, Loc)>,
    ) -> bool {
        let Some(bel) = netlist.cell(cell).bel else {
            return false;
        };
        let loc = self.arch.bel_location(bel);
        out.push((
            cell,
            Loc::new(loc.x - base_loc.x, loc.y - base_loc.y, loc.z),
        ));
        for &child in &netlist.cell(cell).constr_children {
            if !self.discover_chain(netlist, base_loc, child, out) {
                return false;
            }
        }
        true
    }

    /// Attempts to move a whole chain to a new base bel; all-or-nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn try_swap_chain(
        &self,
        board: &mut Board,
        rng: &mut DeterministicRng,
        mc: &mut MoveChangeData,
        cell: CellId,
        new_base: BelId,
        n_move: &mut u64,
        n_accept: &mut u64,
    ) -> bool {
        mc.reset();
        let Some(root_bel) = board.netlist.cell(cell).bel else {
            return false;
        };
        let base_loc = self.arch.bel_location(root_bel);
        let mut cell_rel = Vec::new();
        if !self.discover_chain(board.netlist, base_loc, cell, &mut cell_rel) {
            return false;
        }
        let new_base_loc = self.arch.bel_location(new_base);
        debug_assert_eq!(new_base_loc.z, base_loc.z);
        let chain_cells: HashSet<CellId> = cell_rel.iter().map(|&(c, _)| c).collect();
        let root_type = board.netlist.cell(cell).ty;

        let mut dest_bels = Vec::new();
        for &(member, rel) in &cell_rel {
            let target_loc = Loc::new(new_base_loc.x + rel.x, new_base_loc.y + rel.y, rel.z);
            let Some(target_bel) = self.arch.bel_by_location(target_loc) else {
                return false;
            };
            if self.arch.bel_type(target_bel) != root_type {
                return false;
            }
            // Chains never swap with other chains or strongly-held cells.
            if let Some(bound) = self.arch.bound_bel_cell(target_bel) {
                if !chain_cells.contains(&bound)
                    && (self.arch.bel_bind_strength(target_bel) >= BindStrength::Strong
                        || board.netlist.cell(bound).is_constrained())
                {
                    return false;
                }
            }
            dest_bels.push((member, target_bel));
        }

        let mut moves_made = Vec::new();
        let mut failed = false;
        for &(member, target_bel) in &dest_bels {
            match self.swap_cell_bels(board.netlist, member, target_bel) {
                Some(old_bel) => moves_made.push((member, old_bel)),
                None => {
                    failed = true;
                    break;
                }
            }
        }

        let no_overlay = HashMap::new();
        if !failed {
            for &(member, old_bel) in &moves_made {
                let Some(curr_bel) = board.netlist.cell(member).bel else {
                    failed = true;
                    break;
                };
                if !self.arch.is_bel_location_valid(curr_bel)
                    || !self.check_cell_bel_region(board.netlist, member, curr_bel)
                    || !self.arch.is_bel_location_valid(old_bel)
                {
                    failed = true;
                    break;
                }
                let bound = self.arch.bound_bel_cell(old_bel);
                if let Some(b) = bound {
                    let Some(b_bel) = board.netlist.cell(b).bel else {
                        failed = true;
                        break;
                    };
                    if !self.check_cell_bel_region(board.netlist, b, b_bel) {
                        failed = true;
                        break;
                    }
                }
                self.model
                    .add_move_cell(board.netlist, &board.costs, mc, member, old_bel, &no_overlay);
                if let Some(b) = bound {
                    self.model
                        .add_move_cell(board.netlist, &board.costs, mc, b, curr_bel, &no_overlay);
                }
            }
        }

        if !failed {
            self.model
                .compute_cost_changes(board.netlist, &board.costs, mc, &no_overlay);
            let delta = LAMBDA * (mc.timing_delta / board.costs.last_timing_cost.max(EPSILON))
                + (1.0 - LAMBDA)
                    * (mc.wirelen_delta as f64 / board.costs.last_wirelen_cost.max(EPSILON));
            *n_move += 1;
            if delta < 0.0
                || (board.temp > 1e-9 && rng.unit() <= (-delta / board.temp).exp())
            {
                *n_accept += 1;
                board.costs.commit_cost_changes(mc);
                return true;
            }
        }

        for &(member, old_bel) in moves_made.iter().rev() {
            self.swap_cell_bels(board.netlist, member, old_bel);
        }
        false
    }
}

/// Places `cell` on the best-scoring free legal bel, ripping up weakly
/// bound incumbents (bounded retries) when the fabric is full.
pub(crate) fn place_initial(
    arch: &dyn Architecture,
    netlist: &mut Netlist,
    interner: &Interner,
    rng: &mut DeterministicRng,
    cell: CellId,
) -> PnrResult<()> {
    let mut target = cell;
    let mut iters = 25;
    loop {
        if netlist.cell(target).bel.is_some() {
            netlist.unbind_bel(arch, target);
        }
        let target_type = netlist.cell(target).ty;

        let mut best_bel = None;
        let mut best_score = u64::MAX;
        let mut best_ripup_score = u64::MAX;
        let mut ripup_target = None;
        let mut ripup_bel = None;

        let region_bels: Option<Vec<BelId>> = netlist.cell(target).region.and_then(|r| {
            netlist.region(r).bels.as_ref().map(|bels| {
                let mut v: Vec<BelId> = bels.iter().copied().collect();
                v.sort_unstable();
                v
            })
        });
        let candidates: &[BelId] = match &region_bels {
            Some(v) => v,
            None => arch.bels(),
        };

        for &bel in candidates {
            if arch.bel_type(bel) != target_type || !arch.is_valid_bel_for_cell(target_type, bel)
            {
                continue;
            }
            let score = rng.rng64();
            if arch.check_bel_avail(bel) {
                if score <= best_score {
                    best_score = score;
                    best_bel = Some(bel);
                }
            } else if score <= best_ripup_score {
                if let Some(bound) = arch.bound_bel_cell(bel) {
                    if arch.bel_bind_strength(bel) < BindStrength::Strong {
                        best_ripup_score = score;
                        ripup_target = Some(bound);
                        ripup_bel = Some(bel);
                    }
                }
            }
        }

        match best_bel {
            Some(bel) => {
                netlist.bind_bel(arch, target, bel, BindStrength::Weak);
                return Ok(());
            }
            None => {
                let (Some(victim), Some(bel)) = (ripup_target, ripup_bel) else {
                    return Err(unplaceable(netlist, interner, target));
                };
                if iters == 0 {
                    return Err(unplaceable(netlist, interner, target));
                }
                iters -= 1;
                netlist.unbind_bel(arch, victim);
                netlist.bind_bel(arch, target, bel, BindStrength::Weak);
                target = victim;
            }
        }
    }
}

fn unplaceable(netlist: &Netlist, interner: &Interner, cell: CellId) -> PnrError {
    let c = netlist.cell(cell);
    PnrError::Unplaceable {
        cell: interner.resolve(c.name).to_string(),
        cell_type: interner.resolve(c.ty).to_string(),
    }
}

fn worker_loop(shared: &PlacerShared, board_lock: &RwLock<Board>, slot: &WorkerSlot) {
    let mut mc = {
        let board = board_lock.read().unwrap();
        MoveChangeData::new(board.netlist)
    };
    let mut moved: HashMap<CellId, BelId> = HashMap::new();
    loop {
        let (seed, mut eval) = {
            let mut s = slot.state.lock().unwrap();
            while !s.ready && !s.die {
                s = slot.cv.wait(s).unwrap();
            }
            if s.die {
                return;
            }
            s.ready = false;
            (s.seed, std::mem::take(&mut s.eval))
        };

        let (moves, accepted) = {
            let board = board_lock.read().unwrap();
            shared.evaluate_cells(&board, seed, &mut eval, &mut mc, &mut moved)
        };

        let mut s = slot.state.lock().unwrap();
        s.eval = eval;
        s.moves = moves;
        s.accepted = accepted;
        s.processed = true;
        drop(s);
        slot.cv.notify_all();
    }
}

/// One pass over `autoplaced`: parallel evaluation in batches of [`BATCH`],
/// then serial replay of accepted proposals in deterministic order.
#[allow(clippy::too_many_arguments)]
fn run_batches(
    shared: &PlacerShared,
    slots: &[WorkerSlot],
    board_lock: &RwLock<Board>,
    autoplaced: &mut [CellId],
    rng: &mut DeterministicRng,
    mc: &mut MoveChangeData,
    n_move: &mut u64,
    n_accept: &mut u64,
) {
    rng.shuffle(autoplaced);
    let workers = slots.len();
    let mut lb = 0;
    while lb < autoplaced.len() {
        let ub = (lb + BATCH).min(autoplaced.len());
        let seed = rng.rng64();
        for (j, slot) in slots.iter().enumerate() {
            let jlb = lb + j * (ub - lb) / workers;
            let jub = lb + (j + 1) * (ub - lb) / workers;
            let mut s = slot.state.lock().unwrap();
            s.seed = seed;
            s.eval.clear();
            s.eval.extend(autoplaced[jlb..jub].iter().map(|&c| (c, None)));
            s.processed = false;
            s.ready = true;
            drop(s);
            slot.cv.notify_all();
        }
        for slot in slots {
            let mut s = slot.state.lock().unwrap();
            while !s.processed {
                s = slot.cv.wait(s).unwrap();
            }
        }
        // Replay accepted proposals for real, in worker-then-index order.
        let mut guard = board_lock.write().unwrap();
        let board = &mut *guard;
        for slot in slots {
            let s = slot.state.lock().unwrap();
            *n_move += s.moves;
            *n_accept += s.accepted;
            for &(cell, proposal) in &s.eval {
                if let Some(bel) = proposal {
                    if board.netlist.cell(cell).bel != Some(bel) {
                        shared.try_swap_position(board, rng, mc, cell, bel);
                    }
                }
            }
        }
        lb = ub;
    }
}

/// Runs placement. With `refine=false` this is the full flow (constraint
/// pass, initial placement, annealing); with `refine=true` it refines an
/// existing placement from a near-zero temperature.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &PlacerConfig,
    timing: &dyn TimingEstimator,
    interner: &Interner,
    sink: &DiagnosticSink,
    refine: bool,
) -> PnrResult<()> {
    // The dense udata indices belong to this subsystem; stash the caller's.
    let old_udata: Vec<u32> = netlist.nets.iter().map(|n| n.udata).collect();
    for (i, net) in netlist.nets.iter_mut().enumerate() {
        net.udata = i as u32;
    }
    let result = run_inner(netlist, arch, cfg, timing, interner, sink, refine);
    for (i, net) in netlist.nets.iter_mut().enumerate() {
        net.udata = old_udata[i];
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn run_inner(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &PlacerConfig,
    timing: &dyn TimingEstimator,
    interner: &Interner,
    sink: &DiagnosticSink,
    refine: bool,
) -> PnrResult<()> {
    let mut rng = DeterministicRng::new(cfg.seed);
    let fast_bels = FastBels::build(arch, cfg.min_bels_for_grid_pick);
    let (max_x, max_y) = (fast_bels.max_x, fast_bels.max_y);
    let mut diameter = max_x.max(max_y) + 1;
    let mut locked_bels = HashSet::new();
    let mut autoplaced: Vec<CellId> = Vec::new();
    let mut chain_basis: Vec<CellId> = Vec::new();
    let mut require_legal = true;

    let cell_ids: Vec<CellId> = netlist.cells.iter().map(|c| c.id).collect();
    if !refine {
        // Bind user-pinned cells first and lock their bels.
        let mut placed_cells = 0usize;
        for &cid in &cell_ids {
            let Some(pin) = netlist.cell(cid).pinned_bel else {
                continue;
            };
            let cell_name = interner.resolve(netlist.cell(cid).name).to_string();
            let bel_name = interner.resolve(pin).to_string();
            let Some(bel) = arch.bel_by_name(pin) else {
                return Err(PnrError::UnknownPinnedBel {
                    cell: cell_name,
                    bel: bel_name,
                });
            };
            let cell_type = netlist.cell(cid).ty;
            if arch.bel_type(bel) != cell_type {
                return Err(PnrError::PinnedBelTypeMismatch {
                    bel: bel_name,
                    bel_type: interner.resolve(arch.bel_type(bel)).to_string(),
                    cell: cell_name,
                    cell_type: interner.resolve(cell_type).to_string(),
                });
            }
            if !arch.is_valid_bel_for_cell(cell_type, bel) {
                return Err(PnrError::PinnedBelInvalid {
                    bel: bel_name,
                    cell: cell_name,
                });
            }
            if let Some(other) = arch.bound_bel_cell(bel) {
                return Err(PnrError::PinnedBelOccupied {
                    cell: cell_name,
                    bel: bel_name,
                    other: interner.resolve(netlist.cell(other).name).to_string(),
                });
            }
            netlist.bind_bel(arch, cid, bel, BindStrength::User);
            locked_bels.insert(bel);
            placed_cells += 1;
        }
        sink.note(
            code(1),
            format!("placed {placed_cells} cells based on constraints"),
        );
        arch.yield_point();

        for &cid in &cell_ids {
            if netlist.cell(cid).bel.is_none() {
                autoplaced.push(cid);
            }
        }
        autoplaced.sort_by_key(|&c| netlist.cell(c).name);
        rng.shuffle(&mut autoplaced);

        let iplace_start = Instant::now();
        sink.note(
            code(2),
            format!(
                "creating initial placement for remaining {} cells",
                autoplaced.len()
            ),
        );
        for (done, &cid) in autoplaced.iter().enumerate() {
            place_initial(arch, netlist, interner, &mut rng, cid)?;
            if (done + 1) % 500 == 0 {
                sink.note(
                    code(3),
                    format!(
                        "  initial placement placed {}/{} cells",
                        done + 1,
                        autoplaced.len()
                    ),
                );
            }
        }
        if cfg.budget_based && cfg.slack_redist_iter > 0 {
            timing.assign_budgets(netlist, arch);
        }
        arch.yield_point();
        sink.note(
            code(4),
            format!(
                "initial placement time {:.02}s",
                iplace_start.elapsed().as_secs_f32()
            ),
        );
        sink.note(code(5), "running simulated annealing placer".to_string());
    } else {
        for &cid in &cell_ids {
            let c = netlist.cell(cid);
            if c.bel_strength > BindStrength::Strong {
                continue;
            } else if c.constr_parent.is_some() {
                continue;
            } else if !c.constr_children.is_empty() || c.constr_z.is_some() {
                chain_basis.push(cid);
            } else {
                autoplaced.push(cid);
            }
        }
        // Refinement expects a placed design; pick up any stragglers.
        for &cid in &cell_ids {
            if netlist.cell(cid).bel.is_none() {
                place_initial(arch, netlist, interner, &mut rng, cid)?;
            }
        }
        require_legal = false;
        diameter = 3;
    }

    let saplace_start = Instant::now();

    let mut region_bounds = HashMap::new();
    for region in &netlist.regions {
        let bb = match &region.bels {
            Some(bels) => {
                let mut bb: Option<BoundingBox> = None;
                for &bel in bels {
                    let loc = arch.bel_location(bel);
                    match &mut bb {
                        Some(bb) => bb.extend(loc.x, loc.y),
                        None => bb = Some(BoundingBox::point(loc.x, loc.y)),
                    }
                }
                bb.unwrap_or_default()
            }
            None => BoundingBox::new(0, 0, max_x, max_y),
        };
        region_bounds.insert(region.id, bb);
    }

    let mut port_user_index = HashMap::new();
    for net in &netlist.nets {
        for (i, user) in net.users.iter().enumerate() {
            port_user_index.insert((user.cell, user.port), i);
        }
    }
    let model = CostModel {
        arch,
        cfg,
        net_by_udata: netlist.nets.iter().map(|n| n.id).collect(),
        port_user_index,
    };

    let mut costs = CostState::new(netlist);
    if !cfg.budget_based {
        costs.net_crit = timing.criticalities(netlist, arch);
    }
    model.setup_costs(netlist, &mut costs);
    costs.curr_wirelen_cost = costs.total_wirelen_cost();
    costs.curr_timing_cost = costs.total_timing_cost();
    costs.last_wirelen_cost = costs.curr_wirelen_cost as f64;
    costs.last_timing_cost = costs.curr_timing_cost;

    let mut avg_wirelen = costs.curr_wirelen_cost as f64;
    let mut min_wirelen = costs.curr_wirelen_cost;
    let mut n_no_progress = 0;

    let shared = PlacerShared {
        arch,
        cfg,
        model,
        fast_bels,
        region_bounds,
        locked_bels,
    };

    let temp = if refine { 1e-7 } else { cfg.start_temp };
    let mut result = Ok(());
    {
        let board_lock = RwLock::new(Board {
            netlist: &mut *netlist,
            costs,
            temp,
            diameter,
        });
        let slots: Vec<WorkerSlot> = (0..cfg.threads.max(1)).map(|_| WorkerSlot::new()).collect();
        let shared_ref = &shared;
        let board_ref = &board_lock;

        std::thread::scope(|s| {
            for slot in &slots {
                s.spawn(move || worker_loop(shared_ref, board_ref, slot));
            }

            let mut mc = {
                let board = board_lock.read().unwrap();
                MoveChangeData::new(board.netlist)
            };
            let mut iter = 1u32;
            loop {
                let mut n_move = 0u64;
                let mut n_accept = 0u64;
                let mut improved = false;

                if iter % 5 == 0 || iter == 1 {
                    let board = board_lock.read().unwrap();
                    sink.note(
                        code(6),
                        format!(
                            "  at iteration #{iter}: temp = {:.6}, timing cost = {:.0}, wirelen = {}",
                            board.temp, board.costs.curr_timing_cost, board.costs.curr_wirelen_cost
                        ),
                    );
                }

                for _ in 0..15 {
                    run_batches(
                        shared_ref,
                        &slots,
                        board_ref,
                        &mut autoplaced,
                        &mut rng,
                        &mut mc,
                        &mut n_move,
                        &mut n_accept,
                    );
                    if !chain_basis.is_empty() {
                        let mut guard = board_lock.write().unwrap();
                        let board = &mut *guard;
                        for i in 0..chain_basis.len() {
                            let cb = chain_basis[i];
                            let Some(bel) = board.netlist.cell(cb).bel else {
                                continue;
                            };
                            let base_z = shared.arch.bel_location(bel).z;
                            let try_base = shared.random_bel_for_cell(
                                board.netlist,
                                board.diameter,
                                cb,
                                &mut rng,
                                Some(base_z),
                            );
                            if let Some(try_base) = try_base {
                                if try_base != bel {
                                    shared.try_swap_chain(
                                        board,
                                        &mut rng,
                                        &mut mc,
                                        cb,
                                        try_base,
                                        &mut n_move,
                                        &mut n_accept,
                                    );
                                }
                            }
                        }
                    }
                }

                let mut guard = board_lock.write().unwrap();
                let board = &mut *guard;

                if board.costs.curr_wirelen_cost < min_wirelen {
                    min_wirelen = board.costs.curr_wirelen_cost;
                    improved = true;
                }
                if improved {
                    n_no_progress = 0;
                } else {
                    n_no_progress += 1;
                }
                if board.temp <= 1e-7 && n_no_progress >= if refine { 1 } else { 5 } {
                    sink.note(
                        code(6),
                        format!(
                            "  at iteration #{iter}: temp = {:.6}, timing cost = {:.0}, wirelen = {}",
                            board.temp, board.costs.curr_timing_cost, board.costs.curr_wirelen_cost
                        ),
                    );
                    break;
                }

                let raccept = n_accept as f64 / (n_move.max(1)) as f64;
                let m_dim = max_x.max(max_y) + 1;
                if (board.costs.curr_wirelen_cost as f64) < 0.95 * avg_wirelen {
                    avg_wirelen = 0.8 * avg_wirelen + 0.2 * board.costs.curr_wirelen_cost as f64;
                } else {
                    let diam_next = f64::from(board.diameter) * (1.0 - 0.44 + raccept);
                    board.diameter = ((diam_next + 0.5) as i32).clamp(1, m_dim);
                    board.temp *= if raccept > 0.96 {
                        0.5
                    } else if raccept > 0.8 {
                        0.9
                    } else if raccept > 0.15 && board.diameter > 1 {
                        0.95
                    } else {
                        0.8
                    };
                }

                // Once cooled below the legalise threshold, run legalisation
                // and require legal moves from here on.
                if board.diameter < LEGALISE_DIA && require_legal {
                    match legalise::legalise_relative_constraints(
                        &shared,
                        board.netlist,
                        interner,
                        &mut rng,
                    ) {
                        Ok(moved_any) => {
                            if moved_any {
                                sink.note(
                                    code(10),
                                    "legalised relative constraints, replacing displaced cells",
                                );
                                autoplaced.clear();
                                chain_basis.clear();
                                for &cid in &cell_ids {
                                    let c = board.netlist.cell(cid);
                                    if c.bel_strength <= BindStrength::Strong
                                        && c.constr_parent.is_none()
                                        && !c.constr_children.is_empty()
                                    {
                                        chain_basis.push(cid);
                                    } else if c.bel_strength < BindStrength::Strong {
                                        autoplaced.push(cid);
                                    }
                                }
                                rng.shuffle(&mut autoplaced);
                                if cfg.budget_based && cfg.slack_redist_iter > 0 {
                                    timing.assign_budgets(board.netlist, arch);
                                }
                            }
                        }
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                    require_legal = false;
                } else if cfg.budget_based
                    && cfg.slack_redist_iter > 0
                    && iter as usize % cfg.slack_redist_iter == 0
                {
                    timing.assign_budgets(board.netlist, arch);
                }

                if !cfg.budget_based {
                    board.costs.net_crit = timing.criticalities(board.netlist, arch);
                }
                // Rebuild costs after criticality changes, and recompute the
                // totals from scratch to flush accumulated rounding error.
                shared.model.setup_costs(board.netlist, &mut board.costs);
                board.costs.curr_wirelen_cost = board.costs.total_wirelen_cost();
                board.costs.curr_timing_cost = board.costs.total_timing_cost();
                board.costs.last_wirelen_cost = board.costs.curr_wirelen_cost as f64;
                board.costs.last_timing_cost = board.costs.curr_timing_cost;
                drop(guard);
                arch.yield_point();
                iter += 1;
            }

            for slot in &slots {
                let mut s = slot.state.lock().unwrap();
                s.die = true;
                drop(s);
                slot.cv.notify_all();
            }
        });
    }
    result?;

    sink.note(
        code(7),
        format!(
            "SA placement time {:.02}s",
            saplace_start.elapsed().as_secs_f32()
        ),
    );

    // Final post-placement validity check.
    arch.yield_point();
    for &bel in arch.bels() {
        if !arch.is_bel_location_valid(bel) {
            let context = match arch.bound_bel_cell(bel) {
                Some(c) => format!("cell '{}'", interner.resolve(netlist.cell(c).name)),
                None => "no cell".to_string(),
            };
            let bel_name = interner.resolve(arch.bel_name(bel)).to_string();
            if cfg.force {
                sink.emit(Diagnostic::warning(
                    code(8),
                    format!("post-placement validity check failed for bel '{bel_name}' ({context})"),
                ));
            } else {
                return Err(PnrError::PostPlacementCheck {
                    bel: bel_name,
                    context,
                });
            }
        }
    }
    for &cid in &cell_ids {
        if shared.constraints_distance(netlist, cid) != 0 {
            let c = netlist.cell(cid);
            return Err(PnrError::ConstraintUnsatisfied {
                cell: interner.resolve(c.name).to_string(),
                bel: c
                    .bel
                    .map(|b| interner.resolve(arch.bel_name(b)).to_string())
                    .unwrap_or_else(|| "<unplaced>".to_string()),
            });
        }
    }
    sink.note(code(9), format!("checksum: {:#018x}", arch.checksum()));
    Ok(())
}
