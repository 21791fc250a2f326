//! Placement engine.
//!
//! Assigns every cell in the netlist to a legal bel of matching type. The
//! full flow ([`place`]) binds user-pinned cells, creates a random initial
//! placement, and refines it by parallel simulated annealing;
//! [`parallel_refine`] runs the annealing refinement alone on an
//! already-placed design, starting from a near-zero temperature.

pub(crate) mod anneal;
pub(crate) mod cost;
pub(crate) mod fast_bels;
pub(crate) mod legalise;

use crate::data::Netlist;
use crate::error::PnrResult;
use crate::timing::TimingEstimator;
use arbor_arch::Architecture;
use arbor_common::Interner;
use arbor_diagnostics::DiagnosticSink;

/// Balance between the timing and wirelength cost terms.
pub(crate) const LAMBDA: f64 = 0.5;
/// Exponent applied to arc criticality in the timing cost.
pub(crate) const CRIT_EXP: f64 = 8.0;
/// Search diameter below which chain legalisation triggers.
pub(crate) const LEGALISE_DIA: i32 = 4;

/// Configuration for the annealing placer.
#[derive(Debug, Clone)]
pub struct PlacerConfig {
    /// Bel types with fewer instances than this are picked without spatial
    /// locality.
    pub min_bels_for_grid_pick: usize,
    /// Nets with fanout at or above this skip per-arc timing cost.
    pub timing_fanout_thresh: usize,
    /// Initial annealing temperature for fresh placement.
    pub start_temp: f64,
    /// Use budget-based timing cost instead of criticality-based.
    pub budget_based: bool,
    /// Weight on region/chain constraint violation distance.
    pub constraint_weight: f64,
    /// Iterations between slack redistributions (budget mode; 0 disables).
    pub slack_redist_iter: usize,
    /// Master switch for the timing cost term.
    pub timing_driven: bool,
    /// Evaluator worker pool size.
    pub threads: usize,
    /// Seed for the deterministic rng.
    pub seed: u64,
    /// Downgrade post-placement validity failures to warnings.
    pub force: bool,
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            min_bels_for_grid_pick: 64,
            timing_fanout_thresh: 30,
            start_temp: 1.0,
            budget_based: false,
            constraint_weight: 10.0,
            slack_redist_iter: 0,
            timing_driven: true,
            threads: 8,
            seed: 0x4142_4F52_5F50_4E52,
            force: false,
        }
    }
}

/// Runs the full placement flow: constraint pass, deterministic random
/// initial placement, then simulated-annealing refinement.
pub fn place(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &PlacerConfig,
    timing: &dyn TimingEstimator,
    interner: &Interner,
    sink: &DiagnosticSink,
) -> PnrResult<()> {
    anneal::run(netlist, arch, cfg, timing, interner, sink, false)
}

/// Refines an existing placement with the parallel annealing engine,
/// starting cold so only improving or near-neutral moves survive.
pub fn parallel_refine(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &PlacerConfig,
    timing: &dyn TimingEstimator,
    interner: &Interner,
    sink: &DiagnosticSink,
) -> PnrResult<()> {
    anneal::run(netlist, arch, cfg, timing, interner, sink, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::FanoutEstimator;
    use arbor_arch::{BindStrength, GridArch, PinDir};

    fn build_ring(
        interner: &Interner,
        arch: &GridArch,
        n: usize,
    ) -> Netlist {
        // n LUT→FF pairs in a ring, enough structure for annealing to chew on.
        let mut nl = Netlist::new();
        let o = interner.get_or_intern("O");
        let d = interner.get_or_intern("D");
        let i0 = interner.get_or_intern("I0");
        let q = interner.get_or_intern("Q");
        let mut luts = Vec::new();
        let mut ffs = Vec::new();
        for k in 0..n {
            luts.push(nl.add_cell(interner.get_or_intern(&format!("lut_{k}")), arch.lut_type()));
            ffs.push(nl.add_cell(interner.get_or_intern(&format!("ff_{k}")), arch.ff_type()));
        }
        for k in 0..n {
            let ln = nl.add_net(interner.get_or_intern(&format!("lnet_{k}")));
            nl.connect(luts[k], o, PinDir::Output, ln);
            nl.connect(ffs[k], d, PinDir::Input, ln);
            let fn_ = nl.add_net(interner.get_or_intern(&format!("fnet_{k}")));
            nl.connect(ffs[k], q, PinDir::Output, fn_);
            nl.connect(luts[(k + 1) % n], i0, PinDir::Input, fn_);
        }
        nl
    }

    #[test]
    fn place_full_flow_places_everything() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 6, 6, 4, 2);
        let mut nl = build_ring(&interner, &arch, 12);
        let cfg = PlacerConfig {
            min_bels_for_grid_pick: 4,
            threads: 2,
            ..PlacerConfig::default()
        };
        let sink = DiagnosticSink::new();
        place(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();
        assert!(nl.is_fully_placed());
        assert!(!sink.has_errors());
        // Every cell sits on a bel of its own type.
        for cell in &nl.cells {
            let bel = cell.bel.unwrap();
            assert_eq!(arch.bel_type(bel), cell.ty);
        }
        // The arch's binding table already enforces one cell per bel;
        // cross-check that the cells claim distinct bels.
        let mut seen = std::collections::HashSet::new();
        for cell in &nl.cells {
            assert!(seen.insert(cell.bel.unwrap()));
        }
    }

    #[test]
    fn pinned_cell_stays_put() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 4, 1);
        let mut nl = build_ring(&interner, &arch, 4);
        let pinned = nl.cells[0].id;
        let bel = arch.bels()[0];
        nl.cell_mut(pinned).pinned_bel = Some(arch.bel_name(bel));

        let cfg = PlacerConfig {
            min_bels_for_grid_pick: 4,
            threads: 2,
            ..PlacerConfig::default()
        };
        let sink = DiagnosticSink::new();
        place(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();
        assert_eq!(nl.cell(pinned).bel, Some(bel));
        assert_eq!(nl.cell(pinned).bel_strength, BindStrength::User);
    }

    #[test]
    fn pinned_to_wrong_type_is_fatal() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 4, 1);
        let mut nl = build_ring(&interner, &arch, 2);
        // Pin a LUT cell onto an FF bel (z=1).
        let ff_bel = arch
            .bel_by_location(arbor_arch::Loc::new(0, 0, 1))
            .unwrap();
        let lut_cell = nl.cells[0].id;
        nl.cell_mut(lut_cell).pinned_bel = Some(arch.bel_name(ff_bel));

        let cfg = PlacerConfig {
            threads: 1,
            ..PlacerConfig::default()
        };
        let sink = DiagnosticSink::new();
        let err = place(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::PnrError::PinnedBelTypeMismatch { .. }
        ));
    }

    #[test]
    fn refine_improves_or_holds_wirelength() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 8, 8, 2, 1);
        let mut nl = build_ring(&interner, &arch, 16);
        let cfg = PlacerConfig {
            min_bels_for_grid_pick: 4,
            threads: 2,
            ..PlacerConfig::default()
        };
        let sink = DiagnosticSink::new();
        // Fresh placement first, then a refinement pass on top.
        place(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();
        parallel_refine(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();
        assert!(nl.is_fully_placed());
    }

    #[test]
    fn determinism_same_seed_same_checksum() {
        // Identical seeds and thread counts must give identical boards.
        let mut checksums = Vec::new();
        for _ in 0..2 {
            let interner = Interner::new();
            let arch = GridArch::new(&interner, 6, 6, 4, 1);
            let mut nl = build_ring(&interner, &arch, 10);
            let cfg = PlacerConfig {
                min_bels_for_grid_pick: 4,
                threads: 8,
                seed: 0x1234,
                ..PlacerConfig::default()
            };
            let sink = DiagnosticSink::new();
            place(
                &mut nl,
                &arch,
                &cfg,
                &FanoutEstimator::default(),
                &interner,
                &sink,
            )
            .unwrap();
            checksums.push(arch.checksum());
        }
        assert_eq!(checksums[0], checksums[1]);
    }

    #[test]
    fn region_constraint_is_respected() {
        // A cell constrained to columns 1..=2 never ends up outside them.
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 6, 6, 4, 1);
        let mut nl = build_ring(&interner, &arch, 6);
        let mut region_bels = std::collections::HashSet::new();
        for &bel in arch.bels() {
            let loc = arch.bel_location(bel);
            if loc.x >= 1 && loc.x <= 2 {
                region_bels.insert(bel);
            }
        }
        let region = nl.add_region(interner.get_or_intern("r0"), Some(region_bels));
        let constrained = nl.cells[0].id;
        nl.cell_mut(constrained).region = Some(region);

        let cfg = PlacerConfig {
            min_bels_for_grid_pick: 4,
            threads: 2,
            ..PlacerConfig::default()
        };
        let sink = DiagnosticSink::new();
        place(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();
        let loc = arch.bel_location(nl.cell(constrained).bel.unwrap());
        assert!((1..=2).contains(&loc.x));
    }

    #[test]
    fn chain_moves_are_atomic() {
        // After placement, a 4-cell chain sits at its required z slots in
        // one tile; no partial chain is ever observable at the end.
        let interner = Interner::new();
        // 8 slots per tile: z 0,2,4,6 are LUTs.
        let arch = GridArch::new(&interner, 4, 4, 8, 1);
        let mut nl = build_ring(&interner, &arch, 4);
        let root = nl.cells[0].id;
        nl.cell_mut(root).constr_z = Some(0);
        let mut prev = root;
        for (k, z) in [(1usize, 2i32), (2, 4), (3, 6)] {
            let c = nl.add_cell(
                interner.get_or_intern(&format!("chain_{k}")),
                arch.lut_type(),
            );
            nl.chain(prev, c, z);
            prev = c;
        }

        let cfg = PlacerConfig {
            min_bels_for_grid_pick: 4,
            threads: 2,
            ..PlacerConfig::default()
        };
        let sink = DiagnosticSink::new();
        place(
            &mut nl,
            &arch,
            &cfg,
            &FanoutEstimator::default(),
            &interner,
            &sink,
        )
        .unwrap();

        let locs: Vec<_> = nl
            .cells
            .iter()
            .filter(|c| c.is_constrained() || c.constr_z.is_some())
            .map(|c| arch.bel_location(c.bel.unwrap()))
            .collect();
        assert_eq!(locs.len(), 4);
        for l in &locs {
            assert_eq!((l.x, l.y), (locs[0].x, locs[0].y));
        }
        let mut zs: Vec<i32> = locs.iter().map(|l| l.z).collect();
        zs.sort_unstable();
        assert_eq!(zs, vec![0, 2, 4, 6]);
    }
}
