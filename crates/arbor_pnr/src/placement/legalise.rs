//! Chain legalisation.
//!
//! Annealing treats chain constraints as a soft cost; once the search
//! diameter has cooled below the legalise threshold, this pass places every
//! chain rigidly (all members in one tile column at their required z slots)
//! and binds them strongly so later moves cannot tear them apart. Displaced
//! cells are re-placed through the initial placer.

use crate::data::Netlist;
use crate::error::{PnrError, PnrResult};
use crate::placement::anneal::{place_initial, PlacerShared};
use arbor_arch::{Architecture, BindStrength, CellId, Loc};
use arbor_common::{DeterministicRng, InternalError, Interner};

fn collect_chain(netlist: &Netlist, cell: CellId, out: &mut Vec<CellId>) {
    out.push(cell);
    for &child in &netlist.cell(cell).constr_children {
        collect_chain(netlist, child, out);
    }
}

/// Moves every constraint-violating chain to a base tile where the whole
/// chain fits, binding members strongly. Returns whether anything moved.
pub(crate) fn legalise_relative_constraints(
    shared: &PlacerShared,
    netlist: &mut Netlist,
    interner: &Interner,
    rng: &mut DeterministicRng,
) -> PnrResult<bool> {
    let arch = shared.arch;
    let roots: Vec<CellId> = netlist
        .cells
        .iter()
        .filter(|c| {
            c.constr_parent.is_none() && (!c.constr_children.is_empty() || c.constr_z.is_some())
        })
        .map(|c| c.id)
        .collect();

    let mut moved_any = false;
    for root in roots {
        let mut members = Vec::new();
        collect_chain(netlist, root, &mut members);
        let legal = members.iter().all(|&m| {
            netlist.cell(m).bel.is_some() && shared.constraints_distance(netlist, m) == 0
        });
        if legal {
            continue;
        }

        let want_z: Vec<i32> = members
            .iter()
            .enumerate()
            .map(|(i, &m)| netlist.cell(m).constr_z.unwrap_or(i as i32))
            .collect();
        let root_loc = netlist
            .cell(root)
            .bel
            .map(|b| arch.bel_location(b))
            .unwrap_or_default();
        let ty = netlist.cell(root).ty;

        // Nearest tile where every member's slot is usable.
        let mut best: Option<(i32, (i32, i32))> = None;
        for x in 0..=shared.fast_bels.max_x {
            for y in 0..=shared.fast_bels.max_y {
                let usable = members.iter().zip(&want_z).all(|(&m, &z)| {
                    let Some(bel) = arch.bel_by_location(Loc::new(x, y, z)) else {
                        return false;
                    };
                    if arch.bel_type(bel) != ty
                        || !shared.check_cell_bel_region(netlist, m, bel)
                        || shared.locked_bels.contains(&bel)
                    {
                        return false;
                    }
                    match arch.bound_bel_cell(bel) {
                        Some(b) if !members.contains(&b) => {
                            arch.bel_bind_strength(bel) < BindStrength::Strong
                                && !netlist.cell(b).is_constrained()
                        }
                        _ => true,
                    }
                });
                if usable {
                    let dist = (x - root_loc.x).abs() + (y - root_loc.y).abs();
                    if best.map_or(true, |(d, _)| dist < d) {
                        best = Some((dist, (x, y)));
                    }
                }
            }
        }
        let Some((_, (tx, ty_))) = best else {
            let c = netlist.cell(root);
            return Err(PnrError::Unplaceable {
                cell: interner.resolve(c.name).to_string(),
                cell_type: interner.resolve(c.ty).to_string(),
            });
        };

        // Free the chain's current bels first so members can land on each
        // other's old slots.
        for &m in &members {
            if netlist.cell(m).bel.is_some() {
                netlist.unbind_bel(arch, m);
            }
        }
        let mut displaced: Vec<CellId> = Vec::new();
        for (&m, &z) in members.iter().zip(&want_z) {
            let Some(bel) = arch.bel_by_location(Loc::new(tx, ty_, z)) else {
                return Err(InternalError::new(format!(
                    "no bel at chain legalisation target ({tx}, {ty_}, {z})"
                ))
                .into());
            };
            if let Some(b) = arch.bound_bel_cell(bel) {
                netlist.unbind_bel(arch, b);
                displaced.push(b);
            }
            netlist.bind_bel(arch, m, bel, BindStrength::Strong);
        }
        for d in displaced {
            place_initial(arch, netlist, interner, rng, d)?;
        }
        moved_any = true;
    }
    Ok(moved_any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::cost::CostModel;
    use crate::placement::fast_bels::FastBels;
    use crate::placement::PlacerConfig;
    use arbor_arch::{Architecture, GridArch};
    use std::collections::{HashMap, HashSet};

    fn make_shared<'a>(arch: &'a GridArch, cfg: &'a PlacerConfig) -> PlacerShared<'a> {
        PlacerShared {
            arch,
            cfg,
            model: CostModel {
                arch,
                cfg,
                net_by_udata: Vec::new(),
                port_user_index: HashMap::new(),
            },
            fast_bels: FastBels::build(arch, cfg.min_bels_for_grid_pick),
            region_bounds: HashMap::new(),
            locked_bels: HashSet::new(),
        }
    }

    #[test]
    fn scattered_chain_is_gathered() {
        let interner = Interner::new();
        // 4 slots per tile: z 0 and 2 are LUTs.
        let arch = GridArch::new(&interner, 4, 4, 4, 1);
        let cfg = PlacerConfig {
            min_bels_for_grid_pick: 1,
            ..PlacerConfig::default()
        };
        let mut nl = Netlist::new();
        let root = nl.add_cell(interner.get_or_intern("c0"), arch.lut_type());
        let child = nl.add_cell(interner.get_or_intern("c1"), arch.lut_type());
        nl.chain(root, child, 2);
        nl.cell_mut(root).constr_z = Some(0);

        // Scatter the chain across tiles.
        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        nl.bind_bel(&arch, root, b(0, 0, 0), BindStrength::Weak);
        nl.bind_bel(&arch, child, b(3, 3, 2), BindStrength::Weak);

        let shared = make_shared(&arch, &cfg);
        let mut rng = DeterministicRng::new(1);
        let moved =
            legalise_relative_constraints(&shared, &mut nl, &interner, &mut rng).unwrap();
        assert!(moved);

        let root_loc = arch.bel_location(nl.cell(root).bel.unwrap());
        let child_loc = arch.bel_location(nl.cell(child).bel.unwrap());
        assert_eq!((root_loc.x, root_loc.y), (child_loc.x, child_loc.y));
        assert_eq!(root_loc.z, 0);
        assert_eq!(child_loc.z, 2);
        assert_eq!(nl.cell(root).bel_strength, BindStrength::Strong);
        assert_eq!(shared.constraints_distance(&nl, child), 0);
    }

    #[test]
    fn legal_chain_is_left_alone() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 4, 1);
        let cfg = PlacerConfig::default();
        let mut nl = Netlist::new();
        let root = nl.add_cell(interner.get_or_intern("c0"), arch.lut_type());
        let child = nl.add_cell(interner.get_or_intern("c1"), arch.lut_type());
        nl.chain(root, child, 2);
        nl.cell_mut(root).constr_z = Some(0);
        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        nl.bind_bel(&arch, root, b(1, 1, 0), BindStrength::Strong);
        nl.bind_bel(&arch, child, b(1, 1, 2), BindStrength::Strong);

        let shared = make_shared(&arch, &cfg);
        let mut rng = DeterministicRng::new(1);
        let moved =
            legalise_relative_constraints(&shared, &mut nl, &interner, &mut rng).unwrap();
        assert!(!moved);
        assert_eq!(
            arch.bel_location(nl.cell(root).bel.unwrap()),
            Loc::new(1, 1, 0)
        );
    }

    #[test]
    fn occupants_are_displaced_not_lost() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 2, 2, 4, 1);
        let cfg = PlacerConfig::default();
        let mut nl = Netlist::new();
        let root = nl.add_cell(interner.get_or_intern("c0"), arch.lut_type());
        let child = nl.add_cell(interner.get_or_intern("c1"), arch.lut_type());
        nl.chain(root, child, 2);
        nl.cell_mut(root).constr_z = Some(0);
        let squatter = nl.add_cell(interner.get_or_intern("s"), arch.lut_type());

        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        nl.bind_bel(&arch, root, b(0, 0, 0), BindStrength::Weak);
        nl.bind_bel(&arch, squatter, b(0, 0, 2), BindStrength::Weak);
        nl.bind_bel(&arch, child, b(1, 1, 2), BindStrength::Weak);

        let shared = make_shared(&arch, &cfg);
        let mut rng = DeterministicRng::new(1);
        legalise_relative_constraints(&shared, &mut nl, &interner, &mut rng).unwrap();

        // All three cells placed, chain together, squatter somewhere legal.
        assert!(nl.is_fully_placed());
        let root_loc = arch.bel_location(nl.cell(root).bel.unwrap());
        let child_loc = arch.bel_location(nl.cell(child).bel.unwrap());
        assert_eq!((root_loc.x, root_loc.y), (child_loc.x, child_loc.y));
        assert_ne!(nl.cell(squatter).bel, nl.cell(child).bel);
    }
}
