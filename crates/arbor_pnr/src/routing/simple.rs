//! First-generation rip-up router.
//!
//! Routes one net at a time with a delay-driven Dijkstra search, binding
//! directly through the architecture (no soft state). Nets that fail in the
//! first pass are retried in rip-up mode, where occupied wires and pips cost
//! a fixed penalty and any conflicting net encountered on the final path is
//! torn out and re-queued. Kept as a fallback and as a reference point for
//! the negotiated router.

use crate::data::Netlist;
use crate::error::{PnrError, PnrResult};
use arbor_arch::{Architecture, BindStrength, NetId, PipId, WireId};
use arbor_common::{InternalError, Interner};
use arbor_diagnostics::{Category, DiagnosticCode, DiagnosticSink};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

fn code(n: u16) -> DiagnosticCode {
    DiagnosticCode::new(Category::Routing, n)
}

/// Configuration for the simple rip-up router.
#[derive(Debug, Clone)]
pub struct SimpleRouterConfig {
    /// Added cost of an occupied pip in rip-up mode, in nanoseconds.
    pub ripup_pip_penalty_ns: f64,
    /// Added cost of an occupied wire in rip-up mode, in nanoseconds.
    pub ripup_wire_penalty_ns: f64,
}

impl Default for SimpleRouterConfig {
    fn default() -> Self {
        Self {
            ripup_pip_penalty_ns: 5.0,
            ripup_wire_penalty_ns: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct QueuedWire {
    wire: WireId,
    pip: Option<PipId>,
    delay: f64,
    togo: f64,
}

impl PartialEq for QueuedWire {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedWire {}

impl Ord for QueuedWire {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap on estimated total delay.
        (other.delay + other.togo)
            .partial_cmp(&(self.delay + self.togo))
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for QueuedWire {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct RouteAttempt {
    routed_ok: bool,
    ripped: Vec<NetId>,
    visits: usize,
    revisits: usize,
    max_delay: f64,
}

fn missing_pin(netlist: &Netlist, interner: &Interner, cell: arbor_arch::CellId, port: arbor_common::Ident) -> PnrError {
    PnrError::MissingPinWire {
        cell: interner.resolve(netlist.cell(cell).name).to_string(),
        port: interner.resolve(port).to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn route_net_once(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &SimpleRouterConfig,
    interner: &Interner,
    net_id: NetId,
    ripup: bool,
) -> PnrResult<RouteAttempt> {
    let mut attempt = RouteAttempt {
        routed_ok: false,
        ripped: Vec::new(),
        visits: 0,
        revisits: 0,
        max_delay: 0.0,
    };

    let net = netlist.net(net_id);
    let Some(driver) = net.driver else {
        // Nothing to route on an undriven net.
        attempt.routed_ok = true;
        return Ok(attempt);
    };
    let users = net.users.clone();
    let Some(src_bel) = netlist.cell(driver.cell).bel else {
        return Err(missing_pin(netlist, interner, driver.cell, driver.port));
    };
    let Some(src_wire) = arch.bel_pin_wire(src_bel, driver.port) else {
        return Err(missing_pin(netlist, interner, driver.cell, driver.port));
    };

    // Claim the source wire up front; in rip-up mode a route-through by
    // another net is evicted first.
    if !arch.check_wire_avail(src_wire) {
        match arch.bound_wire_net(src_wire) {
            Some(other) if other != net_id && ripup => {
                netlist.ripup_net(arch, other);
                attempt.ripped.push(other);
            }
            Some(other) if other != net_id => return Ok(attempt),
            _ => {}
        }
    }
    let mut src_wires: HashMap<WireId, f64> = HashMap::new();
    src_wires.insert(src_wire, 0.0);
    netlist.bind_wire(arch, net_id, src_wire, BindStrength::Weak);

    for user in &users {
        let Some(dst_bel) = netlist.cell(user.cell).bel else {
            return Err(missing_pin(netlist, interner, user.cell, user.port));
        };
        let Some(dst_wire) = arch.bel_pin_wire(dst_bel, user.port) else {
            return Err(missing_pin(netlist, interner, user.cell, user.port));
        };

        let mut visited: HashMap<WireId, QueuedWire> = HashMap::new();
        let mut queue: BinaryHeap<QueuedWire> = BinaryHeap::new();
        for (&wire, &delay) in &src_wires {
            let qw = QueuedWire {
                wire,
                pip: None,
                delay,
                togo: arch.estimate_delay(wire, dst_wire).ns(),
            };
            visited.insert(wire, qw);
            queue.push(qw);
        }

        'search: while let Some(qw) = queue.pop() {
            attempt.visits += 1;
            for &pip in arch.pips_downhill(qw.wire) {
                let mut next_delay = qw.delay;
                if !arch.check_pip_avail(pip) {
                    if ripup {
                        next_delay += cfg.ripup_pip_penalty_ns;
                    } else {
                        continue;
                    }
                }
                let next_wire = arch.pip_dst_wire(pip);
                next_delay += arch.pip_delay(pip).ns();

                if let Some(prev) = visited.get(&next_wire) {
                    if prev.delay <= next_delay + 1e-3 {
                        continue;
                    }
                    attempt.revisits += 1;
                }
                if !arch.check_wire_avail(next_wire) && arch.bound_wire_net(next_wire) != Some(net_id) {
                    if ripup {
                        next_delay += cfg.ripup_wire_penalty_ns;
                    } else {
                        continue;
                    }
                }
                let next_qw = QueuedWire {
                    wire: next_wire,
                    pip: Some(pip),
                    delay: next_delay,
                    togo: arch.estimate_delay(next_wire, dst_wire).ns(),
                };
                visited.insert(next_wire, next_qw);
                queue.push(next_qw);
                if next_wire == dst_wire {
                    break 'search;
                }
            }
        }

        if !visited.contains_key(&dst_wire) {
            // Failed to reach this sink: release everything and report.
            netlist.ripup_net(arch, net_id);
            return Ok(attempt);
        }
        attempt.max_delay = attempt.max_delay.max(visited[&dst_wire].delay);

        // Bind the path from sink back to the existing tree, evicting any
        // conflicting nets encountered along the way.
        let mut cursor = dst_wire;
        while !src_wires.contains_key(&cursor) {
            let Some(pip) = visited.get(&cursor).and_then(|qw| qw.pip) else {
                return Err(InternalError::new(format!(
                    "search state lost the driving pip for wire {cursor} while binding a path"
                ))
                .into());
            };
            if let Some(other) = arch.bound_wire_net(cursor) {
                if other != net_id {
                    debug_assert!(ripup);
                    netlist.ripup_net(arch, other);
                    attempt.ripped.push(other);
                }
            }
            if let Some(other) = arch.bound_pip_net(pip) {
                if other != net_id {
                    debug_assert!(ripup);
                    netlist.ripup_net(arch, other);
                    attempt.ripped.push(other);
                }
            }
            netlist.bind_pip(arch, net_id, pip, BindStrength::Weak);
            src_wires.insert(cursor, arch.pip_delay(pip).ns());
            cursor = arch.pip_src_wire(pip);
        }
    }

    attempt.routed_ok = true;
    Ok(attempt)
}

/// Routes every unrouted net with the rip-up Dijkstra router.
pub fn route(
    netlist: &mut Netlist,
    arch: &dyn Architecture,
    cfg: &SimpleRouterConfig,
    interner: &Interner,
    sink: &DiagnosticSink,
) -> PnrResult<()> {
    let mut nets_queue: BTreeSet<NetId> = netlist
        .nets
        .iter()
        .filter(|n| n.driver.is_some() && n.wires.is_empty() && !n.is_global)
        .map(|n| n.id)
        .collect();

    if nets_queue.is_empty() {
        sink.note(code(10), "found no unrouted nets, no routing necessary");
        return Ok(());
    }
    sink.note(
        code(11),
        format!(
            "found {} unrouted nets, starting routing procedure",
            nets_queue.len()
        ),
    );

    let mut max_delay = 0.0f64;
    while !nets_queue.is_empty() {
        let mut visits = 0;
        let mut revisits = 0;
        let mut ripup_queue: BTreeSet<NetId> = BTreeSet::new();

        let pass: Vec<NetId> = nets_queue.iter().copied().collect();
        nets_queue.clear();
        for net_id in pass {
            let attempt = route_net_once(netlist, arch, cfg, interner, net_id, false)?;
            visits += attempt.visits;
            revisits += attempt.revisits;
            if attempt.routed_ok {
                max_delay = max_delay.max(attempt.max_delay);
            } else {
                ripup_queue.insert(net_id);
            }
        }
        sink.note(
            code(12),
            format!(
                "routing pass visited {visits} wires ({:.2}% revisits)",
                100.0 * revisits as f64 / visits.max(1) as f64
            ),
        );

        if !ripup_queue.is_empty() {
            sink.note(
                code(13),
                format!(
                    "failed to route {} nets, re-routing in ripup mode",
                    ripup_queue.len()
                ),
            );
            let mut rip_cnt = 0;
            for net_id in ripup_queue {
                let attempt = route_net_once(netlist, arch, cfg, interner, net_id, true)?;
                if !attempt.routed_ok {
                    return Err(PnrError::UnroutableNet {
                        net: interner.resolve(netlist.net(net_id).name).to_string(),
                    });
                }
                max_delay = max_delay.max(attempt.max_delay);
                rip_cnt += attempt.ripped.len();
                for r in attempt.ripped {
                    nets_queue.insert(r);
                }
            }
            sink.note(
                code(14),
                format!(
                    "ripped up {rip_cnt} previously routed nets, continue routing ({} queued)",
                    nets_queue.len()
                ),
            );
        }
    }
    sink.note(
        code(15),
        format!("routing complete, longest path delay: {max_delay:.2}"),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_arch::{GridArch, Loc, PinDir};

    fn placed_design(interner: &Interner, arch: &GridArch) -> Netlist {
        let mut nl = Netlist::new();
        let o = interner.get_or_intern("O");
        let d = interner.get_or_intern("D");
        let b = |x, y, z| arch.bel_by_location(Loc::new(x, y, z)).unwrap();
        for k in 0..3 {
            let lut = nl.add_cell(
                interner.get_or_intern(&format!("lut_{k}")),
                arch.lut_type(),
            );
            let ff = nl.add_cell(interner.get_or_intern(&format!("ff_{k}")), arch.ff_type());
            let net = nl.add_net(interner.get_or_intern(&format!("n_{k}")));
            nl.connect(lut, o, PinDir::Output, net);
            nl.connect(ff, d, PinDir::Input, net);
            nl.bind_bel(arch, lut, b(k, 0, 0), BindStrength::Weak);
            nl.bind_bel(arch, ff, b(k, 2, 1), BindStrength::Weak);
        }
        nl
    }

    #[test]
    fn routes_placed_design() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 2, 2);
        let mut nl = placed_design(&interner, &arch);
        let sink = DiagnosticSink::new();
        route(&mut nl, &arch, &SimpleRouterConfig::default(), &interner, &sink).unwrap();
        assert!(nl.is_fully_routed());

        // Each tree walks back to its own source wire through bound pips.
        for net in &nl.nets {
            let driver = net.driver.unwrap();
            let src_bel = nl.cell(driver.cell).bel.unwrap();
            let src = arch.bel_pin_wire(src_bel, driver.port).unwrap();
            for user in &net.users {
                let dst_bel = nl.cell(user.cell).bel.unwrap();
                let mut cursor = arch.bel_pin_wire(dst_bel, user.port).unwrap();
                while cursor != src {
                    let nw = net.wires[&cursor];
                    assert_eq!(arch.bound_wire_net(cursor), Some(net.id));
                    cursor = arch.pip_src_wire(nw.pip.unwrap());
                }
            }
        }
    }

    #[test]
    fn already_routed_nets_are_skipped() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 4, 4, 2, 2);
        let mut nl = placed_design(&interner, &arch);
        let sink = DiagnosticSink::new();
        route(&mut nl, &arch, &SimpleRouterConfig::default(), &interner, &sink).unwrap();
        let before = arch.checksum();
        // A second run has nothing to do and changes nothing.
        route(&mut nl, &arch, &SimpleRouterConfig::default(), &interner, &sink).unwrap();
        assert_eq!(arch.checksum(), before);
    }

    #[test]
    fn empty_netlist_is_fine() {
        let interner = Interner::new();
        let arch = GridArch::new(&interner, 2, 2, 2, 1);
        let mut nl = Netlist::new();
        let sink = DiagnosticSink::new();
        route(&mut nl, &arch, &SimpleRouterConfig::default(), &interner, &sink).unwrap();
    }
}
