//! The consumed face of the external timing analyser.
//!
//! The placer does not run static timing analysis itself; it consumes a
//! per-arc criticality map refreshed between annealing iterations, or (in
//! budget mode) per-arc delay budgets. [`TimingEstimator`] is the interface
//! the host's analyser implements; [`FanoutEstimator`] is a lightweight
//! in-tree implementation for tests and standalone use.

use crate::data::Netlist;
use arbor_arch::{Architecture, BelPin, Delay, NetId};
use std::collections::HashMap;

/// Per-arc criticalities of one net, indexed like `net.users`.
#[derive(Debug, Clone, Default)]
pub struct NetCriticality {
    /// Normalised criticality in `[0, 1]` per user.
    pub criticality: Vec<f32>,
}

/// Criticality data for every net, keyed by net ID.
pub type NetCriticalityMap = HashMap<NetId, NetCriticality>;

/// The interface to an external timing analyser.
pub trait TimingEstimator: Send + Sync {
    /// Computes per-arc criticalities for the current placement.
    fn criticalities(&self, netlist: &Netlist, arch: &dyn Architecture) -> NetCriticalityMap;

    /// Redistributes slack, writing per-arc budgets into `net.users[..].budget`.
    fn assign_budgets(&self, netlist: &mut Netlist, arch: &dyn Architecture);
}

/// A placement-only estimator: criticality from normalised predicted arc
/// delay, budgets from an even split of the clock period.
#[derive(Debug, Clone)]
pub struct FanoutEstimator {
    /// The clock period used for budget distribution, in nanoseconds.
    pub clock_period_ns: f64,
}

impl Default for FanoutEstimator {
    fn default() -> Self {
        Self {
            clock_period_ns: 10.0,
        }
    }
}

impl FanoutEstimator {
    fn arc_delay(&self, netlist: &Netlist, arch: &dyn Architecture, net_idx: usize) -> Vec<f64> {
        let net = &netlist.nets[net_idx];
        let Some(driver) = &net.driver else {
            return vec![0.0; net.users.len()];
        };
        let Some(src_bel) = netlist.cell(driver.cell).bel else {
            return vec![0.0; net.users.len()];
        };
        let src = BelPin {
            bel: src_bel,
            pin: driver.port,
        };
        net.users
            .iter()
            .map(|user| match netlist.cell(user.cell).bel {
                Some(dst_bel) => arch
                    .predict_delay(
                        src,
                        BelPin {
                            bel: dst_bel,
                            pin: user.port,
                        },
                    )
                    .ns(),
                None => 0.0,
            })
            .collect()
    }
}

impl TimingEstimator for FanoutEstimator {
    fn criticalities(&self, netlist: &Netlist, arch: &dyn Architecture) -> NetCriticalityMap {
        let delays: Vec<Vec<f64>> = (0..netlist.nets.len())
            .map(|i| self.arc_delay(netlist, arch, i))
            .collect();
        let max_delay = delays
            .iter()
            .flat_map(|d| d.iter().copied())
            .fold(0.0f64, f64::max);

        let mut map = NetCriticalityMap::new();
        for (i, net) in netlist.nets.iter().enumerate() {
            if net.users.is_empty() {
                continue;
            }
            let crit = delays[i]
                .iter()
                .map(|&d| {
                    if max_delay > 0.0 {
                        (d / max_delay).clamp(0.0, 1.0) as f32
                    } else {
                        0.0
                    }
                })
                .collect();
            map.insert(net.id, NetCriticality { criticality: crit });
        }
        map
    }

    fn assign_budgets(&self, netlist: &mut Netlist, _arch: &dyn Architecture) {
        let budget = Delay::flat(self.clock_period_ns);
        for net in &mut netlist.nets {
            for user in &mut net.users {
                user.budget = budget;
            }
        }
    }
}
