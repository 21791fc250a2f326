//! Core netlist data structures for place and route.
//!
//! The [`Netlist`] is the flat physical netlist the placer and router work
//! on: cells (with typed ports, optional region and chain constraints, and a
//! current bel), nets (driver + users, plus the committed routing as a
//! wire→pip map), and regions. Cells and nets live in arena vectors indexed
//! by [`CellId`]/[`NetId`]; cross-references are stored as those dense
//! indices, which breaks the cell↔net reference cycle.
//!
//! Binding helpers keep the netlist's view (`cell.bel`, `net.wires`) and the
//! architecture's binding tables consistent; all placement and routing code
//! goes through them rather than calling the arch directly.

use crate::error::{PnrError, PnrResult};
use arbor_arch::{
    Architecture, BelId, BindStrength, CellId, NetId, PinDir, PipId, RegionId, WireId,
};
use arbor_common::{Ident, Interner};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single port on a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    /// The port name (matches a bel pin name once placed).
    pub name: Ident,
    /// Direction of the port relative to the cell.
    pub dir: PinDir,
    /// The net this port is connected to (`None` = unconnected).
    pub net: Option<NetId>,
}

/// A reference to one endpoint of a net: a (cell, port) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortRef {
    /// The cell owning the port.
    pub cell: CellId,
    /// The port name on that cell.
    pub port: Ident,
    /// Delay budget for this arc, used by budget-based timing mode.
    pub budget: arbor_arch::Delay,
}

impl PortRef {
    /// Creates a port reference with a zero budget.
    pub fn new(cell: CellId, port: Ident) -> Self {
        Self {
            cell,
            port,
            budget: arbor_arch::Delay::ZERO,
        }
    }
}

/// A cell in the netlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    /// The unique ID of this cell.
    pub id: CellId,
    /// The cell name.
    pub name: Ident,
    /// The cell's type tag; it may only be placed on bels of the same type.
    pub ty: Ident,
    /// The cell's ports.
    pub ports: Vec<Port>,
    /// The bel this cell is placed on (`None` = unplaced).
    pub bel: Option<BelId>,
    /// How firmly the current placement is held.
    pub bel_strength: BindStrength,
    /// User-requested bel name; placed and locked before optimisation.
    pub pinned_bel: Option<Ident>,
    /// Region this cell is constrained to, if any.
    pub region: Option<RegionId>,
    /// Chain parent; `None` for chain roots and unchained cells.
    pub constr_parent: Option<CellId>,
    /// Chain children that must move rigidly with this cell.
    pub constr_children: Vec<CellId>,
    /// Required z slot within the chain's tile, if constrained.
    pub constr_z: Option<i32>,
}

impl Cell {
    /// Looks up a port by name.
    pub fn port(&self, name: Ident) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Looks up a port by name, mutably.
    pub fn port_mut(&mut self, name: Ident) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.name == name)
    }

    /// Whether this cell participates in a chain.
    pub fn is_constrained(&self) -> bool {
        self.constr_parent.is_some() || !self.constr_children.is_empty()
    }
}

/// One wire of a net's committed routing: the pip driving it, or `None` for
/// the net's source wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetWire {
    /// The pip driving this wire within the net's tree.
    pub pip: Option<PipId>,
    /// How firmly this binding is held.
    pub strength: BindStrength,
}

/// A net in the netlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    /// The unique ID of this net.
    pub id: NetId,
    /// The net name.
    pub name: Ident,
    /// The driving (cell, port), or `None` for an undriven net.
    pub driver: Option<PortRef>,
    /// The sink (cell, port) pairs, in a stable order.
    pub users: Vec<PortRef>,
    /// Whether the net is distributed on a dedicated global network.
    pub is_global: bool,
    /// Dense scratch index owned by the active subsystem; stashed on entry
    /// and restored on exit.
    #[serde(skip)]
    pub udata: u32,
    /// Committed routing: each wire of the net's tree and the pip driving it.
    #[serde(skip)]
    pub wires: HashMap<WireId, NetWire>,
}

/// A named region a cell may be constrained to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// The unique ID of this region.
    pub id: RegionId,
    /// The region name.
    pub name: Ident,
    /// The bels belonging to the region, or `None` for the whole device.
    pub bels: Option<HashSet<BelId>>,
}

impl Region {
    /// Whether `bel` satisfies this region.
    pub fn contains(&self, bel: BelId) -> bool {
        match &self.bels {
            Some(bels) => bels.contains(&bel),
            None => true,
        }
    }
}

/// The flat physical netlist for place and route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Netlist {
    /// All cells.
    pub cells: Vec<Cell>,
    /// All nets.
    pub nets: Vec<Net>,
    /// All regions.
    pub regions: Vec<Region>,
}

impl Netlist {
    /// Creates an empty netlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cell of the given name and type, returning its ID.
    pub fn add_cell(&mut self, name: Ident, ty: Ident) -> CellId {
        let id = CellId::from_raw(self.cells.len() as u32);
        self.cells.push(Cell {
            id,
            name,
            ty,
            ports: Vec::new(),
            bel: None,
            bel_strength: BindStrength::None,
            pinned_bel: None,
            region: None,
            constr_parent: None,
            constr_children: Vec::new(),
            constr_z: None,
        });
        id
    }

    /// Adds a net, returning its ID.
    pub fn add_net(&mut self, name: Ident) -> NetId {
        let id = NetId::from_raw(self.nets.len() as u32);
        self.nets.push(Net {
            id,
            name,
            driver: None,
            users: Vec::new(),
            is_global: false,
            udata: 0,
            wires: HashMap::new(),
        });
        id
    }

    /// Adds a region, returning its ID.
    pub fn add_region(&mut self, name: Ident, bels: Option<HashSet<BelId>>) -> RegionId {
        let id = RegionId::from_raw(self.regions.len() as u32);
        self.regions.push(Region { id, name, bels });
        id
    }

    /// Connects `port` of `cell` to `net`, registering the endpoint as the
    /// net's driver (output ports) or as a user (input ports).
    pub fn connect(&mut self, cell: CellId, port: Ident, dir: PinDir, net: NetId) {
        let c = &mut self.cells[cell.index()];
        match c.port_mut(port) {
            Some(p) => {
                p.dir = dir;
                p.net = Some(net);
            }
            None => c.ports.push(Port {
                name: port,
                dir,
                net: Some(net),
            }),
        }
        let n = &mut self.nets[net.index()];
        match dir {
            PinDir::Output => n.driver = Some(PortRef::new(cell, port)),
            PinDir::Input | PinDir::Inout => n.users.push(PortRef::new(cell, port)),
        }
    }

    /// Declares `child` a chain member under `parent` at slot `z`.
    pub fn chain(&mut self, parent: CellId, child: CellId, z: i32) {
        self.cells[parent.index()].constr_children.push(child);
        let c = &mut self.cells[child.index()];
        c.constr_parent = Some(parent);
        c.constr_z = Some(z);
    }

    /// Returns the cell with the given ID.
    pub fn cell(&self, id: CellId) -> &Cell {
        &self.cells[id.index()]
    }

    /// Returns a mutable reference to the cell with the given ID.
    pub fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id.index()]
    }

    /// Returns the net with the given ID.
    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[id.index()]
    }

    /// Returns a mutable reference to the net with the given ID.
    pub fn net_mut(&mut self, id: NetId) -> &mut Net {
        &mut self.nets[id.index()]
    }

    /// Returns the region with the given ID.
    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    /// Returns the number of cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Returns the number of nets.
    pub fn net_count(&self) -> usize {
        self.nets.len()
    }

    /// Returns whether every cell has a bel.
    pub fn is_fully_placed(&self) -> bool {
        self.cells.iter().all(|c| c.bel.is_some())
    }

    /// Returns whether every driven net with users has committed routing.
    pub fn is_fully_routed(&self) -> bool {
        self.nets
            .iter()
            .all(|n| n.driver.is_none() || n.users.is_empty() || !n.wires.is_empty())
    }

    // --- Binding helpers keeping netlist and arch in sync ---

    /// Places `cell` on `bel`, recording the binding in the arch.
    pub fn bind_bel(
        &mut self,
        arch: &dyn Architecture,
        cell: CellId,
        bel: BelId,
        strength: BindStrength,
    ) {
        arch.bind_bel(bel, cell, strength);
        let c = &mut self.cells[cell.index()];
        c.bel = Some(bel);
        c.bel_strength = strength;
    }

    /// Removes `cell` from its bel, releasing the arch binding.
    pub fn unbind_bel(&mut self, arch: &dyn Architecture, cell: CellId) {
        let c = &mut self.cells[cell.index()];
        if let Some(bel) = c.bel.take() {
            arch.unbind_bel(bel);
        }
        c.bel_strength = BindStrength::None;
    }

    /// Binds `wire` as part of `net`'s routing (a tree source wire).
    pub fn bind_wire(
        &mut self,
        arch: &dyn Architecture,
        net: NetId,
        wire: WireId,
        strength: BindStrength,
    ) {
        arch.bind_wire(wire, net, strength);
        self.nets[net.index()]
            .wires
            .insert(wire, NetWire { pip: None, strength });
    }

    /// Enables `pip` for `net`, binding the pip's destination wire too.
    pub fn bind_pip(
        &mut self,
        arch: &dyn Architecture,
        net: NetId,
        pip: PipId,
        strength: BindStrength,
    ) {
        arch.bind_pip(pip, net, strength);
        let dst = arch.pip_dst_wire(pip);
        self.nets[net.index()].wires.insert(
            dst,
            NetWire {
                pip: Some(pip),
                strength,
            },
        );
    }

    /// Releases one wire of `net`'s routing, together with its driving pip.
    pub fn unbind_wire(&mut self, arch: &dyn Architecture, net: NetId, wire: WireId) {
        if let Some(nw) = self.nets[net.index()].wires.remove(&wire) {
            match nw.pip {
                Some(pip) => arch.unbind_pip(pip),
                None => arch.unbind_wire(wire),
            }
        }
    }

    /// Releases all routing of `net`.
    pub fn ripup_net(&mut self, arch: &dyn Architecture, net: NetId) {
        let wires = std::mem::take(&mut self.nets[net.index()].wires);
        for (wire, nw) in wires {
            match nw.pip {
                Some(pip) => arch.unbind_pip(pip),
                None => arch.unbind_wire(wire),
            }
        }
    }

    /// Returns the fabric wire for the net's driver pin.
    ///
    /// # Errors
    ///
    /// Returns [`PnrError::MissingPinWire`] if the driver's bel has no such
    /// pin wire.
    pub fn source_wire(
        &self,
        arch: &dyn Architecture,
        interner: &Interner,
        net: &Net,
    ) -> PnrResult<Option<WireId>> {
        let Some(driver) = &net.driver else {
            return Ok(None);
        };
        let cell = self.cell(driver.cell);
        let Some(bel) = cell.bel else {
            return Ok(None);
        };
        match arch.bel_pin_wire(bel, driver.port) {
            Some(w) => Ok(Some(w)),
            None => Err(PnrError::MissingPinWire {
                cell: interner.resolve(cell.name).to_string(),
                port: interner.resolve(driver.port).to_string(),
            }),
        }
    }

    /// Returns the fabric wire for one of the net's sink pins.
    ///
    /// # Errors
    ///
    /// Returns [`PnrError::MissingPinWire`] if the user's bel has no such
    /// pin wire.
    pub fn sink_wire(
        &self,
        arch: &dyn Architecture,
        interner: &Interner,
        user: &PortRef,
    ) -> PnrResult<Option<WireId>> {
        let cell = self.cell(user.cell);
        let Some(bel) = cell.bel else {
            return Ok(None);
        };
        match arch.bel_pin_wire(bel, user.port) {
            Some(w) => Ok(Some(w)),
            None => Err(PnrError::MissingPinWire {
                cell: interner.resolve(cell.name).to_string(),
                port: interner.resolve(user.port).to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_arch::{GridArch, Loc};

    fn interner() -> Interner {
        Interner::new()
    }

    #[test]
    fn empty_netlist() {
        let nl = Netlist::new();
        assert_eq!(nl.cell_count(), 0);
        assert_eq!(nl.net_count(), 0);
        assert!(nl.is_fully_placed());
        assert!(nl.is_fully_routed());
    }

    #[test]
    fn add_and_connect() {
        let i = interner();
        let mut nl = Netlist::new();
        let lut = nl.add_cell(i.get_or_intern("lut_0"), i.get_or_intern("LUT"));
        let ff = nl.add_cell(i.get_or_intern("ff_0"), i.get_or_intern("FF"));
        let net = nl.add_net(i.get_or_intern("n0"));
        nl.connect(lut, i.get_or_intern("O"), PinDir::Output, net);
        nl.connect(ff, i.get_or_intern("D"), PinDir::Input, net);

        let n = nl.net(net);
        assert_eq!(n.driver.unwrap().cell, lut);
        assert_eq!(n.users.len(), 1);
        assert_eq!(n.users[0].cell, ff);
        assert_eq!(
            nl.cell(lut).port(i.get_or_intern("O")).unwrap().net,
            Some(net)
        );
    }

    #[test]
    fn chain_links_parent_and_child() {
        let i = interner();
        let mut nl = Netlist::new();
        let ty = i.get_or_intern("LUT");
        let root = nl.add_cell(i.get_or_intern("c0"), ty);
        let child = nl.add_cell(i.get_or_intern("c1"), ty);
        nl.chain(root, child, 1);

        assert!(nl.cell(root).is_constrained());
        assert!(nl.cell(child).is_constrained());
        assert_eq!(nl.cell(child).constr_parent, Some(root));
        assert_eq!(nl.cell(child).constr_z, Some(1));
        assert_eq!(nl.cell(root).constr_children, vec![child]);
    }

    #[test]
    fn bel_binding_sync() {
        let i = interner();
        let arch = GridArch::new(&i, 2, 2, 2, 1);
        let mut nl = Netlist::new();
        let cell = nl.add_cell(i.get_or_intern("c"), arch.lut_type());
        let bel = arch.bel_by_location(Loc::new(0, 0, 0)).unwrap();

        nl.bind_bel(&arch, cell, bel, BindStrength::Weak);
        assert_eq!(nl.cell(cell).bel, Some(bel));
        assert_eq!(arch.bound_bel_cell(bel), Some(cell));

        nl.unbind_bel(&arch, cell);
        assert_eq!(nl.cell(cell).bel, None);
        assert!(arch.check_bel_avail(bel));
    }

    #[test]
    fn wire_and_pip_binding_sync() {
        let i = interner();
        let arch = GridArch::new(&i, 2, 2, 2, 1);
        let mut nl = Netlist::new();
        let net = nl.add_net(i.get_or_intern("n"));
        let pip = arch.pips()[0];
        let src = arch.pip_src_wire(pip);
        let dst = arch.pip_dst_wire(pip);

        nl.bind_wire(&arch, net, src, BindStrength::Weak);
        nl.bind_pip(&arch, net, pip, BindStrength::Weak);
        assert_eq!(arch.bound_wire_net(src), Some(net));
        assert_eq!(arch.bound_wire_net(dst), Some(net));
        assert_eq!(nl.net(net).wires.len(), 2);
        assert!(nl.is_fully_routed());

        nl.ripup_net(&arch, net);
        assert!(arch.check_wire_avail(src));
        assert!(arch.check_wire_avail(dst));
        assert!(nl.net(net).wires.is_empty());
    }

    #[test]
    fn source_and_sink_wires() {
        let i = interner();
        let arch = GridArch::new(&i, 2, 2, 2, 1);
        let mut nl = Netlist::new();
        let lut = nl.add_cell(i.get_or_intern("l"), arch.lut_type());
        let ff = nl.add_cell(i.get_or_intern("f"), arch.ff_type());
        let net = nl.add_net(i.get_or_intern("n"));
        nl.connect(lut, i.get_or_intern("O"), PinDir::Output, net);
        nl.connect(ff, i.get_or_intern("D"), PinDir::Input, net);

        // Unplaced: no wires yet, but no error either.
        let n = nl.net(net).clone();
        assert!(nl.source_wire(&arch, &i, &n).unwrap().is_none());

        let lut_bel = arch.bel_by_location(Loc::new(0, 0, 0)).unwrap();
        let ff_bel = arch.bel_by_location(Loc::new(1, 1, 1)).unwrap();
        nl.bind_bel(&arch, lut, lut_bel, BindStrength::Weak);
        nl.bind_bel(&arch, ff, ff_bel, BindStrength::Weak);

        let n = nl.net(net).clone();
        let src = nl.source_wire(&arch, &i, &n).unwrap().unwrap();
        let dst = nl.sink_wire(&arch, &i, &n.users[0]).unwrap().unwrap();
        assert_ne!(src, dst);
    }

    #[test]
    fn missing_pin_wire_is_an_error() {
        let i = interner();
        let arch = GridArch::new(&i, 2, 2, 2, 1);
        let mut nl = Netlist::new();
        let lut = nl.add_cell(i.get_or_intern("l"), arch.lut_type());
        let net = nl.add_net(i.get_or_intern("n"));
        // "Z9" is not a pin on a LUT bel.
        nl.connect(lut, i.get_or_intern("Z9"), PinDir::Output, net);
        let bel = arch.bel_by_location(Loc::new(0, 0, 0)).unwrap();
        nl.bind_bel(&arch, lut, bel, BindStrength::Weak);

        let n = nl.net(net).clone();
        assert!(matches!(
            nl.source_wire(&arch, &i, &n),
            Err(PnrError::MissingPinWire { .. })
        ));
    }

    #[test]
    fn region_contains() {
        let i = interner();
        let mut nl = Netlist::new();
        let mut bels = HashSet::new();
        bels.insert(BelId::from_raw(1));
        let r = nl.add_region(i.get_or_intern("r0"), Some(bels));
        assert!(nl.region(r).contains(BelId::from_raw(1)));
        assert!(!nl.region(r).contains(BelId::from_raw(2)));

        let open = nl.add_region(i.get_or_intern("r1"), None);
        assert!(nl.region(open).contains(BelId::from_raw(99)));
    }

    #[test]
    fn serde_roundtrip_skips_scratch() {
        let i = interner();
        let mut nl = Netlist::new();
        let c = nl.add_cell(i.get_or_intern("c"), i.get_or_intern("LUT"));
        let n = nl.add_net(i.get_or_intern("n"));
        nl.connect(c, i.get_or_intern("O"), PinDir::Output, n);
        nl.net_mut(n).udata = 42;

        let json = serde_json::to_string(&nl).unwrap();
        let restored: Netlist = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.cell_count(), 1);
        assert_eq!(restored.net_count(), 1);
        assert_eq!(restored.net(n).udata, 0);
    }
}
