//! A synthetic grid architecture for tests and demos.
//!
//! [`GridArch`] models a small island-style FPGA: a `width × height` grid of
//! tiles, each holding `slots_per_tile` bels (even slots are LUTs, odd slots
//! are flip-flops) and a handful of channel wires. Pips connect bel outputs
//! onto the channels, channels to the matching channel in each neighbouring
//! tile, and channels into bel input pins. Delays grow with Manhattan
//! distance, so both the placer's cost model and the router's A* heuristic
//! behave the way they would on real fabric, just at toy scale.

use crate::ids::{BelId, CellId, NetId, PipId, WireId};
use crate::types::{BelPin, BindStrength, BoundingBox, Delay, Loc, PinDir, TimingPortClass};
use crate::Architecture;
use arbor_common::{Fnv1a, Ident, Interner};
use std::collections::HashMap;
use std::sync::RwLock;

const LOCAL_PIP_NS: f64 = 0.05;
const SPAN_PIP_NS: f64 = 0.3;
const PIN_WIRE_NS: f64 = 0.05;
const CHANNEL_WIRE_NS: f64 = 0.1;
const EPSILON_NS: f64 = 0.01;

struct PinData {
    name: Ident,
    dir: PinDir,
    wire: WireId,
}

struct BelData {
    name: Ident,
    ty: Ident,
    loc: Loc,
    pins: Vec<PinData>,
}

struct WireData {
    name: Ident,
    x: i32,
    y: i32,
    delay: Delay,
    bel_pins: Vec<BelPin>,
    uphill: Vec<PipId>,
    downhill: Vec<PipId>,
}

struct PipData {
    src: WireId,
    dst: WireId,
    loc: Loc,
    delay: Delay,
}

#[derive(Default)]
struct BindState {
    bel_cell: Vec<Option<(CellId, BindStrength)>>,
    wire_net: Vec<Option<(NetId, BindStrength)>>,
    pip_net: Vec<Option<(NetId, BindStrength)>>,
}

/// A synthetic island-style FPGA device.
pub struct GridArch {
    name: String,
    width: i32,
    height: i32,
    lut_type: Ident,
    ff_type: Ident,
    input_pins: Vec<Ident>,
    o_pin: Ident,
    d_pin: Ident,
    clk_pin: Ident,
    q_pin: Ident,
    bel_ids: Vec<BelId>,
    wire_ids: Vec<WireId>,
    pip_ids: Vec<PipId>,
    bels: Vec<BelData>,
    wires: Vec<WireData>,
    pips: Vec<PipData>,
    bel_by_name: HashMap<Ident, BelId>,
    bel_by_loc: HashMap<(i32, i32, i32), BelId>,
    bind: RwLock<BindState>,
}

impl GridArch {
    /// Builds a grid device.
    ///
    /// `slots_per_tile` bels per tile alternate LUT (even z) and FF (odd z);
    /// `channels_per_tile` is the routing capacity between adjacent tiles.
    /// Names and type tags are interned into `interner`, which must be the
    /// same interner the netlist uses.
    pub fn new(
        interner: &Interner,
        width: i32,
        height: i32,
        slots_per_tile: i32,
        channels_per_tile: usize,
    ) -> Self {
        assert!(width > 0 && height > 0 && slots_per_tile > 0 && channels_per_tile > 0);
        let lut_type = interner.get_or_intern("LUT");
        let ff_type = interner.get_or_intern("FF");
        let lut_inputs = 4;
        let input_pins: Vec<Ident> = (0..lut_inputs)
            .map(|i| interner.get_or_intern(&format!("I{i}")))
            .collect();
        let o_pin = interner.get_or_intern("O");
        let d_pin = interner.get_or_intern("D");
        let clk_pin = interner.get_or_intern("CLK");
        let q_pin = interner.get_or_intern("Q");

        let mut arch = Self {
            name: format!("grid{width}x{height}"),
            width,
            height,
            lut_type,
            ff_type,
            input_pins,
            o_pin,
            d_pin,
            clk_pin,
            q_pin,
            bel_ids: Vec::new(),
            wire_ids: Vec::new(),
            pip_ids: Vec::new(),
            bels: Vec::new(),
            wires: Vec::new(),
            pips: Vec::new(),
            bel_by_name: HashMap::new(),
            bel_by_loc: HashMap::new(),
            bind: RwLock::new(BindState::default()),
        };

        // Channel wires first so inter-tile pips can be wired up by index.
        let mut channel_wires = vec![Vec::new(); (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels_per_tile {
                    let name = interner.get_or_intern(&format!("X{x}Y{y}_CH{c}"));
                    let w = arch.add_wire(name, x, y, Delay::flat(CHANNEL_WIRE_NS));
                    channel_wires[(y * width + x) as usize].push(w);
                }
            }
        }

        // Bels and their pin wires.
        for y in 0..height {
            for x in 0..width {
                for z in 0..slots_per_tile {
                    let is_lut = z % 2 == 0;
                    let ty = if is_lut { lut_type } else { ff_type };
                    let name = interner.get_or_intern(&format!("BEL_X{x}Y{y}Z{z}"));
                    let bel = BelId::from_raw(arch.bels.len() as u32);
                    let mut pins = Vec::new();
                    let pin_list: Vec<(Ident, PinDir)> = if is_lut {
                        arch.input_pins
                            .iter()
                            .map(|&p| (p, PinDir::Input))
                            .chain([(o_pin, PinDir::Output)])
                            .collect()
                    } else {
                        vec![
                            (d_pin, PinDir::Input),
                            (clk_pin, PinDir::Input),
                            (q_pin, PinDir::Output),
                        ]
                    };
                    for (pin, dir) in pin_list {
                        let wname = interner.get_or_intern(&format!(
                            "X{x}Y{y}Z{z}_{}",
                            interner.resolve(pin)
                        ));
                        let wire = arch.add_wire(wname, x, y, Delay::flat(PIN_WIRE_NS));
                        arch.wires[wire.index()].bel_pins.push(BelPin { bel, pin });
                        pins.push(PinData {
                            name: pin,
                            dir,
                            wire,
                        });
                    }
                    arch.bels.push(BelData {
                        name,
                        ty,
                        loc: Loc::new(x, y, z),
                        pins,
                    });
                    arch.bel_ids.push(bel);
                    arch.bel_by_name.insert(name, bel);
                    arch.bel_by_loc.insert((x, y, z), bel);
                }
            }
        }

        // Pips: bel outputs onto channels, channels between neighbouring
        // tiles, channels into bel inputs.
        for y in 0..height {
            for x in 0..width {
                let tile = (y * width + x) as usize;
                let loc = Loc::new(x, y, 0);
                for b in 0..arch.bels.len() {
                    if arch.bels[b].loc.x != x || arch.bels[b].loc.y != y {
                        continue;
                    }
                    let pin_wires: Vec<(WireId, PinDir)> = arch.bels[b]
                        .pins
                        .iter()
                        .map(|p| (p.wire, p.dir))
                        .collect();
                    for (wire, dir) in pin_wires {
                        for c in 0..channels_per_tile {
                            let ch = channel_wires[tile][c];
                            match dir {
                                PinDir::Output => {
                                    arch.add_pip(wire, ch, loc, Delay::flat(LOCAL_PIP_NS))
                                }
                                PinDir::Input | PinDir::Inout => {
                                    arch.add_pip(ch, wire, loc, Delay::flat(LOCAL_PIP_NS))
                                }
                            }
                        }
                    }
                }
                for (dx, dy) in [(1i32, 0i32), (-1, 0), (0, 1), (0, -1)] {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || nx >= width || ny < 0 || ny >= height {
                        continue;
                    }
                    let ntile = (ny * width + nx) as usize;
                    for c in 0..channels_per_tile {
                        arch.add_pip(
                            channel_wires[tile][c],
                            channel_wires[ntile][c],
                            Loc::new(nx, ny, 0),
                            Delay::flat(SPAN_PIP_NS),
                        );
                    }
                }
            }
        }

        {
            let mut bind = arch.bind.write().unwrap();
            bind.bel_cell.resize(arch.bels.len(), None);
            bind.wire_net.resize(arch.wires.len(), None);
            bind.pip_net.resize(arch.pips.len(), None);
        }
        arch
    }

    fn add_wire(&mut self, name: Ident, x: i32, y: i32, delay: Delay) -> WireId {
        let id = WireId::from_raw(self.wires.len() as u32);
        self.wires.push(WireData {
            name,
            x,
            y,
            delay,
            bel_pins: Vec::new(),
            uphill: Vec::new(),
            downhill: Vec::new(),
        });
        self.wire_ids.push(id);
        id
    }

    fn add_pip(&mut self, src: WireId, dst: WireId, loc: Loc, delay: Delay) {
        let id = PipId::from_raw(self.pips.len() as u32);
        self.pips.push(PipData {
            src,
            dst,
            loc,
            delay,
        });
        self.wires[src.index()].downhill.push(id);
        self.wires[dst.index()].uphill.push(id);
        self.pip_ids.push(id);
    }

    /// The LUT type tag.
    pub fn lut_type(&self) -> Ident {
        self.lut_type
    }

    /// The flip-flop type tag.
    pub fn ff_type(&self) -> Ident {
        self.ff_type
    }
}

impl Architecture for GridArch {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn grid_dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn bels(&self) -> &[BelId] {
        &self.bel_ids
    }

    fn wires(&self) -> &[WireId] {
        &self.wire_ids
    }

    fn pips(&self) -> &[PipId] {
        &self.pip_ids
    }

    fn pips_uphill(&self, wire: WireId) -> &[PipId] {
        &self.wires[wire.index()].uphill
    }

    fn pips_downhill(&self, wire: WireId) -> &[PipId] {
        &self.wires[wire.index()].downhill
    }

    fn wire_bel_pins(&self, wire: WireId) -> &[BelPin] {
        &self.wires[wire.index()].bel_pins
    }

    fn bel_pin_type(&self, bel: BelId, pin: Ident) -> Option<PinDir> {
        self.bels[bel.index()]
            .pins
            .iter()
            .find(|p| p.name == pin)
            .map(|p| p.dir)
    }

    fn bel_type(&self, bel: BelId) -> Ident {
        self.bels[bel.index()].ty
    }

    fn bel_location(&self, bel: BelId) -> Loc {
        self.bels[bel.index()].loc
    }

    fn bel_name(&self, bel: BelId) -> Ident {
        self.bels[bel.index()].name
    }

    fn bel_by_name(&self, name: Ident) -> Option<BelId> {
        self.bel_by_name.get(&name).copied()
    }

    fn bel_by_location(&self, loc: Loc) -> Option<BelId> {
        self.bel_by_loc.get(&(loc.x, loc.y, loc.z)).copied()
    }

    fn wire_name(&self, wire: WireId) -> Ident {
        self.wires[wire.index()].name
    }

    fn pip_location(&self, pip: PipId) -> Loc {
        self.pips[pip.index()].loc
    }

    fn pip_src_wire(&self, pip: PipId) -> WireId {
        self.pips[pip.index()].src
    }

    fn pip_dst_wire(&self, pip: PipId) -> WireId {
        self.pips[pip.index()].dst
    }

    fn bel_pin_wire(&self, bel: BelId, pin: Ident) -> Option<WireId> {
        self.bels[bel.index()]
            .pins
            .iter()
            .find(|p| p.name == pin)
            .map(|p| p.wire)
    }

    fn bind_bel(&self, bel: BelId, cell: CellId, strength: BindStrength) {
        let mut bind = self.bind.write().unwrap();
        debug_assert!(bind.bel_cell[bel.index()].is_none());
        bind.bel_cell[bel.index()] = Some((cell, strength));
    }

    fn unbind_bel(&self, bel: BelId) {
        let mut bind = self.bind.write().unwrap();
        bind.bel_cell[bel.index()] = None;
    }

    fn bound_bel_cell(&self, bel: BelId) -> Option<CellId> {
        self.bind.read().unwrap().bel_cell[bel.index()].map(|(c, _)| c)
    }

    fn bel_bind_strength(&self, bel: BelId) -> BindStrength {
        self.bind.read().unwrap().bel_cell[bel.index()]
            .map(|(_, s)| s)
            .unwrap_or(BindStrength::None)
    }

    fn check_bel_avail(&self, bel: BelId) -> bool {
        self.bind.read().unwrap().bel_cell[bel.index()].is_none()
    }

    fn bind_wire(&self, wire: WireId, net: NetId, strength: BindStrength) {
        let mut bind = self.bind.write().unwrap();
        debug_assert!(bind.wire_net[wire.index()].is_none());
        bind.wire_net[wire.index()] = Some((net, strength));
    }

    fn unbind_wire(&self, wire: WireId) {
        let mut bind = self.bind.write().unwrap();
        bind.wire_net[wire.index()] = None;
    }

    fn bind_pip(&self, pip: PipId, net: NetId, strength: BindStrength) {
        let dst = self.pips[pip.index()].dst;
        let mut bind = self.bind.write().unwrap();
        debug_assert!(bind.pip_net[pip.index()].is_none());
        bind.pip_net[pip.index()] = Some((net, strength));
        bind.wire_net[dst.index()] = Some((net, strength));
    }

    fn unbind_pip(&self, pip: PipId) {
        let dst = self.pips[pip.index()].dst;
        let mut bind = self.bind.write().unwrap();
        bind.pip_net[pip.index()] = None;
        bind.wire_net[dst.index()] = None;
    }

    fn bound_wire_net(&self, wire: WireId) -> Option<NetId> {
        self.bind.read().unwrap().wire_net[wire.index()].map(|(n, _)| n)
    }

    fn bound_pip_net(&self, pip: PipId) -> Option<NetId> {
        self.bind.read().unwrap().pip_net[pip.index()].map(|(n, _)| n)
    }

    fn check_wire_avail(&self, wire: WireId) -> bool {
        self.bind.read().unwrap().wire_net[wire.index()].is_none()
    }

    fn check_pip_avail(&self, pip: PipId) -> bool {
        let bind = self.bind.read().unwrap();
        bind.pip_net[pip.index()].is_none()
            && bind.wire_net[self.pips[pip.index()].dst.index()].is_none()
    }

    fn is_valid_bel_for_cell(&self, cell_type: Ident, bel: BelId) -> bool {
        self.bels[bel.index()].ty == cell_type
    }

    fn is_bel_location_valid(&self, _bel: BelId) -> bool {
        // The grid fabric has no shared control sets or packing rules.
        true
    }

    fn bel_global_buf(&self, _bel: BelId) -> bool {
        false
    }

    fn pip_delay(&self, pip: PipId) -> Delay {
        self.pips[pip.index()].delay
    }

    fn wire_delay(&self, wire: WireId) -> Delay {
        self.wires[wire.index()].delay
    }

    fn delay_epsilon(&self) -> Delay {
        Delay::flat(EPSILON_NS)
    }

    fn estimate_delay(&self, src: WireId, dst: WireId) -> Delay {
        let s = &self.wires[src.index()];
        let d = &self.wires[dst.index()];
        let dist = (s.x - d.x).abs() + (s.y - d.y).abs();
        Delay::flat(SPAN_PIP_NS * f64::from(dist) + CHANNEL_WIRE_NS)
    }

    fn predict_delay(&self, src: BelPin, dst: BelPin) -> Delay {
        let s = self.bel_location(src.bel);
        let d = self.bel_location(dst.bel);
        let dist = (s.x - d.x).abs() + (s.y - d.y).abs();
        Delay::flat(SPAN_PIP_NS * f64::from(dist) + 2.0 * CHANNEL_WIRE_NS)
    }

    fn port_timing_class(&self, cell_type: Ident, port: Ident) -> TimingPortClass {
        if cell_type == self.lut_type {
            if port == self.o_pin {
                TimingPortClass::CombOutput
            } else if self.input_pins.contains(&port) {
                TimingPortClass::CombInput
            } else {
                TimingPortClass::Ignore
            }
        } else if cell_type == self.ff_type {
            if port == self.q_pin {
                TimingPortClass::RegisterOutput
            } else if port == self.d_pin {
                TimingPortClass::RegisterInput
            } else if port == self.clk_pin {
                TimingPortClass::ClockInput
            } else {
                TimingPortClass::Ignore
            }
        } else {
            TimingPortClass::Ignore
        }
    }

    fn route_bounding_box(&self, src: WireId, dst: WireId) -> BoundingBox {
        let s = &self.wires[src.index()];
        let d = &self.wires[dst.index()];
        let mut bb = BoundingBox::point(s.x, s.y);
        bb.extend(d.x, d.y);
        bb.x0 = (bb.x0 - 1).max(0);
        bb.y0 = (bb.y0 - 1).max(0);
        bb.x1 = (bb.x1 + 1).min(self.width - 1);
        bb.y1 = (bb.y1 + 1).min(self.height - 1);
        bb
    }

    fn checksum(&self) -> u64 {
        let bind = self.bind.read().unwrap();
        let mut h = Fnv1a::new();
        for (i, b) in bind.bel_cell.iter().enumerate() {
            if let Some((cell, strength)) = b {
                h.write_u32(i as u32);
                h.write_u32(cell.as_raw());
                h.write_u32(*strength as u32);
            }
        }
        for (i, w) in bind.wire_net.iter().enumerate() {
            if let Some((net, _)) = w {
                h.write_u32(i as u32);
                h.write_u32(net.as_raw());
            }
        }
        for (i, p) in bind.pip_net.iter().enumerate() {
            if let Some((net, _)) = p {
                h.write_u32(i as u32);
                h.write_u32(net.as_raw());
            }
        }
        h.finish()
    }
}
