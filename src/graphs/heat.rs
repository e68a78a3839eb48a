//! GALS heat diffusion graph type.
//!
//! Each `cell` holds a temperature and advances in lockstep with its
//! neighbourhood: it only sends time step `t + dt` once it has heard every
//! neighbour's value for step `t`. Messages from neighbours that are already
//! one step ahead are accumulated separately. `dirichlet_variable` devices
//! drive the boundary with `bias + amplitude * sin(phase + frequency * t)`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::EdgeType;
use crate::device::{
    DeviceType, DeviceTypeRef, InputHandler, InputPort, OutputHandler, OutputPort, PortLayout,
};
use crate::error::{GraphError, GraphResult};
use crate::graph::{GraphInstance, GraphType, GraphTypeRef};
use crate::payload::{Payload, TypedSpec};
use crate::types::{RtsWord, INIT_PORT};

pub const HEAT_GRAPH_TYPE: &str = "gals_heat";
pub const UPDATE_EDGE: &str = "update";
pub const CELL: &str = "cell";
pub const DIRICHLET: &str = "dirichlet_variable";

/// Default simulated time horizon.
pub const DEFAULT_MAX_TIME: u32 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatGraphProperties {
    pub max_time: u32,
}

impl Default for HeatGraphProperties {
    fn default() -> Self {
        Self {
            max_time: DEFAULT_MAX_TIME,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub t: u32,
    pub v: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateEdgeProperties {
    pub w: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellProperties {
    /// Number of incoming neighbour edges
    pub nhood: u32,
    pub dt: u32,
    /// Initial value
    pub iv: f64,
    pub w_self: f64,
}

impl Default for CellProperties {
    fn default() -> Self {
        Self {
            nhood: 0,
            dt: 1,
            iv: 0.0,
            w_self: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub v: f64,
    pub t: u32,
    /// Neighbours heard from for the current step
    pub cs: u32,
    /// Weighted sum for the current step
    pub ca: f64,
    /// Neighbours heard from for the next step
    pub ns: u32,
    /// Weighted sum for the next step
    pub na: f64,
    /// Holds `v` fixed when set
    pub force: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirichletProperties {
    pub dt: u32,
    pub neighbours: u32,
    pub amplitude: f64,
    pub phase: f64,
    pub frequency: f64,
    pub bias: f64,
}

impl Default for DirichletProperties {
    fn default() -> Self {
        Self {
            dt: 1,
            neighbours: 0,
            amplitude: 1.0,
            phase: 0.5,
            frequency: 1.0,
            bias: 0.0,
        }
    }
}

impl DirichletProperties {
    fn value_at(&self, t: u32) -> f64 {
        self.bias + self.amplitude * (self.phase + self.frequency * t as f64).sin()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirichletState {
    pub v: f64,
    pub t: u32,
    pub cs: u32,
    pub ns: u32,
}

fn max_time(graph_props: &Payload) -> u32 {
    graph_props.get::<HeatGraphProperties>().max_time
}

// ===== cell =====

struct CellInit {
    out: RtsWord,
}

impl InputHandler for CellInit {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = layout.rts_flag("out")?;
        Ok(())
    }

    fn on_receive(
        &self,
        _graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        _message: &Payload,
    ) -> RtsWord {
        let props = dev_props.get::<CellProperties>();
        let state = dev_state.get_mut::<CellState>();
        // Primed as if the whole neighbourhood had reported step 0.
        state.v = props.iv;
        state.t = 0;
        state.cs = props.nhood;
        state.ca = props.iv;
        state.ns = 0;
        state.na = 0.0;
        self.out
    }
}

struct CellIn {
    out: RtsWord,
}

impl InputHandler for CellIn {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = layout.rts_flag("out")?;
        Ok(())
    }

    fn on_receive(
        &self,
        _graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        edge_props: &Payload,
        _edge_state: &mut Payload,
        message: &Payload,
    ) -> RtsWord {
        let props = dev_props.get::<CellProperties>();
        let w = edge_props.get::<UpdateEdgeProperties>().w;
        let msg = message.get::<UpdateMessage>();
        let state = dev_state.get_mut::<CellState>();

        if msg.t == state.t {
            state.cs += 1;
            state.ca += w * msg.v;
        } else {
            assert_eq!(
                msg.t,
                state.t + props.dt,
                "cell received an update more than one step ahead"
            );
            state.ns += 1;
            state.na += w * msg.v;
        }

        if state.cs == props.nhood {
            self.out
        } else {
            0
        }
    }
}

struct CellOut {
    out: RtsWord,
}

impl OutputHandler for CellOut {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = layout.rts_flag("out")?;
        Ok(())
    }

    fn on_send(
        &self,
        graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        message: &mut Payload,
    ) -> (bool, RtsWord) {
        let props = dev_props.get::<CellProperties>();
        let state = dev_state.get_mut::<CellState>();
        if state.t > max_time(graph_props) {
            return (false, 0);
        }

        if !state.force {
            state.v = state.ca;
        }
        state.t += props.dt;
        state.cs = state.ns;
        state.ca = state.na + props.w_self * state.v;
        state.ns = 0;
        state.na = 0.0;

        let msg = message.get_mut::<UpdateMessage>();
        msg.t = state.t;
        msg.v = state.v;

        let rts = if state.cs == props.nhood { self.out } else { 0 };
        (true, rts)
    }
}

// ===== dirichlet_variable =====

struct DirichletInit {
    out: RtsWord,
}

impl InputHandler for DirichletInit {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = layout.rts_flag("out")?;
        Ok(())
    }

    fn on_receive(
        &self,
        _graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        _message: &Payload,
    ) -> RtsWord {
        let props = dev_props.get::<DirichletProperties>();
        let state = dev_state.get_mut::<DirichletState>();
        state.t = 0;
        state.cs = props.neighbours;
        state.ns = 0;
        state.v = props.value_at(0);
        self.out
    }
}

struct DirichletIn {
    out: RtsWord,
}

impl InputHandler for DirichletIn {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = layout.rts_flag("out")?;
        Ok(())
    }

    fn on_receive(
        &self,
        _graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        message: &Payload,
    ) -> RtsWord {
        let props = dev_props.get::<DirichletProperties>();
        let t = message.get::<UpdateMessage>().t;
        let state = dev_state.get_mut::<DirichletState>();

        if t == state.t {
            state.cs += 1;
        } else {
            assert_eq!(
                t,
                state.t + props.dt,
                "boundary received an update more than one step ahead"
            );
            state.ns += 1;
        }

        if state.cs == props.neighbours {
            self.out
        } else {
            0
        }
    }
}

struct DirichletOut {
    out: RtsWord,
}

impl OutputHandler for DirichletOut {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = layout.rts_flag("out")?;
        Ok(())
    }

    fn on_send(
        &self,
        graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        message: &mut Payload,
    ) -> (bool, RtsWord) {
        let props = dev_props.get::<DirichletProperties>();
        let state = dev_state.get_mut::<DirichletState>();
        if state.t > max_time(graph_props) {
            return (false, 0);
        }

        state.v = props.value_at(state.t);
        state.t += props.dt;
        state.cs = state.ns;
        state.ns = 0;

        let msg = message.get_mut::<UpdateMessage>();
        msg.t = state.t;
        msg.v = state.v;

        let rts = if state.cs == props.neighbours {
            self.out
        } else {
            0
        };
        (true, rts)
    }
}

/// Builds the `gals_heat` graph type.
pub fn heat_graph_type() -> GraphResult<GraphTypeRef> {
    let init = EdgeType::new(INIT_PORT).shared();
    let update = EdgeType::new(UPDATE_EDGE)
        .with_message(TypedSpec::<UpdateMessage>::shared("update_message"))
        .with_properties(TypedSpec::<UpdateEdgeProperties>::shared(
            "update_properties",
        ))
        .shared();

    let dirichlet = DeviceType::new(
        DIRICHLET,
        TypedSpec::<DirichletProperties>::shared("dirichlet_properties"),
        TypedSpec::<DirichletState>::shared("dirichlet_state"),
        vec![
            InputPort::new(INIT_PORT, init.clone(), DirichletInit { out: 0 }),
            InputPort::new("in", update.clone(), DirichletIn { out: 0 }),
        ],
        vec![OutputPort::new("out", update.clone(), DirichletOut { out: 0 })],
    )?;

    let cell = DeviceType::new(
        CELL,
        TypedSpec::<CellProperties>::shared("cell_properties"),
        TypedSpec::<CellState>::shared("cell_state"),
        vec![
            InputPort::new(INIT_PORT, init, CellInit { out: 0 }),
            InputPort::new("in", update.clone(), CellIn { out: 0 }),
        ],
        vec![OutputPort::new("out", update, CellOut { out: 0 })],
    )?;

    GraphType::new(
        HEAT_GRAPH_TYPE,
        TypedSpec::<HeatGraphProperties>::shared("heat_properties"),
        vec![dirichlet, cell],
    )
}

fn device_type(gt: &GraphTypeRef, id: &str) -> GraphResult<DeviceTypeRef> {
    gt.device_type(id)
        .cloned()
        .ok_or_else(|| GraphError::UnknownDeviceType {
            graph_type: gt.id().to_string(),
            device_type: id.to_string(),
        })
}

/// Builds a `width x height` rectangular grid with the default time horizon.
///
/// See [`make_grid_until`].
pub fn make_grid<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    hot_spot: bool,
    rng: &mut R,
) -> GraphResult<GraphInstance> {
    make_grid_until(width, height, DEFAULT_MAX_TIME, hot_spot, rng)
}

/// Builds a `width x height` rectangular grid of devices `d_<x>_<y>`.
///
/// Corners are left out. The remaining border positions are
/// `dirichlet_variable` devices with one neighbour each; the interior holds
/// `cell`s with random initial values in `[-1, 1)`. With `hot_spot` set the
/// centre position becomes a four-neighbour dirichlet source.
///
/// # Panics
/// Panics if either dimension is below 3.
pub fn make_grid_until<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    max_time: u32,
    hot_spot: bool,
    rng: &mut R,
) -> GraphResult<GraphInstance> {
    assert!(
        width >= 3 && height >= 3,
        "grid must be at least 3x3, got {}x{}",
        width,
        height
    );

    let gt = heat_graph_type()?;
    let mut g = GraphInstance::new(
        gt.clone(),
        format!("heat_rect_{}_{}", width, height),
        Some(&json!({ "maxTime": max_time })),
    )?;
    let dirichlet = device_type(&gt, DIRICHLET)?;
    let cell = device_type(&gt, CELL)?;

    let h = (1.0 / (width * height) as f64).sqrt();
    let dt = h * h / 4.0 * 0.5;
    let w_other = dt / (h * h);
    let w_self = 1.0 - 4.0 * w_other;

    let id = |x: usize, y: usize| format!("d_{}_{}", x, y);
    let is_corner =
        |x: usize, y: usize| (x == 0 || x == width - 1) && (y == 0 || y == height - 1);

    for y in 0..height {
        let horizontal = y == 0 || y == height - 1;
        for x in 0..width {
            let vertical = x == 0 || x == width - 1;
            if horizontal && vertical {
                continue;
            }
            let meta = json!({ "x": x, "y": y });

            if hot_spot && x == width / 2 && y == height / 2 {
                let props = json!({
                    "bias": 0.0,
                    "amplitude": 1.0,
                    "phase": 1.5,
                    "frequency": 100.0 * dt,
                    "neighbours": 4,
                });
                g.add_device(id(x, y), &dirichlet, Some(&props), meta)?;
            } else if horizontal || vertical {
                let freq = 70.0 * dt * (x as f64 / width as f64 + y as f64 / height as f64);
                let props = json!({
                    "bias": 0.0,
                    "amplitude": 1.0,
                    "phase": 1.0,
                    "frequency": freq,
                    "neighbours": 1,
                });
                g.add_device(id(x, y), &dirichlet, Some(&props), meta)?;
            } else {
                let iv: f64 = rng.gen::<f64>() * 2.0 - 1.0;
                let props = json!({ "nhood": 4, "wSelf": w_self, "iv": iv });
                g.add_device(id(x, y), &cell, Some(&props), meta)?;
            }
        }
    }

    let edge_props = json!({ "w": w_other });
    for y in 0..height {
        for x in 0..width {
            if is_corner(x, y) {
                continue;
            }
            let targets: Vec<(usize, usize)> = if x == 0 {
                vec![(x + 1, y)]
            } else if x == width - 1 {
                vec![(x - 1, y)]
            } else if y == 0 {
                vec![(x, y + 1)]
            } else if y == height - 1 {
                vec![(x, y - 1)]
            } else {
                vec![(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            };

            let src = id(x, y);
            for (dx, dy) in targets {
                let dst = id(dx, dy);
                // The edge carrying traffic the other way.
                let buddy = format!("{}:in-{}:out", src, dst);
                g.add_edge(
                    &dst,
                    "in",
                    &src,
                    "out",
                    Some(&edge_props),
                    json!({ "buddy": buddy }),
                )?;
            }
        }
    }

    Ok(g)
}

/// The current value of a `cell` or `dirichlet_variable` device.
pub fn device_value(graph: &GraphInstance, id: &str) -> Option<f64> {
    let dev = graph.device_by_id(id)?;
    let state = dev.state();
    state
        .try_get::<CellState>()
        .map(|s| s.v)
        .or_else(|| state.try_get::<DirichletState>().map(|s| s.v))
}

/// Values of every device keyed by their `x`/`y` metadata, in device order.
pub fn field(graph: &GraphInstance) -> Vec<(u64, u64, f64)> {
    graph
        .devices()
        .iter()
        .filter_map(|dev| {
            let x = dev.metadata().get("x").and_then(Value::as_u64)?;
            let y = dev.metadata().get("y").and_then(Value::as_u64)?;
            let v = device_value(graph, dev.id())?;
            Some((x, y, v))
        })
        .collect()
}
