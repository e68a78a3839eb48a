//! Device types, ports and device instances.
//!
//! A [`DeviceType`] declares named input and output ports. Each port owns a
//! handler implementing its behaviour. Port indices are assigned once, in
//! declaration order, when the device type is constructed; output port `i`
//! owns the rts flag `1 << i`.
//!
//! A [`DeviceInstance`] is one device of a graph. It holds mutable state and
//! the rts word that says which outputs have a message ready, and caches
//! whether it is currently blocked by full outgoing edges.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::channel::{EdgeInstance, EdgeTypeRef};
use crate::error::{GraphError, GraphResult};
use crate::payload::{Payload, SpecRef};
use crate::types::{rts_mask, rts_ports, EdgeIdx, PortIndex, RtsWord, INIT_PORT, MAX_OUTPUTS};

/// Name to index lookup for the ports of one device type.
///
/// Passed to handlers at bind time so they can resolve and cache the flags
/// of sibling ports.
#[derive(Clone, Debug, Default)]
pub struct PortLayout {
    device_type: String,
    inputs: HashMap<String, PortIndex>,
    outputs: HashMap<String, PortIndex>,
}

impl PortLayout {
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Index of the named input port.
    pub fn input_index(&self, name: &str) -> GraphResult<PortIndex> {
        self.inputs
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownInput {
                device_type: self.device_type.clone(),
                port: name.to_string(),
            })
    }

    /// Index of the named output port.
    pub fn output_index(&self, name: &str) -> GraphResult<PortIndex> {
        self.outputs
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownOutput {
                device_type: self.device_type.clone(),
                port: name.to_string(),
            })
    }

    /// Rts flag of the named output port.
    pub fn rts_flag(&self, name: &str) -> GraphResult<RtsWord> {
        Ok(1 << self.output_index(name)?)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

/// Behaviour of an input port.
pub trait InputHandler: Send + Sync {
    /// Called once when the owning device type is constructed.
    fn on_bind(&mut self, _layout: &PortLayout) -> GraphResult<()> {
        Ok(())
    }

    /// Handles one incoming message and returns the device's new rts word.
    ///
    /// # Arguments
    /// * `graph_props` - Properties of the whole graph
    /// * `dev_props` - Properties of the receiving device
    /// * `dev_state` - State of the receiving device
    /// * `edge_props` - Properties of the edge the message arrived on
    /// * `edge_state` - State of that edge
    /// * `message` - The message
    fn on_receive(
        &self,
        graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        edge_props: &Payload,
        edge_state: &mut Payload,
        message: &Payload,
    ) -> RtsWord;
}

/// Behaviour of an output port.
pub trait OutputHandler: Send + Sync {
    /// Called once when the owning device type is constructed.
    fn on_bind(&mut self, _layout: &PortLayout) -> GraphResult<()> {
        Ok(())
    }

    /// Fills in an outgoing message.
    ///
    /// Returns whether the message should actually be sent, and the device's
    /// new rts word. Returning `false` cancels the send.
    fn on_send(
        &self,
        graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        message: &mut Payload,
    ) -> (bool, RtsWord);
}

/// A named input port.
pub struct InputPort {
    name: String,
    edge_type: EdgeTypeRef,
    index: Option<PortIndex>,
    handler: Box<dyn InputHandler>,
}

impl InputPort {
    pub fn new(
        name: impl Into<String>,
        edge_type: EdgeTypeRef,
        handler: impl InputHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            edge_type,
            index: None,
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edge_type(&self) -> &EdgeTypeRef {
        &self.edge_type
    }

    /// Binds the port to its position in the device type.
    ///
    /// # Panics
    /// Panics if the port is already bound.
    pub fn set_index(&mut self, index: PortIndex) {
        assert!(
            self.index.is_none(),
            "input port '{}' is already bound",
            self.name
        );
        self.index = Some(index);
    }

    /// # Panics
    /// Panics if the port has not been bound to a device type.
    pub fn index(&self) -> PortIndex {
        match self.index {
            Some(index) => index,
            None => panic!("input port '{}' is not bound", self.name),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.index.is_some()
    }

    pub fn handler(&self) -> &dyn InputHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("name", &self.name)
            .field("edge_type", &self.edge_type.id())
            .field("index", &self.index)
            .finish()
    }
}

/// A named output port.
pub struct OutputPort {
    name: String,
    edge_type: EdgeTypeRef,
    index: Option<PortIndex>,
    rts_flag: RtsWord,
    handler: Box<dyn OutputHandler>,
}

impl OutputPort {
    pub fn new(
        name: impl Into<String>,
        edge_type: EdgeTypeRef,
        handler: impl OutputHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            edge_type,
            index: None,
            rts_flag: 0,
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edge_type(&self) -> &EdgeTypeRef {
        &self.edge_type
    }

    /// Binds the port and computes its rts flag.
    ///
    /// # Panics
    /// Panics if the port is already bound or the index does not fit in an
    /// rts word.
    pub fn set_index(&mut self, index: PortIndex) {
        assert!(
            self.index.is_none(),
            "output port '{}' is already bound",
            self.name
        );
        assert!(index < MAX_OUTPUTS, "output index {} out of range", index);
        self.index = Some(index);
        self.rts_flag = 1 << index;
    }

    /// # Panics
    /// Panics if the port has not been bound to a device type.
    pub fn index(&self) -> PortIndex {
        match self.index {
            Some(index) => index,
            None => panic!("output port '{}' is not bound", self.name),
        }
    }

    /// The rts bit owned by this port. Zero until bound.
    pub fn rts_flag(&self) -> RtsWord {
        self.rts_flag
    }

    pub fn is_bound(&self) -> bool {
        self.index.is_some()
    }

    pub fn handler(&self) -> &dyn OutputHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("name", &self.name)
            .field("edge_type", &self.edge_type.id())
            .field("index", &self.index)
            .field("rts_flag", &self.rts_flag)
            .finish()
    }
}

/// Static description of a kind of device.
#[derive(Debug)]
pub struct DeviceType {
    id: String,
    properties: SpecRef,
    state: SpecRef,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    layout: PortLayout,
}

/// Shared handle to a device type.
pub type DeviceTypeRef = Arc<DeviceType>;

impl DeviceType {
    /// Creates a device type and binds its ports.
    ///
    /// Inputs and then outputs are bound in declaration order, after which
    /// every handler's `on_bind` is called with the finished layout.
    ///
    /// # Errors
    /// Fails if there are more than [`MAX_OUTPUTS`] outputs, if a port name
    /// repeats within one direction, or if a handler's `on_bind` fails.
    pub fn new(
        id: impl Into<String>,
        properties: SpecRef,
        state: SpecRef,
        mut inputs: Vec<InputPort>,
        mut outputs: Vec<OutputPort>,
    ) -> GraphResult<DeviceTypeRef> {
        let id = id.into();
        if outputs.len() > MAX_OUTPUTS {
            return Err(GraphError::TooManyOutputs {
                device_type: id,
                count: outputs.len(),
                max: MAX_OUTPUTS,
            });
        }

        let mut layout = PortLayout {
            device_type: id.clone(),
            ..Default::default()
        };
        for (index, port) in inputs.iter_mut().enumerate() {
            if layout.inputs.insert(port.name.clone(), index).is_some() {
                return Err(GraphError::DuplicatePort {
                    device_type: id,
                    port: port.name.clone(),
                });
            }
            port.set_index(index);
        }
        for (index, port) in outputs.iter_mut().enumerate() {
            if layout.outputs.insert(port.name.clone(), index).is_some() {
                return Err(GraphError::DuplicatePort {
                    device_type: id,
                    port: port.name.clone(),
                });
            }
            port.set_index(index);
        }

        for port in inputs.iter_mut() {
            port.handler.on_bind(&layout)?;
        }
        for port in outputs.iter_mut() {
            port.handler.on_bind(&layout)?;
        }

        Ok(Arc::new(Self {
            id,
            properties,
            state,
            inputs,
            outputs,
            layout,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spec of the per-device properties.
    pub fn properties(&self) -> &SpecRef {
        &self.properties
    }

    /// Spec of the per-device state.
    pub fn state(&self) -> &SpecRef {
        &self.state
    }

    pub fn layout(&self) -> &PortLayout {
        &self.layout
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.layout.inputs.get(name).map(|&i| &self.inputs[i])
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.layout.outputs.get(name).map(|&i| &self.outputs[i])
    }

    pub fn input_at(&self, index: PortIndex) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    pub fn output_at(&self, index: PortIndex) -> Option<&OutputPort> {
        self.outputs.get(index)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Returns true if the type declares an `__init__` input.
    pub fn has_init(&self) -> bool {
        self.layout.inputs.contains_key(INIT_PORT)
    }

    /// Distinct edge types used by the ports, in port order.
    pub fn edge_types(&self) -> Vec<EdgeTypeRef> {
        let mut seen: Vec<EdgeTypeRef> = Vec::new();
        let all = self
            .inputs
            .iter()
            .map(|p| &p.edge_type)
            .chain(self.outputs.iter().map(|p| &p.edge_type));
        for et in all {
            if !seen.iter().any(|s| s.id() == et.id()) {
                seen.push(Arc::clone(et));
            }
        }
        seen
    }
}

/// One device of a graph instance.
#[derive(Clone, Debug)]
pub struct DeviceInstance {
    pub(crate) id: String,
    pub(crate) device_type: DeviceTypeRef,
    pub(crate) properties: Payload,
    pub(crate) state: Payload,
    pub(crate) rts: RtsWord,
    pub(crate) metadata: Value,
    pub(crate) inputs: Vec<Vec<EdgeIdx>>,
    pub(crate) outputs: Vec<Vec<EdgeIdx>>,
    rate: f64,
    is_rts: bool,
    is_blocked: bool,
}

impl DeviceInstance {
    pub(crate) fn new(
        id: String,
        device_type: DeviceTypeRef,
        properties: Payload,
        metadata: Value,
    ) -> Self {
        let state = device_type.state().create();
        let inputs = vec![Vec::new(); device_type.input_count()];
        let outputs = vec![Vec::new(); device_type.output_count()];
        Self {
            id,
            device_type,
            properties,
            state,
            rts: 0,
            metadata,
            inputs,
            outputs,
            rate: 1.0,
            is_rts: false,
            is_blocked: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device_type(&self) -> &DeviceTypeRef {
        &self.device_type
    }

    pub fn properties(&self) -> &Payload {
        &self.properties
    }

    pub fn state(&self) -> &Payload {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Payload {
        &mut self.state
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn rts(&self) -> RtsWord {
        self.rts
    }

    /// Sets the rts word.
    ///
    /// # Panics
    /// Panics if a bit beyond the device's output count is set.
    pub fn set_rts(&mut self, rts: RtsWord) {
        assert!(
            rts & !rts_mask(self.device_type.output_count()) == 0,
            "device '{}' raised rts {:#b} but has only {} outputs",
            self.id,
            rts,
            self.device_type.output_count()
        );
        self.rts = rts;
    }

    /// Probability that the device takes its turn when selected.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// # Panics
    /// Panics if `rate` is outside `[0, 1]`.
    pub fn set_rate(&mut self, rate: f64) {
        assert!(
            (0.0..=1.0).contains(&rate),
            "rate {} for device '{}' is outside [0, 1]",
            rate,
            self.id
        );
        self.rate = rate;
    }

    /// Edges attached to the input port at `index`.
    pub fn inputs_at(&self, index: PortIndex) -> &[EdgeIdx] {
        &self.inputs[index]
    }

    /// Edges attached to the output port at `index`.
    pub fn outputs_at(&self, index: PortIndex) -> &[EdgeIdx] {
        &self.outputs[index]
    }

    /// Edges attached to the named output port.
    pub fn outputs_named(&self, name: &str) -> Option<&[EdgeIdx]> {
        self.device_type
            .output(name)
            .map(|p| self.outputs[p.index()].as_slice())
    }

    /// Recomputes the cached readiness and blocking flags.
    ///
    /// A device is blocked only when every ready output has at least one full
    /// outgoing edge. One ready output with all-empty edges is enough to
    /// leave it unblocked.
    pub fn update(&mut self, edges: &[EdgeInstance]) {
        self.is_rts = self.rts != 0;
        self.is_blocked = rts_ports(self.rts)
            .all(|port| self.outputs[port].iter().any(|e| edges[e.0].full()));
    }

    /// Recomputes only the readiness flag.
    pub fn update_rts_only(&mut self) {
        self.is_rts = self.rts != 0;
    }

    /// Readiness as of the last update.
    pub fn is_rts(&self) -> bool {
        self.is_rts
    }

    /// Blocking as of the last update.
    pub fn blocked(&self) -> bool {
        self.is_blocked && self.is_rts
    }

    /// Ready and not blocked, as of the last update.
    pub fn ready(&self) -> bool {
        self.is_rts && !self.is_blocked
    }

    /// Output ports whose rts bit is set.
    pub fn ready_ports(&self) -> Vec<PortIndex> {
        rts_ports(self.rts).collect()
    }

    /// Ready output ports whose outgoing edges are all empty.
    pub fn sendable_ports(&self, edges: &[EdgeInstance]) -> Vec<PortIndex> {
        rts_ports(self.rts)
            .filter(|&port| self.outputs[port].iter().all(|e| edges[e.0].empty()))
            .collect()
    }
}
