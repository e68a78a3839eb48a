//! Graph types and graph instances.
//!
//! A [`GraphType`] groups the device types (and, through their ports, the
//! edge types) that may appear in a graph. A [`GraphInstance`] is an arena of
//! devices and edges built from a graph type; devices and edges refer to each
//! other through [`DeviceIdx`] / [`EdgeIdx`] rather than references.
//!
//! # Example
//!
//! ```
//! use gals_sim::graphs::chain::{chain_graph_type, ACCUMULATOR, TICKER};
//! use gals_sim::graph::GraphInstance;
//! use serde_json::{json, Value};
//!
//! let gt = chain_graph_type().unwrap();
//! let mut g = GraphInstance::new(gt.clone(), "pair", None).unwrap();
//! let ticker = gt.device_type(TICKER).unwrap().clone();
//! let sink = gt.device_type(ACCUMULATOR).unwrap().clone();
//!
//! g.add_device("src", &ticker, Some(&json!({ "limit": 3 })), Value::Null).unwrap();
//! g.add_device("dst", &sink, None, Value::Null).unwrap();
//! g.add_edge("dst", "in", "src", "out", None, Value::Null).unwrap();
//!
//! assert_eq!(g.edge_by_id("dst:in-src:out").unwrap().id(), "dst:in-src:out");
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::{EdgeInstance, EdgeTypeRef};
use crate::device::{DeviceInstance, DeviceTypeRef};
use crate::error::{GraphError, GraphResult};
use crate::payload::{Payload, SpecRef};
use crate::types::{DeviceIdx, EdgeIdx, PortIndex};

/// Static description of a kind of graph.
#[derive(Debug)]
pub struct GraphType {
    id: String,
    properties: SpecRef,
    device_types: Vec<DeviceTypeRef>,
    device_index: HashMap<String, usize>,
    edge_types: Vec<EdgeTypeRef>,
    edge_index: HashMap<String, usize>,
}

/// Shared handle to a graph type.
pub type GraphTypeRef = Arc<GraphType>;

impl GraphType {
    /// Creates a graph type from its device types.
    ///
    /// Edge types are collected from every port of every device type; when
    /// two ports name the same edge-type id the first one seen wins.
    pub fn new(
        id: impl Into<String>,
        properties: SpecRef,
        device_types: Vec<DeviceTypeRef>,
    ) -> GraphResult<GraphTypeRef> {
        let id = id.into();
        let mut device_index = HashMap::new();
        let mut edge_types = Vec::new();
        let mut edge_index = HashMap::new();

        for (i, dt) in device_types.iter().enumerate() {
            if device_index.insert(dt.id().to_string(), i).is_some() {
                return Err(GraphError::DuplicateDeviceType {
                    graph_type: id,
                    device_type: dt.id().to_string(),
                });
            }
            for et in dt.edge_types() {
                if !edge_index.contains_key(et.id()) {
                    edge_index.insert(et.id().to_string(), edge_types.len());
                    edge_types.push(et);
                }
            }
        }

        Ok(Arc::new(Self {
            id,
            properties,
            device_types,
            device_index,
            edge_types,
            edge_index,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spec of the graph-level properties.
    pub fn properties(&self) -> &SpecRef {
        &self.properties
    }

    /// Device types in declaration order.
    pub fn device_types(&self) -> &[DeviceTypeRef] {
        &self.device_types
    }

    pub fn device_type(&self, id: &str) -> Option<&DeviceTypeRef> {
        self.device_index.get(id).map(|&i| &self.device_types[i])
    }

    /// Edge types in first-seen order.
    pub fn edge_types(&self) -> &[EdgeTypeRef] {
        &self.edge_types
    }

    pub fn edge_type(&self, id: &str) -> Option<&EdgeTypeRef> {
        self.edge_index.get(id).map(|&i| &self.edge_types[i])
    }
}

/// A concrete graph: devices, edges and graph-level properties.
#[derive(Clone, Debug)]
pub struct GraphInstance {
    id: String,
    graph_type: GraphTypeRef,
    pub(crate) properties: Payload,
    pub(crate) devices: Vec<DeviceInstance>,
    pub(crate) edges: Vec<EdgeInstance>,
    device_ids: HashMap<String, DeviceIdx>,
    edge_ids: HashMap<String, EdgeIdx>,
}

impl GraphInstance {
    /// Creates an empty graph, importing raw graph properties.
    pub fn new(
        graph_type: GraphTypeRef,
        id: impl Into<String>,
        properties: Option<&Value>,
    ) -> GraphResult<Self> {
        let properties = graph_type.properties().import(properties)?;
        Ok(Self::with_properties(graph_type, id, properties))
    }

    /// Creates an empty graph with already-typed properties.
    pub fn with_properties(
        graph_type: GraphTypeRef,
        id: impl Into<String>,
        properties: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            graph_type,
            properties,
            devices: Vec::new(),
            edges: Vec::new(),
            device_ids: HashMap::new(),
            edge_ids: HashMap::new(),
        }
    }

    /// Adds a device, importing its raw properties through the device type.
    pub fn add_device(
        &mut self,
        id: impl Into<String>,
        device_type: &DeviceTypeRef,
        properties: Option<&Value>,
        metadata: Value,
    ) -> GraphResult<DeviceIdx> {
        let properties = device_type.properties().import(properties)?;
        self.add_device_raw(id, device_type, properties, metadata)
    }

    /// Adds a device with already-typed properties.
    pub fn add_device_raw(
        &mut self,
        id: impl Into<String>,
        device_type: &DeviceTypeRef,
        properties: Payload,
        metadata: Value,
    ) -> GraphResult<DeviceIdx> {
        let id = id.into();
        if self.device_ids.contains_key(&id) {
            return Err(GraphError::DuplicateDevice(id));
        }
        let idx = DeviceIdx(self.devices.len());
        self.device_ids.insert(id.clone(), idx);
        self.devices.push(DeviceInstance::new(
            id,
            Arc::clone(device_type),
            properties,
            metadata,
        ));
        Ok(idx)
    }

    /// Adds an edge between named ports, importing its raw properties.
    pub fn add_edge(
        &mut self,
        dst_id: &str,
        dst_port: &str,
        src_id: &str,
        src_port: &str,
        properties: Option<&Value>,
        metadata: Value,
    ) -> GraphResult<EdgeIdx> {
        let dst = self.require_device(dst_id)?;
        let src = self.require_device(src_id)?;

        let dst_type = Arc::clone(&self.devices[dst.0].device_type);
        let src_type = Arc::clone(&self.devices[src.0].device_type);
        let in_port = dst_type.layout().input_index(dst_port)?;
        let out_port = src_type.layout().output_index(src_port)?;

        let edge_type = Arc::clone(dst_type.inputs()[in_port].edge_type());
        let properties = edge_type.properties().import(properties)?;
        self.add_edge_raw(dst, in_port, src, out_port, properties, metadata)
    }

    /// Adds an edge between port indices with already-typed properties.
    pub fn add_edge_raw(
        &mut self,
        dst: DeviceIdx,
        dst_port: PortIndex,
        src: DeviceIdx,
        src_port: PortIndex,
        properties: Payload,
        metadata: Value,
    ) -> GraphResult<EdgeIdx> {
        let dst_dev = self.require_idx(dst)?;
        let src_dev = self.require_idx(src)?;
        let dst_type = Arc::clone(&dst_dev.device_type);
        let src_type = Arc::clone(&src_dev.device_type);

        let in_port = dst_type
            .input_at(dst_port)
            .ok_or_else(|| GraphError::UnknownInput {
                device_type: dst_type.id().to_string(),
                port: dst_port.to_string(),
            })?;
        let out_port = src_type
            .output_at(src_port)
            .ok_or_else(|| GraphError::UnknownOutput {
                device_type: src_type.id().to_string(),
                port: src_port.to_string(),
            })?;

        if in_port.edge_type().id() != out_port.edge_type().id() {
            return Err(GraphError::EdgeTypeMismatch {
                src_port: out_port.name().to_string(),
                src_type: out_port.edge_type().id().to_string(),
                dst_port: in_port.name().to_string(),
                dst_type: in_port.edge_type().id().to_string(),
            });
        }

        let id = EdgeInstance::make_id(dst_dev.id(), in_port.name(), src_dev.id(), out_port.name());
        if self.edge_ids.contains_key(&id) {
            return Err(GraphError::DuplicateEdge(id));
        }

        let idx = EdgeIdx(self.edges.len());
        self.edge_ids.insert(id.clone(), idx);
        self.edges.push(EdgeInstance::new(
            id,
            Arc::clone(in_port.edge_type()),
            src,
            src_port,
            dst,
            dst_port,
            properties,
            metadata,
        ));
        self.devices[dst.0].inputs[dst_port].push(idx);
        self.devices[src.0].outputs[src_port].push(idx);
        Ok(idx)
    }

    fn require_device(&self, id: &str) -> GraphResult<DeviceIdx> {
        self.device_ids
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownDevice(id.to_string()))
    }

    fn require_idx(&self, idx: DeviceIdx) -> GraphResult<&DeviceInstance> {
        self.devices
            .get(idx.0)
            .ok_or_else(|| GraphError::UnknownDevice(idx.to_string()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn graph_type(&self) -> &GraphTypeRef {
        &self.graph_type
    }

    pub fn properties(&self) -> &Payload {
        &self.properties
    }

    pub fn devices(&self) -> &[DeviceInstance] {
        &self.devices
    }

    pub fn edges(&self) -> &[EdgeInstance] {
        &self.edges
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Device indices in insertion order.
    pub fn device_indices(&self) -> impl Iterator<Item = DeviceIdx> {
        (0..self.devices.len()).map(DeviceIdx)
    }

    /// Edge indices in insertion order.
    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIdx> {
        (0..self.edges.len()).map(EdgeIdx)
    }

    pub fn device(&self, idx: DeviceIdx) -> &DeviceInstance {
        &self.devices[idx.0]
    }

    pub fn device_mut(&mut self, idx: DeviceIdx) -> &mut DeviceInstance {
        &mut self.devices[idx.0]
    }

    pub fn edge(&self, idx: EdgeIdx) -> &EdgeInstance {
        &self.edges[idx.0]
    }

    pub fn edge_mut(&mut self, idx: EdgeIdx) -> &mut EdgeInstance {
        &mut self.edges[idx.0]
    }

    pub fn device_idx(&self, id: &str) -> Option<DeviceIdx> {
        self.device_ids.get(id).copied()
    }

    pub fn edge_idx(&self, id: &str) -> Option<EdgeIdx> {
        self.edge_ids.get(id).copied()
    }

    pub fn device_by_id(&self, id: &str) -> Option<&DeviceInstance> {
        self.device_idx(id).map(|idx| &self.devices[idx.0])
    }

    pub fn edge_by_id(&self, id: &str) -> Option<&EdgeInstance> {
        self.edge_idx(id).map(|idx| &self.edges[idx.0])
    }

    /// Recomputes the readiness and blocking flags of one device.
    pub fn update_device(&mut self, idx: DeviceIdx) {
        let edges = &self.edges;
        self.devices[idx.0].update(edges);
    }

    /// Recomputes the flags of every device and edge.
    pub fn update_all(&mut self) {
        let edges = &self.edges;
        for dev in self.devices.iter_mut() {
            dev.update(edges);
        }
        for edge in self.edges.iter_mut() {
            edge.update();
        }
    }
}
