//! Graph documents and the load-event protocol.
//!
//! A graph document names a registered graph type and lists device and edge
//! instances. Loading walks the document and reports what it finds through
//! [`GraphLoadEvents`] callbacks, in this order:
//!
//! 1. `on_edge_type` for every edge type, `on_device_type` for every device
//!    type, then `on_graph_type`
//! 2. `on_begin_graph_instance`
//! 3. `on_begin_device_instances`, `on_device_instance` per device,
//!    `on_end_device_instances`
//! 4. `on_begin_edge_instances`, `on_edge_instance` per edge,
//!    `on_end_edge_instances`
//! 5. `on_end_graph_instance`
//!
//! [`GraphBuilder`] consumes those callbacks to build a [`GraphInstance`].
//!
//! # Document format
//!
//! ```yaml
//! graph_instance:
//!   id: pair
//!   graph_type_id: counter_chain
//!   device_instances:
//!     - { id: src, type: ticker, properties: { limit: 3 } }
//!     - { id: dst, type: accumulator, metadata: { x: 1 } }
//!   edge_instances:
//!     - path: "dst:in-src:out"
//!     - src_device_id: src
//!       src_port_name: out
//!       dst_device_id: dst2
//!       dst_port_name: in
//! ```
//!
//! Camel-case spellings (`graphTypeId`, `deviceInstances`, `srcDeviceId`,
//! ...) are accepted too. Unknown fields are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

use crate::channel::EdgeTypeRef;
use crate::device::{DeviceTypeRef, InputPort, OutputPort};
use crate::error::{GraphError, PayloadError};
use crate::graph::{GraphInstance, GraphTypeRef};
use crate::payload::Payload;
use crate::registry::GraphTypeRegistry;
use crate::types::DeviceIdx;

/// Errors that can occur while loading a graph document.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("malformed graph document: {0}")]
    Malformed(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Top level of a graph document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDocument {
    #[serde(alias = "graphInstance")]
    pub graph_instance: GraphInstanceDoc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphInstanceDoc {
    pub id: String,

    #[serde(alias = "graphTypeId")]
    pub graph_type_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    #[serde(default, alias = "deviceInstances")]
    pub device_instances: Vec<DeviceDoc>,

    #[serde(default, alias = "edgeInstances")]
    pub edge_instances: Vec<EdgeDoc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceDoc {
    pub id: String,

    #[serde(rename = "type")]
    pub device_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// An edge, given either as a packed `path` or as explicit endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, alias = "srcDeviceId", skip_serializing_if = "Option::is_none")]
    pub src_device_id: Option<String>,

    #[serde(default, alias = "srcPortName", skip_serializing_if = "Option::is_none")]
    pub src_port_name: Option<String>,

    #[serde(default, alias = "dstDeviceId", skip_serializing_if = "Option::is_none")]
    pub dst_device_id: Option<String>,

    #[serde(default, alias = "dstPortName", skip_serializing_if = "Option::is_none")]
    pub dst_port_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Resolved endpoint names of an edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgePath {
    pub dst_device: String,
    pub dst_port: String,
    pub src_device: String,
    pub src_port: String,
}

impl EdgeDoc {
    /// Resolves the endpoints from either the path or the explicit fields.
    pub fn endpoints(&self) -> LoadResult<EdgePath> {
        let explicit = [
            &self.src_device_id,
            &self.src_port_name,
            &self.dst_device_id,
            &self.dst_port_name,
        ];

        match &self.path {
            Some(path) => {
                if explicit.iter().any(|f| f.is_some()) {
                    return Err(LoadError::Malformed(format!(
                        "edge '{}' has both a path and explicit endpoints",
                        path
                    )));
                }
                split_path(path)
            }
            None => match explicit {
                [Some(src_device), Some(src_port), Some(dst_device), Some(dst_port)] => {
                    Ok(EdgePath {
                        dst_device: dst_device.clone(),
                        dst_port: dst_port.clone(),
                        src_device: src_device.clone(),
                        src_port: src_port.clone(),
                    })
                }
                _ => Err(LoadError::Malformed(
                    "edge needs a path or all four of src_device_id, src_port_name, \
                     dst_device_id and dst_port_name"
                        .to_string(),
                )),
            },
        }
    }
}

/// Splits `"<dstId>:<dstPort>-<srcId>:<srcPort>"`.
pub fn split_path(path: &str) -> LoadResult<EdgePath> {
    let malformed = || LoadError::Malformed(format!("edge path '{}' is not dst:port-src:port", path));

    let endpoints: Vec<&str> = path.split('-').collect();
    if endpoints.len() != 2 {
        return Err(malformed());
    }
    let split = |s: &str| -> LoadResult<(String, String)> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [dev, port] if !dev.is_empty() && !port.is_empty() => {
                Ok((dev.to_string(), port.to_string()))
            }
            _ => Err(malformed()),
        }
    };
    let (dst_device, dst_port) = split(endpoints[0])?;
    let (src_device, src_port) = split(endpoints[1])?;
    Ok(EdgePath {
        dst_device,
        dst_port,
        src_device,
        src_port,
    })
}

/// One end of an edge as reported to [`GraphLoadEvents::on_edge_instance`].
pub struct Endpoint<'a, T> {
    /// Token returned by `on_device_instance` for the device
    pub token: &'a T,
    pub device_type: &'a DeviceTypeRef,
    /// Index of the port within the device type
    pub port: usize,
}

/// Consumer of a graph load.
///
/// Tokens are whatever the consumer wants to get back in later callbacks.
/// Type-level callbacks default to no-ops.
pub trait GraphLoadEvents {
    type GraphToken;
    type DeviceToken;

    fn on_edge_type(&mut self, _edge_type: &EdgeTypeRef) {}

    fn on_device_type(&mut self, _device_type: &DeviceTypeRef) {}

    fn on_graph_type(&mut self, _graph_type: &GraphTypeRef) {}

    fn on_begin_graph_instance(
        &mut self,
        graph_type: &GraphTypeRef,
        id: &str,
        properties: Payload,
    ) -> LoadResult<Self::GraphToken>;

    fn on_begin_device_instances(&mut self, _graph: &Self::GraphToken) {}

    fn on_device_instance(
        &mut self,
        graph: &Self::GraphToken,
        device_type: &DeviceTypeRef,
        id: &str,
        properties: Payload,
        metadata: Value,
    ) -> LoadResult<Self::DeviceToken>;

    fn on_end_device_instances(&mut self, _graph: &Self::GraphToken) {}

    fn on_begin_edge_instances(&mut self, _graph: &Self::GraphToken) {}

    /// Both endpoints have already been reported as device instances.
    fn on_edge_instance(
        &mut self,
        graph: &Self::GraphToken,
        dst: Endpoint<'_, Self::DeviceToken>,
        src: Endpoint<'_, Self::DeviceToken>,
        properties: Payload,
        metadata: Value,
    ) -> LoadResult<()>;

    fn on_end_edge_instances(&mut self, _graph: &Self::GraphToken) {}

    fn on_end_graph_instance(&mut self, _graph: Self::GraphToken) -> LoadResult<()> {
        Ok(())
    }
}

/// Walks `doc`, reporting it to `events`.
pub fn load_graph_to_events<E: GraphLoadEvents>(
    doc: &GraphDocument,
    registry: &GraphTypeRegistry,
    events: &mut E,
) -> LoadResult<()> {
    let gi = &doc.graph_instance;
    let graph_type = registry.require(&gi.graph_type_id)?.clone();

    for et in graph_type.edge_types() {
        events.on_edge_type(et);
    }
    for dt in graph_type.device_types() {
        events.on_device_type(dt);
    }
    events.on_graph_type(&graph_type);

    let properties = graph_type.properties().import(gi.properties.as_ref())?;
    let graph = events.on_begin_graph_instance(&graph_type, &gi.id, properties)?;

    events.on_begin_device_instances(&graph);
    let mut devices: HashMap<&str, (E::DeviceToken, DeviceTypeRef)> = HashMap::new();
    for dev in &gi.device_instances {
        if devices.contains_key(dev.id.as_str()) {
            return Err(GraphError::DuplicateDevice(dev.id.clone()).into());
        }
        let dt = graph_type
            .device_type(&dev.device_type)
            .ok_or_else(|| GraphError::UnknownDeviceType {
                graph_type: graph_type.id().to_string(),
                device_type: dev.device_type.clone(),
            })?
            .clone();
        let props = dt.properties().import(dev.properties.as_ref())?;
        let metadata = dev.metadata.clone().unwrap_or(Value::Null);

        trace!(device = %dev.id, device_type = dt.id(), "loading device");
        let token = events.on_device_instance(&graph, &dt, &dev.id, props, metadata)?;
        devices.insert(dev.id.as_str(), (token, dt));
    }
    events.on_end_device_instances(&graph);

    events.on_begin_edge_instances(&graph);
    for edge in &gi.edge_instances {
        let path = edge.endpoints()?;
        let (dst_token, dst_type) = devices
            .get(path.dst_device.as_str())
            .ok_or_else(|| GraphError::UnknownDevice(path.dst_device.clone()))?;
        let (src_token, src_type) = devices
            .get(path.src_device.as_str())
            .ok_or_else(|| GraphError::UnknownDevice(path.src_device.clone()))?;

        let dst_port: &InputPort =
            dst_type
                .input(&path.dst_port)
                .ok_or_else(|| GraphError::UnknownInput {
                    device_type: dst_type.id().to_string(),
                    port: path.dst_port.clone(),
                })?;
        let src_port: &OutputPort =
            src_type
                .output(&path.src_port)
                .ok_or_else(|| GraphError::UnknownOutput {
                    device_type: src_type.id().to_string(),
                    port: path.src_port.clone(),
                })?;

        if dst_port.edge_type().id() != src_port.edge_type().id() {
            return Err(GraphError::EdgeTypeMismatch {
                src_port: src_port.name().to_string(),
                src_type: src_port.edge_type().id().to_string(),
                dst_port: dst_port.name().to_string(),
                dst_type: dst_port.edge_type().id().to_string(),
            }
            .into());
        }

        let props = dst_port
            .edge_type()
            .properties()
            .import(edge.properties.as_ref())?;
        let metadata = edge.metadata.clone().unwrap_or(Value::Null);

        events.on_edge_instance(
            &graph,
            Endpoint {
                token: dst_token,
                device_type: dst_type,
                port: dst_port.index(),
            },
            Endpoint {
                token: src_token,
                device_type: src_type,
                port: src_port.index(),
            },
            props,
            metadata,
        )?;
    }
    events.on_end_edge_instances(&graph);

    events.on_end_graph_instance(graph)?;
    debug!(
        graph = %gi.id,
        graph_type = graph_type.id(),
        devices = gi.device_instances.len(),
        edges = gi.edge_instances.len(),
        "graph loaded"
    );
    Ok(())
}

/// Builds a [`GraphInstance`] from load events.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Option<GraphInstance>,
    finished: bool,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built graph, once `on_end_graph_instance` has been seen.
    pub fn into_graph(self) -> Option<GraphInstance> {
        if self.finished {
            self.graph
        } else {
            None
        }
    }

    fn graph_mut(&mut self, token: &str) -> LoadResult<&mut GraphInstance> {
        match self.graph.as_mut() {
            Some(g) if g.id() == token => Ok(g),
            _ => Err(LoadError::Malformed(format!(
                "graph instance '{}' has not begun",
                token
            ))),
        }
    }
}

impl GraphLoadEvents for GraphBuilder {
    type GraphToken = String;
    type DeviceToken = DeviceIdx;

    fn on_begin_graph_instance(
        &mut self,
        graph_type: &GraphTypeRef,
        id: &str,
        properties: Payload,
    ) -> LoadResult<String> {
        if self.graph.is_some() {
            return Err(LoadError::Malformed(
                "builder already holds a graph instance".to_string(),
            ));
        }
        self.graph = Some(GraphInstance::with_properties(
            graph_type.clone(),
            id,
            properties,
        ));
        Ok(id.to_string())
    }

    fn on_device_instance(
        &mut self,
        graph: &String,
        device_type: &DeviceTypeRef,
        id: &str,
        properties: Payload,
        metadata: Value,
    ) -> LoadResult<DeviceIdx> {
        let g = self.graph_mut(graph)?;
        Ok(g.add_device_raw(id, device_type, properties, metadata)?)
    }

    fn on_edge_instance(
        &mut self,
        graph: &String,
        dst: Endpoint<'_, DeviceIdx>,
        src: Endpoint<'_, DeviceIdx>,
        properties: Payload,
        metadata: Value,
    ) -> LoadResult<()> {
        let g = self.graph_mut(graph)?;
        g.add_edge_raw(*dst.token, dst.port, *src.token, src.port, properties, metadata)?;
        Ok(())
    }

    fn on_end_graph_instance(&mut self, graph: String) -> LoadResult<()> {
        self.graph_mut(&graph)?;
        self.finished = true;
        Ok(())
    }
}

/// Document encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> LoadResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(LoadError::UnknownFormat(ext.to_string())),
        }
    }
}

impl GraphDocument {
    /// Parses a document.
    pub fn parse(text: &str, format: DocumentFormat) -> LoadResult<Self> {
        Ok(match format {
            DocumentFormat::Yaml => serde_yaml::from_str(text)?,
            DocumentFormat::Json => serde_json::from_str(text)?,
        })
    }

    /// Describes an existing graph, with edges written as paths.
    ///
    /// Device state and edge contents are not part of a document.
    pub fn from_graph(graph: &GraphInstance) -> Self {
        let non_null = |v: &Value| (!v.is_null()).then(|| v.clone());

        let device_instances = graph
            .devices()
            .iter()
            .map(|dev| DeviceDoc {
                id: dev.id().to_string(),
                device_type: dev.device_type().id().to_string(),
                properties: Some(dev.properties().to_json()),
                metadata: non_null(dev.metadata()),
            })
            .collect();

        let edge_instances = graph
            .edges()
            .iter()
            .map(|edge| EdgeDoc {
                path: Some(edge.id().to_string()),
                properties: Some(edge.properties().to_json()),
                metadata: non_null(edge.metadata()),
                ..EdgeDoc::default()
            })
            .collect();

        Self {
            graph_instance: GraphInstanceDoc {
                id: graph.id().to_string(),
                graph_type_id: graph.graph_type().id().to_string(),
                properties: Some(graph.properties().to_json()),
                device_instances,
                edge_instances,
            },
        }
    }

    pub fn to_yaml(&self) -> LoadResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> LoadResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builds a graph from a parsed document.
pub fn load_graph(doc: &GraphDocument, registry: &GraphTypeRegistry) -> LoadResult<GraphInstance> {
    let mut builder = GraphBuilder::new();
    load_graph_to_events(doc, registry, &mut builder)?;
    builder
        .into_graph()
        .ok_or_else(|| LoadError::Malformed("no graph instance was built".to_string()))
}

/// Builds a graph from document text.
pub fn load_graph_from_str(
    text: &str,
    format: DocumentFormat,
    registry: &GraphTypeRegistry,
) -> LoadResult<GraphInstance> {
    let doc = GraphDocument::parse(text, format)?;
    load_graph(&doc, registry)
}

/// Builds a graph from a `.yaml`, `.yml` or `.json` file.
pub fn load_graph_from_file<P: AsRef<Path>>(
    path: P,
    registry: &GraphTypeRegistry,
) -> LoadResult<GraphInstance> {
    let path = path.as_ref();
    let format = DocumentFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    load_graph_from_str(&text, format, registry)
}
