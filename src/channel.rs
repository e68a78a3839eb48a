//! Edge types and edge instances.
//!
//! An edge is a point-to-point channel from one device's output port to
//! another device's input port. Every edge holds at most one message: a
//! sender whose outgoing edge is still full is blocked until the receiver
//! drains it.
//!
//! # Example
//!
//! ```
//! use gals_sim::channel::EdgeType;
//! use gals_sim::payload::{Empty, PayloadSpec, TypedSpec};
//!
//! let tick = EdgeType::new("tick")
//!     .with_message(TypedSpec::<Empty>::shared("tick_message"));
//! assert_eq!(tick.id(), "tick");
//! assert_eq!(tick.properties().name(), "empty");
//! ```

use serde_json::Value;
use std::sync::Arc;

use crate::payload::{empty_spec, Payload, SpecRef};
use crate::types::{DeviceIdx, PortIndex};

/// Static description of a kind of edge.
///
/// Holds the specs for the messages it carries and for the per-edge
/// properties and state. Each spec defaults to the empty payload.
#[derive(Clone, Debug)]
pub struct EdgeType {
    id: String,
    message: SpecRef,
    properties: SpecRef,
    state: SpecRef,
}

/// Shared handle to an edge type.
pub type EdgeTypeRef = Arc<EdgeType>;

impl EdgeType {
    /// Creates an edge type whose payloads are all empty.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: empty_spec(),
            properties: empty_spec(),
            state: empty_spec(),
        }
    }

    /// Sets the message spec.
    pub fn with_message(mut self, spec: SpecRef) -> Self {
        self.message = spec;
        self
    }

    /// Sets the per-edge properties spec.
    pub fn with_properties(mut self, spec: SpecRef) -> Self {
        self.properties = spec;
        self
    }

    /// Sets the per-edge state spec.
    pub fn with_state(mut self, spec: SpecRef) -> Self {
        self.state = spec;
        self
    }

    /// Wraps the edge type in an `Arc`.
    pub fn shared(self) -> EdgeTypeRef {
        Arc::new(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message(&self) -> &SpecRef {
        &self.message
    }

    pub fn properties(&self) -> &SpecRef {
        &self.properties
    }

    pub fn state(&self) -> &SpecRef {
        &self.state
    }
}

/// A concrete edge between two devices.
#[derive(Clone, Debug)]
pub struct EdgeInstance {
    pub(crate) id: String,
    pub(crate) edge_type: EdgeTypeRef,
    pub(crate) src: DeviceIdx,
    pub(crate) src_port: PortIndex,
    pub(crate) dst: DeviceIdx,
    pub(crate) dst_port: PortIndex,
    pub(crate) properties: Payload,
    pub(crate) state: Payload,
    pub(crate) metadata: Value,
    slot: Option<Payload>,
}

impl EdgeInstance {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        edge_type: EdgeTypeRef,
        src: DeviceIdx,
        src_port: PortIndex,
        dst: DeviceIdx,
        dst_port: PortIndex,
        properties: Payload,
        metadata: Value,
    ) -> Self {
        let state = edge_type.state().create();
        Self {
            id,
            edge_type,
            src,
            src_port,
            dst,
            dst_port,
            properties,
            state,
            metadata,
            slot: None,
        }
    }

    /// Builds the canonical edge id `"<dst>:<dstPort>-<src>:<srcPort>"`.
    pub fn make_id(dst: &str, dst_port: &str, src: &str, src_port: &str) -> String {
        format!("{}:{}-{}:{}", dst, dst_port, src, src_port)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn edge_type(&self) -> &EdgeTypeRef {
        &self.edge_type
    }

    /// Source device.
    pub fn src(&self) -> DeviceIdx {
        self.src
    }

    /// Output port index on the source device.
    pub fn src_port(&self) -> PortIndex {
        self.src_port
    }

    /// Destination device.
    pub fn dst(&self) -> DeviceIdx {
        self.dst
    }

    /// Input port index on the destination device.
    pub fn dst_port(&self) -> PortIndex {
        self.dst_port
    }

    pub fn properties(&self) -> &Payload {
        &self.properties
    }

    pub fn state(&self) -> &Payload {
        &self.state
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Returns true if a message is waiting on this edge.
    pub fn full(&self) -> bool {
        self.slot.is_some()
    }

    /// Returns true if no message is waiting on this edge.
    pub fn empty(&self) -> bool {
        self.slot.is_none()
    }

    /// The waiting message, if any.
    pub fn peek(&self) -> Option<&Payload> {
        self.slot.as_ref()
    }

    /// Places a message on the edge.
    ///
    /// # Panics
    /// Panics if the edge already holds a message.
    pub fn push(&mut self, message: Payload) {
        assert!(
            self.slot.is_none(),
            "edge '{}' already holds a message",
            self.id
        );
        self.slot = Some(message);
    }

    /// Removes and returns the waiting message.
    ///
    /// # Panics
    /// Panics if the edge is empty.
    pub fn pop(&mut self) -> Payload {
        match self.slot.take() {
            Some(message) => message,
            None => panic!("edge '{}' has no message to deliver", self.id),
        }
    }

    /// Refreshes derived edge flags. Edges keep none today.
    pub fn update(&mut self) {}
}
