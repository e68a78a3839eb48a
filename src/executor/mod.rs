//! Stepper trait and implementations.
//!
//! A `Stepper` owns a [`GraphInstance`] between `attach` and `detach` and
//! advances it one `step()` at a time.
//!
//! # Implementations
//!
//! ## Single stepper
//! - Keeps lists of ready devices and full edges
//! - Each step fires exactly one randomly chosen operation: a device send or
//!   an edge delivery
//! - Records every handler invocation as a reversible [`Event`]
//!
//! ## Batch stepper
//! - Each step sweeps every device once and fires each ready one
//! - Sent messages are delivered immediately, so edges never stay full
//! - Records no events

pub mod batch;
pub mod single;

use crate::event::Event;
use crate::graph::GraphInstance;
use crate::payload::Payload;
use crate::types::{DeviceIdx, EdgeIdx, PortIndex, INIT_PORT};

pub use batch::BatchStepper;
pub use single::SingleStepper;

/// The core trait for schedulers.
pub trait Stepper: Send {
    /// Short scheduler name used in stats and logs.
    fn name(&self) -> &'static str;

    /// Takes ownership of a graph and prepares it for stepping.
    ///
    /// When `do_init` is set, every device with an `__init__` input has that
    /// handler fired once.
    ///
    /// # Panics
    /// Panics if a graph is already attached.
    fn attach(&mut self, graph: GraphInstance, do_init: bool);

    /// Releases the graph.
    ///
    /// # Panics
    /// Panics if no graph is attached.
    fn detach(&mut self) -> GraphInstance;

    /// Fires the next operation(s).
    ///
    /// Returns the number of operations performed and the events recorded.
    /// `(0, [])` means nothing is ready.
    fn step(&mut self) -> (usize, Vec<Event>);

    /// The attached graph, if any.
    fn graph(&self) -> Option<&GraphInstance>;

    fn is_attached(&self) -> bool {
        self.graph().is_some()
    }

    /// Export statistics collected while stepping.
    fn export_stats(&self) -> serde_json::Value;
}

/// Fires a device's `__init__` handler with a fresh message and fresh edge
/// payloads. Returns the message, or `None` if the device has no such input.
pub(crate) fn fire_init(graph: &mut GraphInstance, device: DeviceIdx) -> Option<Payload> {
    let GraphInstance {
        properties,
        devices,
        ..
    } = graph;
    let dev = &mut devices[device.0];
    let port = dev.device_type.input(INIT_PORT)?;
    let edge_type = port.edge_type();
    let message = edge_type.message().create();
    let edge_props = edge_type.properties().create();
    let mut edge_state = edge_type.state().create();

    let rts = port.handler().on_receive(
        properties,
        &dev.properties,
        &mut dev.state,
        &edge_props,
        &mut edge_state,
        &message,
    );
    dev.set_rts(rts);
    Some(message)
}

/// Fires the output handler of `port`. Returns whether it chose to send and
/// the message it filled in.
///
/// # Panics
/// Panics if the port's rts bit is not set.
pub(crate) fn fire_send(
    graph: &mut GraphInstance,
    device: DeviceIdx,
    port: PortIndex,
) -> (bool, Payload) {
    let GraphInstance {
        properties,
        devices,
        ..
    } = graph;
    let dev = &mut devices[device.0];
    let out = match dev.device_type.output_at(port) {
        Some(out) => out,
        None => panic!("device '{}' has no output {}", dev.id, port),
    };
    assert!(
        dev.rts & out.rts_flag() != 0,
        "device '{}' selected output '{}' without its rts bit",
        dev.id,
        out.name()
    );

    let mut message = out.edge_type().message().create();
    let (do_send, rts) =
        out.handler()
            .on_send(properties, &dev.properties, &mut dev.state, &mut message);
    dev.set_rts(rts);
    (do_send, message)
}

/// Delivers `message` along `edge` to its destination's input handler.
pub(crate) fn fire_receive(graph: &mut GraphInstance, edge: EdgeIdx, message: &Payload) {
    let GraphInstance {
        properties,
        devices,
        edges,
        ..
    } = graph;
    let e = &mut edges[edge.0];
    let dev = &mut devices[e.dst.0];
    let port = match dev.device_type.input_at(e.dst_port) {
        Some(port) => port,
        None => panic!("device '{}' has no input {}", dev.id, e.dst_port),
    };

    let rts = port.handler().on_receive(
        properties,
        &dev.properties,
        &mut dev.state,
        &e.properties,
        &mut e.state,
        message,
    );
    dev.set_rts(rts);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::chain::{make_chain, AccumulatorState, TickerState};

    #[test]
    fn test_fire_init() {
        let mut g = make_chain(2, 0).unwrap();
        let src = g.device_idx("source").unwrap();
        let sink = g.device_idx("sink").unwrap();

        assert!(fire_init(&mut g, src).is_some());
        assert_eq!(g.device(src).rts(), 1);

        // The accumulator declares no init input.
        assert!(fire_init(&mut g, sink).is_none());
    }

    #[test]
    fn test_fire_send_and_receive() {
        let mut g = make_chain(2, 0).unwrap();
        let src = g.device_idx("source").unwrap();
        let edge = g.edge_idx("sink:in-source:out").unwrap();
        fire_init(&mut g, src);

        let (sent, message) = fire_send(&mut g, src, 0);
        assert!(sent);
        assert_eq!(g.device(src).state().get::<TickerState>().sent, 1);

        fire_receive(&mut g, edge, &message);
        let sink = g.device_by_id("sink").unwrap();
        assert_eq!(sink.state().get::<AccumulatorState>().count, 1);
        assert_eq!(sink.state().get::<AccumulatorState>().total, 1);
    }

    #[test]
    #[should_panic(expected = "without its rts bit")]
    fn test_fire_send_without_rts_panics() {
        let mut g = make_chain(2, 0).unwrap();
        let src = g.device_idx("source").unwrap();
        fire_send(&mut g, src, 0);
    }
}
