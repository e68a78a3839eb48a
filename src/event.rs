//! Reversible records of device state transitions.
//!
//! Every handler invocation made by the single stepper is recorded as an
//! [`Event`] holding the device's state and rts word from *before* the
//! handler ran. Because the handler has already mutated the live device when
//! the event is built, a fresh event is in the applied condition.
//!
//! [`Event::unapply`] and [`Event::apply`] both swap the stored pair with the
//! live device's pair, so walking the history backwards with `unapply` and
//! forwards with `apply` moves the graph between pre- and post-states
//! without re-running handlers. Edge contents are not part of the record.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::graph::GraphInstance;
use crate::payload::Payload;
use crate::types::{DeviceIdx, EdgeIdx, PortIndex, RtsWord};

/// Device state and rts word captured before a handler runs.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub state: Payload,
    pub rts: RtsWord,
}

impl Snapshot {
    /// Captures the current state and rts word of a device.
    pub fn capture(graph: &GraphInstance, device: DeviceIdx) -> Self {
        let dev = graph.device(device);
        Self {
            state: dev
                .device_type()
                .state()
                .clone_payload(dev.state()),
            rts: dev.rts(),
        }
    }
}

/// The kind of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Init,
    Send,
    Receive,
    Skip,
}

/// What happened, plus the swapped-out device state.
#[derive(Clone, Debug)]
pub enum EventPayload {
    /// The device's `__init__` handler ran.
    Init {
        state: Payload,
        rts: RtsWord,
        message: Payload,
    },

    /// An output handler ran. `cancelled` is set when it declined to send.
    Send {
        port: PortIndex,
        state: Payload,
        rts: RtsWord,
        message: Payload,
        cancelled: bool,
    },

    /// A message on `edge` was delivered to the event's device.
    Receive {
        edge: EdgeIdx,
        state: Payload,
        rts: RtsWord,
        message: Payload,
    },

    /// The device was selected but its rate gate suppressed the turn.
    Skip,
}

/// A reversible record of one transition of one device.
#[derive(Clone, Debug)]
pub struct Event {
    /// The device whose state the event changed
    pub device: DeviceIdx,
    /// What happened
    pub payload: EventPayload,
    applied: bool,
}

impl Event {
    pub fn init(device: DeviceIdx, pre: Snapshot, message: Payload) -> Self {
        Self::new(
            device,
            EventPayload::Init {
                state: pre.state,
                rts: pre.rts,
                message,
            },
        )
    }

    pub fn send(
        device: DeviceIdx,
        port: PortIndex,
        pre: Snapshot,
        message: Payload,
        cancelled: bool,
    ) -> Self {
        Self::new(
            device,
            EventPayload::Send {
                port,
                state: pre.state,
                rts: pre.rts,
                message,
                cancelled,
            },
        )
    }

    /// `device` is the destination of `edge`.
    pub fn receive(device: DeviceIdx, edge: EdgeIdx, pre: Snapshot, message: Payload) -> Self {
        Self::new(
            device,
            EventPayload::Receive {
                edge,
                state: pre.state,
                rts: pre.rts,
                message,
            },
        )
    }

    pub fn skip(device: DeviceIdx) -> Self {
        Self::new(device, EventPayload::Skip)
    }

    fn new(device: DeviceIdx, payload: EventPayload) -> Self {
        Self {
            device,
            payload,
            applied: true,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Init { .. } => EventKind::Init,
            EventPayload::Send { .. } => EventKind::Send,
            EventPayload::Receive { .. } => EventKind::Receive,
            EventPayload::Skip => EventKind::Skip,
        }
    }

    /// True while the live device holds the post-event state.
    pub fn applied(&self) -> bool {
        self.applied
    }

    /// The message produced or consumed, if any.
    pub fn message(&self) -> Option<&Payload> {
        match &self.payload {
            EventPayload::Init { message, .. }
            | EventPayload::Send { message, .. }
            | EventPayload::Receive { message, .. } => Some(message),
            EventPayload::Skip => None,
        }
    }

    /// True for a send whose handler declined to send.
    pub fn cancelled(&self) -> bool {
        matches!(self.payload, EventPayload::Send { cancelled: true, .. })
    }

    /// Exchanges the stored state and rts word with the live device's.
    fn swap(&mut self, graph: &mut GraphInstance) {
        let (state, rts) = match &mut self.payload {
            EventPayload::Init { state, rts, .. }
            | EventPayload::Send { state, rts, .. }
            | EventPayload::Receive { state, rts, .. } => (state, rts),
            EventPayload::Skip => return,
        };
        let dev = graph.device_mut(self.device);
        std::mem::swap(&mut dev.state, state);
        std::mem::swap(&mut dev.rts, rts);
        graph.update_device(self.device);
    }

    /// Moves the device from its pre-event to its post-event state.
    ///
    /// # Panics
    /// Panics if the event is already applied.
    pub fn apply(&mut self, graph: &mut GraphInstance) {
        assert!(!self.applied, "event is already applied");
        self.swap(graph);
        self.applied = true;
    }

    /// Moves the device from its post-event back to its pre-event state.
    ///
    /// # Panics
    /// Panics if the event is not applied.
    pub fn unapply(&mut self, graph: &mut GraphInstance) {
        assert!(self.applied, "event is not applied");
        self.swap(graph);
        self.applied = false;
    }

    /// Renders the event with device, port and edge names resolved.
    pub fn to_json(&self, graph: &GraphInstance) -> Value {
        let dev = graph.device(self.device);
        let mut out = json!({
            "kind": self.kind(),
            "device": dev.id(),
            "applied": self.applied,
        });
        match &self.payload {
            EventPayload::Init { message, .. } => {
                out["message"] = message.to_json();
            }
            EventPayload::Send {
                port,
                message,
                cancelled,
                ..
            } => {
                let name = dev
                    .device_type()
                    .output_at(*port)
                    .map(|p| p.name())
                    .unwrap_or_default();
                out["port"] = json!(name);
                out["cancelled"] = json!(cancelled);
                out["message"] = message.to_json();
            }
            EventPayload::Receive { edge, message, .. } => {
                out["edge"] = json!(graph.edge(*edge).id());
                out["message"] = message.to_json();
            }
            EventPayload::Skip => {}
        }
        out
    }
}

/// Devices and edges touched by a list of events, in first-seen order.
///
/// An init touches its device. A send touches its device plus every edge of
/// the fired port and that edge's destination. A receive touches the edge and
/// both of its endpoints. Skips touch nothing.
pub fn touched(events: &[Event], graph: &GraphInstance) -> (Vec<DeviceIdx>, Vec<EdgeIdx>) {
    let mut devices = Vec::new();
    let mut edges = Vec::new();
    let mut seen_devices = HashSet::new();
    let mut seen_edges = HashSet::new();

    let mut add_device = |d: DeviceIdx, out: &mut Vec<DeviceIdx>| {
        if seen_devices.insert(d) {
            out.push(d);
        }
    };
    let mut add_edge = |e: EdgeIdx, out: &mut Vec<EdgeIdx>| {
        if seen_edges.insert(e) {
            out.push(e);
        }
    };

    for ev in events {
        match &ev.payload {
            EventPayload::Init { .. } => add_device(ev.device, &mut devices),
            EventPayload::Send { port, .. } => {
                add_device(ev.device, &mut devices);
                for &e in graph.device(ev.device).outputs_at(*port) {
                    add_edge(e, &mut edges);
                    add_device(graph.edge(e).dst(), &mut devices);
                }
            }
            EventPayload::Receive { edge, .. } => {
                let e = graph.edge(*edge);
                add_device(e.src(), &mut devices);
                add_device(e.dst(), &mut devices);
                add_edge(*edge, &mut edges);
            }
            EventPayload::Skip => {}
        }
    }

    (devices, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::chain::{make_chain, TickerState};

    #[test]
    fn test_event_kinds() {
        let p = Payload::new(TickerState::default());
        let snap = Snapshot {
            state: p.clone(),
            rts: 0,
        };
        let send = Event::send(DeviceIdx(0), 0, snap.clone(), p.clone(), true);
        assert_eq!(send.kind(), EventKind::Send);
        assert!(send.cancelled());
        assert!(send.applied());

        let skip = Event::skip(DeviceIdx(1));
        assert_eq!(skip.kind(), EventKind::Skip);
        assert!(skip.message().is_none());
        assert!(!skip.cancelled());
    }

    #[test]
    fn test_unapply_apply_swaps_state() {
        let mut g = make_chain(3, 0).unwrap();
        let src = g.device_idx("source").unwrap();
        let pre = Snapshot::capture(&g, src);

        g.device_mut(src).state_mut().get_mut::<TickerState>().sent = 2;
        g.device_mut(src).set_rts(1);
        let message = Payload::new(TickerState::default());
        let mut ev = Event::send(src, 0, pre, message, false);

        ev.unapply(&mut g);
        assert_eq!(g.device(src).state().get::<TickerState>().sent, 0);
        assert_eq!(g.device(src).rts(), 0);
        assert!(!ev.applied());

        ev.apply(&mut g);
        assert_eq!(g.device(src).state().get::<TickerState>().sent, 2);
        assert_eq!(g.device(src).rts(), 1);
        assert!(g.device(src).is_rts());
    }

    #[test]
    #[should_panic(expected = "already applied")]
    fn test_apply_twice_panics() {
        let mut g = make_chain(1, 0).unwrap();
        let mut ev = Event::skip(DeviceIdx(0));
        ev.apply(&mut g);
    }

    #[test]
    #[should_panic(expected = "not applied")]
    fn test_unapply_twice_panics() {
        let mut g = make_chain(1, 0).unwrap();
        let mut ev = Event::skip(DeviceIdx(0));
        ev.unapply(&mut g);
        ev.unapply(&mut g);
    }

    #[test]
    fn test_touched() {
        let g = make_chain(2, 1).unwrap();
        let src = g.device_idx("source").unwrap();
        let relay = g.device_idx("relay_0").unwrap();
        let sink = g.device_idx("sink").unwrap();
        let e0 = g.edge_idx("relay_0:in-source:out").unwrap();
        let e1 = g.edge_idx("sink:in-relay_0:out").unwrap();

        let p = Payload::new(TickerState::default());
        let snap = Snapshot {
            state: p.clone(),
            rts: 0,
        };
        let events = vec![
            Event::send(src, 0, snap.clone(), p.clone(), false),
            Event::skip(sink),
            Event::receive(sink, e1, snap.clone(), p.clone()),
            Event::receive(relay, e0, snap, p),
        ];

        let (devices, edges) = touched(&events, &g);
        assert_eq!(devices, vec![src, relay, sink]);
        assert_eq!(edges, vec![e0, e1]);
    }

    #[test]
    fn test_to_json() {
        let g = make_chain(2, 0).unwrap();
        let src = g.device_idx("source").unwrap();
        let p = Payload::new(TickerState::default());
        let ev = Event::send(
            src,
            0,
            Snapshot {
                state: p.clone(),
                rts: 0,
            },
            p,
            false,
        );
        let json = ev.to_json(&g);
        assert_eq!(json["kind"], "send");
        assert_eq!(json["device"], "source");
        assert_eq!(json["port"], "out");
        assert_eq!(json["cancelled"], false);
    }
}
