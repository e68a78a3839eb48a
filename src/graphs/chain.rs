//! Counter chain graph type.
//!
//! A bounded `ticker` source emits sequence numbers `1..=limit`, optional
//! `relay` devices forward them in order, and an `accumulator` sink sums
//! them. Once the ticker has emitted `limit` messages its next turn is a
//! cancelled send that clears its rts word, so every run terminates.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::EdgeType;
use crate::device::{DeviceType, InputHandler, InputPort, OutputHandler, OutputPort, PortLayout};
use crate::error::GraphResult;
use crate::graph::{GraphInstance, GraphType, GraphTypeRef};
use crate::payload::{empty_spec, Empty, Payload, TypedSpec};
use crate::types::{RtsWord, INIT_PORT};

pub const CHAIN_GRAPH_TYPE: &str = "counter_chain";
pub const TICK_EDGE: &str = "tick";
pub const TICKER: &str = "ticker";
pub const RELAY: &str = "relay";
pub const ACCUMULATOR: &str = "accumulator";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    pub seq: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerProperties {
    pub limit: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerState {
    pub sent: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayState {
    pub queue: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub total: u64,
    pub count: u64,
}

/// Resolves the flag of the device's `out` port at bind time.
fn out_flag(layout: &PortLayout) -> GraphResult<RtsWord> {
    layout.rts_flag("out")
}

struct TickerInit {
    out: RtsWord,
}

impl InputHandler for TickerInit {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = out_flag(layout)?;
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
        dev_state.get_mut::<TickerState>().sent = 0;
        if dev_props.get::<TickerProperties>().limit > 0 {
            self.out
        } else {
            0
        }
    }
}

struct TickerOut {
    out: RtsWord,
}

impl OutputHandler for TickerOut {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = out_flag(layout)?;
        Ok(())
    }

    fn on_send(
        &self,
        _graph_props: &Payload,
        dev_props: &Payload,
        dev_state: &mut Payload,
        message: &mut Payload,
    ) -> (bool, RtsWord) {
        let limit = dev_props.get::<TickerProperties>().limit;
        let state = dev_state.get_mut::<TickerState>();
        if state.sent >= limit {
            return (false, 0);
        }
        state.sent += 1;
        message.get_mut::<TickMessage>().seq = state.sent;
        (true, self.out)
    }
}

struct RelayIn {
    out: RtsWord,
}

impl InputHandler for RelayIn {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = out_flag(layout)?;
        Ok(())
    }

    fn on_receive(
        &self,
        _graph_props: &Payload,
        _dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        message: &Payload,
    ) -> RtsWord {
        let seq = message.get::<TickMessage>().seq;
        dev_state.get_mut::<RelayState>().queue.push(seq);
        self.out
    }
}

struct RelayOut {
    out: RtsWord,
}

impl OutputHandler for RelayOut {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.out = out_flag(layout)?;
        Ok(())
    }

    fn on_send(
        &self,
        _graph_props: &Payload,
        _dev_props: &Payload,
        dev_state: &mut Payload,
        message: &mut Payload,
    ) -> (bool, RtsWord) {
        let state = dev_state.get_mut::<RelayState>();
        if state.queue.is_empty() {
            return (false, 0);
        }
        message.get_mut::<TickMessage>().seq = state.queue.remove(0);
        let rts = if state.queue.is_empty() { 0 } else { self.out };
        (true, rts)
    }
}

struct AccumulatorIn;

impl InputHandler for AccumulatorIn {
    fn on_receive(
        &self,
        _graph_props: &Payload,
        _dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        message: &Payload,
    ) -> RtsWord {
        let state = dev_state.get_mut::<AccumulatorState>();
        state.total += message.get::<TickMessage>().seq;
        state.count += 1;
        0
    }
}

/// Builds the counter chain graph type.
pub fn chain_graph_type() -> GraphResult<GraphTypeRef> {
    let init = EdgeType::new(INIT_PORT).shared();
    let tick = EdgeType::new(TICK_EDGE)
        .with_message(TypedSpec::<TickMessage>::shared("tick_message"))
        .shared();

    let ticker = DeviceType::new(
        TICKER,
        TypedSpec::<TickerProperties>::shared("ticker_properties"),
        TypedSpec::<TickerState>::shared("ticker_state"),
        vec![InputPort::new(INIT_PORT, init, TickerInit { out: 0 })],
        vec![OutputPort::new("out", tick.clone(), TickerOut { out: 0 })],
    )?;

    let relay = DeviceType::new(
        RELAY,
        empty_spec(),
        TypedSpec::<RelayState>::shared("relay_state"),
        vec![InputPort::new("in", tick.clone(), RelayIn { out: 0 })],
        vec![OutputPort::new("out", tick.clone(), RelayOut { out: 0 })],
    )?;

    let accumulator = DeviceType::new(
        ACCUMULATOR,
        empty_spec(),
        TypedSpec::<AccumulatorState>::shared("accumulator_state"),
        vec![InputPort::new("in", tick, AccumulatorIn)],
        Vec::new(),
    )?;

    GraphType::new(
        CHAIN_GRAPH_TYPE,
        TypedSpec::<Empty>::shared("chain_properties"),
        vec![ticker, relay, accumulator],
    )
}

/// Builds `source -> relay_0 -> ... -> relay_{n-1} -> sink`.
///
/// The source emits `limit` messages.
pub fn make_chain(limit: u64, relays: usize) -> GraphResult<GraphInstance> {
    let gt = chain_graph_type()?;
    let mut g = GraphInstance::new(gt.clone(), format!("chain_{}_{}", limit, relays), None)?;

    let types = gt.device_types();
    let (ticker, relay, accumulator) = (&types[0], &types[1], &types[2]);

    g.add_device("source", ticker, Some(&json!({ "limit": limit })), Value::Null)?;
    let mut prev = "source".to_string();
    for i in 0..relays {
        let id = format!("relay_{}", i);
        g.add_device(id.clone(), relay, None, Value::Null)?;
        g.add_edge(&id, "in", &prev, "out", None, Value::Null)?;
        prev = id;
    }
    g.add_device("sink", accumulator, None, Value::Null)?;
    g.add_edge("sink", "in", &prev, "out", None, Value::Null)?;

    Ok(g)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_graph_type() {
        let gt = chain_graph_type().unwrap();
        assert_eq!(gt.id(), CHAIN_GRAPH_TYPE);
        assert_eq!(gt.device_types().len(), 3);
        let ids: Vec<&str> = gt.edge_types().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![INIT_PORT, TICK_EDGE]);
        assert!(gt.device_type(TICKER).unwrap().has_init());
        assert!(!gt.device_type(RELAY).unwrap().has_init());
    }

    #[test]
    fn test_make_chain_layout() {
        let g = make_chain(4, 2).unwrap();
        assert_eq!(g.device_count(), 4);
        assert_eq!(g.edge_count(), 3);
        assert!(g.edge_by_id("relay_0:in-source:out").is_some());
        assert!(g.edge_by_id("relay_1:in-relay_0:out").is_some());
        assert!(g.edge_by_id("sink:in-relay_1:out").is_some());

        let src = g.device_by_id("source").unwrap();
        assert_eq!(src.properties().get::<TickerProperties>().limit, 4);
    }

    #[test]
    fn test_ticker_sends_then_cancels() {
        let gt = chain_graph_type().unwrap();
        let ticker = gt.device_type(TICKER).unwrap();
        let out = ticker.output("out").unwrap();
        let props = Payload::new(TickerProperties { limit: 1 });
        let gp = Payload::new(Empty {});
        let mut state = Payload::new(TickerState::default());
        let mut msg = Payload::new(TickMessage::default());

        let (sent, rts) = out.handler().on_send(&gp, &props, &mut state, &mut msg);
        assert!(sent);
        assert_eq!(rts, 1);
        assert_eq!(msg.get::<TickMessage>().seq, 1);

        let (sent, rts) = out.handler().on_send(&gp, &props, &mut state, &mut msg);
        assert!(!sent);
        assert_eq!(rts, 0);
    }

    #[test]
    fn test_relay_preserves_order() {
        let gt = chain_graph_type().unwrap();
        let relay = gt.device_type(RELAY).unwrap();
        let input = relay.input("in").unwrap();
        let output = relay.output("out").unwrap();
        let e = Payload::new(Empty {});
        let mut es = Payload::new(Empty {});
        let mut state = Payload::new(RelayState::default());

        for seq in [3, 4] {
            let rts = input.handler().on_receive(
                &e,
                &e,
                &mut state,
                &e,
                &mut es,
                &Payload::new(TickMessage { seq }),
            );
            assert_eq!(rts, 1);
        }

        let mut msg = Payload::new(TickMessage::default());
        let (_, rts) = output.handler().on_send(&e, &e, &mut state, &mut msg);
        assert_eq!(msg.get::<TickMessage>().seq, 3);
        assert_eq!(rts, 1);
        let (_, rts) = output.handler().on_send(&e, &e, &mut state, &mut msg);
        assert_eq!(msg.get::<TickMessage>().seq, 4);
        assert_eq!(rts, 0);
    }
}
