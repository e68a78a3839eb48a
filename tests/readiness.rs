//! Readiness and blocking tests.
//!
//! Uses a small `splitter` device with two outputs: `a` fans out to two
//! sinks, `b` feeds a third. Checks that blocking is decided per device over
//! its ready outputs, that the send port is drawn from every rts bit, and
//! that fan-out sends reach every edge.

use gals_sim::channel::EdgeType;
use gals_sim::device::{
    DeviceType, InputHandler, InputPort, OutputHandler, OutputPort, PortLayout,
};
use gals_sim::executor::{BatchStepper, SingleStepper, Stepper};
use gals_sim::graph::{GraphInstance, GraphType};
use gals_sim::payload::{empty_spec, Empty, Payload, TypedSpec};
use gals_sim::{GraphResult, RtsWord, INIT_PORT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};

// ============================================================================
// Test Devices
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct SplitState {
    pending: RtsWord,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct SinkState {
    received: u32,
}

/// Raises every output on init.
struct SplitInit {
    all: RtsWord,
}

impl InputHandler for SplitInit {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.all = layout.rts_flag("a")? | layout.rts_flag("b")?;
        Ok(())
    }

    fn on_receive(
        &self,
        _graph_props: &Payload,
        _dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        _message: &Payload,
    ) -> RtsWord {
        dev_state.get_mut::<SplitState>().pending = self.all;
        self.all
    }
}

/// Sends once, then clears its own flag.
struct SplitOut {
    name: &'static str,
    flag: RtsWord,
}

impl OutputHandler for SplitOut {
    fn on_bind(&mut self, layout: &PortLayout) -> GraphResult<()> {
        self.flag = layout.rts_flag(self.name)?;
        Ok(())
    }

    fn on_send(
        &self,
        _graph_props: &Payload,
        _dev_props: &Payload,
        dev_state: &mut Payload,
        _message: &mut Payload,
    ) -> (bool, RtsWord) {
        let state = dev_state.get_mut::<SplitState>();
        state.pending &= !self.flag;
        (true, state.pending)
    }
}

struct SinkIn;

impl InputHandler for SinkIn {
    fn on_receive(
        &self,
        _graph_props: &Payload,
        _dev_props: &Payload,
        dev_state: &mut Payload,
        _edge_props: &Payload,
        _edge_state: &mut Payload,
        _message: &Payload,
    ) -> RtsWord {
        dev_state.get_mut::<SinkState>().received += 1;
        0
    }
}

fn make_splitter_graph() -> GraphInstance {
    let init = EdgeType::new(INIT_PORT).shared();
    let link = EdgeType::new("link").shared();

    let splitter = DeviceType::new(
        "splitter",
        empty_spec(),
        TypedSpec::<SplitState>::shared("split_state"),
        vec![InputPort::new(INIT_PORT, init, SplitInit { all: 0 })],
        vec![
            OutputPort::new("a", link.clone(), SplitOut { name: "a", flag: 0 }),
            OutputPort::new("b", link.clone(), SplitOut { name: "b", flag: 0 }),
        ],
    )
    .unwrap();
    let sink = DeviceType::new(
        "sink",
        empty_spec(),
        TypedSpec::<SinkState>::shared("sink_state"),
        vec![InputPort::new("in", link, SinkIn)],
        Vec::new(),
    )
    .unwrap();

    let gt = GraphType::new("fanout", empty_spec(), vec![splitter.clone(), sink.clone()]).unwrap();
    let mut g = GraphInstance::new(gt, "fanout", None).unwrap();
    g.add_device("s", &splitter, None, Value::Null).unwrap();
    for id in ["a0", "a1", "b0"] {
        g.add_device(id, &sink, None, Value::Null).unwrap();
    }
    g.add_edge("a0", "in", "s", "a", None, Value::Null).unwrap();
    g.add_edge("a1", "in", "s", "a", None, Value::Null).unwrap();
    g.add_edge("b0", "in", "s", "b", None, Value::Null).unwrap();
    g
}

fn fill(g: &mut GraphInstance, edge: &str) {
    let idx = g.edge_idx(edge).unwrap();
    g.edge_mut(idx).push(Payload::new(Empty {}));
}

// ============================================================================
// Blocking
// ============================================================================

#[test]
fn test_one_free_output_keeps_device_unblocked() {
    let mut g = make_splitter_graph();
    let s = g.device_idx("s").unwrap();
    g.device_mut(s).set_rts(0b11);

    // Output `a` has a full edge, `b` is free.
    fill(&mut g, "a0:in-s:a");
    g.update_device(s);

    let dev = g.device(s);
    assert!(dev.is_rts());
    assert!(!dev.blocked());
    assert!(dev.ready());
    assert_eq!(dev.sendable_ports(g.edges()), vec![1]);
}

#[test]
fn test_blocked_when_every_ready_output_is_full() {
    let mut g = make_splitter_graph();
    let s = g.device_idx("s").unwrap();
    g.device_mut(s).set_rts(0b11);

    fill(&mut g, "a1:in-s:a");
    fill(&mut g, "b0:in-s:b");
    g.update_device(s);

    let dev = g.device(s);
    assert!(dev.blocked());
    assert!(!dev.ready());
    assert!(dev.sendable_ports(g.edges()).is_empty());
}

#[test]
fn test_full_edge_on_idle_output_does_not_block() {
    let mut g = make_splitter_graph();
    let s = g.device_idx("s").unwrap();

    // Only `b` is ready; `a` being full is irrelevant.
    g.device_mut(s).set_rts(0b10);
    fill(&mut g, "a0:in-s:a");
    fill(&mut g, "a1:in-s:a");
    g.update_device(s);

    assert!(g.device(s).ready());
    assert_eq!(g.device(s).sendable_ports(g.edges()), vec![1]);
}

#[test]
fn test_not_ready_is_never_blocked() {
    let mut g = make_splitter_graph();
    let s = g.device_idx("s").unwrap();
    fill(&mut g, "b0:in-s:b");
    g.update_device(s);

    assert!(!g.device(s).is_rts());
    assert!(!g.device(s).blocked());
    assert!(!g.device(s).ready());
}

#[test]
fn test_cached_flags_follow_update() {
    let mut g = make_splitter_graph();
    let s = g.device_idx("s").unwrap();
    g.update_device(s);
    assert!(!g.device(s).is_rts());

    // Raising rts alone leaves the cache stale until the next update.
    g.device_mut(s).set_rts(0b01);
    assert!(!g.device(s).is_rts());
    g.update_all();
    assert!(g.device(s).ready());
}

// ============================================================================
// Fan-out
// ============================================================================

fn received(g: &GraphInstance, id: &str) -> u32 {
    g.device_by_id(id).unwrap().state().get::<SinkState>().received
}

#[test]
fn test_fan_out_reaches_every_edge_single() {
    for seed in 0..8 {
        let mut stepper = SingleStepper::new(seed);
        stepper.attach(make_splitter_graph(), true);
        while stepper.step().0 > 0 {}
        let g = stepper.detach();

        assert_eq!(received(&g, "a0"), 1, "seed {}", seed);
        assert_eq!(received(&g, "a1"), 1, "seed {}", seed);
        assert_eq!(received(&g, "b0"), 1, "seed {}", seed);
        assert_eq!(g.device_by_id("s").unwrap().rts(), 0);
    }
}

#[test]
fn test_fan_out_reaches_every_edge_batch() {
    let mut stepper = BatchStepper::new(5);
    stepper.attach(make_splitter_graph(), true);
    while stepper.step().0 > 0 {}
    let g = stepper.detach();

    assert_eq!(received(&g, "a0"), 1);
    assert_eq!(received(&g, "a1"), 1);
    assert_eq!(received(&g, "b0"), 1);
    assert!(g.edges().iter().all(|e| e.empty()));
}

#[test]
fn test_ready_ports_include_full_outputs() {
    let mut g = make_splitter_graph();
    let s = g.device_idx("s").unwrap();
    g.device_mut(s).set_rts(0b11);
    fill(&mut g, "a0:in-s:a");
    g.update_device(s);

    // Blocking is per device: `b` is free, so `a` stays selectable.
    assert!(g.device(s).ready());
    assert_eq!(g.device(s).ready_ports(), vec![0, 1]);
}

/// Runs a splitter whose `a0` edge starts full. Returns `true` if the run
/// ended in a push onto that full edge.
fn run_with_full_a0(seed: u64) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut stepper = SingleStepper::new(seed);
        let mut g = make_splitter_graph();
        fill(&mut g, "a0:in-s:a");
        stepper.attach(g, true);
        while stepper.step().0 > 0 {}
        stepper.detach()
    }));

    match outcome {
        Ok(g) => {
            // Preloaded message plus the splitter's own send.
            assert_eq!(received(&g, "a0"), 2, "seed {}", seed);
            assert_eq!(received(&g, "a1"), 1, "seed {}", seed);
            assert_eq!(received(&g, "b0"), 1, "seed {}", seed);
            false
        }
        Err(cause) => {
            let text = cause
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_default();
            assert!(text.contains("already holds a message"), "seed {}: {}", seed, text);
            true
        }
    }
}

#[test]
fn test_send_onto_full_edge_panics() {
    let mut panicked = 0;
    let mut finished = 0;
    for seed in 0..64 {
        if run_with_full_a0(seed) {
            panicked += 1;
        } else {
            finished += 1;
        }
    }

    // The splitter is ready through `b`, and its port is drawn from every
    // rts bit, so some schedules push onto the occupied `a0` edge.
    assert!(panicked > 0);
    assert!(finished > 0);
}
