//! Randomized single-operation stepper.
//!
//! The `SingleStepper` keeps a list of devices that are ready and unblocked
//! and a list of edges that hold a message. Each step draws one entry
//! uniformly from the union of both lists and fires it, recording a
//! reversible [`Event`]. The full history can be rewound and replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::event::{Event, Snapshot};
use crate::executor::{fire_init, fire_receive, fire_send, Stepper};
use crate::graph::GraphInstance;
use crate::types::{DeviceIdx, EdgeIdx};

/// Statistics collected by the single stepper.
#[derive(Clone, Debug, Default)]
pub struct SingleStepperStats {
    /// Total number of calls to `step()`
    pub steps: u64,
    /// Steps that found nothing ready
    pub idle_steps: u64,
    /// `__init__` handlers fired on attach
    pub inits: u64,
    /// Output handlers fired
    pub sends: u64,
    /// Output handlers that declined to send
    pub cancelled: u64,
    /// Messages delivered
    pub receives: u64,
    /// Turns suppressed by a device's rate
    pub skips: u64,
}

/// A randomized single-operation stepper.
///
/// # Example
///
/// ```
/// use gals_sim::executor::{SingleStepper, Stepper};
/// use gals_sim::graphs::chain::make_chain;
///
/// let mut stepper = SingleStepper::new(7);
/// stepper.attach(make_chain(5, 2).unwrap(), true);
/// while stepper.step().0 > 0 {}
/// let graph = stepper.detach();
/// assert_eq!(graph.edges().iter().filter(|e| e.full()).count(), 0);
/// ```
pub struct SingleStepper {
    graph: Option<GraphInstance>,
    ready_devs: Vec<DeviceIdx>,
    ready_edges: Vec<EdgeIdx>,
    history: Vec<Event>,
    /// Number of history entries currently applied
    cursor: usize,
    rng: ChaCha8Rng,
    stats: SingleStepperStats,
}

impl SingleStepper {
    /// Creates a stepper with a seeded random source.
    pub fn new(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Creates a stepper seeded from system entropy.
    pub fn from_entropy() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    pub fn with_rng(rng: ChaCha8Rng) -> Self {
        Self {
            graph: None,
            ready_devs: Vec::new(),
            ready_edges: Vec::new(),
            history: Vec::new(),
            cursor: 0,
            rng,
            stats: SingleStepperStats::default(),
        }
    }

    /// Devices currently ready and unblocked.
    pub fn ready_devices(&self) -> &[DeviceIdx] {
        &self.ready_devs
    }

    /// Edges currently holding a message.
    pub fn ready_edges(&self) -> &[EdgeIdx] {
        &self.ready_edges
    }

    /// Every event recorded since attach, oldest first.
    pub fn history(&self) -> &[Event] {
        &self.history
    }

    /// Number of history entries currently applied.
    pub fn applied_len(&self) -> usize {
        self.cursor
    }

    pub fn stats(&self) -> &SingleStepperStats {
        &self.stats
    }

    /// Unapplies up to `n` of the most recent applied events, newest first.
    ///
    /// Returns how many were unapplied. Stepping is refused until the
    /// history is replayed to its end.
    pub fn rewind(&mut self, n: usize) -> usize {
        let graph = attached(&mut self.graph);
        let mut done = 0;
        while done < n && self.cursor > 0 {
            self.cursor -= 1;
            self.history[self.cursor].unapply(graph);
            done += 1;
        }
        done
    }

    /// Re-applies up to `n` unapplied events, oldest first.
    ///
    /// Returns how many were applied.
    pub fn replay(&mut self, n: usize) -> usize {
        let graph = attached(&mut self.graph);
        let mut done = 0;
        while done < n && self.cursor < self.history.len() {
            self.history[self.cursor].apply(graph);
            self.cursor += 1;
            done += 1;
        }
        done
    }
}

impl Default for SingleStepper {
    fn default() -> Self {
        Self::from_entropy()
    }
}

fn attached(graph: &mut Option<GraphInstance>) -> &mut GraphInstance {
    match graph.as_mut() {
        Some(g) => g,
        None => panic!("stepper is not attached"),
    }
}

/// Re-evaluates a device and keeps its ready-list membership in sync.
fn refresh_device(ready: &mut Vec<DeviceIdx>, graph: &mut GraphInstance, dev: DeviceIdx) {
    graph.update_device(dev);
    let pos = ready.iter().position(|&d| d == dev);
    match (graph.device(dev).ready(), pos) {
        (true, None) => ready.push(dev),
        (false, Some(i)) => {
            ready.swap_remove(i);
        }
        _ => {}
    }
}

/// Keeps an edge's ready-list membership in sync with its slot.
fn refresh_edge(ready: &mut Vec<EdgeIdx>, graph: &mut GraphInstance, edge: EdgeIdx) {
    graph.edge_mut(edge).update();
    let pos = ready.iter().position(|&e| e == edge);
    match (graph.edge(edge).full(), pos) {
        (true, None) => ready.push(edge),
        (false, Some(i)) => {
            ready.swap_remove(i);
        }
        _ => {}
    }
}

impl Stepper for SingleStepper {
    fn name(&self) -> &'static str {
        "single"
    }

    fn attach(&mut self, mut graph: GraphInstance, do_init: bool) {
        assert!(self.graph.is_none(), "stepper is already attached");

        for dev in graph.device_indices() {
            if do_init && graph.device(dev).device_type().has_init() {
                let pre = Snapshot::capture(&graph, dev);
                if let Some(message) = fire_init(&mut graph, dev) {
                    self.history.push(Event::init(dev, pre, message));
                    self.stats.inits += 1;
                }
            }
            refresh_device(&mut self.ready_devs, &mut graph, dev);
        }
        for edge in graph.edge_indices() {
            refresh_edge(&mut self.ready_edges, &mut graph, edge);
        }
        self.cursor = self.history.len();

        debug!(
            graph = graph.id(),
            devices = graph.device_count(),
            edges = graph.edge_count(),
            ready_devices = self.ready_devs.len(),
            ready_edges = self.ready_edges.len(),
            "single stepper attached"
        );
        self.graph = Some(graph);
    }

    fn detach(&mut self) -> GraphInstance {
        let graph = match self.graph.take() {
            Some(g) => g,
            None => panic!("stepper is not attached"),
        };
        self.history.clear();
        self.ready_devs.clear();
        self.ready_edges.clear();
        self.cursor = 0;
        debug!(graph = graph.id(), "single stepper detached");
        graph
    }

    fn step(&mut self) -> (usize, Vec<Event>) {
        let Self {
            graph,
            ready_devs,
            ready_edges,
            history,
            cursor,
            rng,
            stats,
        } = self;
        let graph = attached(graph);
        assert!(
            *cursor == history.len(),
            "history is rewound; replay it before stepping"
        );

        stats.steps += 1;
        let total = ready_devs.len() + ready_edges.len();
        if total == 0 {
            stats.idle_steps += 1;
            return (0, Vec::new());
        }

        let mut events = Vec::new();
        let sel = rng.gen_range(0..total);

        if sel < ready_devs.len() {
            let dev = ready_devs.swap_remove(sel);
            let rate = graph.device(dev).rate();

            if rate != 1.0 && rng.gen::<f64>() > rate {
                trace!(device = graph.device(dev).id(), "skip");
                stats.skips += 1;
                events.push(Event::skip(dev));
            } else {
                assert!(
                    graph.device(dev).is_rts(),
                    "device '{}' was queued without rts",
                    graph.device(dev).id()
                );
                let ports = graph.device(dev).ready_ports();
                let port = ports[rng.gen_range(0..ports.len())];

                let pre = Snapshot::capture(graph, dev);
                let (do_send, message) = fire_send(graph, dev, port);
                trace!(
                    device = graph.device(dev).id(),
                    port,
                    sent = do_send,
                    "send"
                );

                stats.sends += 1;
                if do_send {
                    let outgoing = graph.device(dev).outputs_at(port).to_vec();
                    for edge in outgoing {
                        graph.edge_mut(edge).push(message.clone());
                        refresh_edge(ready_edges, graph, edge);
                    }
                } else {
                    stats.cancelled += 1;
                }
                events.push(Event::send(dev, port, pre, message, !do_send));
                refresh_device(ready_devs, graph, dev);
            }
        } else {
            let edge = ready_edges.swap_remove(sel - ready_devs.len());
            let message = graph.edge_mut(edge).pop();
            let (src, dst) = (graph.edge(edge).src(), graph.edge(edge).dst());

            let pre = Snapshot::capture(graph, dst);
            fire_receive(graph, edge, &message);
            trace!(edge = graph.edge(edge).id(), "receive");

            stats.receives += 1;
            events.push(Event::receive(dst, edge, pre, message));
            refresh_device(ready_devs, graph, dst);
            refresh_device(ready_devs, graph, src);
        }

        history.extend(events.iter().cloned());
        *cursor = history.len();
        (events.len(), events)
    }

    fn graph(&self) -> Option<&GraphInstance> {
        self.graph.as_ref()
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "scheduler": self.name(),
            "steps": self.stats.steps,
            "idle_steps": self.stats.idle_steps,
            "inits": self.stats.inits,
            "sends": self.stats.sends,
            "cancelled": self.stats.cancelled,
            "receives": self.stats.receives,
            "skips": self.stats.skips,
            "history_len": self.history.len(),
            "ready_devices": self.ready_devs.len(),
            "ready_edges": self.ready_edges.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::graphs::chain::{make_chain, AccumulatorState};

    #[test]
    fn test_attach_records_inits() {
        let mut stepper = SingleStepper::new(1);
        stepper.attach(make_chain(3, 1).unwrap(), true);

        // Only the ticker declares __init__.
        assert_eq!(stepper.history().len(), 1);
        assert_eq!(stepper.history()[0].kind(), EventKind::Init);
        assert_eq!(stepper.ready_devices().len(), 1);
        assert!(stepper.ready_edges().is_empty());
    }

    #[test]
    fn test_attach_without_init_is_idle() {
        let mut stepper = SingleStepper::new(1);
        stepper.attach(make_chain(3, 1).unwrap(), false);
        assert!(stepper.history().is_empty());

        let (ops, events) = stepper.step();
        assert_eq!(ops, 0);
        assert!(events.is_empty());
        assert_eq!(stepper.stats().idle_steps, 1);
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn test_double_attach_panics() {
        let mut stepper = SingleStepper::new(1);
        stepper.attach(make_chain(1, 0).unwrap(), true);
        stepper.attach(make_chain(1, 0).unwrap(), true);
    }

    #[test]
    #[should_panic(expected = "not attached")]
    fn test_detach_when_detached_panics() {
        let mut stepper = SingleStepper::new(1);
        stepper.detach();
    }

    #[test]
    fn test_run_to_quiescence() {
        let mut stepper = SingleStepper::new(42);
        stepper.attach(make_chain(4, 0).unwrap(), true);
        let mut steps = 0;
        while stepper.step().0 > 0 {
            steps += 1;
            assert!(steps < 1000);
        }
        let g = stepper.detach();
        let sink = g.device_by_id("sink").unwrap();
        assert_eq!(sink.state().get::<AccumulatorState>().count, 4);
        assert_eq!(sink.state().get::<AccumulatorState>().total, 1 + 2 + 3 + 4);
    }

    #[test]
    #[should_panic(expected = "rewound")]
    fn test_step_while_rewound_panics() {
        let mut stepper = SingleStepper::new(3);
        stepper.attach(make_chain(2, 0).unwrap(), true);
        stepper.step();
        stepper.rewind(1);
        stepper.step();
    }

    #[test]
    fn test_export_stats() {
        let mut stepper = SingleStepper::new(9);
        stepper.attach(make_chain(2, 0).unwrap(), true);
        while stepper.step().0 > 0 {}
        let stats = stepper.export_stats();
        assert_eq!(stats["scheduler"], "single");
        assert_eq!(stats["inits"], 1);
        assert_eq!(stats["receives"], 2);
        // Two real sends plus the final cancelled one.
        assert_eq!(stats["sends"], 3);
        assert_eq!(stats["cancelled"], 1);
    }
}
