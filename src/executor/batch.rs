//! Bulk-synchronous batch stepper.
//!
//! The `BatchStepper` sweeps every device once per step, starting from a
//! random rotation offset. Each ready device fires one output and the message
//! is handed straight to every destination's input handler, so edges never
//! hold a message across a sweep. No events are recorded.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::event::Event;
use crate::executor::{fire_init, fire_receive, fire_send, Stepper};
use crate::graph::GraphInstance;
use crate::types::DeviceIdx;

/// Statistics collected by the batch stepper.
#[derive(Clone, Debug, Default)]
pub struct BatchStepperStats {
    /// `__init__` handlers fired on attach
    pub inits: u64,
    /// Total number of sweeps executed
    pub sweeps: u64,
    /// Output handlers fired
    pub sends: u64,
    /// Output handlers that declined to send
    pub cancelled: u64,
    /// Messages delivered
    pub receives: u64,
    /// Turns suppressed by a device's rate
    pub skips: u64,
    /// Operations counted across all sweeps
    pub ops: u64,
}

/// A bulk-synchronous stepper.
pub struct BatchStepper {
    graph: Option<GraphInstance>,
    rng: ChaCha8Rng,
    randomize_offset: bool,
    stats: BatchStepperStats,
}

impl BatchStepper {
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
            rng,
            randomize_offset: true,
            stats: BatchStepperStats::default(),
        }
    }

    /// Enables or disables the random rotation of each sweep's start.
    ///
    /// With rotation off, every sweep starts at the first device.
    pub fn with_randomize_offset(mut self, enable: bool) -> Self {
        self.randomize_offset = enable;
        self
    }

    pub fn stats(&self) -> &BatchStepperStats {
        &self.stats
    }
}

impl Default for BatchStepper {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl Stepper for BatchStepper {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn attach(&mut self, mut graph: GraphInstance, do_init: bool) {
        assert!(self.graph.is_none(), "stepper is already attached");

        if do_init {
            for dev in graph.device_indices() {
                if fire_init(&mut graph, dev).is_some() {
                    self.stats.inits += 1;
                }
            }
        }

        // Deliver anything left queued so sweeps start with empty edges.
        let mut drained = 0;
        for edge in graph.edge_indices() {
            while graph.edge(edge).full() {
                let message = graph.edge_mut(edge).pop();
                fire_receive(&mut graph, edge, &message);
                drained += 1;
            }
        }
        graph.update_all();

        debug!(
            graph = graph.id(),
            devices = graph.device_count(),
            edges = graph.edge_count(),
            drained,
            "batch stepper attached"
        );
        self.graph = Some(graph);
    }

    fn detach(&mut self) -> GraphInstance {
        let mut graph = match self.graph.take() {
            Some(g) => g,
            None => panic!("stepper is not attached"),
        };
        // Sweeps only maintain rts flags; restore blocking too.
        graph.update_all();
        debug!(graph = graph.id(), "batch stepper detached");
        graph
    }

    fn step(&mut self) -> (usize, Vec<Event>) {
        let graph = match self.graph.as_mut() {
            Some(g) => g,
            None => panic!("stepper is not attached"),
        };
        let n = graph.device_count();
        if n == 0 {
            return (0, Vec::new());
        }

        let offset = if self.randomize_offset {
            self.rng.gen_range(0..n)
        } else {
            0
        };

        let mut count = 0;
        for i in 0..n {
            let dev = DeviceIdx((i + offset) % n);
            if !graph.device(dev).is_rts() {
                continue;
            }

            let rate = graph.device(dev).rate();
            if rate != 1.0 && self.rng.gen::<f64>() > rate {
                self.stats.skips += 1;
                count += 1;
                continue;
            }

            let port = if graph.device(dev).device_type().output_count() == 1 {
                0
            } else {
                let ports = graph.device(dev).ready_ports();
                ports[self.rng.gen_range(0..ports.len())]
            };

            let (do_send, message) = fire_send(graph, dev, port);
            self.stats.sends += 1;
            count += 1;

            if do_send {
                let outgoing = graph.device(dev).outputs_at(port).to_vec();
                for edge in outgoing {
                    fire_receive(graph, edge, &message);
                    let dst = graph.edge(edge).dst();
                    graph.device_mut(dst).update_rts_only();
                    self.stats.receives += 1;
                    count += 1;
                }
            } else {
                self.stats.cancelled += 1;
            }
            graph.device_mut(dev).update_rts_only();
        }

        self.stats.sweeps += 1;
        self.stats.ops += count as u64;
        trace!(sweep = self.stats.sweeps, ops = count, "sweep");
        (count, Vec::new())
    }

    fn graph(&self) -> Option<&GraphInstance> {
        self.graph.as_ref()
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "scheduler": self.name(),
            "inits": self.stats.inits,
            "sweeps": self.stats.sweeps,
            "sends": self.stats.sends,
            "cancelled": self.stats.cancelled,
            "receives": self.stats.receives,
            "skips": self.stats.skips,
            "ops": self.stats.ops,
        })
    }
}
