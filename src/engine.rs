//! Simulation driver.
//!
//! A `Simulation` wraps one [`Stepper`], applies configured device rates when
//! a graph is attached, and runs the stepper until the graph goes quiet or a
//! step budget is exhausted.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::{SchedulerKind, SimConfig};
use crate::event::{Event, EventKind};
use crate::executor::{BatchStepper, SingleStepper, Stepper};
use crate::graph::GraphInstance;

/// Statistics collected by the simulation driver.
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    /// Total number of steps executed
    pub steps_executed: u64,
    /// Operations reported by the stepper
    pub ops: u64,
    /// Steps that found nothing to do
    pub idle_steps: u64,
    pub init_events: u64,
    pub send_events: u64,
    pub receive_events: u64,
    pub skip_events: u64,
    /// Set once a run stopped because nothing was ready
    pub quiescent: bool,
}

impl EngineStats {
    fn record(&mut self, events: &[Event]) {
        for ev in events {
            match ev.kind() {
                EventKind::Init => self.init_events += 1,
                EventKind::Send => self.send_events += 1,
                EventKind::Receive => self.receive_events += 1,
                EventKind::Skip => self.skip_events += 1,
            }
        }
    }
}

/// Drives a graph through a stepper.
///
/// # Example
///
/// ```
/// use gals_sim::engine::Simulation;
/// use gals_sim::executor::SingleStepper;
/// use gals_sim::graphs::chain::make_chain;
///
/// let mut sim = Simulation::new(Box::new(SingleStepper::new(1)));
/// sim.attach(make_chain(3, 1).unwrap());
/// let steps = sim.run(1_000);
/// assert!(sim.stats().quiescent);
/// assert!(steps > 0);
/// ```
pub struct Simulation {
    stepper: Box<dyn Stepper>,
    do_init: bool,
    max_steps: u64,
    default_rate: Option<f64>,
    rates: BTreeMap<String, f64>,
    stats: EngineStats,
}

impl Simulation {
    /// Creates a driver around an existing stepper.
    pub fn new(stepper: Box<dyn Stepper>) -> Self {
        Self {
            stepper,
            do_init: true,
            max_steps: SimConfig::default().simulation.max_steps,
            default_rate: None,
            rates: BTreeMap::new(),
            stats: EngineStats::default(),
        }
    }

    /// Creates the configured stepper and copies the run settings.
    pub fn from_config(config: &SimConfig) -> Self {
        let params = &config.simulation;
        let stepper: Box<dyn Stepper> = match (params.scheduler, params.seed) {
            (SchedulerKind::Single, Some(seed)) => Box::new(SingleStepper::new(seed)),
            (SchedulerKind::Single, None) => Box::new(SingleStepper::from_entropy()),
            (SchedulerKind::Batch, seed) => {
                let stepper = match seed {
                    Some(seed) => BatchStepper::new(seed),
                    None => BatchStepper::from_entropy(),
                };
                Box::new(stepper.with_randomize_offset(params.randomize_offset))
            }
        };

        let mut sim = Self::new(stepper);
        sim.do_init = params.do_init;
        sim.max_steps = params.max_steps;
        sim.default_rate = params.default_rate;
        sim.rates = config.rates.clone();
        sim
    }

    /// Whether attach fires `__init__` handlers.
    pub fn with_do_init(mut self, enable: bool) -> Self {
        self.do_init = enable;
        self
    }

    /// Adds a per-device rate override, applied on attach.
    pub fn with_rate(mut self, device_id: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(device_id.into(), rate);
        self
    }

    /// Applies configured rates and hands the graph to the stepper.
    ///
    /// # Panics
    /// Panics if a graph is already attached.
    pub fn attach(&mut self, mut graph: GraphInstance) {
        if let Some(rate) = self.default_rate {
            for idx in graph.device_indices() {
                graph.device_mut(idx).set_rate(rate);
            }
        }
        for (id, &rate) in &self.rates {
            match graph.device_idx(id) {
                Some(idx) => graph.device_mut(idx).set_rate(rate),
                None => warn!(device = %id, "rate override for unknown device (ignored)"),
            }
        }

        self.stats = EngineStats::default();
        debug!(
            graph = graph.id(),
            scheduler = self.stepper.name(),
            do_init = self.do_init,
            "attaching graph"
        );
        self.stepper.attach(graph, self.do_init);
        // Init events are produced by attach, never by `step`.
        self.stats.init_events = self.stepper.export_stats()["inits"]
            .as_u64()
            .unwrap_or(0);
    }

    /// Releases the graph.
    ///
    /// # Panics
    /// Panics if no graph is attached.
    pub fn detach(&mut self) -> GraphInstance {
        self.stepper.detach()
    }

    /// Executes a single step.
    pub fn step(&mut self) -> (usize, Vec<Event>) {
        let (ops, events) = self.stepper.step();
        self.stats.steps_executed += 1;
        self.stats.ops += ops as u64;
        if ops == 0 {
            self.stats.idle_steps += 1;
        }
        self.stats.record(&events);
        (ops, events)
    }

    /// Steps until nothing is ready or `max_steps` steps have run.
    ///
    /// Returns the number of steps that did work.
    pub fn run(&mut self, max_steps: u64) -> u64 {
        let mut steps = 0;
        while steps < max_steps {
            let (ops, _) = self.step();
            if ops == 0 {
                self.stats.quiescent = true;
                break;
            }
            steps += 1;
        }

        info!(
            scheduler = self.stepper.name(),
            steps,
            ops = self.stats.ops,
            quiescent = self.stats.quiescent,
            "run finished"
        );
        steps
    }

    /// Runs with the configured step budget.
    pub fn run_configured(&mut self) -> u64 {
        self.run(self.max_steps)
    }

    /// The attached graph, if any.
    pub fn graph(&self) -> Option<&GraphInstance> {
        self.stepper.graph()
    }

    pub fn stepper(&self) -> &dyn Stepper {
        self.stepper.as_ref()
    }

    pub fn stepper_mut(&mut self) -> &mut dyn Stepper {
        self.stepper.as_mut()
    }

    /// Exports statistics from the driver and its stepper.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "engine": {
                "scheduler": self.stepper.name(),
                "steps_executed": self.stats.steps_executed,
                "ops": self.stats.ops,
                "idle_steps": self.stats.idle_steps,
                "init_events": self.stats.init_events,
                "send_events": self.stats.send_events,
                "receive_events": self.stats.receive_events,
                "skip_events": self.stats.skip_events,
                "quiescent": self.stats.quiescent,
                "devices": self.graph().map(|g| g.device_count()).unwrap_or(0),
                "edges": self.graph().map(|g| g.edge_count()).unwrap_or(0),
            },
            "stepper": self.stepper.export_stats(),
        })
    }

    /// Returns the driver statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}
