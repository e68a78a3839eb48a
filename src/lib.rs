//! # GALS Simulation Framework
//!
//! A readiness-driven discrete-event simulator for graphs of message-passing
//! devices. Devices exchange messages over single-slot edges and fire
//! handlers whenever an output is ready to send and not blocked.
//!
//! ## Design Principles
//!
//! - **Typed Topology**: A [`GraphType`] declares device types, ports and the
//!   payload shape carried by each edge. A [`GraphInstance`] is an arena of
//!   devices and edges built against that type.
//! - **Ready-to-Send Words**: Every device keeps an RTS bitmask with one bit
//!   per output port. A device is blocked only when every ready output has a
//!   full edge; the port to fire is drawn from all of its set bits.
//! - **Two Schedulers**:
//!   - **Single**: One randomly chosen operation per step, recorded as a
//!     reversible event that can be rewound and replayed.
//!   - **Batch**: Sweeps every device per step and delivers immediately.
//!
//! ## Quick Start
//!
//! ```rust
//! use gals_sim::engine::Simulation;
//! use gals_sim::executor::SingleStepper;
//! use gals_sim::graphs::make_chain;
//!
//! // Ticker sending 5 messages through 2 relays
//! let graph = make_chain(5, 2).unwrap();
//!
//! let mut sim = Simulation::new(Box::new(SingleStepper::new(42)));
//! sim.attach(graph);
//! sim.run(10_000);
//!
//! // Get statistics
//! let stats = sim.export_stats();
//! assert_eq!(stats["engine"]["quiescent"], true);
//! println!("Receives: {}", stats["stepper"]["receives"]);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use gals_sim::config::SimConfig;
//! use gals_sim::engine::Simulation;
//! use gals_sim::registry::create_default_registry;
//!
//! let config = SimConfig::from_yaml_file("simulation.yaml")?;
//! let registry = create_default_registry()?;
//! let mut sim = Simulation::from_config(&config);
//! sim.attach(config.load_graph(&registry)?);
//! sim.run_configured();
//! ```

pub mod types;
pub mod error;
pub mod payload;
pub mod channel;
pub mod device;
pub mod graph;
pub mod event;
pub mod executor;
pub mod registry;
pub mod loader;
pub mod config;
pub mod engine;
pub mod stats;
pub mod graphs;

// Re-export commonly used types
pub use types::{DeviceIdx, EdgeIdx, PortIndex, RtsWord, INIT_PORT, MAX_OUTPUTS};
pub use error::{GraphError, GraphResult, PayloadError};
pub use payload::{Payload, PayloadSpec, SpecRef, TypedSpec};
pub use channel::{EdgeInstance, EdgeType, EdgeTypeRef};
pub use device::{DeviceInstance, DeviceType, DeviceTypeRef, InputHandler, OutputHandler};
pub use graph::{GraphInstance, GraphType, GraphTypeRef};
pub use event::{Event, EventKind, EventPayload};
pub use executor::{BatchStepper, SingleStepper, Stepper};
pub use registry::{create_default_registry, GraphTypeRegistry};
pub use loader::{load_graph, load_graph_from_file, GraphDocument, LoadError};
pub use config::{ConfigError, SchedulerKind, SimConfig, SimConfigBuilder};
pub use engine::{EngineStats, Simulation};
pub use stats::{SimulationStats, StatsCollector, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging.
///
/// # Example
///
/// ```rust,ignore
/// gals_sim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
