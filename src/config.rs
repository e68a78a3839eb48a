//! Run configuration.
//!
//! A run is described by a small YAML or JSON document naming the scheduler,
//! its seed, the graph document to load and any per-device rate overrides.
//!
//! ```yaml
//! simulation:
//!   scheduler: single      # single | batch
//!   seed: 42               # entropy when absent
//!   max_steps: 100000
//!   do_init: true
//!   randomize_offset: true # batch sweeps only
//!   log_level: info
//!   default_rate: 1.0      # applied to every device when set
//!
//! graph:
//!   path: heat.yaml
//!
//! rates:
//!   d_1_1: 0.5
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::graph::GraphInstance;
use crate::loader::{load_graph_from_file, LoadError};
use crate::registry::GraphTypeRegistry;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("bad JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Validation(String),

    #[error("config extension '{0}' is neither yaml, yml nor json")]
    UnknownFormat(String),

    #[error("configured graph failed to load: {0}")]
    Load(#[from] LoadError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// On-disk encoding of a config document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Encoding {
    Yaml,
    Json,
}

impl Encoding {
    fn of(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Encoding::Yaml),
            "json" => Ok(Encoding::Json),
            _ => Err(ConfigError::UnknownFormat(ext)),
        }
    }
}

/// Which stepper drives the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[default]
    Single,
    Batch,
}

/// The `simulation:` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    #[serde(default)]
    pub scheduler: SchedulerKind,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Step bound for `Simulation::run_configured`
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Fire `__init__` handlers on attach
    #[serde(default = "default_true")]
    pub do_init: bool,

    /// Rotate the start of each batch sweep
    #[serde(default = "default_true")]
    pub randomize_offset: bool,

    /// Filter directive handed to `init_logging`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub default_rate: Option<f64>,
}

fn default_max_steps() -> u64 {
    100_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            seed: None,
            max_steps: default_max_steps(),
            do_init: true,
            randomize_offset: true,
            log_level: default_log_level(),
            default_rate: None,
        }
    }
}

/// The `graph:` section.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphSource {
    /// `.yaml`, `.yml` or `.json` graph document
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationParams,

    #[serde(default)]
    pub graph: GraphSource,

    /// Device id to rate, overriding `default_rate`
    #[serde(default)]
    pub rates: BTreeMap<String, f64>,
}

fn check_rate(what: &str, rate: f64) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{} rate {} is outside [0, 1]",
            what, rate
        )))
    }
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(text: &str, encoding: Encoding) -> ConfigResult<Self> {
        let config: SimConfig = match encoding {
            Encoding::Yaml => serde_yaml::from_str(text)?,
            Encoding::Json => serde_json::from_str(text)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn render(&self, encoding: Encoding) -> ConfigResult<String> {
        Ok(match encoding {
            Encoding::Yaml => serde_yaml::to_string(self)?,
            Encoding::Json => serde_json::to_string_pretty(self)?,
        })
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Self::parse(yaml, Encoding::Yaml)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Self::parse(json, Encoding::Json)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::parse(&std::fs::read_to_string(path)?, Encoding::Yaml)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::parse(&std::fs::read_to_string(path)?, Encoding::Json)
    }

    /// Reads a config, picking the parser from the file extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let encoding = Encoding::of(path)?;
        Self::parse(&std::fs::read_to_string(path)?, encoding)
    }

    /// Rejects a zero step bound, rates outside `[0, 1]` and a log level
    /// that is not a valid filter directive.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.simulation.max_steps == 0 {
            return Err(ConfigError::Validation("max_steps is zero".to_string()));
        }

        if let Err(e) = EnvFilter::try_new(&self.simulation.log_level) {
            return Err(ConfigError::Validation(format!(
                "log_level '{}': {}",
                self.simulation.log_level, e
            )));
        }

        if let Some(rate) = self.simulation.default_rate {
            check_rate("default", rate)?;
        }
        for (id, &rate) in &self.rates {
            check_rate(&format!("device '{}'", id), rate)?;
        }

        if self.simulation.scheduler == SchedulerKind::Single
            && !self.simulation.randomize_offset
        {
            tracing::warn!("randomize_offset has no effect on the single scheduler");
        }

        Ok(())
    }

    /// Loads the document named by `graph.path`.
    pub fn load_graph(&self, registry: &GraphTypeRegistry) -> ConfigResult<GraphInstance> {
        let path = self.graph.path.as_ref().ok_or_else(|| {
            ConfigError::Validation("graph.path is not set".to_string())
        })?;
        Ok(load_graph_from_file(path, registry)?)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        self.render(Encoding::Yaml)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        self.render(Encoding::Json)
    }

    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.render(Encoding::Yaml)?)?;
        Ok(())
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.render(Encoding::Json)?)?;
        Ok(())
    }

    /// Installs the global subscriber at `simulation.log_level`.
    ///
    /// # Panics
    /// Panics if a subscriber is already installed.
    pub fn init_logging(&self) {
        crate::init_logging(&self.simulation.log_level);
    }

    /// Per-device override, falling back to `default_rate`.
    pub fn rate_for(&self, device_id: &str) -> Option<f64> {
        self.rates
            .get(device_id)
            .copied()
            .or(self.simulation.default_rate)
    }
}

/// Fluent construction of a [`SimConfig`]; `build` validates.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.config.simulation.scheduler = kind;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.simulation.seed = Some(seed);
        self
    }

    pub fn max_steps(mut self, steps: u64) -> Self {
        self.config.simulation.max_steps = steps;
        self
    }

    pub fn do_init(mut self, enable: bool) -> Self {
        self.config.simulation.do_init = enable;
        self
    }

    pub fn randomize_offset(mut self, enable: bool) -> Self {
        self.config.simulation.randomize_offset = enable;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn default_rate(mut self, rate: f64) -> Self {
        self.config.simulation.default_rate = Some(rate);
        self
    }

    pub fn graph_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.graph.path = Some(path.into());
        self
    }

    pub fn rate(mut self, device_id: impl Into<String>, rate: f64) -> Self {
        self.config.rates.insert(device_id.into(), rate);
        self
    }

    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pick_single_scheduler() {
        let config = SimConfig::new();
        assert_eq!(config.simulation.scheduler, SchedulerKind::Single);
        assert_eq!(config.simulation.max_steps, 100_000);
        assert!(config.simulation.do_init);
        assert!(config.simulation.seed.is_none());
        assert!(config.rates.is_empty());
    }

    #[test]
    fn test_yaml_batch_run() {
        let yaml = r#"
simulation:
  scheduler: batch
  seed: 42
  max_steps: 500
  randomize_offset: false
  log_level: debug

graph:
  path: heat.yaml

rates:
  d_1_1: 0.5
"#;

        let config = SimConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.simulation.scheduler, SchedulerKind::Batch);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.simulation.max_steps, 500);
        assert!(!config.simulation.randomize_offset);
        assert_eq!(config.graph.path, Some(PathBuf::from("heat.yaml")));
        assert_eq!(config.rate_for("d_1_1"), Some(0.5));
        assert_eq!(config.rate_for("d_2_1"), None);
    }

    #[test]
    fn test_json_default_rate_fallback() {
        let json = r#"{
            "simulation": {
                "scheduler": "single",
                "default_rate": 0.75
            },
            "rates": {"a": 1.0}
        }"#;

        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(config.simulation.default_rate, Some(0.75));
        assert_eq!(config.rate_for("a"), Some(1.0));
        assert_eq!(config.rate_for("b"), Some(0.75));
    }

    #[test]
    fn test_builder() {
        let config = SimConfigBuilder::new()
            .scheduler(SchedulerKind::Batch)
            .seed(7)
            .max_steps(20)
            .rate("x", 0.25)
            .build()
            .unwrap();

        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.max_steps, 20);
        assert_eq!(config.rates.len(), 1);
    }

    #[test]
    fn test_validation_max_steps() {
        let yaml = r#"
simulation:
  max_steps: 0
"#;
        let result = SimConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rates() {
        let yaml = r#"
rates:
  d_1_1: 1.5
"#;
        assert!(SimConfig::from_yaml(yaml).is_err());

        let result = SimConfigBuilder::new().default_rate(-0.1).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_log_level() {
        let config = SimConfigBuilder::new()
            .log_level("gals_sim=debug,warn")
            .build()
            .unwrap();
        assert_eq!(config.simulation.log_level, "gals_sim=debug,warn");

        let yaml = r#"
simulation:
  log_level: gals_sim=loudest
"#;
        let result = SimConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Validation(ref m)) if m.contains("loudest")));
    }

    #[test]
    fn test_unknown_scheduler() {
        let yaml = r#"
simulation:
  scheduler: parallel
"#;
        assert!(matches!(SimConfig::from_yaml(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_load_graph_without_path() {
        let registry = crate::registry::create_default_registry().unwrap();
        let result = SimConfig::new().load_graph(&registry);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_extension() {
        let result = SimConfig::from_file("run.toml");
        assert!(matches!(result, Err(ConfigError::UnknownFormat(_))));
    }

    #[test]
    fn test_yaml_keeps_rates_and_path() {
        let config = SimConfigBuilder::new()
            .seed(3)
            .graph_path("g.json")
            .rate("d", 0.5)
            .build()
            .unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = SimConfig::from_yaml(&yaml).unwrap();

        assert_eq!(restored.simulation.seed, Some(3));
        assert_eq!(restored.graph.path, config.graph.path);
        assert_eq!(restored.rates, config.rates);
    }
}
