//! Run statistics and their export.
//!
//! [`StatsCollector`] times a run and folds the JSON produced by
//! [`Simulation::export_stats`](crate::engine::Simulation::export_stats) into
//! a [`SimulationStats`] record. The record serializes to JSON and renders
//! as a `metric,value` CSV table or a plain-text report.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Everything known about one finished run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub run: RunInfo,
    pub engine: EngineSummary,
    pub stepper: StepperSummary,
    pub timing: TimingStats,
}

/// Identification of a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunInfo {
    pub name: String,
    /// Crate version that produced the numbers
    pub version: String,
    /// Unix seconds
    pub started_at: Option<u64>,
    /// Unix seconds
    pub finished_at: Option<u64>,
    pub config_file: Option<String>,
}

/// Counters kept by the driver.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineSummary {
    pub scheduler: String,
    pub steps_executed: u64,
    pub ops: u64,
    pub idle_steps: u64,
    pub init_events: u64,
    pub send_events: u64,
    pub receive_events: u64,
    pub skip_events: u64,
    /// The run ended because nothing was ready
    pub quiescent: bool,
    pub device_count: usize,
    pub edge_count: usize,
}

/// Counters kept by the stepper. Counters a scheduler does not track stay
/// `None`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepperSummary {
    pub sends: u64,
    pub cancelled: u64,
    pub receives: u64,
    pub skips: u64,
    pub inits: Option<u64>,
    pub history_len: Option<u64>,
    pub sweeps: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    pub wall_ms: f64,
    pub steps_per_sec: f64,
    pub ops_per_sec: f64,
}

impl SimulationStats {
    pub fn new() -> Self {
        let mut stats = Self::default();
        stats.run.version = env!("CARGO_PKG_VERSION").to_string();
        stats
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.run.name = name.into();
        self
    }

    /// Derives throughput from the counters and the elapsed wall time.
    pub fn set_wall_time(&mut self, wall_ms: f64) {
        self.timing.wall_ms = wall_ms;
        if wall_ms <= 0.0 {
            return;
        }
        let secs = wall_ms / 1e3;
        self.timing.steps_per_sec = self.engine.steps_executed as f64 / secs;
        self.timing.ops_per_sec = self.engine.ops as f64 / secs;
    }

    /// Flat `(metric, value)` table shared by the CSV and text renderings.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let e = &self.engine;
        let s = &self.stepper;
        let mut rows = vec![
            ("scheduler", e.scheduler.clone()),
            ("devices", e.device_count.to_string()),
            ("edges", e.edge_count.to_string()),
            ("steps_executed", e.steps_executed.to_string()),
            ("ops", e.ops.to_string()),
            ("idle_steps", e.idle_steps.to_string()),
            ("init_events", e.init_events.to_string()),
            ("send_events", e.send_events.to_string()),
            ("receive_events", e.receive_events.to_string()),
            ("skip_events", e.skip_events.to_string()),
            ("quiescent", e.quiescent.to_string()),
            ("sends", s.sends.to_string()),
            ("cancelled", s.cancelled.to_string()),
            ("receives", s.receives.to_string()),
            ("skips", s.skips.to_string()),
        ];
        let optional = [
            ("inits", s.inits),
            ("history_len", s.history_len),
            ("sweeps", s.sweeps),
        ];
        rows.extend(
            optional
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v.to_string()))),
        );
        rows.push(("wall_ms", format!("{:.2}", self.timing.wall_ms)));
        rows.push(("steps_per_sec", format!("{:.2}", self.timing.steps_per_sec)));
        rows.push(("ops_per_sec", format!("{:.2}", self.timing.ops_per_sec)));
        rows
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let text = self.to_json().map_err(std::io::Error::from)?;
        std::fs::write(path, text)
    }

    /// Renders [`rows`](Self::rows) as a two-column CSV table.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("metric,value\n");
        for (metric, value) in self.rows() {
            out.push_str(metric);
            out.push(',');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }

    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a plain-text report.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        let title = if self.run.name.is_empty() {
            "simulation run"
        } else {
            self.run.name.as_str()
        };
        writeln!(w, "== {} (gals-sim {}) ==", title, self.run.version)?;
        if let (Some(start), Some(end)) = (self.run.started_at, self.run.finished_at) {
            writeln!(w, "unix time {}..{}", start, end)?;
        }
        if let Some(ref file) = self.run.config_file {
            writeln!(w, "config: {}", file)?;
        }

        let rows = self.rows();
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (metric, value) in rows {
            writeln!(w, "  {:<width$}  {}", metric, value, width = width)?;
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Wall-clock stopwatch.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_secs() * 1e3
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn count(section: &Value, key: &str) -> u64 {
    section.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Times a run and gathers its statistics.
///
/// # Example
///
/// ```
/// use gals_sim::engine::Simulation;
/// use gals_sim::executor::SingleStepper;
/// use gals_sim::graphs::chain::make_chain;
/// use gals_sim::stats::StatsCollector;
///
/// let mut collector = StatsCollector::new();
/// collector.start();
///
/// let mut sim = Simulation::new(Box::new(SingleStepper::new(1)));
/// sim.attach(make_chain(4, 1).unwrap());
/// sim.run(1_000);
///
/// collector.stop();
/// collector.update_from_json(&sim.export_stats());
/// assert!(collector.stats().engine.quiescent);
/// ```
#[derive(Debug)]
pub struct StatsCollector {
    stats: SimulationStats,
    timer: Option<Timer>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            stats: SimulationStats::new(),
            timer: None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.stats.run.name = name.into();
    }

    pub fn set_config_file(&mut self, path: impl Into<String>) {
        self.stats.run.config_file = Some(path.into());
    }

    pub fn start(&mut self) {
        self.stats.run.started_at = Some(unix_secs());
        self.timer = Some(Timer::start());
    }

    /// Stops the clock. Throughput is refreshed again by later updates.
    pub fn stop(&mut self) {
        self.stats.run.finished_at = Some(unix_secs());
        if let Some(timer) = self.timer.take() {
            self.stats.set_wall_time(timer.elapsed_ms());
        }
    }

    /// Reads the `engine` and `stepper` sections of
    /// `Simulation::export_stats`. Missing sections leave their summary
    /// untouched.
    pub fn update_from_json(&mut self, json: &Value) {
        if let Some(engine) = json.get("engine") {
            self.stats.engine = EngineSummary {
                scheduler: engine
                    .get("scheduler")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                steps_executed: count(engine, "steps_executed"),
                ops: count(engine, "ops"),
                idle_steps: count(engine, "idle_steps"),
                init_events: count(engine, "init_events"),
                send_events: count(engine, "send_events"),
                receive_events: count(engine, "receive_events"),
                skip_events: count(engine, "skip_events"),
                quiescent: engine
                    .get("quiescent")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                device_count: count(engine, "devices") as usize,
                edge_count: count(engine, "edges") as usize,
            };
        }

        if let Some(stepper) = json.get("stepper").filter(|s| s.is_object()) {
            self.stats.stepper = StepperSummary {
                sends: count(stepper, "sends"),
                cancelled: count(stepper, "cancelled"),
                receives: count(stepper, "receives"),
                skips: count(stepper, "skips"),
                inits: stepper.get("inits").and_then(Value::as_u64),
                history_len: stepper.get("history_len").and_then(Value::as_u64),
                sweeps: stepper.get("sweeps").and_then(Value::as_u64),
            };
        }

        let wall_ms = self.stats.timing.wall_ms;
        self.stats.set_wall_time(wall_ms);
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn into_stats(self) -> SimulationStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Simulation;
    use crate::executor::{BatchStepper, SingleStepper};
    use crate::graphs::chain::make_chain;

    #[test]
    fn test_new_carries_version() {
        let stats = SimulationStats::new().with_name("heat");
        assert_eq!(stats.run.name, "heat");
        assert_eq!(stats.run.version, env!("CARGO_PKG_VERSION"));
        assert!(stats.run.started_at.is_none());
    }

    #[test]
    fn test_wall_time_throughput() {
        let mut stats = SimulationStats::new();
        stats.engine.steps_executed = 500;
        stats.engine.ops = 2_000;
        stats.set_wall_time(250.0);

        assert_eq!(stats.timing.steps_per_sec, 2_000.0);
        assert_eq!(stats.timing.ops_per_sec, 8_000.0);

        // Zero elapsed time leaves throughput alone.
        stats.set_wall_time(0.0);
        assert_eq!(stats.timing.ops_per_sec, 8_000.0);
    }

    #[test]
    fn test_json_sections() {
        let mut stats = SimulationStats::new();
        stats.engine.steps_executed = 1234;
        stats.stepper.sweeps = Some(56);

        let parsed: Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(parsed["engine"]["steps_executed"], 1234);
        assert_eq!(parsed["stepper"]["sweeps"], 56);
        assert!(parsed["stepper"]["history_len"].is_null());
    }

    #[test]
    fn test_csv_skips_untracked_counters() {
        let mut stats = SimulationStats::new();
        stats.engine.scheduler = "single".to_string();
        stats.engine.ops = 500;
        stats.stepper.cancelled = 3;
        stats.stepper.history_len = Some(9);

        let csv = stats.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "metric,value");
        assert_eq!(lines[1], "scheduler,single");
        assert!(lines.contains(&"ops,500"));
        assert!(lines.contains(&"cancelled,3"));
        assert!(lines.contains(&"history_len,9"));
        assert!(!csv.contains("sweeps"));
        assert_eq!(lines.len(), stats.rows().len() + 1);
    }

    #[test]
    fn test_timer_measures_sleep() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
        assert!(timer.elapsed_secs() >= 0.01);
    }

    #[test]
    fn test_collector_times_run() {
        let mut collector = StatsCollector::new();
        collector.set_name("timed");
        collector.set_config_file("run.yaml");
        collector.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        collector.stop();

        let stats = collector.stats();
        assert!(stats.timing.wall_ms >= 5.0);
        assert!(stats.run.started_at.is_some());
        assert!(stats.run.finished_at >= stats.run.started_at);
        assert_eq!(stats.run.config_file.as_deref(), Some("run.yaml"));
    }

    #[test]
    fn test_collector_from_single_run() {
        let mut sim = Simulation::new(Box::new(SingleStepper::new(3)));
        sim.attach(make_chain(2, 0).unwrap());
        sim.run(100);

        let mut collector = StatsCollector::new();
        collector.update_from_json(&sim.export_stats());
        let stats = collector.into_stats();

        assert_eq!(stats.engine.scheduler, "single");
        assert!(stats.engine.quiescent);
        assert_eq!(stats.engine.device_count, 2);
        assert_eq!(stats.stepper.sends, 3);
        assert_eq!(stats.stepper.cancelled, 1);
        assert_eq!(stats.stepper.receives, 2);
        assert_eq!(stats.stepper.inits, Some(1));
        assert!(stats.stepper.sweeps.is_none());
    }

    #[test]
    fn test_collector_from_batch_run() {
        let mut sim = Simulation::new(Box::new(BatchStepper::new(3)));
        sim.attach(make_chain(2, 0).unwrap());
        sim.run(100);

        let mut collector = StatsCollector::new();
        collector.update_from_json(&sim.export_stats());
        let stats = collector.stats();

        assert_eq!(stats.engine.scheduler, "batch");
        assert!(stats.stepper.sweeps.is_some());
        assert!(stats.stepper.history_len.is_none());
        assert_eq!(stats.stepper.inits, Some(1));
        assert_eq!(stats.engine.init_events, 1);
    }

    #[test]
    fn test_summary_lists_every_row() {
        let mut stats = SimulationStats::new().with_name("report");
        stats.engine.steps_executed = 100;
        stats.stepper.history_len = Some(42);

        let summary = stats.summary();
        assert!(summary.starts_with("== report (gals-sim"));
        assert!(summary.contains("steps_executed"));
        assert!(summary
            .lines()
            .any(|l| l.trim_start().starts_with("history_len") && l.ends_with(" 42")));
    }
}
