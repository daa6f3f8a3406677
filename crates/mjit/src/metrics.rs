//! Recompiler metrics using metrics-rs.
//!
//! The library records through the `metrics` facade; the CLI installs
//! [`CliRecorder`] to print a summary when `--metrics` is given.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter, describe_counter,
    describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;

use crate::RunExit;

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "mjit_blocks_compiled_total",
        Unit::Count,
        "Blocks translated (including preloads)"
    );
    describe_counter!(
        "mjit_blocks_invalidated_total",
        Unit::Count,
        "Blocks invalidated by code writes"
    );
    describe_counter!("mjit_cache_clears_total", Unit::Count, "Full cache clears");
    describe_counter!(
        "mjit_generic_fallbacks_total",
        Unit::Count,
        "Blocks compiled entirely through the interpreter helper"
    );
    describe_counter!(
        "mjit_guest_cycles_total",
        Unit::Count,
        "Downcount consumed by guest code"
    );
    describe_counter!("mjit_runs_total", Unit::Count, "Calls to Jit::run, by exit");
    describe_gauge!("mjit_code_bytes", Unit::Bytes, "Executable code in use");
    describe_histogram!("mjit_block_bytes", Unit::Bytes, "Generated bytes per block");
}

/// Record one translated block.
pub fn record_compile(code_bytes: usize, preload: bool) {
    let kind = if preload { "preload" } else { "lazy" };
    counter!("mjit_blocks_compiled_total", "kind" => kind).increment(1);
    #[allow(clippy::cast_precision_loss)]
    histogram!("mjit_block_bytes").record(code_bytes as f64);
}

pub fn record_generic_fallback() {
    counter!("mjit_generic_fallbacks_total").increment(1);
}

pub fn record_invalidations(blocks: usize) {
    if blocks != 0 {
        counter!("mjit_blocks_invalidated_total").increment(blocks as u64);
    }
}

pub fn record_clear(code_used: usize) {
    counter!("mjit_cache_clears_total").increment(1);
    #[allow(clippy::cast_precision_loss)]
    gauge!("mjit_code_bytes").set(code_used as f64);
}

/// Record the end of a [`crate::Jit::run`] call.
pub fn record_run(exit: &RunExit, cycles: u64, code_used: usize) {
    let label = match exit {
        RunExit::OutOfCycles => "out_of_cycles",
        RunExit::Stopped => "stopped",
        RunExit::Breakpoint(_) => "breakpoint",
        RunExit::Syscall(_) => "syscall",
        RunExit::Fault(_) => "fault",
    };
    counter!("mjit_runs_total", "exit" => label).increment(1);
    counter!("mjit_guest_cycles_total").increment(cycles);
    #[allow(clippy::cast_precision_loss)]
    gauge!("mjit_code_bytes").set(code_used as f64);
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

#[derive(Default)]
struct Storage {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
}

struct CliCounter {
    key: String,
    storage: Arc<Storage>,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        *self.storage.counters.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.counters.write().insert(self.key.clone(), value);
    }
}

struct CliGauge {
    key: String,
    storage: Arc<Storage>,
}

impl metrics::GaugeFn for CliGauge {
    fn increment(&self, value: f64) {
        *self.storage.gauges.write().entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.storage.gauges.write().entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.gauges.write().insert(self.key.clone(), value);
    }
}

struct CliHistogram {
    key: String,
    storage: Arc<Storage>,
}

impl metrics::HistogramFn for CliHistogram {
    fn record(&self, value: f64) {
        self.storage
            .histograms
            .write()
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

/// Recorder that keeps metrics in memory for a terminal summary.
#[derive(Default)]
pub struct CliRecorder {
    storage: Arc<Storage>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder. Returns `None` if one is already set.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let storage = Arc::clone(&self.storage);
        metrics::set_global_recorder(self).ok()?;
        Some(CliRecorderHandle { storage })
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            storage: Arc::clone(&self.storage),
        }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CliGauge {
            key: key_to_string(key),
            storage: Arc::clone(&self.storage),
        }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CliHistogram {
            key: key_to_string(key),
            storage: Arc::clone(&self.storage),
        }))
    }
}

/// Read access to what an installed [`CliRecorder`] collected.
pub struct CliRecorderHandle {
    storage: Arc<Storage>,
}

impl CliRecorderHandle {
    #[must_use]
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.storage.counters.read().get(key).copied()
    }

    #[must_use]
    pub fn get_gauge(&self, key: &str) -> Option<f64> {
        self.storage.gauges.read().get(key).copied()
    }

    #[must_use]
    pub fn get_histogram(&self, key: &str) -> Option<Vec<f64>> {
        self.storage.histograms.read().get(key).cloned()
    }

    /// Print everything collected, sorted by key.
    pub fn print_summary(&self) {
        let counters = self.storage.counters.read();
        let gauges = self.storage.gauges.read();
        let histograms = self.storage.histograms.read();

        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            println!("No metrics collected.");
            return;
        }

        println!();
        println!("## Metrics Summary");
        println!();

        if !counters.is_empty() {
            println!("### Counters");
            let mut entries: Vec<_> = counters.iter().collect();
            entries.sort();
            for (key, value) in entries {
                println!("  {key}: {value}");
            }
            println!();
        }

        if !gauges.is_empty() {
            println!("### Gauges");
            let mut entries: Vec<_> = gauges.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                println!("  {key}: {value:.2}");
            }
            println!();
        }

        if !histograms.is_empty() {
            println!("### Histograms");
            let mut entries: Vec<_> = histograms.iter().filter(|(_, v)| !v.is_empty()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, values) in entries {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                #[allow(clippy::cast_precision_loss)]
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                println!(
                    "  {key}: count={}, min={min:.1}, max={max:.1}, avg={avg:.1}",
                    values.len()
                );
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use metrics::Label;

    use super::*;

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("mjit_cache_clears_total");
        assert_eq!(key_to_string(&key), "mjit_cache_clears_total");

        let key = Key::from_parts("mjit_blocks_compiled_total", vec![Label::new("kind", "lazy")]);
        assert_eq!(key_to_string(&key), "mjit_blocks_compiled_total{kind=lazy}");
    }

    #[test]
    fn test_cli_recorder_storage() {
        let recorder = CliRecorder::new();
        let handle = CliRecorderHandle {
            storage: Arc::clone(&recorder.storage),
        };

        let counter = recorder.register_counter(&Key::from_name("c"), &Metadata::new("t", metrics::Level::INFO, None));
        counter.increment(5);
        counter.increment(2);
        assert_eq!(handle.get_counter("c"), Some(7));
        counter.absolute(1);
        assert_eq!(handle.get_counter("c"), Some(1));

        let gauge = recorder.register_gauge(&Key::from_name("g"), &Metadata::new("t", metrics::Level::INFO, None));
        gauge.set(4.0);
        gauge.decrement(1.5);
        assert_eq!(handle.get_gauge("g"), Some(2.5));

        let hist = recorder.register_histogram(&Key::from_name("h"), &Metadata::new("t", metrics::Level::INFO, None));
        hist.record(1.0);
        hist.record(3.0);
        assert_eq!(handle.get_histogram("h"), Some(vec![1.0, 3.0]));
    }

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        init();
        record_compile(64, false);
        record_invalidations(0);
        record_run(&RunExit::OutOfCycles, 10, 0);
    }
}
