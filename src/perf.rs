use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::debug::json_escape;
use crate::metrics::{NodeTimings, PhaseTiming, StyleMetrics};

/// Timing and counter collector for a single style pass.
///
/// Cloning shares the underlying state. The collector only observes; nothing
/// in the pipeline reads it back while computing styles.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Default)]
struct MetricsState {
    phase_order: Vec<String>,
    phases: BTreeMap<String, (f64, u64)>,
    counters: BTreeMap<String, u64>,
    nodes: NodeTimings,
    sink: Option<MetricsSink>,
}

struct MetricsSink {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: BTreeMap<String, (f64, u64)>,
    count_totals: BTreeMap<String, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also streams every span and count as JSONL to `path`. A `_hot.log`
    /// ranking is written next to it once the last handle is dropped.
    pub fn with_output(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let collector = Self::default();
        if let Ok(mut state) = collector.inner.lock() {
            state.sink = Some(MetricsSink {
                writer: BufWriter::new(file),
                path,
                span_totals: BTreeMap::new(),
                count_totals: BTreeMap::new(),
            });
        }
        Ok(collector)
    }

    pub fn record_phase(&self, name: &str, ms: f64) {
        if let Ok(mut state) = self.inner.lock() {
            if !state.phases.contains_key(name) {
                state.phase_order.push(name.to_string());
            }
            let entry = state.phases.entry(name.to_string()).or_insert((0.0, 0));
            entry.0 += ms;
            entry.1 += 1;
            if let Some(sink) = state.sink.as_mut() {
                sink.span(name, ms);
            }
        }
    }

    pub fn add_count(&self, name: &str, value: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(value);
            if let Some(sink) = state.sink.as_mut() {
                sink.count(name, value);
            }
        }
    }

    pub fn record_node(&self, ms: f64) {
        if let Ok(mut state) = self.inner.lock() {
            state.nodes.record(ms);
        }
    }

    /// Merges timings gathered locally by a worker.
    pub fn record_nodes(&self, timings: &NodeTimings) {
        if let Ok(mut state) = self.inner.lock() {
            state.nodes.absorb(timings);
        }
    }

    pub fn snapshot(&self) -> StyleMetrics {
        let Ok(state) = self.inner.lock() else {
            return StyleMetrics::default();
        };
        let phases = state
            .phase_order
            .iter()
            .filter_map(|name| {
                state.phases.get(name).map(|(total_ms, count)| PhaseTiming {
                    name: name.clone(),
                    total_ms: *total_ms,
                    count: *count,
                })
            })
            .collect();
        StyleMetrics {
            phases,
            nodes: state.nodes,
            counters: state.counters.clone(),
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            if let Some(sink) = state.sink.as_mut() {
                let _ = sink.writer.flush();
            }
        }
    }
}

/// Runs `f` and records its duration under `phase` when a collector is present.
pub(crate) fn timed<T>(metrics: Option<&MetricsCollector>, phase: &str, f: impl FnOnce() -> T) -> T {
    let Some(metrics) = metrics else {
        return f();
    };
    let start = Instant::now();
    let out = f();
    metrics.record_phase(phase, start.elapsed().as_secs_f64() * 1000.0);
    out
}

impl MetricsSink {
    fn span(&mut self, name: &str, ms: f64) {
        let entry = self.span_totals.entry(name.to_string()).or_insert((0.0, 0));
        entry.0 += ms;
        entry.1 += 1;
        let _ = writeln!(
            self.writer,
            "{{\"type\":\"perf.span\",\"name\":\"{}\",\"unit\":\"ms\",\"ms\":{:.3}}}",
            json_escape(name),
            ms
        );
    }

    fn count(&mut self, name: &str, value: u64) {
        let entry = self.count_totals.entry(name.to_string()).or_insert(0);
        *entry = entry.saturating_add(value);
        let _ = writeln!(
            self.writer,
            "{{\"type\":\"perf.count\",\"name\":\"{}\",\"value\":{}}}",
            json_escape(name),
            value
        );
    }
}

impl Drop for MetricsSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let Ok(file) = File::create(hot_path_for(&self.path)) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &(f64, u64))> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.0.partial_cmp(&a.1.0).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (name, (ms, count))) in spans.into_iter().enumerate() {
            let avg = if *count == 0 { 0.0 } else { ms / *count as f64 };
            let _ = writeln!(
                writer,
                "{{\"type\":\"perf.hot.span\",\"rank\":{},\"name\":\"{}\",\"ms\":{:.3},\"count\":{},\"avg_ms\":{:.3}}}",
                rank + 1,
                json_escape(name),
                ms,
                count,
                avg
            );
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (rank, (name, value)) in counts.into_iter().enumerate() {
            let _ = writeln!(
                writer,
                "{{\"type\":\"perf.hot.count\",\"rank\":{},\"name\":\"{}\",\"value\":{}}}",
                rank + 1,
                json_escape(name),
                value
            );
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("docstyle_metrics.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_keep_first_seen_order() {
        let metrics = MetricsCollector::new();
        metrics.record_phase("index", 1.0);
        metrics.record_phase("cascade", 2.0);
        metrics.record_phase("index", 0.5);
        let snapshot = metrics.snapshot();
        let names: Vec<&str> = snapshot.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["index", "cascade"]);
        assert_eq!(snapshot.phase_ms("index"), Some(1.5));
        assert_eq!(snapshot.phases[0].count, 2);
    }

    #[test]
    fn clones_share_state() {
        let metrics = MetricsCollector::new();
        let other = metrics.clone();
        other.add_count("rules", 3);
        other.record_node(0.25);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter("rules"), 3);
        assert_eq!(snapshot.nodes.count, 1);
    }

    #[test]
    fn timed_without_collector_just_runs() {
        assert_eq!(timed(None, "noop", || 7), 7);
    }

    #[test]
    fn hot_log_lands_next_to_output() {
        let path = Path::new("/tmp/run.metrics.jsonl");
        assert_eq!(hot_path_for(path), Path::new("/tmp/run.metrics_hot.log"));
    }
}
