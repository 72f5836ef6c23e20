use std::collections::BTreeMap;
use std::time::Instant;

/// Cross-cutting logger for the processing loop.
///
/// Decouples the orchestrator from output mechanisms (log crate, a front
/// end's own status bar) so each caller can observe per-stage latency and
/// frame accounting without changing the loop.
pub trait PipelineLogger: Send {
    /// Report frame-level progress. `total` is 0 for live sources.
    fn progress(&mut self, current: usize, total: usize);

    /// Record how long a named stage (`detect`, `classify`) took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (queue depth, faces per frame).
    fn metric(&mut self, name: &str, value: f64);

    /// Add to a running total (dropped frames, unclassified faces).
    fn count(&mut self, name: &str, delta: u64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger for tests and front ends that read snapshots instead.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn count(&mut self, _name: &str, _delta: u64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate of one named series. Samples are folded in as they
/// arrive so a long live session stays at constant memory.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SeriesStats {
    pub samples: u64,
    pub sum: f64,
    pub peak: f64,
}

impl SeriesStats {
    fn add(&mut self, value: f64) {
        self.samples += 1;
        self.sum += value;
        self.peak = if self.samples == 1 { value } else { self.peak.max(value) };
    }

    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum / self.samples as f64
        }
    }
}

/// Logger that aggregates stage timings, metrics and counters and reports
/// them through the `log` facade when the run ends.
///
/// Progress output is throttled to every `throttle_frames` frames.
pub struct StdoutPipelineLogger {
    throttle_frames: usize,
    timings: BTreeMap<String, SeriesStats>,
    metrics: BTreeMap<String, SeriesStats>,
    counters: BTreeMap<String, u64>,
    started: Instant,
    frames: usize,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            counters: BTreeMap::new(),
            started: Instant::now(),
            frames: 0,
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() && self.counters.is_empty() {
            return None;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut out = format!(
            "Pipeline summary ({} frames, {elapsed:.1}s total):",
            self.frames
        );
        for (stage, stats) in &self.timings {
            out.push_str(&format!(
                "\n  {stage:12}: avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                stats.mean(),
                stats.peak,
                stats.sum
            ));
        }
        for (name, stats) in &self.metrics {
            out.push_str(&format!(
                "\n  {name}: avg {:.1}  peak {:.0}",
                stats.mean(),
                stats.peak
            ));
        }
        for (name, total) in &self.counters {
            out.push_str(&format!("\n  {name}: {total}"));
        }
        if self.frames > 0 && elapsed > 0.0 {
            out.push_str(&format!(
                "\n  Throughput: {:.1} fps",
                self.frames as f64 / elapsed
            ));
        }
        Some(out)
    }

    pub fn timing_stats(&self, stage: &str) -> Option<SeriesStats> {
        self.timings.get(stage).copied()
    }

    pub fn metric_stats(&self, name: &str) -> Option<SeriesStats> {
        self.metrics.get(name).copied()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.frames = current;
        let due = current % self.throttle_frames == 0 || current == total;
        match (due, total) {
            (false, _) => {}
            (true, 0) => log::info!("Processed {current} frames"),
            (true, total) => log::info!(
                "Processed {current}/{total} frames ({:.1}%)",
                current as f64 / total as f64 * 100.0
            ),
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_owned())
            .or_default()
            .add(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_owned()).or_default().add(value);
    }

    fn count(&mut self, name: &str, delta: u64) {
        *self.counters.entry(name.to_owned()).or_default() += delta;
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
