use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Observations kept per histogram for percentile estimates.
const HISTOGRAM_WINDOW: usize = 1024;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// Current value of one metric series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub metric_type: MetricType,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<HistogramSummary>,
}

/// Summary statistics from a histogram.
///
/// `count` and `sum` cover every observation; percentiles cover the most
/// recent window only.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

struct Gauge {
    // f64 bits
    value: AtomicU64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0f64.to_bits()),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
    }
    fn increment(&self, delta: f64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    window: VecDeque<f64>,
}

struct Histogram {
    state: Mutex<HistogramState>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            state: Mutex::new(HistogramState::default()),
        }
    }

    fn observe(&self, value: f64) {
        let mut state = self.state.lock();
        state.count += 1;
        state.sum += value;
        if state.window.len() == HISTOGRAM_WINDOW {
            state.window.pop_front();
        }
        state.window.push_back(value);
    }

    fn summary(&self) -> HistogramSummary {
        let state = self.state.lock();
        if state.window.is_empty() {
            return HistogramSummary::default();
        }
        let mut obs: Vec<f64> = state.window.iter().copied().collect();
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = obs.len();
        let at = |q: f64| obs[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count: state.count,
            sum: state.sum,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

/// Metric key: name + sorted labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort();
        Self {
            name: name.to_string(),
            labels: sorted,
        }
    }

    fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.iter().cloned().collect()
    }
}

/// Thread-safe in-memory metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.increment(n);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_insert_with(Counter::new)
            .increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.set(value);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_insert_with(Gauge::new)
            .set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(g) = self.gauges.read().get(&key) {
            g.increment(delta);
            return;
        }
        self.gauges
            .write()
            .entry(key)
            .or_insert_with(Gauge::new)
            .increment(delta);
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.observe(value);
            return;
        }
        self.histograms
            .write()
            .entry(key)
            .or_insert_with(Histogram::new)
            .observe(value);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, Counter::get)
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, Gauge::get)
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Histogram::summary)
            .unwrap_or_default()
    }

    /// Current value of every series, sorted by name then labels.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut samples = Vec::new();

        for (key, counter) in self.counters.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.label_map(),
                metric_type: MetricType::Counter,
                value: counter.get() as f64,
                summary: None,
            });
        }
        for (key, gauge) in self.gauges.read().iter() {
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.label_map(),
                metric_type: MetricType::Gauge,
                value: gauge.get(),
                summary: None,
            });
        }
        for (key, histogram) in self.histograms.read().iter() {
            let summary = histogram.summary();
            samples.push(MetricSample {
                name: key.name.clone(),
                labels: key.label_map(),
                metric_type: MetricType::Histogram,
                value: summary.p50,
                summary: Some(summary),
            });
        }

        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        samples
    }
}
