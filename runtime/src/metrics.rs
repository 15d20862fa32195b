//! Metrics registry with Prometheus text rendering.
//!
//! The registry is owned by the host and shared by handle, so every test can
//! build its own without a process-global recorder. It holds two kinds of
//! series:
//!
//! - **Counters**: a monotonic scalar
//! - **Histograms**: cumulative bucket counts (keyed by upper bound, `+Inf`
//!   always present) plus `sum` and `count`
//!
//! A series is identified by its name and its label set sorted by label name.
//! Recording never fails: a sample that cannot be applied (a negative counter
//! delta, a name already used by the other kind) is dropped with a warning.
//!
//! # Example
//!
//! ```
//! use service_spine_runtime::metrics::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new();
//! registry.describe("jobs_total", "Jobs processed");
//! registry.inc_counter("jobs_total", &[("queue", "default")], 1.0);
//! registry.observe_histogram("job_seconds", &[], 0.2, &[0.1, 0.5, 1.0]);
//!
//! let text = registry.render_prometheus();
//! assert!(text.contains("# HELP jobs_total Jobs processed"));
//! assert!(text.contains(r#"jobs_total{queue="default"} 1"#));
//! assert!(text.contains(r#"job_seconds_bucket{le="0.5"} 1"#));
//! assert!(text.contains(r#"job_seconds_bucket{le="0.1"} 0"#));
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Label of the catch-all histogram bucket.
pub const INF_BUCKET: &str = "+Inf";

/// Counter of served HTTP requests.
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Histogram of HTTP request latency.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Default latency buckets, in seconds.
pub const DEFAULT_DURATION_BUCKETS: [f64; 5] = [0.1, 0.5, 1.0, 2.5, 5.0];

/// Body rendered when nothing has been recorded yet.
pub const EMPTY_EXPOSITION: &str = "# no metrics yet\n";

type SeriesKey = (String, Vec<(String, String)>);

#[derive(Debug, Clone)]
enum Series {
    Counter(f64),
    Histogram(HistogramState),
}

#[derive(Debug, Clone, Default)]
struct HistogramState {
    buckets: HashMap<String, u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn observe(&mut self, value: f64, bounds: &[f64]) {
        for bound in bounds.iter().filter(|bound| value <= **bound) {
            *self.buckets.entry(format_float(*bound)).or_default() += 1;
        }
        // Bounds that exist but were not crossed still appear in the output.
        for bound in bounds.iter().filter(|bound| value > **bound) {
            self.buckets.entry(format_float(*bound)).or_default();
        }
        *self.buckets.entry(INF_BUCKET.to_string()).or_default() += 1;
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    series: BTreeMap<SeriesKey, Series>,
    help: HashMap<String, String>,
}

/// Value of one series in a [`MetricPoint`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Counter total.
    Counter(f64),
    /// Histogram state.
    Histogram {
        /// `(upper bound label, cumulative count)`, numeric bounds ascending
        /// and `+Inf` last.
        buckets: Vec<(String, u64)>,
        /// Sum of observed values.
        sum: f64,
        /// Number of observations.
        count: u64,
    },
}

/// One series in a registry snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Series name.
    pub name: String,
    /// Labels sorted by name.
    pub labels: Vec<(String, String)>,
    /// Current value.
    pub value: MetricValue,
}

/// Thread-safe registry of counters and histograms.
///
/// Cloning yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the `# HELP` text of a metric family.
    pub fn describe(&self, name: &str, help: &str) {
        self.lock().help.insert(name.to_string(), help.to_string());
    }

    /// Add `delta` to a counter, creating it at zero first if needed.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        if !(delta.is_finite() && delta >= 0.0) {
            tracing::warn!(metric = name, delta, "Ignoring counter delta that is not a finite non-negative number");
            return;
        }
        let key = series_key(name, labels);
        let mut state = self.lock();
        if kind_clash(&state, name, true) {
            tracing::warn!(metric = name, "Metric name already registered as a histogram");
            return;
        }
        match state.series.entry(key).or_insert(Series::Counter(0.0)) {
            Series::Counter(total) => *total += delta,
            Series::Histogram(_) => {}
        }
    }

    /// Record one histogram observation against the given bucket bounds.
    ///
    /// Every bucket whose upper bound is at least `value` is incremented,
    /// plus `+Inf`.
    pub fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64, buckets: &[f64]) {
        if value.is_nan() {
            tracing::warn!(metric = name, "Ignoring NaN histogram observation");
            return;
        }
        let key = series_key(name, labels);
        let mut state = self.lock();
        if kind_clash(&state, name, false) {
            tracing::warn!(metric = name, "Metric name already registered as a counter");
            return;
        }
        let bounds: Vec<f64> = buckets.iter().copied().filter(|bound| bound.is_finite()).collect();
        match state
            .series
            .entry(key)
            .or_insert_with(|| Series::Histogram(HistogramState::default()))
        {
            Series::Histogram(histogram) => histogram.observe(value, &bounds),
            Series::Counter(_) => {}
        }
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().series.is_empty()
    }

    /// Every series, sorted by name then labels.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetricPoint> {
        let state = self.lock();
        state
            .series
            .iter()
            .map(|((name, labels), series)| MetricPoint {
                name: name.clone(),
                labels: labels.clone(),
                value: match series {
                    Series::Counter(total) => MetricValue::Counter(*total),
                    Series::Histogram(histogram) => {
                        let mut buckets: Vec<(String, u64)> = histogram
                            .buckets
                            .iter()
                            .map(|(bound, count)| (bound.clone(), *count))
                            .collect();
                        buckets.sort_by(|left, right| compare_bucket_labels(&left.0, &right.0));
                        MetricValue::Histogram {
                            buckets,
                            sum: histogram.sum,
                            count: histogram.count,
                        }
                    }
                },
            })
            .collect()
    }

    /// Render the Prometheus text exposition format (version 0.0.4).
    ///
    /// Returns [`EMPTY_EXPOSITION`] when nothing has been recorded.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let points = self.snapshot();
        if points.is_empty() {
            return EMPTY_EXPOSITION.to_string();
        }
        let help = self.lock().help.clone();

        let mut out = String::new();
        let mut current_family: Option<&str> = None;
        for point in &points {
            if current_family != Some(point.name.as_str()) {
                let kind = match point.value {
                    MetricValue::Counter(_) => "counter",
                    MetricValue::Histogram { .. } => "histogram",
                };
                let text = help.get(&point.name).map_or(point.name.as_str(), String::as_str);
                let _ = writeln!(out, "# HELP {} {}", point.name, escape_help(text));
                let _ = writeln!(out, "# TYPE {} {kind}", point.name);
                current_family = Some(point.name.as_str());
            }
            write_point(&mut out, point);
        }
        out
    }
}

fn kind_clash(state: &RegistryState, name: &str, want_counter: bool) -> bool {
    // Series keys sort by name first, so the first key with this name is enough.
    state
        .series
        .range((name.to_string(), Vec::new())..)
        .next()
        .filter(|((existing, _), _)| existing == name)
        .is_some_and(|(_, series)| matches!(series, Series::Counter(_)) != want_counter)
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> SeriesKey {
    let mut sorted: Vec<(String, String)> = labels
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    sorted.sort();
    (name.to_string(), sorted)
}

fn compare_bucket_labels(left: &str, right: &str) -> Ordering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) if l.is_finite() && r.is_finite() => l.total_cmp(&r),
        (Ok(l), _) if l.is_finite() => Ordering::Less,
        (_, Ok(r)) if r.is_finite() => Ordering::Greater,
        _ => left.cmp(right),
    }
}

fn write_point(out: &mut String, point: &MetricPoint) {
    match &point.value {
        MetricValue::Counter(total) => {
            let _ = writeln!(out, "{}{} {}", point.name, render_labels(&point.labels, None), format_float(*total));
        }
        MetricValue::Histogram { buckets, sum, count } => {
            for (bound, cumulative) in buckets {
                let _ = writeln!(
                    out,
                    "{}_bucket{} {cumulative}",
                    point.name,
                    render_labels(&point.labels, Some(bound))
                );
            }
            let labels = render_labels(&point.labels, None);
            let _ = writeln!(out, "{}_sum{labels} {}", point.name, format_float(*sum));
            let _ = writeln!(out, "{}_count{labels} {count}", point.name);
        }
    }
}

fn render_labels(labels: &[(String, String)], le: Option<&str>) -> String {
    if labels.is_empty() && le.is_none() {
        return String::new();
    }
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label_value(value)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{le}\""));
    }
    format!("{{{}}}", parts.join(","))
}

/// Escape a label value: backslash, double quote and newline.
#[must_use]
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Shortest decimal that round-trips, with Prometheus spellings for infinities.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        INF_BUCKET.to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{value}")
    }
}

/// Recorder for the two samples the request pipeline emits per request.
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    registry: MetricsRegistry,
    service: String,
}

impl HttpMetrics {
    /// Bind a recorder to a registry and a service id, and describe the
    /// families.
    #[must_use]
    pub fn new(registry: MetricsRegistry, service: impl Into<String>) -> Self {
        registry.describe(HTTP_REQUESTS_TOTAL, "Total HTTP requests served");
        registry.describe(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
        Self {
            registry,
            service: service.into(),
        }
    }

    /// The underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// Record one served request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.registry.inc_counter(
            HTTP_REQUESTS_TOTAL,
            &[
                ("method", method),
                ("path", path),
                ("status", &status),
                ("service", &self.service),
            ],
            1.0,
        );
        self.registry.observe_histogram(
            HTTP_REQUEST_DURATION_SECONDS,
            &[("method", method), ("path", path), ("service", &self.service)],
            elapsed.as_secs_f64(),
            &DEFAULT_DURATION_BUCKETS,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use service_spine_testing::properties::{arb_labels, arb_observations};

    fn histogram_of(registry: &MetricsRegistry, name: &str) -> (Vec<(String, u64)>, f64, u64) {
        registry
            .snapshot()
            .into_iter()
            .find(|point| point.name == name)
            .and_then(|point| match point.value {
                MetricValue::Histogram { buckets, sum, count } => Some((buckets, sum, count)),
                MetricValue::Counter(_) => None,
            })
            .unwrap()
    }

    #[test]
    fn test_empty_registry_renders_placeholder() {
        assert_eq!(MetricsRegistry::new().render_prometheus(), "# no metrics yet\n");
    }

    #[test]
    fn test_label_order_does_not_split_series() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("c", &[("a", "1"), ("b", "2")], 1.0);
        registry.inc_counter("c", &[("b", "2"), ("a", "1")], 2.0);

        let points = registry.snapshot();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, MetricValue::Counter(3.0));
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::new();
        registry.observe_histogram("h", &[], 0.2, &[0.1, 0.5, 1.0]);

        let (buckets, sum, count) = histogram_of(&registry, "h");
        assert_eq!(
            buckets,
            vec![
                ("0.1".to_string(), 0),
                ("0.5".to_string(), 1),
                ("1".to_string(), 1),
                ("+Inf".to_string(), 1),
            ]
        );
        assert_eq!(sum, 0.2);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_buckets_sort_numerically_not_lexically() {
        let registry = MetricsRegistry::new();
        registry.observe_histogram("h", &[], 3.0, &[10.0, 2.5, 100.0]);
        let (buckets, _, _) = histogram_of(&registry, "h");
        let labels: Vec<&str> = buckets.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(labels, ["2.5", "10", "100", "+Inf"]);
    }

    #[test]
    fn test_negative_delta_is_ignored() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("c", &[], 2.0);
        registry.inc_counter("c", &[], -1.0);
        assert_eq!(registry.snapshot()[0].value, MetricValue::Counter(2.0));
    }

    #[test]
    fn test_kind_clash_is_dropped() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("x", &[("a", "1")], 1.0);
        registry.observe_histogram("x", &[("a", "2")], 1.0, &[1.0]);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_render_format() {
        let registry = MetricsRegistry::new();
        registry.describe("req_total", "Requests");
        registry.inc_counter("req_total", &[("path", "/a\"b\\c")], 1.0);
        registry.observe_histogram("lat", &[("path", "/x")], 0.25, &[0.1, 0.5]);

        let text = registry.render_prometheus();
        let expected = "\
# HELP lat lat
# TYPE lat histogram
lat_bucket{path=\"/x\",le=\"0.1\"} 0
lat_bucket{path=\"/x\",le=\"0.5\"} 1
lat_bucket{path=\"/x\",le=\"+Inf\"} 1
lat_sum{path=\"/x\"} 0.25
lat_count{path=\"/x\"} 1
# HELP req_total Requests
# TYPE req_total counter
req_total{path=\"/a\\\"b\\\\c\"} 1
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_one_help_per_family() {
        let registry = MetricsRegistry::new();
        registry.inc_counter("c", &[("n", "1")], 1.0);
        registry.inc_counter("c", &[("n", "2")], 1.0);
        let text = registry.render_prometheus();
        assert_eq!(text.matches("# HELP c ").count(), 1);
        assert_eq!(text.matches("# TYPE c counter").count(), 1);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(2.5e-7), "0.00000025");
        assert_eq!(format_float(f64::INFINITY), "+Inf");
    }

    #[test]
    fn test_http_metrics_record_both_samples() {
        let metrics = HttpMetrics::new(MetricsRegistry::new(), "cache");
        metrics.record_request("GET", "/healthz", 200, Duration::from_millis(3));

        let text = metrics.registry().render_prometheus();
        assert!(text.contains(
            r#"http_requests_total{method="GET",path="/healthz",service="cache",status="200"} 1"#
        ));
        assert!(text.contains(
            r#"http_request_duration_seconds_bucket{method="GET",path="/healthz",service="cache",le="0.1"} 1"#
        ));
    }

    proptest! {
        #[test]
        fn prop_histogram_is_additive(observations in arb_observations(), labels in arb_labels()) {
            let registry = MetricsRegistry::new();
            let labels: Vec<(&str, &str)> = labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            for value in &observations {
                registry.observe_histogram("h", &labels, *value, &DEFAULT_DURATION_BUCKETS);
            }
            if observations.is_empty() {
                prop_assert!(registry.is_empty());
            } else {
                let (buckets, sum, count) = histogram_of(&registry, "h");
                prop_assert_eq!(count, observations.len() as u64);
                let expected: f64 = observations.iter().sum();
                prop_assert!((sum - expected).abs() < 1e-9 * expected.max(1.0));
                let inf = buckets.last().map(|(_, n)| *n).unwrap();
                prop_assert_eq!(inf, count);
                for window in buckets.windows(2) {
                    prop_assert!(window[0].1 <= window[1].1);
                }
            }
        }

        #[test]
        fn prop_counter_is_monotonic(deltas in prop::collection::vec(0.0f64..100.0, 1..32)) {
            let registry = MetricsRegistry::new();
            let mut previous = 0.0;
            for delta in deltas {
                registry.inc_counter("c", &[], delta);
                let MetricValue::Counter(total) = registry.snapshot()[0].value else {
                    unreachable!("c is a counter");
                };
                prop_assert!(total >= previous);
                previous = total;
            }
        }
    }
}
