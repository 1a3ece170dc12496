use std::{borrow::Cow, sync::Arc};

/// Metric type.
///
/// This is the field-less tag of a [`MetricValue`], and determines the type marker written into the payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricType {
    /// A gauge (`g`).
    Gauge,

    /// A counter (`c`).
    Count,

    /// A single-value histogram (`h`).
    Histogram,

    /// A pre-aggregated, multi-value histogram (`h`).
    HistogramAggregated,

    /// A single-value distribution (`d`).
    Distribution,

    /// A pre-aggregated, multi-value distribution (`d`).
    DistributionAggregated,

    /// A set (`s`).
    Set,

    /// A timing, in milliseconds (`ms`).
    Timing,
}

impl MetricType {
    pub(crate) fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Gauge => b"|g",
            MetricType::Count => b"|c",
            MetricType::Histogram | MetricType::HistogramAggregated => b"|h",
            MetricType::Distribution | MetricType::DistributionAggregated => b"|d",
            MetricType::Set => b"|s",
            MetricType::Timing => b"|ms",
        }
    }

    /// Returns `true` if this metric type carries multiple values.
    pub const fn is_aggregated(self) -> bool {
        matches!(self, MetricType::HistogramAggregated | MetricType::DistributionAggregated)
    }
}

/// Pre-aggregated values for a histogram or distribution.
///
/// Tags for aggregated metrics are flattened upstream, at the point where the values were aggregated, so they are
/// carried here as a single pre-joined string (e.g. `tag1,tag2`) rather than as a list.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedValues {
    values: Vec<f64>,
    tags: String,
}

impl AggregatedValues {
    /// Creates a new `AggregatedValues` from the given values and pre-joined tag string.
    pub fn new<T>(values: Vec<f64>, tags: T) -> Self
    where
        T: Into<String>,
    {
        Self { values, tags: tags.into() }
    }

    /// Returns the values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns the pre-joined tag string.
    pub fn tags(&self) -> &str {
        &self.tags
    }
}

/// Metric value.
///
/// Each metric type carries exactly one kind of payload.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue<'a> {
    /// A gauge value.
    Gauge(f64),

    /// A counter delta.
    Count(i64),

    /// A single histogram sample.
    Histogram(f64),

    /// A single distribution sample.
    Distribution(f64),

    /// A set member, written verbatim.
    Set(Cow<'a, str>),

    /// A timing, in milliseconds.
    Timing(f64),

    /// Multiple histogram samples.
    HistogramAggregated(AggregatedValues),

    /// Multiple distribution samples.
    DistributionAggregated(AggregatedValues),
}

impl MetricValue<'_> {
    /// Returns the metric type of this value.
    pub const fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Count(_) => MetricType::Count,
            MetricValue::Histogram(_) => MetricType::Histogram,
            MetricValue::Distribution(_) => MetricType::Distribution,
            MetricValue::Set(_) => MetricType::Set,
            MetricValue::Timing(_) => MetricType::Timing,
            MetricValue::HistogramAggregated(_) => MetricType::HistogramAggregated,
            MetricValue::DistributionAggregated(_) => MetricType::DistributionAggregated,
        }
    }

    /// Returns the number of points carried by this value.
    pub fn len(&self) -> usize {
        match self {
            MetricValue::HistogramAggregated(agg) | MetricValue::DistributionAggregated(agg) => agg.values.len(),
            _ => 1,
        }
    }

    /// Returns `true` if this value carries no points.
    ///
    /// Only aggregated values can be empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug)]
enum Tags<'a> {
    Borrowed(&'a [&'a str]),
    Owned(Vec<String>),
}

/// A single metric submission.
///
/// The name, tags and set value can be borrowed from the caller, so that submitting a metric does not allocate. The
/// namespace and global tags are shared, reference-counted values, so that a client can stamp them onto every
/// submission without allocating either.
#[derive(Clone, Debug)]
pub struct Metric<'a> {
    namespace: Option<Arc<str>>,
    global_tags: Option<Arc<[String]>>,
    name: Cow<'a, str>,
    value: MetricValue<'a>,
    tags: Tags<'a>,
    rate: f64,
}

impl<'a> Metric<'a> {
    /// Creates a new `Metric` with the given name and value.
    ///
    /// The metric starts with no namespace, no tags, and a sample rate of 1.0.
    pub fn new<N>(name: N, value: MetricValue<'a>) -> Self
    where
        N: Into<Cow<'a, str>>,
    {
        Self {
            namespace: None,
            global_tags: None,
            name: name.into(),
            value,
            tags: Tags::Borrowed(&[]),
            rate: 1.0,
        }
    }

    /// Creates a gauge.
    pub fn gauge<N: Into<Cow<'a, str>>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Gauge(value))
    }

    /// Creates a counter.
    pub fn count<N: Into<Cow<'a, str>>>(name: N, value: i64) -> Self {
        Self::new(name, MetricValue::Count(value))
    }

    /// Creates a histogram.
    pub fn histogram<N: Into<Cow<'a, str>>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Histogram(value))
    }

    /// Creates a distribution.
    pub fn distribution<N: Into<Cow<'a, str>>>(name: N, value: f64) -> Self {
        Self::new(name, MetricValue::Distribution(value))
    }

    /// Creates a set.
    pub fn set<N: Into<Cow<'a, str>>, V: Into<Cow<'a, str>>>(name: N, value: V) -> Self {
        Self::new(name, MetricValue::Set(value.into()))
    }

    /// Creates a timing, in milliseconds.
    pub fn timing<N: Into<Cow<'a, str>>>(name: N, millis: f64) -> Self {
        Self::new(name, MetricValue::Timing(millis))
    }

    /// Creates a pre-aggregated histogram with a pre-joined tag string.
    pub fn histogram_aggregated<N, T>(name: N, values: Vec<f64>, tags: T) -> Self
    where
        N: Into<Cow<'a, str>>,
        T: Into<String>,
    {
        Self::new(name, MetricValue::HistogramAggregated(AggregatedValues::new(values, tags)))
    }

    /// Creates a pre-aggregated distribution with a pre-joined tag string.
    pub fn distribution_aggregated<N, T>(name: N, values: Vec<f64>, tags: T) -> Self
    where
        N: Into<Cow<'a, str>>,
        T: Into<String>,
    {
        Self::new(name, MetricValue::DistributionAggregated(AggregatedValues::new(values, tags)))
    }

    /// Sets the namespace, which is prepended verbatim to the metric name.
    #[must_use]
    pub fn with_namespace<S>(mut self, namespace: S) -> Self
    where
        S: Into<Arc<str>>,
    {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the global tags, which are written ahead of the per-metric tags.
    #[must_use]
    pub fn with_global_tags<T>(mut self, global_tags: T) -> Self
    where
        T: Into<Arc<[String]>>,
    {
        self.global_tags = Some(global_tags.into());
        self
    }

    /// Sets the per-metric tags, taking ownership of them.
    ///
    /// Aggregated metrics ignore these, and use their pre-joined tag string instead.
    #[must_use]
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = Tags::Owned(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the per-metric tags, borrowing them from the caller.
    ///
    /// Aggregated metrics ignore these, and use their pre-joined tag string instead.
    #[must_use]
    pub fn with_borrowed_tags(mut self, tags: &'a [&'a str]) -> Self {
        self.tags = Tags::Borrowed(tags);
        self
    }

    /// Sets the sample rate.
    ///
    /// Rates at or above 1.0 are always emitted, and rates at or below 0.0 are never emitted.
    #[must_use]
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    /// Returns the global tags.
    pub fn global_tags(&self) -> &[String] {
        self.global_tags.as_deref().unwrap_or_default()
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value.
    pub fn value(&self) -> &MetricValue<'a> {
        &self.value
    }

    /// Returns the metric type.
    pub fn metric_type(&self) -> MetricType {
        self.value.metric_type()
    }

    /// Returns the per-metric tags.
    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        let (borrowed, owned): (&[&str], &[String]) = match &self.tags {
            Tags::Borrowed(tags) => (*tags, &[]),
            Tags::Owned(tags) => (&[], tags.as_slice()),
        };

        borrowed.iter().copied().chain(owned.iter().map(String::as_str))
    }

    /// Returns the sample rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub(crate) fn has_namespace(&self) -> bool {
        !self.namespace().is_empty()
    }

    pub(crate) fn has_global_tags(&self) -> bool {
        !self.global_tags().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::{Metric, MetricType, MetricValue};

    #[test]
    fn metric_type_markers() {
        let cases = [
            (Metric::gauge("a", 1.0), &b"|g"[..]),
            (Metric::count("a", 1), &b"|c"[..]),
            (Metric::histogram("a", 1.0), &b"|h"[..]),
            (Metric::histogram_aggregated("a", vec![1.0], ""), &b"|h"[..]),
            (Metric::distribution("a", 1.0), &b"|d"[..]),
            (Metric::distribution_aggregated("a", vec![1.0], ""), &b"|d"[..]),
            (Metric::set("a", "b"), &b"|s"[..]),
            (Metric::timing("a", 1.0), &b"|ms"[..]),
        ];

        for (metric, expected) in cases {
            assert_eq!(metric.metric_type().as_bytes(), expected);
        }
    }

    #[test]
    fn aggregated_len() {
        let metric = Metric::distribution_aggregated("a", vec![1.0, 2.0, 3.0], "foo:bar");
        assert!(metric.metric_type().is_aggregated());
        assert_eq!(metric.value().len(), 3);

        let metric = Metric::histogram_aggregated("a", Vec::new(), "");
        assert!(metric.value().is_empty());

        assert_eq!(MetricValue::Count(5).len(), 1);
        assert!(!MetricType::Timing.is_aggregated());
    }

    #[test]
    fn builder_methods() {
        let metric = Metric::gauge("test_gauge", 21.0)
            .with_namespace("namespace.")
            .with_global_tags(vec!["globalTags".to_string()])
            .with_tags(["tag1", "tag2"])
            .with_rate(0.5);

        assert_eq!(metric.namespace(), "namespace.");
        assert_eq!(metric.global_tags(), ["globalTags".to_string()]);
        assert_eq!(metric.tags().collect::<Vec<_>>(), ["tag1", "tag2"]);
        assert_eq!(metric.rate(), 0.5);
        assert!(metric.has_namespace());
        assert!(metric.has_global_tags());
    }

    #[test]
    fn borrowed_parts() {
        let name = String::from("requests");
        let tags = ["route:/", "method:get"];

        let metric = Metric::count(name.as_str(), 1).with_borrowed_tags(&tags);
        assert!(matches!(metric.name, Cow::Borrowed(_)));
        assert_eq!(metric.tags().collect::<Vec<_>>(), tags);
        assert!(!metric.has_namespace());
        assert!(!metric.has_global_tags());
        assert_eq!(metric.namespace(), "");

        let member = String::from("alice");
        let metric = Metric::set("users", member.as_str());
        assert_eq!(metric.value(), &MetricValue::Set(Cow::Borrowed("alice")));

        // An explicitly empty namespace is still treated as missing.
        assert!(!Metric::count("a", 1).with_namespace("").has_namespace());
    }
}
