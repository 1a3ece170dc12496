use std::io::Write as _;

use thiserror::Error;

use crate::{
    metric::{Metric, MetricValue},
    pool::StatsdBuffer,
};

/// Errors that could occur while encoding a metric.
///
/// These are only raised for malformed metrics, and are always detected before anything is written.
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    /// The metric name was empty.
    #[error("metric name cannot be empty")]
    EmptyName,

    /// An aggregated metric had no values.
    #[error("aggregated metric '{name}' has no values")]
    EmptyValues {
        /// Name of the metric.
        name: String,
    },

    /// A value was NaN or infinite, which DogStatsD cannot represent.
    #[error("metric '{name}' has a non-finite value")]
    NonFiniteValue {
        /// Name of the metric.
        name: String,
    },
}

/// Outcome of writing (part of) a metric line into a buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WriteOutcome {
    /// All remaining points were written.
    Complete,

    /// Some, but not all, remaining points were written. The line was terminated and the buffer must be flushed before
    /// continuing with the rest.
    Partial(usize),

    /// No points could be written into the buffer.
    BufferFull,
}

/// A single renderable point.
#[derive(Clone, Copy)]
pub(crate) enum Point<'a> {
    Integer(i64),
    FloatingPoint(f64),
    Fixed(f64),
    Verbatim(&'a str),
}

/// The points of a metric, addressable by index.
#[derive(Clone, Copy)]
pub(crate) enum Points<'a> {
    Single(Point<'a>),
    Many(&'a [f64]),
}

impl<'a> Points<'a> {
    pub fn from_value(value: &'a MetricValue<'_>) -> Self {
        match value {
            MetricValue::Gauge(v) | MetricValue::Histogram(v) | MetricValue::Distribution(v) => {
                Points::Single(Point::FloatingPoint(*v))
            }
            MetricValue::Count(v) => Points::Single(Point::Integer(*v)),
            MetricValue::Set(v) => Points::Single(Point::Verbatim(v.as_ref())),
            MetricValue::Timing(v) => Points::Single(Point::Fixed(*v)),
            MetricValue::HistogramAggregated(agg) | MetricValue::DistributionAggregated(agg) => {
                Points::Many(agg.values())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Points::Single(_) => 1,
            Points::Many(values) => values.len(),
        }
    }

    fn get(&self, idx: usize) -> Point<'a> {
        match self {
            Points::Single(point) => *point,
            Points::Many(values) => Point::FloatingPoint(values[idx]),
        }
    }
}

struct PointFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl PointFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn write(&mut self, buf: &mut Vec<u8>, point: Point<'_>) {
        match point {
            Point::Integer(v) => buf.extend_from_slice(self.int_writer.format(v).as_bytes()),
            Point::FloatingPoint(v) => write_float(buf, &mut self.float_writer, v),
            // Writing into a `Vec<u8>` cannot fail.
            Point::Fixed(v) => {
                let _ = write!(buf, "{v:.6}");
            }
            Point::Verbatim(v) => write_text(buf, v),
        }
    }
}

/// Writes a float in its shortest round-trip decimal form, without an exponent or a trailing `.0`.
fn write_float(buf: &mut Vec<u8>, float_writer: &mut ryu::Buffer, value: f64) {
    let formatted = float_writer.format(value);
    if formatted.contains('e') {
        // `Display` never uses scientific notation, and is only needed for very large or very small values.
        let _ = write!(buf, "{value}");
    } else {
        buf.extend_from_slice(formatted.strip_suffix(".0").unwrap_or(formatted).as_bytes());
    }
}

fn write_text(buf: &mut Vec<u8>, text: &str) {
    // A newline would terminate the metric early, so strip them.
    buf.extend(text.bytes().filter(|b| *b != b'\n'));
}

/// Renders metrics into the DogStatsD wire format.
///
/// Every metric line is built from three parts: a header (`<namespace><name>`), the values (`:<v1>:<v2>...`), and a
/// trailer (`|<type>[|@<rate>][|#<tags>]\n`). The header and trailer are rendered once per metric, which lets a
/// multi-value metric be split across several buffers by repeating them around each chunk of values.
///
/// Values are atomic with respect to buffer boundaries: a value is either written in full, or not at all.
pub(crate) struct LineEncoder {
    header_buf: Vec<u8>,
    values_buf: Vec<u8>,
    trailer_buf: Vec<u8>,
    formatter: PointFormatter,
}

impl LineEncoder {
    pub fn new() -> Self {
        Self {
            header_buf: Vec::new(),
            values_buf: Vec::new(),
            trailer_buf: Vec::new(),
            formatter: PointFormatter::new(),
        }
    }

    /// Validates the metric, and renders its header and trailer.
    ///
    /// This must be called before writing any of the metric's points.
    ///
    /// # Errors
    ///
    /// If the metric is malformed, an error is returned and nothing is rendered.
    pub fn prepare(&mut self, metric: &Metric<'_>) -> Result<(), EncodeError> {
        validate(metric)?;

        self.header_buf.clear();
        write_text(&mut self.header_buf, metric.namespace());
        write_text(&mut self.header_buf, metric.name());

        self.trailer_buf.clear();
        self.trailer_buf.extend_from_slice(metric.metric_type().as_bytes());

        // Write the sample rate if it's below 1.0, as that is the implied default.
        if metric.rate() < 1.0 {
            self.trailer_buf.extend_from_slice(b"|@");
            write_float(&mut self.trailer_buf, &mut self.formatter.float_writer, metric.rate());
        }

        // Global tags come first, then either the per-metric tags or, for aggregated metrics, the pre-joined tags.
        let aggregated_tags = match metric.value() {
            MetricValue::HistogramAggregated(agg) | MetricValue::DistributionAggregated(agg) => Some(agg.tags()),
            _ => None,
        };
        let tags = metric.tags().filter(|_| aggregated_tags.is_none());
        let joined_tags = aggregated_tags.filter(|t| !t.is_empty());

        let mut wrote_tag = false;
        for tag in metric.global_tags().iter().map(String::as_str).chain(tags).chain(joined_tags) {
            // If we haven't written a tag yet, write out the tags prefix first.
            //
            // Otherwise, write a tag separator.
            if wrote_tag {
                self.trailer_buf.push(b',');
            } else {
                self.trailer_buf.extend_from_slice(b"|#");
                wrote_tag = true;
            }

            write_text(&mut self.trailer_buf, tag);
        }

        self.trailer_buf.push(b'\n');

        Ok(())
    }

    /// Writes as many points as possible, starting at `start`, into the buffer as a single line.
    ///
    /// Points are added greedily until the next one would not fit in the buffer's remaining capacity. Whatever fits is
    /// written as a complete, newline-terminated line.
    pub fn write_points(&mut self, buffer: &mut StatsdBuffer, points: Points<'_>, start: usize) -> WriteOutcome {
        if !buffer.has_element_room() {
            return WriteOutcome::BufferFull;
        }

        let fixed_len = self.header_buf.len() + self.trailer_buf.len();

        self.values_buf.clear();
        let mut written = 0;
        for idx in start..points.len() {
            let previous_len = self.values_buf.len();

            self.values_buf.push(b':');
            self.formatter.write(&mut self.values_buf, points.get(idx));

            if !buffer.fits(fixed_len + self.values_buf.len()) {
                self.values_buf.truncate(previous_len);
                break;
            }

            written += 1;
        }

        if written == 0 {
            return WriteOutcome::BufferFull;
        }

        buffer.write_line(&[&self.header_buf, &self.values_buf, &self.trailer_buf]);

        if start + written == points.len() {
            WriteOutcome::Complete
        } else {
            WriteOutcome::Partial(written)
        }
    }

    /// Renders a line holding only the point at `idx`, regardless of any buffer capacity.
    pub fn render_single(&mut self, points: Points<'_>, idx: usize) -> Vec<u8> {
        self.values_buf.clear();
        self.values_buf.push(b':');
        self.formatter.write(&mut self.values_buf, points.get(idx));

        let mut line = Vec::with_capacity(self.header_buf.len() + self.values_buf.len() + self.trailer_buf.len());
        line.extend_from_slice(&self.header_buf);
        line.extend_from_slice(&self.values_buf);
        line.extend_from_slice(&self.trailer_buf);
        line
    }
}

fn validate(metric: &Metric<'_>) -> Result<(), EncodeError> {
    // Newlines are stripped when rendering, so a name made only of them is empty on the wire.
    if metric.name().bytes().all(|b| b == b'\n') {
        return Err(EncodeError::EmptyName);
    }

    let non_finite = || EncodeError::NonFiniteValue { name: metric.name().to_string() };
    match metric.value() {
        MetricValue::Gauge(v) | MetricValue::Histogram(v) | MetricValue::Distribution(v) | MetricValue::Timing(v) => {
            if !v.is_finite() {
                return Err(non_finite());
            }
        }
        MetricValue::HistogramAggregated(agg) | MetricValue::DistributionAggregated(agg) => {
            if agg.values().is_empty() {
                return Err(EncodeError::EmptyValues { name: metric.name().to_string() });
            }
            if agg.values().iter().any(|v| !v.is_finite()) {
                return Err(non_finite());
            }
        }
        MetricValue::Count(_) | MetricValue::Set(_) => {}
    }

    Ok(())
}
