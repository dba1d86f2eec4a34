use crate::proto;
use serde::{Deserialize, Serialize};

/// Kind of a sampled value. Gauges carry a `value`, counters carry a `delta`.
///
/// # Examples
///
/// ```
/// use telemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(MetricError::UnknownKind(s.to_string())),
        }
    }
}

/// Reasons a metric is refused before transmission or storage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("metric name is empty")]
    EmptyName,

    #[error("metric '{0}' carries neither value nor delta")]
    Empty(String),

    #[error("metric '{0}' carries both value and delta")]
    Ambiguous(String),

    #[error("metric '{name}' of kind {kind} carries the wrong field")]
    KindMismatch { name: String, kind: MetricKind },

    #[error("unknown metric kind: {0}")]
    UnknownKind(String),
}

/// A single sampled value.
///
/// Exactly one of `value` / `delta` is set, selected by `kind`. The JSON form
/// omits the unset field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    pub fn key(&self) -> MetricKey {
        MetricKey {
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    /// Checks the value/delta exclusivity rule.
    ///
    /// # Errors
    ///
    /// Returns the first [`MetricError`] that applies.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.name.is_empty() {
            return Err(MetricError::EmptyName);
        }
        match (self.kind, self.delta, self.value) {
            (_, None, None) => Err(MetricError::Empty(self.name.clone())),
            (_, Some(_), Some(_)) => Err(MetricError::Ambiguous(self.name.clone())),
            (MetricKind::Gauge, None, Some(_)) | (MetricKind::Counter, Some(_), None) => Ok(()),
            (kind, _, _) => Err(MetricError::KindMismatch {
                name: self.name.clone(),
                kind,
            }),
        }
    }
}

/// Lookup key for a stored metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// One sampling cycle's worth of metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub metrics: Vec<Metric>,
}

impl Batch {
    /// Builds a batch from raw samples, dropping every entry that fails
    /// [`Metric::validate`].
    pub fn sanitize(metrics: Vec<Metric>) -> Self {
        let metrics = metrics
            .into_iter()
            .filter(|m| match m.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping invalid metric");
                    false
                }
            })
            .collect();
        Self { metrics }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl From<&Metric> for proto::Metric {
    fn from(m: &Metric) -> Self {
        let kind = match m.kind {
            MetricKind::Gauge => proto::MetricType::Gauge,
            MetricKind::Counter => proto::MetricType::Counter,
        };
        proto::Metric {
            name: m.name.clone(),
            r#type: kind as i32,
            delta: m.delta.unwrap_or_default(),
            value: m.value.unwrap_or_default(),
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = MetricError;

    fn try_from(p: proto::Metric) -> Result<Self, Self::Error> {
        let metric = match proto::MetricType::try_from(p.r#type) {
            Ok(proto::MetricType::Gauge) => Metric::gauge(p.name, p.value),
            Ok(proto::MetricType::Counter) => Metric::counter(p.name, p.delta),
            Err(_) => return Err(MetricError::UnknownKind(p.r#type.to_string())),
        };
        metric.validate()?;
        Ok(metric)
    }
}

impl From<&Batch> for proto::MetricList {
    fn from(batch: &Batch) -> Self {
        proto::MetricList {
            metrics: batch.metrics.iter().map(proto::Metric::from).collect(),
        }
    }
}
