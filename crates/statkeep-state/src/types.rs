//! Domain types for metrics.
//!
//! `Sample` is the JSON shape exchanged between agents and the collector,
//! `Update` is its validated form, and `Snapshot` is the full store
//! contents (also the on-disk snapshot format).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

// ── Kind ───────────────────────────────────────────────────────────

/// The two supported metric types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum MetricKind {
    /// Point-in-time measurement, last write wins.
    Gauge,
    /// Accumulated count, each report adds to the stored value.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = StateError;

    /// Case-insensitive: `"Gauge"`, `"GAUGE"` and `"gauge"` are the same kind.
    fn from_str(s: &str) -> StateResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(StateError::UnsupportedType(s.to_string())),
        }
    }
}

impl TryFrom<String> for MetricKind {
    type Error = StateError;

    fn try_from(s: String) -> StateResult<Self> {
        s.parse()
    }
}

// ── Values ─────────────────────────────────────────────────────────

/// A stored value of either kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

// ── Sample ─────────────────────────────────────────────────────────

/// One reported metric as it travels over the wire.
///
/// Exactly one of `value` (gauges) or `delta` (counters) is meaningful;
/// `signature` carries the hex HMAC when the sender holds a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, rename = "hash", skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Sample {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
            signature: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
            signature: None,
        }
    }

    /// Build the sample that reports a stored value.
    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        match value {
            MetricValue::Gauge(v) => Self::gauge(id, v),
            MetricValue::Counter(d) => Self::counter(id, d),
        }
    }
}

// ── Update ─────────────────────────────────────────────────────────

/// A validated change to apply to a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Overwrite the gauge with `value`.
    Gauge { name: String, value: f64 },
    /// Add `delta` to the counter (absent counts as zero).
    Counter { name: String, delta: i64 },
}

impl Update {
    /// Parse a raw string value according to `kind`.
    ///
    /// Gauges accept any finite `f64`, counters any `i64` in decimal.
    pub fn parse(kind: MetricKind, name: &str, raw: &str) -> StateResult<Self> {
        let malformed = |reason: String| StateError::MalformedValue {
            kind,
            name: name.to_string(),
            reason,
        };
        match kind {
            MetricKind::Gauge => {
                let value: f64 = raw.trim().parse().map_err(|e| malformed(format!("{e}")))?;
                if !value.is_finite() {
                    return Err(malformed(format!("non-finite value {raw:?}")));
                }
                Ok(Update::Gauge {
                    name: name.to_string(),
                    value,
                })
            }
            MetricKind::Counter => {
                let delta: i64 = raw.trim().parse().map_err(|e| malformed(format!("{e}")))?;
                Ok(Update::Counter {
                    name: name.to_string(),
                    delta,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Update::Gauge { name, .. } | Update::Counter { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Update::Gauge { .. } => MetricKind::Gauge,
            Update::Counter { .. } => MetricKind::Counter,
        }
    }
}

impl TryFrom<&Sample> for Update {
    type Error = StateError;

    fn try_from(sample: &Sample) -> StateResult<Self> {
        let missing = |field: &str| StateError::MalformedValue {
            kind: sample.kind,
            name: sample.id.clone(),
            reason: format!("missing {field}"),
        };
        match sample.kind {
            MetricKind::Gauge => {
                let value = sample.value.ok_or_else(|| missing("value"))?;
                if !value.is_finite() {
                    return Err(StateError::MalformedValue {
                        kind: sample.kind,
                        name: sample.id.clone(),
                        reason: "non-finite value".to_string(),
                    });
                }
                Ok(Update::Gauge {
                    name: sample.id.clone(),
                    value,
                })
            }
            MetricKind::Counter => Ok(Update::Counter {
                name: sample.id.clone(),
                delta: sample.delta.ok_or_else(|| missing("delta"))?,
            }),
        }
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Complete contents of a store: both maps, sorted by name.
///
/// The aliases accept snapshot files written with capitalised keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default, alias = "Gauges")]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default, alias = "Counters")]
    pub counters: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Total number of metrics across both maps.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// Merge one update and return the value stored afterwards.
    ///
    /// Gauges overwrite; counters add with wrapping `i64` arithmetic,
    /// starting from zero when absent.
    pub fn apply(&mut self, update: &Update) -> MetricValue {
        match update {
            Update::Gauge { name, value } => {
                self.gauges.insert(name.clone(), *value);
                MetricValue::Gauge(*value)
            }
            Update::Counter { name, delta } => {
                let slot = self.counters.entry(name.clone()).or_insert(0);
                *slot = slot.wrapping_add(*delta);
                MetricValue::Counter(*slot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert_eq!("Counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
        assert_eq!("GAUGE".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = "histogram".parse::<MetricKind>().unwrap_err();
        assert_eq!(err, StateError::UnsupportedType("histogram".to_string()));
    }

    #[test]
    fn parse_gauge_and_counter() {
        assert_eq!(
            Update::parse(MetricKind::Gauge, "Alloc", "65.34").unwrap(),
            Update::Gauge {
                name: "Alloc".to_string(),
                value: 65.34
            }
        );
        assert_eq!(
            Update::parse(MetricKind::Counter, "PollCount", "62").unwrap(),
            Update::Counter {
                name: "PollCount".to_string(),
                delta: 62
            }
        );
    }

    #[test]
    fn parse_rejects_malformed_values() {
        for (kind, raw) in [
            (MetricKind::Gauge, "65 + 23i"),
            (MetricKind::Gauge, "abc"),
            (MetricKind::Gauge, "NaN"),
            (MetricKind::Counter, "63.243"),
            (MetricKind::Counter, ""),
        ] {
            let err = Update::parse(kind, "X", raw).unwrap_err();
            assert!(
                matches!(err, StateError::MalformedValue { .. }),
                "{kind} {raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn sample_json_shape() {
        let json = r#"{"id":"Alloc","type":"gauge","value":1.5,"hash":"ab"}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.kind, MetricKind::Gauge);
        assert_eq!(sample.value, Some(1.5));
        assert_eq!(sample.signature.as_deref(), Some("ab"));

        let out = serde_json::to_string(&Sample::counter("PollCount", 3)).unwrap();
        assert_eq!(out, r#"{"id":"PollCount","type":"counter","delta":3}"#);
    }

    #[test]
    fn sample_kind_is_case_insensitive_on_the_wire() {
        let sample: Sample =
            serde_json::from_str(r#"{"id":"PollCount","type":"Counter","delta":1}"#).unwrap();
        assert_eq!(sample.kind, MetricKind::Counter);
    }

    #[test]
    fn sample_missing_field_is_malformed() {
        let sample = Sample {
            id: "Alloc".to_string(),
            kind: MetricKind::Gauge,
            delta: Some(1),
            value: None,
            signature: None,
        };
        assert!(matches!(
            Update::try_from(&sample),
            Err(StateError::MalformedValue { .. })
        ));
    }

    #[test]
    fn snapshot_reads_capitalised_keys() {
        let snap: Snapshot =
            serde_json::from_str(r#"{"Gauges":{"Alloc":53.23},"Counters":{"PollCount":10}}"#)
                .unwrap();
        assert_eq!(snap.gauges["Alloc"], 53.23);
        assert_eq!(snap.counters["PollCount"], 10);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn apply_overwrites_gauges_and_adds_counters() {
        let mut snap = Snapshot::default();
        let gauge = |value| Update::Gauge {
            name: "Alloc".to_string(),
            value,
        };
        let counter = |delta| Update::Counter {
            name: "PollCount".to_string(),
            delta,
        };

        assert_eq!(snap.apply(&gauge(100.0)), MetricValue::Gauge(100.0));
        assert_eq!(snap.apply(&gauge(250.5)), MetricValue::Gauge(250.5));
        assert_eq!(snap.apply(&counter(5)), MetricValue::Counter(5));
        assert_eq!(snap.apply(&counter(2)), MetricValue::Counter(7));
        assert_eq!(snap.gauges["Alloc"], 250.5);
    }

    #[test]
    fn apply_wraps_counter_overflow() {
        let mut snap = Snapshot::default();
        snap.counters.insert("c".to_string(), i64::MAX);
        let merged = snap.apply(&Update::Counter {
            name: "c".to_string(),
            delta: 1,
        });
        assert_eq!(merged, MetricValue::Counter(i64::MIN));
    }

    #[test]
    fn kinds_order_gauge_before_counter() {
        assert!(MetricKind::Gauge < MetricKind::Counter);
    }

    #[test]
    fn value_display() {
        assert_eq!(MetricValue::Gauge(250.5).to_string(), "250.5");
        assert_eq!(MetricValue::Counter(-3).to_string(), "-3");
    }
}
