//! Data models for the metrics dashboard.
//!
//! A `Metric` pairs a `Project` with a `Unit` and accepts observations of a
//! single declared kind. Observations carry an explicit time window; ratio
//! observations reference two stored count observations.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Unit categories, stored as integer codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Web,
    Api,
    Content,
    Other,
}

impl Category {
    pub fn code(self) -> i64 {
        match self {
            Self::Web => 1,
            Self::Api => 2,
            Self::Content => 3,
            Self::Other => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Web),
            2 => Some(Self::Api),
            3 => Some(Self::Content),
            4 => Some(Self::Other),
            _ => None,
        }
    }
}

/// Reporting periods, stored as integer codes. Date-range reconstruction is
/// only defined for `Daily` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Other,
}

impl Period {
    pub fn code(self) -> i64 {
        match self {
            Self::Hourly => 1,
            Self::Daily => 2,
            Self::Weekly => 3,
            Self::Monthly => 4,
            Self::Yearly => 5,
            Self::Other => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Hourly),
            2 => Some(Self::Daily),
            3 => Some(Self::Weekly),
            4 => Some(Self::Monthly),
            5 => Some(Self::Yearly),
            6 => Some(Self::Other),
            _ => None,
        }
    }
}

/// A named, categorized measurement type with a reporting period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub category: Category,
    pub period: Period,
}

/// A tracked project exposing a generated opaque API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub api_key: String,
}

/// A free-text note on a project's timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub project_id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
}

/// The observation variant a metric accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Count,
    List,
    Ratio,
}

impl ObservationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::List => "list",
            Self::Ratio => "ratio",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "count" => Some(Self::Count),
            "list" => Some(Self::List),
            "ratio" => Some(Self::Ratio),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (Project, Unit) pairing with a chosen observation variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub project_id: i64,
    pub unit_id: i64,
    pub kind: ObservationKind,
    pub is_cumulative: bool,
}

/// Payload of an observation, tagged by variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ObservationValue {
    /// Integer count, nullable
    Count(Option<i64>),
    /// Arbitrary JSON list payload
    List(serde_json::Value),
    /// References two stored count observations
    Ratio {
        antecedent_id: i64,
        consequent_id: i64,
    },
}

impl ObservationValue {
    pub fn kind(&self) -> ObservationKind {
        match self {
            Self::Count(_) => ObservationKind::Count,
            Self::List(_) => ObservationKind::List,
            Self::Ratio { .. } => ObservationKind::Ratio,
        }
    }
}

/// A single time-windowed measurement instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub metric_id: i64,
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
    pub value: ObservationValue,
}

/// Compute the ratio of two count values. Undefined (None) when either side
/// is missing or the consequent is zero.
pub fn ratio(antecedent: Option<i64>, consequent: Option<i64>) -> Option<f64> {
    match (antecedent, consequent) {
        (Some(a), Some(c)) if c != 0 => Some(a as f64 / c as f64),
        _ => None,
    }
}

/// Pair every calendar day in the inclusive [start, end] range with the
/// observation whose from_datetime falls on that day, or None for gap days.
///
/// Observations are keyed by the date portion of their from_datetime; when
/// two share a day the later-listed one wins. Returns an empty vector for an
/// inverted range.
pub fn build_date_range(
    start: NaiveDate,
    end: NaiveDate,
    observations: Vec<Observation>,
) -> Vec<(NaiveDate, Option<Observation>)> {
    if start > end {
        return Vec::new();
    }

    let mut by_day: HashMap<NaiveDate, Observation> = observations
        .into_iter()
        .map(|ob| (ob.from_datetime.date_naive(), ob))
        .collect();

    let mut days = Vec::new();
    let mut day = start;
    loop {
        days.push((day, by_day.remove(&day)));
        if day >= end {
            break;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}
