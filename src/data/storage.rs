//! SQLite storage layer for the dashboard database.
//!
//! Schema (see schema.sql):
//! - `units`, `projects`, `annotations`, `metrics` — the core entities
//! - `observations` — one table for all three variants, tagged by `kind`
//! - three list + membership table pairs for dashboard groupings
//!
//! Timestamps are stored as RFC 3339 text in UTC.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    build_date_range, ratio, Annotation, Category, Metric, Observation, ObservationKind,
    ObservationValue, Period, Project, Unit,
};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors surfaced by the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot iterate over dates for a non-daily metric")]
    NonDailyMetric,
    #[error("metric accepts {expected} observations, got {got}")]
    KindMismatch {
        expected: ObservationKind,
        got: ObservationKind,
    },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parse a stored RFC 3339 timestamp back into a DateTime<Utc>
fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::InvalidTimestamp(format!("{raw:?}: {err}")))
}

/// Storage interface over the dashboard database
pub struct Storage {
    pub(super) conn: Connection,
}

/// Raw column tuple for an observation row, converted outside the query
type ObservationRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<i64>,
);

fn observation_columns(row: &Row) -> rusqlite::Result<ObservationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn observation_from_row(parts: ObservationRow) -> StoreResult<Observation> {
    let (id, metric_id, kind, from_raw, to_raw, count_value, list_json, antecedent, consequent) =
        parts;

    let kind = ObservationKind::from_str(&kind)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown observation kind {kind:?}")))?;
    let value = match kind {
        ObservationKind::Count => ObservationValue::Count(count_value),
        ObservationKind::List => {
            let raw = list_json
                .ok_or_else(|| StoreError::Corrupt("list observation without payload".into()))?;
            ObservationValue::List(serde_json::from_str(&raw)?)
        }
        ObservationKind::Ratio => ObservationValue::Ratio {
            antecedent_id: antecedent
                .ok_or_else(|| StoreError::Corrupt("ratio observation without antecedent".into()))?,
            consequent_id: consequent
                .ok_or_else(|| StoreError::Corrupt("ratio observation without consequent".into()))?,
        },
    };

    Ok(Observation {
        id,
        metric_id,
        from_datetime: parse_timestamp(&from_raw)?,
        to_datetime: parse_timestamp(&to_raw)?,
        value,
    })
}

const SELECT_OBSERVATION: &str = "SELECT id, metric_id, kind, from_datetime, to_datetime, \
     count_value, list_value, antecedent_id, consequent_id FROM observations";

/// Fetch a single observation by id; free function so it also works inside
/// a pending transaction.
fn fetch_observation(conn: &Connection, id: i64) -> StoreResult<Observation> {
    let parts = conn
        .query_row(
            &format!("{SELECT_OBSERVATION} WHERE id = ?1"),
            [id],
            observation_columns,
        )
        .optional()?
        .ok_or(StoreError::NotFound("observation"))?;
    observation_from_row(parts)
}

impl Storage {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| StoreError::Corrupt(format!("cannot create {parent:?}: {err}")))?;
        }
        let conn = Connection::open(path)?;
        debug!(?path, "opened dashboard database");
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Storage { conn })
    }

    // --- units ---

    pub fn insert_unit(
        &self,
        name: &str,
        slug: &str,
        category: Category,
        period: Period,
    ) -> StoreResult<Unit> {
        self.conn.execute(
            "INSERT INTO units (name, slug, category, period) VALUES (?1, ?2, ?3, ?4)",
            params![name, slug, category.code(), period.code()],
        )?;
        Ok(Unit {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            slug: slug.to_string(),
            category,
            period,
        })
    }

    pub fn get_unit(&self, id: i64) -> StoreResult<Unit> {
        self.conn
            .query_row(
                "SELECT id, name, slug, category, period FROM units WHERE id = ?1",
                [id],
                unit_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound("unit"))
    }

    pub fn unit_by_slug(&self, slug: &str) -> StoreResult<Unit> {
        self.conn
            .query_row(
                "SELECT id, name, slug, category, period FROM units WHERE slug = ?1",
                [slug],
                unit_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound("unit"))
    }

    pub fn list_units(&self) -> StoreResult<Vec<Unit>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, slug, category, period FROM units ORDER BY category DESC, name",
        )?;
        let rows = stmt.query_map([], unit_from_row)?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row?);
        }
        Ok(units)
    }

    // --- projects ---

    /// Insert a project. When no API key is supplied a hex-encoded one is
    /// generated; the key is never touched again after insert.
    pub fn insert_project(
        &self,
        name: &str,
        slug: &str,
        api_key: Option<&str>,
    ) -> StoreResult<Project> {
        let api_key = match api_key {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => Uuid::new_v4().simple().to_string(),
        };
        self.conn.execute(
            "INSERT INTO projects (name, slug, api_key) VALUES (?1, ?2, ?3)",
            params![name, slug, api_key],
        )?;
        Ok(Project {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            slug: slug.to_string(),
            api_key,
        })
    }

    pub fn project_by_slug(&self, slug: &str) -> StoreResult<Project> {
        self.conn
            .query_row(
                "SELECT id, name, slug, api_key FROM projects WHERE slug = ?1",
                [slug],
                project_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound("project"))
    }

    pub fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, slug, api_key FROM projects ORDER BY name")?;
        let rows = stmt.query_map([], project_from_row)?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    // --- annotations ---

    pub fn insert_annotation(
        &self,
        project_id: i64,
        timestamp: Option<DateTime<Utc>>,
        text: &str,
    ) -> StoreResult<Annotation> {
        self.conn.execute(
            "INSERT INTO annotations (project_id, timestamp, text) VALUES (?1, ?2, ?3)",
            params![project_id, timestamp.map(|ts| ts.to_rfc3339()), text],
        )?;
        Ok(Annotation {
            id: self.conn.last_insert_rowid(),
            project_id,
            timestamp,
            text: text.to_string(),
        })
    }

    pub fn annotations_for_project(&self, project_id: i64) -> StoreResult<Vec<Annotation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, timestamp, text FROM annotations WHERE project_id = ?1",
        )?;
        let rows = stmt.query_map([project_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut annotations = Vec::new();
        for row in rows {
            let (id, project_id, raw_ts, text) = row?;
            let timestamp = match raw_ts {
                Some(raw) => Some(parse_timestamp(&raw)?),
                None => None,
            };
            annotations.push(Annotation {
                id,
                project_id,
                timestamp,
                text,
            });
        }
        Ok(annotations)
    }

    // --- metrics ---

    pub fn insert_metric(
        &self,
        project_id: i64,
        unit_id: i64,
        kind: ObservationKind,
        is_cumulative: bool,
    ) -> StoreResult<Metric> {
        self.conn.execute(
            "INSERT INTO metrics (project_id, unit_id, kind, is_cumulative)
             VALUES (?1, ?2, ?3, ?4)",
            params![project_id, unit_id, kind.as_str(), is_cumulative],
        )?;
        Ok(Metric {
            id: self.conn.last_insert_rowid(),
            project_id,
            unit_id,
            kind,
            is_cumulative,
        })
    }

    pub fn get_metric(&self, id: i64) -> StoreResult<Metric> {
        let parts = self
            .conn
            .query_row(
                "SELECT id, project_id, unit_id, kind, is_cumulative FROM metrics WHERE id = ?1",
                [id],
                metric_columns,
            )
            .optional()?
            .ok_or(StoreError::NotFound("metric"))?;
        metric_from_row(parts)
    }

    /// Resolve a metric through its (project, unit) pairing
    pub fn metric_by_slugs(&self, project_slug: &str, unit_slug: &str) -> StoreResult<Metric> {
        let parts = self
            .conn
            .query_row(
                "SELECT m.id, m.project_id, m.unit_id, m.kind, m.is_cumulative
                 FROM metrics m
                 JOIN projects p ON p.id = m.project_id
                 JOIN units u ON u.id = m.unit_id
                 WHERE p.slug = ?1 AND u.slug = ?2",
                params![project_slug, unit_slug],
                metric_columns,
            )
            .optional()?
            .ok_or(StoreError::NotFound("metric"))?;
        metric_from_row(parts)
    }

    /// All metrics across projects, ordered by (project, unit)
    pub fn list_metrics(&self) -> StoreResult<Vec<Metric>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, unit_id, kind, is_cumulative FROM metrics
             ORDER BY project_id, unit_id",
        )?;
        let rows = stmt.query_map([], metric_columns)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(metric_from_row(row?)?);
        }
        Ok(metrics)
    }

    pub fn metrics_for_project(&self, project_id: i64) -> StoreResult<Vec<Metric>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, unit_id, kind, is_cumulative FROM metrics
             WHERE project_id = ?1 ORDER BY project_id, unit_id",
        )?;
        let rows = stmt.query_map([project_id], metric_columns)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(metric_from_row(row?)?);
        }
        Ok(metrics)
    }

    // --- observations ---

    /// Insert an observation, enforcing the metric's declared kind. A ratio
    /// observation's time window is copied from its antecedent regardless of
    /// the window supplied by the caller.
    pub fn insert_observation(
        &mut self,
        metric_id: i64,
        from_datetime: DateTime<Utc>,
        to_datetime: DateTime<Utc>,
        value: ObservationValue,
    ) -> StoreResult<Observation> {
        let metric = self.get_metric(metric_id)?;
        if metric.kind != value.kind() {
            return Err(StoreError::KindMismatch {
                expected: metric.kind,
                got: value.kind(),
            });
        }

        let mut from_datetime = from_datetime;
        let mut to_datetime = to_datetime;

        let tx = self.conn.transaction()?;
        let (count_value, list_json, antecedent_id, consequent_id) = match &value {
            ObservationValue::Count(v) => (*v, None, None, None),
            ObservationValue::List(v) => (None, Some(serde_json::to_string(v)?), None, None),
            ObservationValue::Ratio {
                antecedent_id,
                consequent_id,
            } => {
                let antecedent = fetch_observation(&tx, *antecedent_id)?;
                let consequent = fetch_observation(&tx, *consequent_id)?;
                for side in [&antecedent, &consequent] {
                    if side.value.kind() != ObservationKind::Count {
                        return Err(StoreError::KindMismatch {
                            expected: ObservationKind::Count,
                            got: side.value.kind(),
                        });
                    }
                }
                // The ratio's window always mirrors the antecedent's
                from_datetime = antecedent.from_datetime;
                to_datetime = antecedent.to_datetime;
                (None, None, Some(*antecedent_id), Some(*consequent_id))
            }
        };

        tx.execute(
            "INSERT INTO observations
               (metric_id, kind, from_datetime, to_datetime,
                count_value, list_value, antecedent_id, consequent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                metric_id,
                value.kind().as_str(),
                from_datetime.to_rfc3339(),
                to_datetime.to_rfc3339(),
                count_value,
                list_json,
                antecedent_id,
                consequent_id,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(id, metric_id, kind = %value.kind(), "stored observation");
        Ok(Observation {
            id,
            metric_id,
            from_datetime,
            to_datetime,
            value,
        })
    }

    pub fn get_observation(&self, id: i64) -> StoreResult<Observation> {
        fetch_observation(&self.conn, id)
    }

    /// All observations for a metric, most recent window first
    pub fn observations_for_metric(&self, metric_id: i64) -> StoreResult<Vec<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_OBSERVATION} WHERE metric_id = ?1 ORDER BY from_datetime DESC"
        ))?;
        let rows = stmt.query_map([metric_id], observation_columns)?;
        let mut observations = Vec::new();
        for row in rows {
            observations.push(observation_from_row(row?)?);
        }
        Ok(observations)
    }

    /// Resolve a ratio observation to its numeric value. None when either
    /// count is missing or the consequent is zero.
    pub fn ratio_value(&self, observation_id: i64) -> StoreResult<Option<f64>> {
        let observation = self.get_observation(observation_id)?;
        let (antecedent_id, consequent_id) = match observation.value {
            ObservationValue::Ratio {
                antecedent_id,
                consequent_id,
            } => (antecedent_id, consequent_id),
            other => {
                return Err(StoreError::KindMismatch {
                    expected: ObservationKind::Ratio,
                    got: other.kind(),
                })
            }
        };

        let antecedent = self.get_observation(antecedent_id)?;
        let consequent = self.get_observation(consequent_id)?;
        match (antecedent.value, consequent.value) {
            (ObservationValue::Count(a), ObservationValue::Count(c)) => Ok(ratio(a, c)),
            _ => Err(StoreError::Corrupt("ratio references non-count rows".into())),
        }
    }

    // --- date-range reconstruction ---

    /// Produce one (date, observation-or-absent) pair per calendar day in the
    /// inclusive [start, end] window. Only defined for daily metrics.
    pub fn date_range(
        &self,
        metric_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<(NaiveDate, Option<Observation>)>> {
        let metric = self.get_metric(metric_id)?;
        let unit = self.get_unit(metric.unit_id)?;
        if unit.period != Period::Daily {
            return Err(StoreError::NonDailyMetric);
        }

        debug!(metric_id, %start, %end, "reconstructing date range");

        // Observations match a day through the date portion of from_datetime.
        // Descending order so that when two share a day the earliest one wins
        // the pairing (the last listed overwrites in build_date_range).
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_OBSERVATION}
             WHERE metric_id = ?1 AND date(from_datetime) BETWEEN ?2 AND ?3
             ORDER BY from_datetime DESC"
        ))?;
        let rows = stmt.query_map(
            params![metric_id, start.to_string(), end.to_string()],
            observation_columns,
        )?;
        let mut observations = Vec::new();
        for row in rows {
            observations.push(observation_from_row(row?)?);
        }

        Ok(build_date_range(start, end, observations))
    }
}

pub(super) fn unit_from_row(row: &Row) -> rusqlite::Result<Unit> {
    let category_code: i64 = row.get(3)?;
    let period_code: i64 = row.get(4)?;
    Ok(Unit {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        category: Category::from_code(category_code).unwrap_or(Category::Other),
        period: Period::from_code(period_code).unwrap_or(Period::Other),
    })
}

pub(super) fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        api_key: row.get(3)?,
    })
}

pub(super) type MetricRow = (i64, i64, i64, String, bool);

pub(super) fn metric_columns(row: &Row) -> rusqlite::Result<MetricRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

pub(super) fn metric_from_row(parts: MetricRow) -> StoreResult<Metric> {
    let (id, project_id, unit_id, kind, is_cumulative) = parts;
    Ok(Metric {
        id,
        project_id,
        unit_id,
        kind: ObservationKind::from_str(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown metric kind {kind:?}")))?,
        is_cumulative,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    /// Storage seeded with one project and one daily count metric
    fn seeded() -> (Storage, Metric) {
        let storage = Storage::open_in_memory().unwrap();
        let unit = storage
            .insert_unit("Page views", "page-views", Category::Web, Period::Daily)
            .unwrap();
        let project = storage.insert_project("Site", "site", None).unwrap();
        let metric = storage
            .insert_metric(project.id, unit.id, ObservationKind::Count, false)
            .unwrap();
        (storage, metric)
    }

    #[test]
    fn test_api_key_generated_and_unique() {
        let storage = Storage::open_in_memory().unwrap();
        let a = storage.insert_project("A", "a", None).unwrap();
        let b = storage.insert_project("B", "b", None).unwrap();

        assert_eq!(a.api_key.len(), 32);
        assert!(a.api_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.api_key, b.api_key);
    }

    #[test]
    fn test_api_key_preserved_when_supplied() {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage
            .insert_project("A", "a", Some("deadbeef"))
            .unwrap();
        assert_eq!(project.api_key, "deadbeef");
        assert_eq!(storage.project_by_slug("a").unwrap().api_key, "deadbeef");
    }

    #[test]
    fn test_insert_observation_enforces_kind() {
        let (mut storage, metric) = seeded();
        let err = storage
            .insert_observation(
                metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::List(json!([1, 2, 3])),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
    }

    #[test]
    fn test_ratio_mirrors_antecedent_window() {
        let (mut storage, count_metric) = seeded();
        let unit = storage
            .insert_unit("Conversion", "conversion", Category::Web, Period::Daily)
            .unwrap();
        let ratio_metric = storage
            .insert_metric(count_metric.project_id, unit.id, ObservationKind::Ratio, false)
            .unwrap();

        let antecedent = storage
            .insert_observation(
                count_metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::Count(Some(10)),
            )
            .unwrap();
        let consequent = storage
            .insert_observation(
                count_metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::Count(Some(4)),
            )
            .unwrap();

        // Caller-supplied window is overridden by the antecedent's
        let stored = storage
            .insert_observation(
                ratio_metric.id,
                utc("2030-06-01T00:00:00Z"),
                utc("2030-06-02T00:00:00Z"),
                ObservationValue::Ratio {
                    antecedent_id: antecedent.id,
                    consequent_id: consequent.id,
                },
            )
            .unwrap();
        assert_eq!(stored.from_datetime, antecedent.from_datetime);
        assert_eq!(stored.to_datetime, antecedent.to_datetime);

        let reloaded = storage.get_observation(stored.id).unwrap();
        assert_eq!(reloaded.from_datetime, antecedent.from_datetime);

        assert_eq!(storage.ratio_value(stored.id).unwrap(), Some(2.5));
    }

    #[test]
    fn test_ratio_rejects_non_count_sides() {
        let (mut storage, count_metric) = seeded();
        let unit = storage
            .insert_unit("Top pages", "top-pages", Category::Web, Period::Daily)
            .unwrap();
        let list_metric = storage
            .insert_metric(count_metric.project_id, unit.id, ObservationKind::List, false)
            .unwrap();
        let ratio_unit = storage
            .insert_unit("Rate", "rate", Category::Web, Period::Daily)
            .unwrap();
        let ratio_metric = storage
            .insert_metric(count_metric.project_id, ratio_unit.id, ObservationKind::Ratio, false)
            .unwrap();

        let list_obs = storage
            .insert_observation(
                list_metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::List(json!(["a", "b"])),
            )
            .unwrap();
        let count_obs = storage
            .insert_observation(
                count_metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::Count(Some(1)),
            )
            .unwrap();

        let err = storage
            .insert_observation(
                ratio_metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::Ratio {
                    antecedent_id: list_obs.id,
                    consequent_id: count_obs.id,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
    }

    #[test]
    fn test_date_range_worked_example() {
        let (mut storage, metric) = seeded();
        storage
            .insert_observation(
                metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::Count(Some(5)),
            )
            .unwrap();
        storage
            .insert_observation(
                metric.id,
                utc("2024-01-03T00:00:00Z"),
                utc("2024-01-04T00:00:00Z"),
                ObservationValue::Count(Some(7)),
            )
            .unwrap();

        let range = storage
            .date_range(metric.id, date("2024-01-01"), date("2024-01-03"))
            .unwrap();

        assert_eq!(range.len(), 3);
        assert_eq!(
            range[0].1.as_ref().map(|ob| &ob.value),
            Some(&ObservationValue::Count(Some(5)))
        );
        assert!(range[1].1.is_none());
        assert_eq!(
            range[2].1.as_ref().map(|ob| &ob.value),
            Some(&ObservationValue::Count(Some(7)))
        );
    }

    #[test]
    fn test_date_range_excludes_out_of_window_days() {
        let (mut storage, metric) = seeded();
        storage
            .insert_observation(
                metric.id,
                utc("2024-01-10T09:30:00Z"),
                utc("2024-01-11T00:00:00Z"),
                ObservationValue::Count(Some(42)),
            )
            .unwrap();

        // Observation at 09:30 still keys to its calendar day
        let range = storage
            .date_range(metric.id, date("2024-01-10"), date("2024-01-10"))
            .unwrap();
        assert_eq!(range.len(), 1);
        assert!(range[0].1.is_some());

        let range = storage
            .date_range(metric.id, date("2024-01-11"), date("2024-01-12"))
            .unwrap();
        assert!(range.iter().all(|(_, ob)| ob.is_none()));
    }

    #[test]
    fn test_date_range_rejects_non_daily_metric() {
        let storage = Storage::open_in_memory().unwrap();
        let unit = storage
            .insert_unit("Signups", "signups", Category::Web, Period::Weekly)
            .unwrap();
        let project = storage.insert_project("Site", "site", None).unwrap();
        let metric = storage
            .insert_metric(project.id, unit.id, ObservationKind::Count, false)
            .unwrap();

        let err = storage
            .date_range(metric.id, date("2024-01-01"), date("2024-01-03"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NonDailyMetric));
    }

    #[test]
    fn test_list_metrics_ordered_by_project_then_unit() {
        let storage = Storage::open_in_memory().unwrap();
        let views = storage
            .insert_unit("Views", "views", Category::Web, Period::Daily)
            .unwrap();
        let posts = storage
            .insert_unit("Posts", "posts", Category::Content, Period::Daily)
            .unwrap();
        let p1 = storage.insert_project("A", "a", None).unwrap();
        let p2 = storage.insert_project("B", "b", None).unwrap();

        // Inserted out of (project, unit) order on purpose
        let m_p2 = storage
            .insert_metric(p2.id, views.id, ObservationKind::Count, false)
            .unwrap();
        let m_p1_posts = storage
            .insert_metric(p1.id, posts.id, ObservationKind::Count, false)
            .unwrap();
        let m_p1_views = storage
            .insert_metric(p1.id, views.id, ObservationKind::Count, false)
            .unwrap();

        let ids: Vec<i64> = storage
            .list_metrics()
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, [m_p1_views.id, m_p1_posts.id, m_p2.id]);
    }

    #[test]
    fn test_annotations_round_trip() {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage.insert_project("Site", "site", None).unwrap();

        let launched = storage
            .insert_annotation(project.id, Some(utc("2024-03-01T12:00:00Z")), "launched")
            .unwrap();
        let undated = storage
            .insert_annotation(project.id, None, "backfill pending")
            .unwrap();
        assert_eq!(launched.project_id, project.id);

        let annotations = storage.annotations_for_project(project.id).unwrap();
        assert_eq!(annotations.len(), 2);

        let by_id = |id: i64| annotations.iter().find(|a| a.id == id).unwrap();
        assert_eq!(by_id(launched.id).timestamp, Some(utc("2024-03-01T12:00:00Z")));
        assert_eq!(by_id(launched.id).text, "launched");
        assert_eq!(by_id(undated.id).timestamp, None);
        assert_eq!(by_id(undated.id).text, "backfill pending");
    }

    #[test]
    fn test_unparseable_stored_timestamp() {
        let (storage, metric) = seeded();
        storage
            .conn
            .execute(
                "INSERT INTO observations
                   (metric_id, kind, from_datetime, to_datetime, count_value)
                 VALUES (?1, 'count', 'yesterday', 'today', 1)",
                [metric.id],
            )
            .unwrap();
        let id = storage.conn.last_insert_rowid();

        let err = storage.get_observation(id).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_date_range_earliest_wins_on_shared_day() {
        let (mut storage, metric) = seeded();
        storage
            .insert_observation(
                metric.id,
                utc("2024-01-01T08:00:00Z"),
                utc("2024-01-01T09:00:00Z"),
                ObservationValue::Count(Some(1)),
            )
            .unwrap();
        storage
            .insert_observation(
                metric.id,
                utc("2024-01-01T20:00:00Z"),
                utc("2024-01-01T21:00:00Z"),
                ObservationValue::Count(Some(2)),
            )
            .unwrap();

        let range = storage
            .date_range(metric.id, date("2024-01-01"), date("2024-01-01"))
            .unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(
            range[0].1.as_ref().map(|ob| &ob.value),
            Some(&ObservationValue::Count(Some(1)))
        );
    }

    #[test]
    fn test_observations_most_recent_first() {
        let (mut storage, metric) = seeded();
        for day in ["2024-01-01", "2024-01-03", "2024-01-02"] {
            storage
                .insert_observation(
                    metric.id,
                    utc(&format!("{day}T00:00:00Z")),
                    utc(&format!("{day}T23:59:59Z")),
                    ObservationValue::Count(Some(1)),
                )
                .unwrap();
        }
        let observations = storage.observations_for_metric(metric.id).unwrap();
        let days: Vec<String> = observations
            .iter()
            .map(|ob| ob.from_datetime.date_naive().to_string())
            .collect();
        assert_eq!(days, ["2024-01-03", "2024-01-02", "2024-01-01"]);
    }

    #[test]
    fn test_list_observation_round_trips_payload() {
        let storage = Storage::open_in_memory().unwrap();
        let unit = storage
            .insert_unit("Top pages", "top-pages", Category::Content, Period::Daily)
            .unwrap();
        let project = storage.insert_project("Site", "site", None).unwrap();
        let metric = storage
            .insert_metric(project.id, unit.id, ObservationKind::List, false)
            .unwrap();

        let payload = json!([{"path": "/", "views": 100}, {"path": "/about", "views": 7}]);
        let mut storage = storage;
        let stored = storage
            .insert_observation(
                metric.id,
                utc("2024-01-01T00:00:00Z"),
                utc("2024-01-02T00:00:00Z"),
                ObservationValue::List(payload.clone()),
            )
            .unwrap();

        let reloaded = storage.get_observation(stored.id).unwrap();
        assert_eq!(reloaded.value, ObservationValue::List(payload));
    }

    #[test]
    fn test_units_ordered_by_category_desc_then_name() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .insert_unit("Zebra", "zebra", Category::Web, Period::Daily)
            .unwrap();
        storage
            .insert_unit("Posts", "posts", Category::Content, Period::Daily)
            .unwrap();
        storage
            .insert_unit("Alpha", "alpha", Category::Web, Period::Daily)
            .unwrap();

        let slugs: Vec<String> = storage
            .list_units()
            .unwrap()
            .into_iter()
            .map(|u| u.slug)
            .collect();
        assert_eq!(slugs, ["posts", "alpha", "zebra"]);
    }
}
