//! Ordered dashboard lists.
//!
//! Units, projects and metrics can each be grouped into named lists for
//! presentation. Membership rows carry an explicit position; retrieval sorts
//! by position, never insertion order. At most one list per kind is flagged
//! default: saving a default demotes any prior default in the same
//! transaction, and a partial unique index backs the invariant up at the
//! schema level.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{Metric, Project, Unit};
use super::storage::{metric_columns, metric_from_row, project_from_row, unit_from_row};
use super::storage::{Storage, StoreError, StoreResult};

/// Which entity a list groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Unit,
    Project,
    Metric,
}

impl ListKind {
    fn list_table(self) -> &'static str {
        match self {
            Self::Unit => "unit_lists",
            Self::Project => "project_lists",
            Self::Metric => "metric_lists",
        }
    }

    fn membership_table(self) -> &'static str {
        match self {
            Self::Unit => "unit_list_memberships",
            Self::Project => "project_list_memberships",
            Self::Metric => "metric_list_memberships",
        }
    }

    fn item_column(self) -> &'static str {
        match self {
            Self::Unit => "unit_id",
            Self::Project => "project_id",
            Self::Metric => "metric_id",
        }
    }
}

/// A named, orderable grouping of entities. `id` is None until first saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedList {
    pub id: Option<i64>,
    pub name: String,
    pub slug: String,
    pub is_default: bool,
}

impl OrderedList {
    pub fn new(name: &str, slug: &str, is_default: bool) -> Self {
        OrderedList {
            id: None,
            name: name.to_string(),
            slug: slug.to_string(),
            is_default,
        }
    }
}

fn list_from_row(row: &Row) -> rusqlite::Result<OrderedList> {
    Ok(OrderedList {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        slug: row.get(2)?,
        is_default: row.get(3)?,
    })
}

impl Storage {
    /// Insert or update a list. When the list is flagged default, any other
    /// default of the same kind is demoted first; demote and write happen in
    /// one transaction. Returns the row id.
    pub fn save_list(&mut self, kind: ListKind, list: &OrderedList) -> StoreResult<i64> {
        let table = kind.list_table();
        let tx = self.conn.transaction()?;

        if list.is_default {
            // Demote a prior default; its absence is a normal state
            let demoted = tx.execute(
                &format!("UPDATE {table} SET is_default = 0 WHERE is_default = 1 AND id IS NOT ?1"),
                params![list.id],
            )?;
            if demoted > 0 {
                debug!(kind = ?kind, slug = %list.slug, "demoted prior default list");
            }
        }

        let id = match list.id {
            Some(id) => {
                let updated = tx.execute(
                    &format!("UPDATE {table} SET name = ?1, slug = ?2, is_default = ?3 WHERE id = ?4"),
                    params![list.name, list.slug, list.is_default, id],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound("list"));
                }
                id
            }
            None => {
                tx.execute(
                    &format!("INSERT INTO {table} (name, slug, is_default) VALUES (?1, ?2, ?3)"),
                    params![list.name, list.slug, list.is_default],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.commit()?;
        Ok(id)
    }

    pub fn list_by_slug(&self, kind: ListKind, slug: &str) -> StoreResult<OrderedList> {
        self.conn
            .query_row(
                &format!(
                    "SELECT id, name, slug, is_default FROM {} WHERE slug = ?1",
                    kind.list_table()
                ),
                [slug],
                list_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound("list"))
    }

    /// All lists of a kind, default first, then by name
    pub fn lists(&self, kind: ListKind) -> StoreResult<Vec<OrderedList>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, name, slug, is_default FROM {} ORDER BY is_default DESC, name",
            kind.list_table()
        ))?;
        let rows = stmt.query_map([], list_from_row)?;
        let mut lists = Vec::new();
        for row in rows {
            lists.push(row?);
        }
        Ok(lists)
    }

    /// Add an item to a list at the given position. Each item may appear at
    /// most once per list; positions need not be unique.
    pub fn add_list_member(
        &self,
        kind: ListKind,
        list_id: i64,
        item_id: i64,
        position: i64,
    ) -> StoreResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (list_id, {}, position) VALUES (?1, ?2, ?3)",
                kind.membership_table(),
                kind.item_column()
            ),
            params![list_id, item_id, position],
        )?;
        Ok(())
    }

    /// Units of a unit list in membership order
    pub fn ordered_units(&self, list_id: i64) -> StoreResult<Vec<Unit>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.name, u.slug, u.category, u.period
             FROM units u
             JOIN unit_list_memberships m ON m.unit_id = u.id
             WHERE m.list_id = ?1 ORDER BY m.position, m.id",
        )?;
        let rows = stmt.query_map([list_id], unit_from_row)?;
        let mut units = Vec::new();
        for row in rows {
            units.push(row?);
        }
        Ok(units)
    }

    /// Projects of a project list in membership order
    pub fn ordered_projects(&self, list_id: i64) -> StoreResult<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.slug, p.api_key
             FROM projects p
             JOIN project_list_memberships m ON m.project_id = p.id
             WHERE m.list_id = ?1 ORDER BY m.position, m.id",
        )?;
        let rows = stmt.query_map([list_id], project_from_row)?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    /// Metrics of a metric list in membership order
    pub fn ordered_metrics(&self, list_id: i64) -> StoreResult<Vec<Metric>> {
        let mut stmt = self.conn.prepare(
            "SELECT mt.id, mt.project_id, mt.unit_id, mt.kind, mt.is_cumulative
             FROM metrics mt
             JOIN metric_list_memberships m ON m.metric_id = mt.id
             WHERE m.list_id = ?1 ORDER BY m.position, m.id",
        )?;
        let rows = stmt.query_map([list_id], metric_columns)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(metric_from_row(row?)?);
        }
        Ok(metrics)
    }
}
