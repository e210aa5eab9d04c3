//! Data layer for the dashboard database.
//!
//! Entities, ordered dashboard lists, and the SQLite storage behind them.

mod lists;
mod models;
mod storage;

pub use lists::{ListKind, OrderedList};
pub use models::{
    Annotation, Category, Metric, Observation, ObservationKind, ObservationValue, Period, Project,
    Unit,
};
pub use storage::{Storage, StoreError, StoreResult};
