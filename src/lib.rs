//! pulseboard: a metrics-dashboard backend over SQLite.
//!
//! Tracks time-series observations (counts, lists, ratios) per project and
//! unit, with ordered dashboard lists for presentation. The `data` module is
//! the storage and model layer; `cli` backs the `pulseboard` binary.

pub mod cli;
pub mod data;
