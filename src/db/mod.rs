//! Database module for StatusWatch.
//!
//! Provides SQLite storage for targets and their bounded probe history.

mod models;
mod store;

pub use models::*;
pub use store::*;
