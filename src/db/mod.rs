//! Storage module.
//!
//! Probe configs, latest results and bounded history behind the [`Storage`]
//! trait, with an SQLite backend and an in-process one.

mod history;
mod memory;
mod models;
mod sqlite;
mod store;

pub use history::*;
pub use memory::*;
pub use models::*;
pub use sqlite::*;
pub use store::*;
