//! Healthwatch - health-check scheduling and execution engine.
//!
//! Probes (HTTP, TCP, database and plugin checks) run on their own interval,
//! their outcomes land in an in-memory result store plus a durable storage
//! backend, and [`Engine`] ties it together for an API layer.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod probe;
pub mod scheduler;

pub use config::{EngineConfig, StorageBackend};
pub use engine::{Engine, PluginInfo};
pub use error::EngineError;
