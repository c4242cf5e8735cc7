//! tideflow core — process orchestration over SQLite.
//!
//! A workflow blueprint is a graph of nodes grouped into lanes. A process
//! is one run of a blueprint: an append-only history of `ProcessState`
//! steps advanced by the step loop, parked on human activities, timers and
//! child processes, and resumed through the [`manager`] facade.
//!
//! The crate has no transport dependency; the `tideflow` CLI and any host
//! application drive it through [`manager`], [`timers`] and [`worker`].

pub mod blueprint;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod models;
pub mod nodes;
pub mod notifier;
pub mod process;
pub mod store;
pub mod timers;
pub mod value;
pub mod worker;

// Convenience re-exports
pub use blueprint::{Blueprint, BlueprintSpec};
pub use config::EngineConfig;
pub use db::Database;
pub use engine::{Engine, EngineInner, EngineMessage};
pub use error::EngineError;
pub use events::{EngineEvent, EngineEventType, EventBus};
pub use models::ProcessStatus;
pub use process::{Process, ProcessOutcome};
