pub mod log;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod launcher;
pub mod lock;
pub mod merge;
pub mod plan;
pub mod queue;
pub mod queue_store;
pub mod registry;
pub mod schedule;
pub mod status;
pub mod types;
pub mod workspace;
