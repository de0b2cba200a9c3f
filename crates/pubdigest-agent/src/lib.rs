//! pubdigest agent: configuration, wiring and the pipeline tasks.

pub mod config;
pub mod context;
pub mod envelope;
pub mod tasks;
