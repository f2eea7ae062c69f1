//! Scan orchestration engine.
//!
//! [`ScanEngine`] drives partitions of a content source through the
//! detector and emits typed events; the [`EventDispatcher`] makes them
//! durable in order; the [`StreamHub`] fans them out live; the
//! [`ScanReporter`] answers for what has happened so far.

mod dispatcher;
mod factory;
mod hub;
mod orchestrator;
mod reporting;

pub use dispatcher::{DispatcherHandle, EventDispatcher};
pub use factory::EventFactory;
pub use hub::StreamHub;
pub use orchestrator::{request_pause, EngineSettings, ScanEngine};
pub use reporting::ScanReporter;
