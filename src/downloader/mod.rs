// Download pipeline: data models, error taxonomy, engine boundary and the
// orchestrator that drives one job end to end.

pub mod engine;
pub mod errors;
pub mod models;
pub mod orchestrator;

#[cfg(test)]
pub mod mock;

pub use engine::{MediaEngine, YtDlpEngine};
pub use errors::DownloadError;
pub use orchestrator::Orchestrator;
