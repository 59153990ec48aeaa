// tubefetch: HTTP service that turns media page URLs into downloadable
// files via an external extraction engine.

pub mod catalog;
pub mod config;
pub mod downloader;
pub mod progress;
pub mod registry;
pub mod server;
pub mod strategy;
