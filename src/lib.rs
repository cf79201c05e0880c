pub mod api;
pub mod cache;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod locks;
pub mod orchestrator;
pub mod reconciler;
pub mod server;
pub mod store;
