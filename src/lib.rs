#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod cleanup;
pub mod config;
pub mod config_watcher;
pub mod errors;
pub mod exports;
pub mod graph;
pub mod models;
pub mod orchestrator;
pub mod services;

pub use cleanup::CleanupRegistry;
pub use errors::{AppError, Result};
