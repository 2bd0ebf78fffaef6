// Library root: exposes the service modules for integration tests in
// `tests/`. The production entry point remains `src/main.rs`.

pub mod api;
pub mod cache;
pub mod db;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod repository;
pub mod scheduler;

pub mod cli;
pub mod config;
pub mod logging;
