//! Core modules for Switchyard's runtime.
//!
//! Shared primitives live here: the store layout, the SQLite broker, the
//! error type, config and tracing setup.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod runtime;
pub mod schemas;
pub mod store;
pub mod telemetry;
pub mod time;
