//! HTTP API Module
//!
//! Provides a REST API for batch replication, media triggers and
//! relationship management.

mod http;

pub use http::{AppState, BatchRequest, HttpServer};
