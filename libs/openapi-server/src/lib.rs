//! Models served by the daemon's local HTTP API.

pub mod models;
