//! deployd library
//!
//! Core modules of the self-hosted deployment daemon: the deployment
//! engine, the task synchronization protocol with base, and the local HTTP
//! API both of them drive.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod utils;
pub mod workers;
