//! Domain models

pub mod deployment;
pub mod service;
pub mod task;
