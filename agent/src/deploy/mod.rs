//! Deployment module

pub mod command;
pub mod deployer;
pub mod git;
pub mod log;
pub mod pipeline;
pub mod runtime;
pub mod semaphore;
pub mod service_mngr;
pub mod worker;
