//! Client side of the base control plane API

pub mod agent;
pub mod client;
