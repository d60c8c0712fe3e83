//! Models exchanged with the base control plane.

pub mod models;
