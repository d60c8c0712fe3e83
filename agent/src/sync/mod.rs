//! Remote task synchronization

pub mod executor;
pub mod syncer;
