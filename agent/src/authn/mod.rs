//! Agent authentication against base

pub mod token_provider;
