//! Integration tests for deployd

mod fakes;
mod test_server;
mod test_syncer;
mod test_token_backoff;
mod test_worker;
