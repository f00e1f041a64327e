//! Shared test utilities for logdb integration harnesses.
//!
//! Import everything you need via `mod common; use common::*;` at the top of
//! each harness file.

pub mod fake_search_api;
pub mod fixtures;
pub mod mock_store;

pub use fake_search_api::FakeSearchApi;
pub use fixtures::*;
pub use mock_store::MockStore;
