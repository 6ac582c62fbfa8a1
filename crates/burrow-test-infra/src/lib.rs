//! Shared fixtures for Burrow integration tests.

pub mod contract;
pub mod error;
pub mod flaky;
pub mod postgres;

pub use error::{Result, TestInfraError};
pub use flaky::FlakyStorage;
