//! # Anomaly Testing Utils
//!
//! Shared testing utilities for the workspace: builders for tasks and plan
//! nodes, scripted operators for pipeline and worker tests, and a task store
//! wrapper that records fetch order and injects store failures.
//!
//! ```toml
//! [dev-dependencies]
//! anomaly-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
