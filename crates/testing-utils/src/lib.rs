//! # Archivist Testing Utils
//!
//! Shared testing utilities for the archivist workspace: builders for
//! domain entities and recording doubles for the transport and event ports.
//!
//! ```toml
//! [dev-dependencies]
//! archivist-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
