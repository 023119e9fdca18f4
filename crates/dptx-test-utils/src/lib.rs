//! Shared test utilities for dptx integration tests.
//!
//! This crate provides:
//! - [`StubDataPlane`]: an HTTP stub of the remote configuration service
//! - Custom assertion helpers over its request log
//!
//! # Example
//!
//! ```rust,ignore
//! use dptx_test_utils::{Endpoint, ScriptedResponse, StubDataPlane};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let stub = StubDataPlane::start().await.expect("stub");
//!     stub.script(Endpoint::Commit, ScriptedResponse::error(500, "boom"));
//!     // ... point a client at stub.base_url() ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod stub;

pub use assertions::*;
pub use stub::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dptx_core=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
