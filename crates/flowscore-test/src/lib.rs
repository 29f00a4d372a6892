//! Shared test fixtures for FlowScore crates.
//!
//! Provides a small rostering domain (employees and shifts) with `Fact`
//! implementations, used by the network integration tests.
//!
//! # Usage
//!
//! Add as a dev-dependency in your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! flowscore-test = { workspace = true }
//! ```

pub mod shift;

pub use shift::{Employee, Shift};
