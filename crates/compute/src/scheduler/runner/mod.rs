//! Continuous worker runner.
//!
//! Split into focused submodules:
//! - `core`: Worker struct, constructor, and accessor methods
//! - `execution`: run loop and tick orchestration
//! - `cycle`: per-variable fetch/detect/write/commit cycle

mod core;
mod cycle;
mod execution;
#[cfg(test)]
mod tests;

pub use self::core::Worker;
