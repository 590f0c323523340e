//! Test utilities and fixtures for hotreload
//!
//! Fake collaborators for a tiny line-oriented language, a manually driven
//! file watcher, and a harness wiring them into a `ReloadContext` over an
//! in-memory source tree.

pub mod compile;
pub mod fixtures;
pub mod mocks;
