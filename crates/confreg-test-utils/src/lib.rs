//! Shared test fixtures for the confreg workspace.
//!
//! Dev-dependency only. The fixture lays files out the way
//! `Settings::with_root` expects them, without depending on confreg-core.

pub mod registry;

pub use registry::TestRegistry;
