//! Filesystem primitives for confreg
//!
//! Provides crash-safe replace-on-write, the advisory lock used to serialize
//! read-modify-write sequences across processes, corpus fingerprints, and
//! format-agnostic settings files.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod lock;

pub use config::ConfigStore;
pub use error::{Error, Result};
pub use io::RobustnessConfig;
pub use lock::RegistryLock;
