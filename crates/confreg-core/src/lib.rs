//! Layered configuration registry
//!
//! The registry is a flat string-to-string map assembled from several
//! persisted layers. Reads resolve through the layers in precedence order;
//! writes go to exactly one write-target layer.
//!
//! ```text
//!   forced      highest precedence
//!   schedule
//!   ldap
//!   normal      default write target
//! ```
//!
//! - [`LayerStore`] reads and writes one layer file.
//! - [`LayeredRegistry`] resolves across layers.
//! - [`RegistryHandle`] adds an access mode, a reload policy and change sets.
//! - [`Snapshot`] is the frozen view handed to change handlers.
//!
//! # Example
//!
//! ```no_run
//! use confreg_core::{Autoload, RegistryHandle, Settings};
//!
//! # fn main() -> confreg_core::Result<()> {
//! let settings = Settings::from_env()?;
//! let mut registry = RegistryHandle::writable(&settings, None, Autoload::Once)?;
//! let _lock = registry.lock()?;
//! registry.load()?;
//! registry.set("hostname", "master")?;
//! let changes = registry.save()?;
//! for change in &changes {
//!     println!("{}: {:?} -> {:?}", change.key, change.old, change.new);
//! }
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod error;
pub mod filter;
pub mod handle;
pub mod key;
pub mod layer;
pub mod logging;
pub mod registry;
pub mod replog;
pub mod settings;
pub mod snapshot;

pub use changes::{Change, ChangeSet, ChangeValue, Changes};
pub use error::{Error, Result};
pub use filter::SearchTarget;
pub use handle::{Access, Autoload, ReadOnly, ReadWrite, RegistryHandle, View, live, shared};
pub use key::{is_false_value, is_true_value, shell_escape_key, validate_key, validate_value};
pub use layer::{LayerStore, LayerValues};
pub use registry::{LayeredRegistry, ScopedValue};
pub use replog::{REPLOG_ENABLED_KEY, Replog, ReplogEntry};
pub use settings::{LayerSpec, Settings, layers};
pub use snapshot::Snapshot;

pub use confreg_fs::RegistryLock;
