//! Change-triggered handlers for the confreg registry
//!
//! Packages declare handlers in descriptor files. Each handler watches a set
//! of key patterns; when a save changes a watched key, the handler runs.
//!
//! # Architecture
//!
//! 1. **Descriptors** ([`descriptor`]) are parsed from `<templates>/info/*.info`.
//! 2. **The index** ([`HandlerIndex`]) merges descriptors into handlers,
//!    compiles their patterns and caches the result keyed by a fingerprint
//!    of the descriptor corpus.
//! 3. **The dispatcher** ([`Dispatcher`]) matches a change set against the
//!    index and runs file, multifile, module and script handlers in a
//!    configurable kind order, isolating failures.
//! 4. **Commands** ([`Commands`]) bundle the lock/load/save/dispatch cycle
//!    behind the usual frontend operations.
//!
//! # Example
//!
//! ```no_run
//! use confreg_handlers::Commands;
//!
//! # fn main() -> confreg_handlers::Result<()> {
//! let commands = Commands::new(confreg_core::Settings::from_env()?);
//! let report = commands.set(&["hostname=master"], None)?;
//! for failure in report.dispatch.failures() {
//!     eprintln!("{}: {:?}", failure.handler, failure.outcome);
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod generate;
pub mod index;
pub mod module;
pub mod pattern;
pub mod script;
pub mod template;

pub use commands::{Assignment, CommandReport, Commands, parse_assignment};
pub use descriptor::{Descriptor, DescriptorEntry, HandlerKind, Permissions};
pub use dispatcher::{DispatchReport, Dispatcher, HandlerOutcome, Outcome, expand_values};
pub use error::{Error, Result};
pub use index::{Handler, HandlerIndex, IndexedHandler};
pub use module::{FnModule, ModuleHandler, ModuleRegistry, ModuleResult, Phase};
pub use pattern::{PatternSet, PatternSpec};
