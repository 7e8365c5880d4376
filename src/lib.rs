//! Library interface for brewdeck
//!
//! A session-scoped backend that drives the Homebrew CLI on behalf of a UI:
//! cached and deduplicated queries, streamed mutating operations with
//! progress events, new-package tracking and a concurrent startup snapshot.
//!
//! Start with [`PackageManager`].

pub mod actions;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod executor;
pub mod extract;
pub mod known;
pub mod logging;
pub mod package_manager;
pub mod parse;
pub mod snapshot;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use actions::{ActionOutcome, ActionRunner, Operation};
pub use config::{Config, OutdatedMode};
pub use database::UpdateOutcome;
pub use error::{BrewError, Result};
pub use events::{ChannelSink, EnglishMessages, Event, EventSink, Messages, NullSink};
pub use executor::{CommandInvocation, CommandOutput, CommandRunner, Executor, SystemRunner};
pub use known::{Catalog, EntityKind, KnownEntities};
pub use logging::{LogQueue, SessionLog, TracingLog};
pub use package_manager::{CleanupEstimate, PackageManager};
pub use parse::{InstalledEntry, OutdatedEntry, PackageInfo};
pub use snapshot::{Section, StartupSnapshot};
