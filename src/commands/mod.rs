//! Command implementations for the brewdeck CLI
//!
//! - **install**: install, uninstall and upgrades
//! - **list**: the startup snapshot
//! - **maintenance**: database update, doctor, cleanup, Brewfile export, validation
//! - **query**: package info, dependencies and new packages
//! - **tap**: tap management
//! - **utils**: event printing, spinners and outcome handling (internal)

pub mod install;
pub mod list;
pub mod maintenance;
pub mod query;
pub mod tap;
pub(crate) mod utils;

pub use install::{install, uninstall, upgrade, upgrade_all, upgrade_selected};
pub use list::snapshot;
pub use maintenance::{cleanup, doctor, export, update, validate};
pub use query::{deps, info, new_entities};
pub use tap::{tap, untap};
