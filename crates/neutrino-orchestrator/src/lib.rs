//! Sequences the splitter, worker pool, change-log followers, and config
//! transfer into the `start`/`resume` lifecycles (§4.8), replacing the
//! original tool's `Migrator` singleton with an explicit, constructed
//! `MigrationContext`.

pub mod context;
pub mod error;
pub mod phases;
pub mod preflight;
pub mod replicas;

pub use context::MigrationContext;
pub use error::OrchestratorError;
pub use phases::{run_resume, run_start};
