//! Change-log capture and apply: tails an upstream replica set's operation
//! log, spools it while the data phase is still running, then drains and
//! live-applies it to the target (§4.5/§4.6).

pub mod apply;
pub mod error;
pub mod follower;
pub mod skip;
pub mod spool;

pub use apply::bulk_apply;
pub use error::OplogError;
pub use follower::Follower;
pub use skip::{should_skip, SkipPredicate};
