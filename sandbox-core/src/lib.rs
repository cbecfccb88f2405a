//! Foundation types shared by the sandbox control plane.
//!
//! Holds the pieces every other crate agrees on: how a workspace is named,
//! what a valid request field looks like, how resource quantities parse, and
//! the keyed work queue that drives both the reconcilers and the gateway
//! notifier.

pub mod error;
pub mod naming;
pub mod quantity;
pub mod queue;
pub mod validation;

pub use error::{Result, ValidationError};
pub use naming::workspace_name;
pub use quantity::Quantity;
pub use queue::{Backoff, WorkQueue};
