//! Build targets.
//!
//! A target is a named buildable unit: sources, outputs, dependencies,
//! capability tags and per-profile commands, plus the runtime state slot the
//! scheduler drives through [`TargetState`].
//!
//! # Submodules
//!
//! - [`state`] - The lifecycle state machine

pub mod state;
mod types;

pub use state::{StateError, TargetState};
pub use types::*;
