mod build;
mod clean;
mod deps;

pub use build::{BuildArgs, cmd_build};
pub use clean::cmd_clean;
pub use deps::cmd_deps;
