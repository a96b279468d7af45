pub mod bake;
pub mod cli;
pub mod config;
pub mod events;
pub mod expr;
pub mod host;
pub mod logging;
pub mod runner;
pub mod script;
pub mod sm;
pub mod time;
pub mod tooling;

pub use runner::{run, run_with_overrides, RunSummary};
