//! CLI subcommand implementations

pub mod maintenance;
pub mod schedule;
pub mod sync;
