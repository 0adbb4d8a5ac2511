//! Subcommand implementations

pub mod control;
pub mod decisions;
pub mod pods;
pub mod scale;
