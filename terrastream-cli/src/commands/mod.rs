//! CLI subcommands.

pub mod common;
pub mod elevation;
pub mod fetch;
pub mod simulate;
