//! scopegate CLI library
//!
//! Subcommands for inspecting and maintaining the service permission cache,
//! plus the terminal consent prompt used when a grant has to be requested.

pub mod commands;
pub mod terminal;
