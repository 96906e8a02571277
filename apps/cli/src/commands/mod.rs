//! Command implementations for the Cogflow CLI.

pub mod run;
pub mod validate;
