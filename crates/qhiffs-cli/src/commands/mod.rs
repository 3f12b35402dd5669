//! CLI command implementations.

pub mod common;
pub mod run;
pub mod validate;
pub mod version;
