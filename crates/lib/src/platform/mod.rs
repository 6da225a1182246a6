//! Platform-specific filesystem helpers.

pub mod immutable;
pub mod paths;
