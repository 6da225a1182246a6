//! Reusable stages built on the core API.

pub mod fetchurl;

pub use fetchurl::{Checksum, FetchError, FetchMode, FetchUrl, fetchurl};
