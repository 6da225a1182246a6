//! Names and sizes shared across the store layout.

pub const APP_NAME: &str = "lightstore";

/// Number of hex characters kept from a SHA-256 digest in DRef/RRef hashes.
pub const REF_HASH_LEN: usize = 32;

pub const DREF_PREFIX: &str = "dref:";
pub const RREF_PREFIX: &str = "rref:";

pub const CONFIG_FILENAME: &str = "config.json";
pub const CONTEXT_FILENAME: &str = "context.json";
pub const GROUPS_FILENAME: &str = "groups.json";
pub const BUILDTIME_FILENAME: &str = "__buildtime__.txt";
pub const LOCK_FILENAME: &str = ".lock";

pub const DEFAULT_TAG: &str = "out";
pub const DEFAULT_NAME: &str = "unnamed";

pub const PROMISE_MARKER: &str = "__promise__";
pub const CLAIM_MARKER: &str = "__claim__";

pub const ROOT_ENV: &str = "LIGHTSTORE_ROOT";
pub const STORE_ENV: &str = "LIGHTSTORE_STORE";
pub const TMP_ENV: &str = "LIGHTSTORE_TMP";

/// Whether a top-level entry of a realization directory is store metadata.
///
/// Metadata is excluded from output hashing and stays writable after commit.
pub fn is_reserved_name(name: &str) -> bool {
  name.starts_with('_') || name == CONTEXT_FILENAME || name == GROUPS_FILENAME
}
