//! lightstore-lib: a content-addressed build/cache store.
//!
//! A caller describes computations as derivations: a hashable [`Config`]
//! plus a [`Matcher`] and a [`Realizer`]. The crate provides:
//! - `refs` / `config`: stable identifiers derived from configuration hashes
//! - `store`: the on-disk layout with atomic staging+rename commits
//! - `instantiate`: turning a plan function into a deduplicated [`Closure`]
//! - `realize`: walking a closure, reusing or building realizations
//! - `matcher` / `group`: policies deciding which realizations satisfy a request
//! - `gc`: reachability-based classification and an explicit sweep step
//! - `either` / `stages`: failure-as-content wrapping and a URL fetch stage

pub mod consts;
pub mod context;
pub mod config;
pub mod either;
pub mod error;
pub mod gc;
pub mod graph;
pub mod group;
pub mod instantiate;
pub mod matcher;
pub mod platform;
pub mod realize;
pub mod recursion;
pub mod refs;
pub mod stages;
pub mod store;
pub mod store_lock;
pub mod util;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use context::Context;
pub use either::{EitherStatus, either_wrapper};
pub use error::{Error, Result};
pub use gc::{GcPlan, GcResult, GcStats, gc_drefs, gc_plan, gc_rrefs, sweep};
pub use graph::{Closure, Derivation, Targets};
pub use group::Group;
pub use instantiate::{Registry, instantiate, instantiate_with, mk_derivation};
pub use matcher::{MatchPolicy, Matcher, match_all, match_best, match_exact, match_latest, match_only, match_some};
pub use realize::build::{Build, build_wrapper, build_wrapper_n};
pub use realize::{
  OutputGroup, RealizeOptions, RealizeRequest, Realizer, realize, realize_all, realize_groups, realize_many,
};
pub use refs::{DRef, RRef, RefError, Tag};
pub use stages::{FetchMode, FetchUrl, fetchurl};
pub use store::StorageSettings;
pub use store_lock::{LockMode, StoreLock};
