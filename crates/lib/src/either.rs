//! Failure as realized content.
//!
//! A realizer wrapped with [`either_wrapper`] never fails the realization:
//! its outcome is recorded in `either.json` inside the output. When any
//! dependency in the context recorded a failure, the wrapped function is not
//! run at all and the failure is passed on.

use std::fs;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::Context;
use crate::error::Result;
use crate::realize::build::Build;
use crate::realize::{OutputGroup, RealizeRequest, Realizer};
use crate::refs::RRef;
use crate::store::{StorageSettings, StoreError};

pub const EITHER_FILENAME: &str = "either.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EitherStatus {
  Right,
  Left { errors: Vec<String> },
}

impl EitherStatus {
  pub fn is_right(&self) -> bool {
    matches!(self, EitherStatus::Right)
  }
}

/// Status recorded in a realization. Outputs without `either.json` count as success.
pub fn either_status(settings: &StorageSettings, rref: &RRef) -> Result<EitherStatus> {
  let path = settings.rref_path(rref).join(EITHER_FILENAME);
  match fs::read_to_string(&path) {
    Ok(text) => Ok(serde_json::from_str(&text).map_err(|source| StoreError::Parse { path, source })?),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EitherStatus::Right),
    Err(source) => Err(StoreError::Read { path, source }.into()),
  }
}

pub fn is_right(settings: &StorageSettings, rref: &RRef) -> Result<bool> {
  Ok(either_status(settings, rref)?.is_right())
}

fn upstream_failures(settings: &StorageSettings, context: &Context) -> Result<Vec<String>> {
  let mut errors = Vec::new();
  for rref in context.rrefs() {
    if let EitherStatus::Left { errors: upstream } = either_status(settings, rref)? {
      errors.extend(upstream.into_iter().map(|e| format!("{}: {}", rref, e)));
    }
  }
  Ok(errors)
}

pub struct EitherWrapper<F> {
  f: F,
}

impl<F> Realizer for EitherWrapper<F>
where
  F: Fn(&mut Build<'_>) -> anyhow::Result<()> + Send + Sync,
{
  fn realize(&self, request: &RealizeRequest) -> anyhow::Result<Vec<OutputGroup>> {
    let mut build = Build::new(request)?;

    let upstream = upstream_failures(request.settings(), request.context())?;
    let status = if !upstream.is_empty() {
      EitherStatus::Left { errors: upstream }
    } else {
      match (self.f)(&mut build) {
        Ok(()) => EitherStatus::Right,
        Err(e) => {
          warn!(dref = %request.dref(), error = %e, "build failed, recording failure");
          EitherStatus::Left {
            errors: e.chain().map(|c| c.to_string()).collect(),
          }
        }
      }
    };

    fs::write(build.outpath().join(EITHER_FILENAME), serde_json::to_string(&status)?)?;
    Ok(build.into_outputs())
  }
}

/// Wrap a build function so that failures are stored instead of raised.
pub fn either_wrapper<F>(f: F) -> EitherWrapper<F>
where
  F: Fn(&mut Build<'_>) -> anyhow::Result<()> + Send + Sync,
{
  EitherWrapper { f }
}
