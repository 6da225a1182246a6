mod gc;
mod ls;
mod path;
mod show;

use anyhow::{Context, Result};

use lightstore_lib::consts::RREF_PREFIX;
use lightstore_lib::{DRef, RRef};

pub use gc::cmd_gc;
pub use ls::cmd_ls;
pub use path::cmd_path;
pub use show::cmd_show;

/// A reference given on the command line.
pub enum Reference {
  Derivation(DRef),
  Realization(RRef),
}

pub fn parse_reference(s: &str) -> Result<Reference> {
  if s.starts_with(RREF_PREFIX) {
    let rref = RRef::parse(s).with_context(|| format!("Invalid reference: {}", s))?;
    Ok(Reference::Realization(rref))
  } else {
    let dref = DRef::parse(s).with_context(|| format!("Invalid reference: {}", s))?;
    Ok(Reference::Derivation(dref))
  }
}
