use anyhow::{Result, bail};

use lightstore_lib::StorageSettings;

use super::{Reference, parse_reference};
use crate::output::{OutputFormat, print_json};

pub fn cmd_path(settings: &StorageSettings, reference: &str, output: OutputFormat) -> Result<()> {
  let path = match parse_reference(reference)? {
    Reference::Derivation(dref) => settings.dref_path(&dref),
    Reference::Realization(rref) => settings.rref_path(&rref),
  };
  if !path.exists() {
    bail!("{} is not in the store", reference);
  }

  let path = dunce::simplified(&path);
  if output.is_json() {
    print_json(&serde_json::json!({ "reference": reference, "path": path }))
  } else {
    println!("{}", path.display());
    Ok(())
  }
}
