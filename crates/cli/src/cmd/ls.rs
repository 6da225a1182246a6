//! `lst ls`: list derivations or the realizations of one derivation.

use anyhow::{Context, Result};
use serde::Serialize;

use lightstore_lib::DRef;
use lightstore_lib::StorageSettings;
use lightstore_lib::store::query::{store_buildtime, store_drefs, store_group_id, store_rrefs_of, store_tag};

use crate::output::{OutputFormat, print_info, print_json, symbols};

#[derive(Serialize)]
struct DerivationEntry {
  dref: String,
  name: String,
  realizations: usize,
}

#[derive(Serialize)]
struct RealizationEntry {
  rref: String,
  tag: String,
  group: String,
  built: Option<String>,
}

pub fn cmd_ls(settings: &StorageSettings, dref: Option<&str>, output: OutputFormat) -> Result<()> {
  match dref {
    Some(dref) => {
      let dref = DRef::parse(dref).with_context(|| format!("Invalid derivation reference: {}", dref))?;
      list_realizations(settings, &dref, output)
    }
    None => list_derivations(settings, output),
  }
}

fn list_derivations(settings: &StorageSettings, output: OutputFormat) -> Result<()> {
  let mut entries = Vec::new();
  for dref in store_drefs(settings).context("Failed to list the store")? {
    let realizations = store_rrefs_of(settings, &dref)?.len();
    entries.push(DerivationEntry {
      dref: dref.to_string(),
      name: dref.name().to_string(),
      realizations,
    });
  }

  if output.is_json() {
    return print_json(&entries);
  }
  if entries.is_empty() {
    print_info("Store is empty");
    return Ok(());
  }
  for entry in &entries {
    println!("{} {} ({} realized)", symbols::INFO, entry.dref, entry.realizations);
  }
  Ok(())
}

fn list_realizations(settings: &StorageSettings, dref: &DRef, output: OutputFormat) -> Result<()> {
  let mut entries = Vec::new();
  for rref in store_rrefs_of(settings, dref)? {
    entries.push(RealizationEntry {
      tag: store_tag(settings, &rref)?.to_string(),
      group: store_group_id(settings, &rref)?,
      built: store_buildtime(settings, &rref).map(|t| humantime::format_rfc3339_seconds(t).to_string()),
      rref: rref.to_string(),
    });
  }

  if output.is_json() {
    return print_json(&entries);
  }
  if entries.is_empty() {
    print_info(&format!("No realizations of {}", dref));
    return Ok(());
  }
  for entry in &entries {
    let built = entry.built.as_deref().unwrap_or("-");
    println!("{} {} [{}] {}", symbols::INFO, entry.rref, entry.tag, built);
  }
  Ok(())
}
