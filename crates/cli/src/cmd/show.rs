//! `lst show`: print what the store knows about one reference.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

use lightstore_lib::either::{EitherStatus, either_status};
use lightstore_lib::store::query::{
  dref_exists, rref_exists, store_buildtime, store_config, store_context, store_deps, store_group_id, store_rrefs_of,
  store_tag,
};
use lightstore_lib::{DRef, RRef, StorageSettings};

use super::{Reference, parse_reference};
use crate::output::{OutputFormat, print_json, print_stat, print_warning, symbols};

#[derive(Serialize)]
struct DerivationInfo {
  dref: String,
  path: String,
  config: Value,
  deps: Vec<String>,
  realizations: Vec<String>,
}

#[derive(Serialize)]
struct RealizationInfo {
  rref: String,
  path: String,
  tag: String,
  group: String,
  built: Option<String>,
  context: BTreeMap<String, Vec<String>>,
  status: EitherStatus,
}

pub fn cmd_show(settings: &StorageSettings, reference: &str, output: OutputFormat) -> Result<()> {
  match parse_reference(reference)? {
    Reference::Derivation(dref) => show_derivation(settings, &dref, output),
    Reference::Realization(rref) => show_realization(settings, &rref, output),
  }
}

fn show_derivation(settings: &StorageSettings, dref: &DRef, output: OutputFormat) -> Result<()> {
  if !dref_exists(settings, dref) {
    bail!("{} is not in the store", dref);
  }
  let config = store_config(settings, dref).with_context(|| format!("Failed to read config of {}", dref))?;
  let info = DerivationInfo {
    dref: dref.to_string(),
    path: settings.dref_path(dref).display().to_string(),
    config: config.into_value(),
    deps: store_deps(settings, dref)?.iter().map(ToString::to_string).collect(),
    realizations: store_rrefs_of(settings, dref)?.iter().map(ToString::to_string).collect(),
  };

  if output.is_json() {
    return print_json(&info);
  }
  println!("{}", info.dref);
  print_stat("Path", &info.path);
  print_stat("Dependencies", &info.deps.len().to_string());
  for dep in &info.deps {
    println!("    {} {}", symbols::ARROW, dep);
  }
  print_stat("Realizations", &info.realizations.len().to_string());
  for rref in &info.realizations {
    println!("    {} {}", symbols::INFO, rref);
  }
  println!();
  println!("{}", serde_json::to_string_pretty(&info.config)?);
  Ok(())
}

fn show_realization(settings: &StorageSettings, rref: &RRef, output: OutputFormat) -> Result<()> {
  if !rref_exists(settings, rref) {
    bail!("{} is not in the store", rref);
  }
  let context = store_context(settings, rref).with_context(|| format!("Failed to read context of {}", rref))?;
  let info = RealizationInfo {
    rref: rref.to_string(),
    path: settings.rref_path(rref).display().to_string(),
    tag: store_tag(settings, rref)?.to_string(),
    group: store_group_id(settings, rref)?,
    built: store_buildtime(settings, rref).map(|t| humantime::format_rfc3339_seconds(t).to_string()),
    context: context
      .iter()
      .map(|(dref, rrefs)| (dref.to_string(), rrefs.iter().map(ToString::to_string).collect()))
      .collect(),
    status: either_status(settings, rref)?,
  };

  if output.is_json() {
    return print_json(&info);
  }
  println!("{}", info.rref);
  print_stat("Path", &info.path);
  print_stat("Tag", &info.tag);
  print_stat("Group", &info.group);
  print_stat("Built", info.built.as_deref().unwrap_or("unknown"));
  print_stat("Context", &info.context.len().to_string());
  for (dref, rrefs) in &info.context {
    println!("    {} {}", symbols::ARROW, dref);
    for rref in rrefs {
      println!("        {}", rref);
    }
  }
  if let EitherStatus::Left { errors } = &info.status {
    for error in errors {
      print_warning(&format!("recorded failure: {}", error));
    }
  }
  Ok(())
}
