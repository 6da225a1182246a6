use predicates::prelude::*;
use serde_json::Value;

use lightstore_lib::store::query::{dref_exists, rref_exists};

use super::common::TestEnv;

#[test]
fn gc_keeps_roots_and_their_dependencies() {
  let env = TestEnv::new();
  env
    .lst_cmd()
    .args(["gc", "--keep", &env.app.0.to_string()])
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));

  let settings = env.settings();
  assert!(rref_exists(&settings, &env.base.1));
  assert!(rref_exists(&settings, &env.app.1));
  assert!(!dref_exists(&settings, &env.stale.0));
}

#[test]
fn gc_keep_rref_pins_its_inputs() {
  let env = TestEnv::new();
  env
    .lst_cmd()
    .args(["gc", "--keep-rref", &env.app.1.to_string()])
    .assert()
    .success();

  let settings = env.settings();
  assert!(rref_exists(&settings, &env.base.1));
  assert!(rref_exists(&settings, &env.app.1));
  assert!(!rref_exists(&settings, &env.stale.1));
}

#[test]
fn gc_dry_run_json_reports_without_deleting() {
  let env = TestEnv::new();
  let out = env
    .lst_cmd()
    .args(["gc", "--dry-run", "-o", "json"])
    .output()
    .unwrap();
  assert!(out.status.success());

  let result: Value = serde_json::from_slice(&out.stdout).unwrap();
  assert_eq!(result["stats"]["drefs_deleted"], 3);
  assert_eq!(result["stats"]["rrefs_deleted"], 3);
  assert_eq!(result["deleted_paths"].as_array().unwrap().len(), 3);

  let settings = env.settings();
  for (dref, _) in [&env.base, &env.app, &env.stale] {
    assert!(dref_exists(&settings, dref));
  }
}
