use predicates::prelude::*;
use serde_json::Value;

use super::common::TestEnv;

#[test]
fn ls_lists_every_derivation() {
  let env = TestEnv::new();
  env
    .lst_cmd()
    .arg("ls")
    .assert()
    .success()
    .stdout(predicate::str::contains(env.base.0.to_string()))
    .stdout(predicate::str::contains(env.app.0.to_string()))
    .stdout(predicate::str::contains(env.stale.0.to_string()));
}

#[test]
fn ls_json_counts_realizations() {
  let env = TestEnv::new();
  let out = env.lst_cmd().args(["ls", "-o", "json"]).output().unwrap();
  assert!(out.status.success());
  let entries: Value = serde_json::from_slice(&out.stdout).unwrap();
  let entries = entries.as_array().unwrap();
  assert_eq!(entries.len(), 3);
  assert!(entries.iter().all(|e| e["realizations"] == 1));
}

#[test]
fn ls_of_a_derivation_lists_its_realizations() {
  let env = TestEnv::new();
  env
    .lst_cmd()
    .args(["ls", &env.app.0.to_string()])
    .assert()
    .success()
    .stdout(predicate::str::contains(env.app.1.to_string()))
    .stdout(predicate::str::contains("[out]"));
}

#[test]
fn show_derivation_prints_config_and_deps() {
  let env = TestEnv::new();
  let out = env
    .lst_cmd()
    .args(["show", &env.app.0.to_string(), "-o", "json"])
    .output()
    .unwrap();
  assert!(out.status.success());
  let info: Value = serde_json::from_slice(&out.stdout).unwrap();
  assert_eq!(info["config"]["name"], "app");
  assert_eq!(info["deps"], serde_json::json!([env.base.0.to_string()]));
  assert_eq!(info["realizations"], serde_json::json!([env.app.1.to_string()]));
}

#[test]
fn show_realization_prints_context() {
  let env = TestEnv::new();
  let out = env
    .lst_cmd()
    .args(["show", &env.app.1.to_string(), "-o", "json"])
    .output()
    .unwrap();
  assert!(out.status.success());
  let info: Value = serde_json::from_slice(&out.stdout).unwrap();
  assert_eq!(info["tag"], "out");
  assert_eq!(info["status"]["status"], "right");
  assert_eq!(
    info["context"][env.base.0.to_string()],
    serde_json::json!([env.base.1.to_string()])
  );
}

#[test]
fn path_points_into_the_store() {
  let env = TestEnv::new();
  let out = env.lst_cmd().args(["path", &env.base.1.to_string()]).output().unwrap();
  assert!(out.status.success());
  let path = String::from_utf8(out.stdout).unwrap();
  let path = std::path::Path::new(path.trim());
  assert_eq!(std::fs::read_to_string(path.join("out.txt")).unwrap(), "base");
  assert_eq!(
    dunce::canonicalize(path).unwrap(),
    dunce::canonicalize(env.settings().rref_path(&env.base.1)).unwrap()
  );
}
