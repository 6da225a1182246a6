use std::fs;

use lightstore_lib::recursion::active_frames;
use lightstore_lib::store::query::{store_config, store_drefs};
use lightstore_lib::{Config, Error, RealizeOptions, Registry, instantiate, instantiate_with, match_only, realize};
use serde_json::json;

use super::common::{TestEnv, cfg, write_text};

#[test]
fn equal_canonical_configs_share_a_dref() {
  let env = TestEnv::new();
  let a = Config::parse(r#"{"name": "pkg", "version": 2, "opts": {"b": 1, "a": [1, 2]}}"#).unwrap();
  let b = Config::parse(r#"{"opts": {"a": [1, 2], "b": 1}, "version": 2, "name": "pkg"}"#).unwrap();
  assert_eq!(a.canonical(), b.canonical());
  assert_eq!(a.compute_hash(), b.compute_hash());

  let ((da, db), _) = instantiate(&env.settings, |r| {
    let da = r.mk_derivation(a.clone(), match_only(), write_text())?;
    let db = r.mk_derivation(b.clone(), match_only(), write_text())?;
    Ok((da, db))
  })
  .unwrap();
  assert_eq!(da, db);
  assert_eq!(store_drefs(&env.settings).unwrap(), vec![da]);
}

#[test]
fn instantiating_twice_leaves_the_store_unchanged() {
  let env = TestEnv::new();
  let plan = |r: &mut Registry| {
    let base = r.mk_derivation(cfg(json!({"name": "base", "text": "x"})), match_only(), write_text())?;
    r.mk_derivation(
      Config::builder().name("top").dep("src", &base).build()?,
      match_only(),
      write_text(),
    )
  };

  let (first, _) = instantiate(&env.settings, plan).unwrap();
  let listing = store_drefs(&env.settings).unwrap();
  let config_text = fs::read_to_string(env.settings.config_path(&first)).unwrap();

  let (second, closure) = instantiate(&env.settings, plan).unwrap();
  assert_eq!(first, second);
  assert_eq!(store_drefs(&env.settings).unwrap(), listing);
  assert_eq!(fs::read_to_string(env.settings.config_path(&second)).unwrap(), config_text);
  assert_eq!(closure.len(), 2);
  assert_eq!(store_config(&env.settings, &second).unwrap().name(), "top");
}

#[test]
fn closure_contains_only_what_the_targets_need() {
  let env = TestEnv::new();
  let (top, closure) = instantiate(&env.settings, |r| {
    let a = r.mk_derivation(cfg(json!({"name": "a"})), match_only(), write_text())?;
    r.mk_derivation(cfg(json!({"name": "unused"})), match_only(), write_text())?;
    r.mk_derivation(
      Config::builder().name("b").dep("a", &a).build()?,
      match_only(),
      write_text(),
    )
  })
  .unwrap();

  let names: Vec<&str> = closure.derivations().iter().map(|d| d.dref.name()).collect();
  assert_eq!(names, vec!["a", "b"]);
  assert_eq!(closure.target().unwrap(), &top);
  // The unused derivation is still written to the store.
  assert_eq!(store_drefs(&env.settings).unwrap().len(), 3);
}

#[test]
fn multiple_targets_are_not_singular() {
  let env = TestEnv::new();
  let (_, closure) = instantiate(&env.settings, |r| {
    let a = r.mk_derivation(cfg(json!({"name": "a"})), match_only(), write_text())?;
    let b = r.mk_derivation(cfg(json!({"name": "b"})), match_only(), write_text())?;
    Ok(vec![a, b])
  })
  .unwrap();

  assert!(matches!(closure.target(), Err(Error::MultipleTargets { count: 2 })));
  assert!(matches!(
    realize(&closure, &RealizeOptions::new()),
    Err(Error::MultipleTargets { .. })
  ));
}

#[test]
fn strict_registry_rejects_rebinding() {
  let env = TestEnv::new();
  let registry = Registry::new(env.settings.clone()).strict();
  let err = instantiate_with(registry, |r| {
    r.mk_derivation(cfg(json!({"name": "twice"})), match_only(), write_text())?;
    r.mk_derivation(cfg(json!({"name": "twice"})), match_only(), write_text())
  })
  .unwrap_err();
  assert!(matches!(err, Error::Rebind { .. }));
}

#[test]
fn realize_inside_a_plan_is_rejected() {
  let env = TestEnv::new();
  let settings = env.settings.clone();
  let err = instantiate(&env.settings, |r| {
    let a = r.mk_derivation(cfg(json!({"name": "a"})), match_only(), write_text())?;
    let (_, inner) = instantiate(&settings, |_| Ok(a.clone())).map_err(|e| {
      assert!(matches!(e, Error::Recursion { .. }));
      e
    })?;
    realize(&inner, &RealizeOptions::new())?;
    Ok(a)
  })
  .unwrap_err();
  assert!(matches!(err, Error::Recursion { .. }));
  assert!(active_frames().is_empty());
}

#[test]
fn realize_inside_a_realizer_is_rejected() {
  let env = TestEnv::new();
  let settings = env.settings.clone();
  let (_, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(
      cfg(json!({"name": "nested"})),
      match_only(),
      move |_: &lightstore_lib::RealizeRequest| -> anyhow::Result<Vec<lightstore_lib::OutputGroup>> {
        let (_, inner) = instantiate(&settings, |r2| {
          r2.mk_derivation(cfg(json!({"name": "inner"})), match_only(), write_text())
        })?;
        realize(&inner, &RealizeOptions::new())?;
        Ok(Vec::new())
      },
    )
  })
  .unwrap();

  let err = realize(&closure, &RealizeOptions::new()).unwrap_err();
  let Error::Build { source, .. } = err else {
    panic!("expected a build error, got {err:?}");
  };
  assert!(matches!(source.downcast_ref::<Error>(), Some(Error::Recursion { .. })));
  assert!(active_frames().is_empty());
}

#[test]
fn panicking_realizer_releases_the_guard() {
  let env = TestEnv::new();
  let (_, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(
      cfg(json!({"name": "boom"})),
      match_only(),
      lightstore_lib::build_wrapper(|_: &mut lightstore_lib::Build<'_>| -> anyhow::Result<()> { panic!("boom") }),
    )
  })
  .unwrap();

  let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
    realize(&closure, &RealizeOptions::new())
  }));
  assert!(result.is_err());
  assert!(active_frames().is_empty());

  // The thread can instantiate again afterwards.
  assert!(instantiate(&env.settings, |r| r.mk_derivation(cfg(json!({"name": "after"})), match_only(), write_text())).is_ok());
}
