use std::fs;
use std::thread::sleep;
use std::time::Duration;

use lightstore_lib::group::store_groups;
use lightstore_lib::store::query::{store_buildtime, store_rrefs_of};
use lightstore_lib::{
  Build, Context, DRef, Matcher, OutputGroup, RRef, RealizeOptions, RealizeRequest, StorageSettings, build_wrapper,
  instantiate, match_best, match_exact, match_latest, realize,
};
use serde_json::json;

use super::common::{TestEnv, cfg, read_out, write_text};

/// Build `dref` once per argument, forcing a rebuild each time.
fn build_each(closure: &lightstore_lib::Closure, dref: &DRef, args: &[i64]) -> Vec<RRef> {
  args
    .iter()
    .map(|arg| {
      sleep(Duration::from_millis(5));
      realize(closure, &RealizeOptions::new().force(dref).arg(dref, *arg)).unwrap()
    })
    .collect()
}

#[test]
fn latest_selects_the_newest_build() {
  let env = TestEnv::new();
  let (dref, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(cfg(json!({"name": "nightly"})), match_latest(1, 1), write_text())
  })
  .unwrap();

  let built = build_each(&closure, &dref, &[1, 2, 3]);
  assert_eq!(read_out(&env.settings, &built[2]), "3");
  assert_eq!(store_rrefs_of(&env.settings, &dref).unwrap().len(), 3);

  // Without forcing, the cache answers with the newest.
  assert_eq!(realize(&closure, &RealizeOptions::new()).unwrap(), built[2]);
}

#[test]
fn best_selects_the_highest_score() {
  let env = TestEnv::new();
  let (dref, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(
      cfg(json!({"name": "tuned"})),
      match_best("score.txt", 1, 1),
      build_wrapper(|b: &mut Build<'_>| {
        let score = b.arg().and_then(|v| v.as_i64()).unwrap_or(0);
        fs::write(b.outpath().join("score.txt"), score.to_string())?;
        Ok(())
      }),
    )
  })
  .unwrap();

  let built = build_each(&closure, &dref, &[1, 3, 2]);
  // After each build the matcher answers with the best so far.
  assert_eq!(built[1], built[2]);
  assert_ne!(built[0], built[1]);
  let score = fs::read_to_string(env.settings.rref_path(&built[2]).join("score.txt")).unwrap();
  assert_eq!(score, "3");
}

#[test]
fn exact_selects_only_the_named_realizations() {
  let env = TestEnv::new();
  let (dref, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(cfg(json!({"name": "pinned"})), match_latest(1, 1), write_text())
  })
  .unwrap();
  let built = build_each(&closure, &dref, &[1, 2]);

  let ctx = Context::new();
  let s: &StorageSettings = &env.settings;
  let pick = match_exact(vec![built[0].clone()]);
  assert_eq!(pick.matches(s, &dref, &ctx).unwrap(), Some(vec![built[0].clone()]));

  let both = match_exact(built.clone());
  let mut selected = both.matches(s, &dref, &ctx).unwrap().unwrap();
  selected.sort();
  let mut expected = built.clone();
  expected.sort();
  assert_eq!(selected, expected);

  // An RRef that does not exist leaves the match short.
  let missing = RRef::new(&"f".repeat(32), dref.clone()).unwrap();
  assert_eq!(match_exact(vec![built[0].clone(), missing]).matches(s, &dref, &ctx).unwrap(), None);
}

#[test]
fn groups_are_filtered_by_context() {
  let env = TestEnv::new();
  let (dref, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(cfg(json!({"name": "alone", "text": "x"})), match_latest(1, 1), write_text())
  })
  .unwrap();
  realize(&closure, &RealizeOptions::new()).unwrap();

  assert_eq!(store_groups(&env.settings, &dref, &Context::new()).unwrap().len(), 1);

  let other = cfg(json!({"name": "other"})).dref();
  let mut ctx = Context::new();
  ctx.bind(other.clone(), vec![RRef::new(&"a".repeat(32), other).unwrap()]).unwrap();
  assert!(store_groups(&env.settings, &dref, &ctx).unwrap().is_empty());
}

#[test]
fn latest_accepts_outputs_built_without_the_helper() {
  let env = TestEnv::new();
  let (dref, closure) = instantiate(&env.settings, |r| {
    r.mk_derivation(
      cfg(json!({"name": "raw"})),
      match_latest(1, 1),
      |req: &RealizeRequest| -> anyhow::Result<Vec<OutputGroup>> {
        let out = req.make_outdir()?;
        fs::write(out.join("out.txt"), "raw")?;
        Ok(vec![OutputGroup::single(out)])
      },
    )
  })
  .unwrap();

  let rref = realize(&closure, &RealizeOptions::new()).unwrap();
  assert_eq!(rref.dref(), &dref);
  assert!(store_buildtime(&env.settings, &rref).is_some());
  assert_eq!(realize(&closure, &RealizeOptions::new()).unwrap(), rref);
}
