use std::fs;

use lightstore_lib::either::{EITHER_FILENAME, either_status, is_right};
use lightstore_lib::{Build, Config, EitherStatus, RealizeOptions, either_wrapper, instantiate, match_only, realize_all};
use serde_json::json;

use super::common::{TestEnv, cfg};

#[test]
fn failures_are_recorded_and_propagated() {
  let env = TestEnv::new();
  let ([ok, bad, downstream], closure) = instantiate(&env.settings, |r| {
    let ok = r.mk_derivation(
      cfg(json!({"name": "ok"})),
      match_only(),
      either_wrapper(|b: &mut Build<'_>| {
        fs::write(b.outpath().join("out.txt"), "fine")?;
        Ok(())
      }),
    )?;
    let bad = r.mk_derivation(
      cfg(json!({"name": "bad"})),
      match_only(),
      either_wrapper(|_: &mut Build<'_>| anyhow::bail!("tests failed")),
    )?;
    let downstream = r.mk_derivation(
      Config::builder().name("downstream").dep("input", &bad).build()?,
      match_only(),
      either_wrapper(|b: &mut Build<'_>| {
        fs::write(b.outpath().join("ran.txt"), "should not run")?;
        Ok(())
      }),
    )?;
    Ok([ok, bad, downstream])
  })
  .unwrap();

  let ctx = realize_all(&closure, &RealizeOptions::new()).unwrap();
  let r_ok = &ctx.deref(&ok).unwrap()[0];
  let r_bad = &ctx.deref(&bad).unwrap()[0];
  let r_down = &ctx.deref(&downstream).unwrap()[0];

  assert!(is_right(&env.settings, r_ok).unwrap());
  assert_eq!(
    either_status(&env.settings, r_bad).unwrap(),
    EitherStatus::Left {
      errors: vec!["tests failed".to_string()]
    }
  );

  let EitherStatus::Left { errors } = either_status(&env.settings, r_down).unwrap() else {
    panic!("downstream should carry the upstream failure");
  };
  assert_eq!(errors.len(), 1);
  assert!(errors[0].starts_with(&r_bad.to_string()));
  assert!(errors[0].ends_with("tests failed"));
  assert!(!env.settings.rref_path(r_down).join("ran.txt").exists());
  assert!(env.settings.rref_path(r_down).join(EITHER_FILENAME).exists());
}
