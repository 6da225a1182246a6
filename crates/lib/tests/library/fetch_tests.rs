use std::fs;
use std::io::{Cursor, Write};

use flate2::Compression;
use flate2::write::GzEncoder;
use lightstore_lib::stages::fetchurl::fetch_realizer;
use lightstore_lib::stages::FetchError;
use lightstore_lib::store::query::{store_config, store_drefs};
use lightstore_lib::{
  Build, Error, FetchMode, FetchUrl, RealizeOptions, build_wrapper, fetchurl, instantiate, match_only, realize,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;

use super::common::{TestEnv, cfg};

fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

fn is_hex32(s: &str) -> bool {
  s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

fn file_url(path: &std::path::Path) -> String {
  format!("file://{}", path.display())
}

#[test]
fn fetch_config_gets_stable_refs() {
  let env = TestEnv::new();
  let config = json!({"name": "fetchurl", "sha256": "0".repeat(64), "url": "http://x/y.tar.gz"});
  let plan = |r: &mut lightstore_lib::Registry| {
    r.mk_derivation(
      cfg(config.clone()),
      match_only(),
      build_wrapper(|b: &mut Build<'_>| {
        fs::write(b.outpath().join("y.tar.gz"), "not really a tarball")?;
        Ok(())
      }),
    )
  };

  let (first, _) = instantiate(&env.settings, plan).unwrap();
  let (dref, closure) = instantiate(&env.settings, plan).unwrap();
  assert_eq!(first, dref);
  assert_eq!(store_drefs(&env.settings).unwrap().len(), 1);

  let text = dref.to_string();
  let rest = text.strip_prefix("dref:").unwrap();
  let (hash, name) = rest.split_once('-').unwrap();
  assert!(is_hex32(hash));
  assert_eq!(name, "fetchurl");

  let rref = realize(&closure, &RealizeOptions::new()).unwrap();
  let text = rref.to_string();
  let parts: Vec<&str> = text.strip_prefix("rref:").unwrap().splitn(3, '-').collect();
  assert!(is_hex32(parts[0]));
  assert_eq!(parts[1], hash);
  assert_eq!(parts[2], "fetchurl");

  let again = realize(&closure, &RealizeOptions::new()).unwrap();
  assert_eq!(again.to_string(), text);
}

#[test]
fn fetches_local_file_as_is() {
  let env = TestEnv::new();
  let payload = b"hello from upstream\n";
  let source = env.write_file("hello.txt", payload);
  let request = FetchUrl::new(&file_url(&source), &sha256_hex(payload));

  let (_, closure) = instantiate(&env.settings, |r| fetchurl(r, &request)).unwrap();
  let rref = realize(&closure, &RealizeOptions::new()).unwrap();
  assert_eq!(rref.name(), "fetchurl");
  assert_eq!(fs::read(env.settings.rref_path(&rref).join("hello.txt")).unwrap(), payload);

  // A second fetch is answered from the store.
  fs::remove_file(&source).unwrap();
  assert_eq!(realize(&closure, &RealizeOptions::new()).unwrap(), rref);
}

#[test]
fn checksum_mismatch_is_a_build_failure() {
  let env = TestEnv::new();
  let source = env.write_file("tampered.txt", b"tampered");
  let request = FetchUrl::new(&file_url(&source), &sha256_hex(b"original")).name("pinned-src");

  let (dref, closure) = instantiate(&env.settings, |r| fetchurl(r, &request)).unwrap();
  let err = realize(&closure, &RealizeOptions::new()).unwrap_err();
  let Error::Build { dref: failed, source, .. } = err else {
    panic!("expected a build error, got {err:?}");
  };
  assert_eq!(failed, dref);
  assert!(matches!(
    source.downcast_ref::<FetchError>(),
    Some(FetchError::HashMismatch { .. })
  ));
}

#[test]
fn unpacks_tarballs() {
  let env = TestEnv::new();

  let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
  let content = b"int main() { return 0; }\n";
  let mut header = tar::Header::new_gnu();
  header.set_size(content.len() as u64);
  header.set_mode(0o644);
  header.set_cksum();
  archive
    .append_data(&mut header, "pkg-1.0/src/main.c", &content[..])
    .unwrap();
  let bytes = archive.into_inner().unwrap().finish().unwrap();

  let source = env.write_file("pkg-1.0.tar.gz", &bytes);
  let request = FetchUrl::new(&file_url(&source), &sha256_hex(&bytes)).mode(FetchMode::Unpack);

  let (_, closure) = instantiate(&env.settings, |r| fetchurl(r, &request)).unwrap();
  let rref = realize(&closure, &RealizeOptions::new()).unwrap();
  let unpacked = env.settings.rref_path(&rref).join("pkg-1.0").join("src").join("main.c");
  assert_eq!(fs::read(unpacked).unwrap(), content);
}

fn sha1_hex(bytes: &[u8]) -> String {
  hex::encode(sha1::Sha1::digest(bytes))
}

#[test]
fn sha1_pinned_fetch_is_verified() {
  let env = TestEnv::new();
  let payload = b"legacy release";
  let source = env.write_file("legacy.txt", payload);
  let request = FetchUrl::sha1(&file_url(&source), &sha1_hex(payload)).name("legacy");

  let (_, closure) = instantiate(&env.settings, |r| fetchurl(r, &request)).unwrap();
  let rref = realize(&closure, &RealizeOptions::new()).unwrap();
  let config = store_config(&env.settings, rref.dref()).unwrap();
  assert_eq!(config.get_str("sha1"), Some(sha1_hex(payload).as_str()));
  assert_eq!(fs::read(env.settings.rref_path(&rref).join("legacy.txt")).unwrap(), payload);
}

#[test]
fn sha1_mismatch_is_a_build_failure() {
  let env = TestEnv::new();
  let source = env.write_file("legacy.txt", b"swapped upstream");
  let config = cfg(json!({"name": "fetchurl", "url": file_url(&source), "sha1": sha1_hex(b"legacy release")}));

  let (_, closure) = instantiate(&env.settings, |r| r.mk_derivation(config, match_only(), fetch_realizer())).unwrap();
  let err = realize(&closure, &RealizeOptions::new()).unwrap_err();
  let Error::Build { source, .. } = err else {
    panic!("expected a build error, got {err:?}");
  };
  match source.downcast_ref::<FetchError>() {
    Some(FetchError::HashMismatch { expected, actual, .. }) => {
      assert_eq!(expected, &sha1_hex(b"legacy release"));
      assert_eq!(actual, &sha1_hex(b"swapped upstream"));
    }
    other => panic!("expected a checksum mismatch, got {other:?}"),
  }
}

#[test]
fn unpacks_zip_archives() {
  let env = TestEnv::new();

  let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
  let options = || SimpleFileOptions::default().unix_permissions(0o755);
  writer.add_directory("tool-2.0/", options()).unwrap();
  writer.start_file("tool-2.0/bin/tool", options()).unwrap();
  writer.write_all(b"#!/bin/sh\necho tool\n").unwrap();
  let bytes = writer.finish().unwrap().into_inner();

  let source = env.write_file("tool-2.0.zip", &bytes);
  let request = FetchUrl::new(&file_url(&source), &sha256_hex(&bytes)).mode(FetchMode::Unpack);

  let (_, closure) = instantiate(&env.settings, |r| fetchurl(r, &request)).unwrap();
  let rref = realize(&closure, &RealizeOptions::new()).unwrap();
  let tool = env.settings.rref_path(&rref).join("tool-2.0").join("bin").join("tool");
  assert_eq!(fs::read(&tool).unwrap(), b"#!/bin/sh\necho tool\n");

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    // Published outputs keep the execute bit, read-only.
    assert_eq!(fs::metadata(&tool).unwrap().permissions().mode() & 0o777, 0o555);
  }
}
