//! Fetch a URL into the store, verifying its checksum.
//!
//! The config is `{name, url, sha256 | sha1, mode, filename?}`. With mode
//! `asis` the download is stored as `<filename>`; with `unpack` a `.tar`,
//! `.tar.gz`, `.tgz` or `.zip` archive is extracted into the output instead.
//! `file://` URLs are read from the local filesystem.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::instantiate::Registry;
use crate::matcher::match_only;
use crate::realize::Realizer;
use crate::realize::build::{Build, build_wrapper};
use crate::refs::DRef;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to fetch {url}: {message}")]
  Http { url: String, message: String },

  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("unsupported URL scheme: {0}")]
  UnsupportedScheme(String),

  #[error("missing checksum for {0}")]
  MissingChecksum(String),

  #[error("cannot unpack '{0}': expected .tar, .tar.gz, .tgz or .zip")]
  UnsupportedArchive(String),

  #[error("invalid zip archive {filename}: {source}")]
  Zip {
    filename: String,
    #[source]
    source: zip::result::ZipError,
  },

  #[error("unknown fetch mode '{0}'")]
  UnknownMode(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
  /// Store the downloaded file unchanged.
  #[default]
  Asis,
  /// Extract the downloaded archive.
  Unpack,
}

impl FetchMode {
  fn as_str(&self) -> &'static str {
    match self {
      FetchMode::Asis => "asis",
      FetchMode::Unpack => "unpack",
    }
  }

  fn parse(s: &str) -> Result<Self, FetchError> {
    match s {
      "asis" => Ok(FetchMode::Asis),
      "unpack" => Ok(FetchMode::Unpack),
      other => Err(FetchError::UnknownMode(other.to_string())),
    }
  }
}

/// Expected digest of the downloaded bytes, lowercase or uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
  Sha256(String),
  Sha1(String),
}

impl Checksum {
  /// The config key the digest is stored under.
  pub fn key(&self) -> &'static str {
    match self {
      Checksum::Sha256(_) => "sha256",
      Checksum::Sha1(_) => "sha1",
    }
  }

  pub fn expected(&self) -> &str {
    match self {
      Checksum::Sha256(hex) | Checksum::Sha1(hex) => hex,
    }
  }

  /// Read the checksum from a config; `sha256` wins when both are present.
  fn from_config(config: &Config) -> Option<Self> {
    config
      .get_str("sha256")
      .map(|h| Checksum::Sha256(h.to_string()))
      .or_else(|| config.get_str("sha1").map(|h| Checksum::Sha1(h.to_string())))
  }

  fn digest(&self, bytes: &[u8]) -> String {
    match self {
      Checksum::Sha256(_) => hex::encode(Sha256::digest(bytes)),
      Checksum::Sha1(_) => hex::encode(Sha1::digest(bytes)),
    }
  }

  /// Compare against the digest of `bytes`.
  pub fn verify(&self, url: &str, bytes: &[u8]) -> Result<(), FetchError> {
    let actual = self.digest(bytes);
    if !actual.eq_ignore_ascii_case(self.expected()) {
      return Err(FetchError::HashMismatch {
        url: url.to_string(),
        expected: self.expected().to_string(),
        actual,
      });
    }
    debug!(algorithm = self.key(), digest = %actual, "checksum verified");
    Ok(())
  }
}

/// Parameters of a fetch stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchUrl {
  pub name: String,
  pub url: String,
  pub checksum: Checksum,
  pub mode: FetchMode,
  pub filename: Option<String>,
}

impl FetchUrl {
  pub fn new(url: &str, sha256: &str) -> Self {
    Self::with_checksum(url, Checksum::Sha256(sha256.to_string()))
  }

  /// A fetch pinned by a SHA-1 digest, for upstreams that publish no other.
  pub fn sha1(url: &str, sha1: &str) -> Self {
    Self::with_checksum(url, Checksum::Sha1(sha1.to_string()))
  }

  pub fn with_checksum(url: &str, checksum: Checksum) -> Self {
    Self {
      name: "fetchurl".to_string(),
      url: url.to_string(),
      checksum,
      mode: FetchMode::Asis,
      filename: None,
    }
  }

  pub fn name(mut self, name: &str) -> Self {
    self.name = name.to_string();
    self
  }

  pub fn mode(mut self, mode: FetchMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn filename(mut self, filename: &str) -> Self {
    self.filename = Some(filename.to_string());
    self
  }

  pub fn to_config(&self) -> Result<Config> {
    let mut builder = Config::builder()
      .name(&self.name)
      .set("url", self.url.as_str())
      .set(self.checksum.key(), self.checksum.expected())
      .set("mode", self.mode.as_str());
    if let Some(filename) = &self.filename {
      builder = builder.set("filename", Value::String(filename.clone()));
    }
    Ok(builder.build()?)
  }
}

/// Register a fetch stage. The stage is realized at most once per config.
pub fn fetchurl(registry: &mut Registry, request: &FetchUrl) -> Result<DRef> {
  registry.mk_derivation(request.to_config()?, match_only(), fetch_realizer())
}

/// The realizer behind [`fetchurl`], for configs written by hand.
pub fn fetch_realizer() -> impl Realizer + 'static {
  build_wrapper(fetch_build)
}

fn fetch_build(build: &mut Build<'_>) -> anyhow::Result<()> {
  let config = build.config();
  let url = config.require_str("url")?;
  let checksum = Checksum::from_config(config).ok_or_else(|| FetchError::MissingChecksum(url.to_string()))?;
  let mode = FetchMode::parse(config.get_str("mode").unwrap_or("asis"))?;
  let filename = config
    .get_str("filename")
    .map(str::to_string)
    .unwrap_or_else(|| url_to_filename(url));

  let bytes = download(url)?;
  checksum.verify(url, &bytes)?;

  match mode {
    FetchMode::Asis => {
      fs::write(build.outpath().join(&filename), &bytes).map_err(FetchError::from)?;
    }
    FetchMode::Unpack => unpack(&filename, &bytes, build.outpath())?,
  }
  info!(url = %url, size = bytes.len(), mode = mode.as_str(), "fetched");
  Ok(())
}

/// Read the content behind `url`.
pub fn download(url: &str) -> Result<Vec<u8>, FetchError> {
  if let Some(path) = url.strip_prefix("file://") {
    debug!(path = %path, "reading local file");
    return Ok(fs::read(path)?);
  }
  if !(url.starts_with("http://") || url.starts_with("https://")) {
    return Err(FetchError::UnsupportedScheme(url.to_string()));
  }

  info!(url = %url, "fetching URL");
  let http_err = |e: reqwest::Error| FetchError::Http {
    url: url.to_string(),
    message: e.to_string(),
  };
  let response = reqwest::blocking::get(url).map_err(http_err)?;
  if !response.status().is_success() {
    return Err(FetchError::Http {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }
  Ok(response.bytes().map_err(http_err)?.to_vec())
}

fn unpack(filename: &str, bytes: &[u8], dest: &Path) -> Result<(), FetchError> {
  if filename.ends_with(".zip") {
    return unpack_zip(filename, bytes, dest);
  }
  let reader: Box<dyn Read> = if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
    Box::new(GzDecoder::new(Cursor::new(bytes)))
  } else if filename.ends_with(".tar") {
    Box::new(Cursor::new(bytes))
  } else {
    return Err(FetchError::UnsupportedArchive(filename.to_string()));
  };
  Archive::new(reader).unpack(dest)?;
  Ok(())
}

fn unpack_zip(filename: &str, bytes: &[u8], dest: &Path) -> Result<(), FetchError> {
  let zip_err = |source| FetchError::Zip {
    filename: filename.to_string(),
    source,
  };
  let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;
  for index in 0..archive.len() {
    let mut entry = archive.by_index(index).map_err(zip_err)?;
    // Entries escaping the output directory are skipped.
    let Some(relative) = entry.enclosed_name() else {
      continue;
    };
    let target = dest.join(relative);
    if entry.is_dir() {
      fs::create_dir_all(&target)?;
      continue;
    }
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }
    io::copy(&mut entry, &mut fs::File::create(&target)?)?;

    #[cfg(unix)]
    if let Some(mode) = entry.unix_mode() {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
    }
  }
  Ok(())
}

/// Convert a URL to a safe filename: the last path component, sanitized,
/// or a hash of the URL when nothing usable remains.
fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." && !sanitized.starts_with('_') {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download-{}", &hex::encode(hasher.finalize())[..16])
}
