//! FHIR package loading.
//!
//! Packages are npm-style tarballs served by a FHIR package registry. A loaded
//! package is unpacked once into the cache directory as `{name}#{version}/`
//! and read from there on later starts.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::GzDecoder;
use serde_json::Value;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Resource types kept from a package.
const CONFORMANCE_TYPES: &[&str] = &["StructureDefinition", "ValueSet", "CodeSystem"];

/// Errors raised while fetching or reading a package.
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("invalid package reference '{0}'")]
    InvalidReference(String),

    #[error("registry request {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("package {package} has no published version")]
    NoVersion { package: String },

    #[error("package {package} archive is unreadable: {message}")]
    Archive { package: String, message: String },

    #[error("package {package} manifest is invalid: {message}")]
    InvalidManifest { package: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PackageError {
    /// Converts into an engine construction error for `package`.
    pub fn into_engine_error(self, package: &str) -> EngineError {
        EngineError::PackageLoad {
            package: package.to_string(),
            message: self.to_string(),
        }
    }
}

/// A package identifier, `name` or `name#version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    /// Package name, e.g. `hl7.fhir.r4.core`.
    pub name: String,
    /// Exact version; `None` means the registry's latest.
    pub version: Option<String>,
}

impl FromStr for PackageReference {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.split_once('#') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (s.trim(), None),
        };
        if name.is_empty() || version.is_some_and(str::is_empty) {
            return Err(PackageError::InvalidReference(s.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}#{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// The conformance resources of one package.
#[derive(Debug, Clone)]
pub struct Package {
    /// Package name from the manifest.
    pub name: String,
    /// Package version from the manifest.
    pub version: String,
    /// Packages named in the manifest's `dependencies`, in manifest order.
    pub dependencies: Vec<PackageReference>,
    /// StructureDefinition, ValueSet and CodeSystem resources.
    pub resources: Vec<Value>,
}

/// Fetches packages from a registry into a local cache.
#[derive(Debug, Clone)]
pub struct PackageLoader {
    client: reqwest::Client,
    registry: String,
    cache_dir: PathBuf,
}

impl PackageLoader {
    /// Creates a loader for `registry` caching into `cache_dir`.
    pub fn new(client: reqwest::Client, registry: &str, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            registry: registry.trim_end_matches('/').to_string(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Loads a package, downloading it if it is not cached yet.
    pub async fn load(&self, reference: &PackageReference) -> Result<Package, PackageError> {
        let version = match &reference.version {
            Some(version) => version.clone(),
            None => self.latest_version(&reference.name).await?,
        };
        let dir = self
            .cache_dir
            .join(format!("{}#{}", reference.name, version));

        if is_unpacked(&dir) {
            debug!(package = %reference.name, version = %version, "Using cached package");
        } else {
            info!(package = %reference.name, version = %version, "Downloading package");
            let archive = self.download(&reference.name, &version).await?;
            let target = dir.clone();
            let name = reference.name.clone();
            tokio::task::spawn_blocking(move || unpack(&name, &archive, &target))
                .await
                .map_err(|e| PackageError::Archive {
                    package: reference.name.clone(),
                    message: e.to_string(),
                })??;
        }

        let package = tokio::task::spawn_blocking(move || read_package_dir(&dir))
            .await
            .map_err(|e| PackageError::Archive {
                package: reference.name.clone(),
                message: e.to_string(),
            })??;
        info!(
            package = %package.name,
            version = %package.version,
            resources = package.resources.len(),
            "Loaded package"
        );
        Ok(package)
    }

    /// Asks the registry for the `latest` dist-tag of a package.
    async fn latest_version(&self, name: &str) -> Result<String, PackageError> {
        let url = format!("{}/{}", self.registry, name);
        let manifest: Value = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PackageError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| PackageError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;

        latest_from_manifest(&manifest).ok_or_else(|| PackageError::NoVersion {
            package: name.to_string(),
        })
    }

    async fn download(&self, name: &str, version: &str) -> Result<Vec<u8>, PackageError> {
        // npm-style tarball URL: {registry}/{package}/-/{package}-{version}.tgz
        let url = format!("{}/{}/-/{}-{}.tgz", self.registry, name, name, version);
        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PackageError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?
            .bytes()
            .await
            .map_err(|e| PackageError::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

/// Picks the latest version out of a registry manifest.
fn latest_from_manifest(manifest: &Value) -> Option<String> {
    manifest
        .get("dist-tags")
        .and_then(|tags| tags.get("latest"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_unpacked(dir: &Path) -> bool {
    dir.join("package").join("package.json").is_file()
}

/// Unpacks a gzipped package tarball into `dest`.
///
/// The archive is extracted into a staging directory next to `dest` and
/// renamed into place, so an interrupted extraction never looks like a cached
/// package. Every call stages into its own uniquely named directory; an
/// abandoned attempt that is still writing never shares one with a retry.
pub fn unpack(package: &str, archive: &[u8], dest: &Path) -> Result<(), PackageError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)?;

    Archive::new(GzDecoder::new(archive))
        .unpack(staging.path())
        .map_err(|e| PackageError::Archive {
            package: package.to_string(),
            message: e.to_string(),
        })?;

    if !is_unpacked(staging.path()) {
        return Err(PackageError::Archive {
            package: package.to_string(),
            message: "archive has no package/package.json".to_string(),
        });
    }

    if is_unpacked(dest) {
        debug!(package = %package, "Package was unpacked by another attempt");
        return Ok(());
    }
    // A directory without a manifest is the remains of an older layout or a
    // manual edit.
    match fs::remove_dir_all(dest) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    match fs::rename(staging.path(), dest) {
        Ok(()) => Ok(()),
        // Lost a race with a concurrent attempt that finished first.
        Err(_) if is_unpacked(dest) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reads the conformance resources of an unpacked package.
pub fn read_package_dir(dir: &Path) -> Result<Package, PackageError> {
    let package_dir = dir.join("package");
    let manifest_path = package_dir.join("package.json");
    let manifest: Value = serde_json::from_slice(&fs::read(&manifest_path)?).map_err(|e| {
        PackageError::InvalidManifest {
            package: dir.display().to_string(),
            message: e.to_string(),
        }
    })?;

    let field = |key: &str| {
        manifest
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PackageError::InvalidManifest {
                package: dir.display().to_string(),
                message: format!("missing '{}'", key),
            })
    };
    let name = field("name")?;
    let version = field("version")?;
    let dependencies = manifest
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .filter_map(|(name, version)| {
                    version.as_str().map(|version| PackageReference {
                        name: name.clone(),
                        version: Some(version.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut entries: Vec<PathBuf> = fs::read_dir(&package_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n != "package.json" && !n.starts_with('.'))
        })
        .collect();
    entries.sort();

    let mut resources = Vec::new();
    for path in entries {
        let content = fs::read(&path)?;
        match serde_json::from_slice::<Value>(&content) {
            Ok(resource) => {
                let keep = resource
                    .get("resourceType")
                    .and_then(Value::as_str)
                    .is_some_and(|rt| CONFORMANCE_TYPES.contains(&rt));
                if keep {
                    resources.push(resource);
                }
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable package file"),
        }
    }

    Ok(Package {
        name,
        version,
        dependencies,
        resources,
    })
}
