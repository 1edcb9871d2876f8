//! Mapping identities to storage roots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{StorageError, StorageResult};
use super::resolver::{validate_segment, RelativePath, StorageRoot};
use super::sanitize::sanitize_segment;
use super::tree::ensure_directory_chain;

/// Folders created in every freshly provisioned root.
pub const DEFAULT_FOLDERS: &[&str] = &["Documents", "Pictures", "Videos", "Downloads"];

/// An already-authenticated caller identity.
///
/// Always a single safe path segment, so `<base>/<identity>` cannot name
/// anything but a direct child of the base directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Validate and wrap an identity string.
    pub fn new(name: impl Into<String>) -> StorageResult<Self> {
        let name = name.into();
        validate_segment(&name)?;
        if sanitize_segment(&name).as_deref() != Some(name.as_str()) {
            return Err(StorageError::InvalidName(name));
        }
        Ok(Self(name))
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Tenancy mode as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenancyMode {
    /// One global root shared by every caller.
    #[default]
    Single,
    /// One root per identity beneath a common base.
    PerIdentity,
}

/// Where each caller's storage root lives.
#[derive(Debug, Clone)]
pub enum Tenancy {
    /// All callers share one root; identities are ignored.
    Single(StorageRoot),
    /// Each identity owns `<base>/<identity>`.
    PerIdentity {
        /// Directory holding one subdirectory per identity.
        base: StorageRoot,
    },
}

impl Tenancy {
    /// Build a tenancy over `base`, creating the directory if missing.
    pub fn create(mode: TenancyMode, base: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let root = StorageRoot::create(base)?;
        Ok(match mode {
            TenancyMode::Single => Tenancy::Single(root),
            TenancyMode::PerIdentity => Tenancy::PerIdentity { base: root },
        })
    }

    /// The configured mode.
    pub fn mode(&self) -> TenancyMode {
        match self {
            Tenancy::Single(_) => TenancyMode::Single,
            Tenancy::PerIdentity { .. } => TenancyMode::PerIdentity,
        }
    }

    /// Root for an existing identity.
    ///
    /// In per-identity mode a missing identity or an unprovisioned root
    /// fails with [`StorageError::UnknownIdentity`].
    pub fn root_for(&self, identity: Option<&Identity>) -> StorageResult<StorageRoot> {
        match self {
            Tenancy::Single(root) => Ok(root.clone()),
            Tenancy::PerIdentity { base } => {
                let identity = identity
                    .ok_or_else(|| StorageError::UnknownIdentity("<none>".to_string()))?;
                let rel = RelativePath::root().join(identity.as_str());
                let path = base.resolver().resolve(&rel).map_err(|e| match e {
                    StorageError::NotFound(_) => {
                        StorageError::UnknownIdentity(identity.to_string())
                    }
                    other => other,
                })?;
                StorageRoot::open(path)
            }
        }
    }

    /// Ensure a root exists for `identity` and holds the default folders.
    ///
    /// Idempotent; existing content is left untouched.
    pub fn provision<S: AsRef<str>>(
        &self,
        identity: Option<&Identity>,
        default_folders: &[S],
    ) -> StorageResult<StorageRoot> {
        let root = match self {
            Tenancy::Single(root) => root.clone(),
            Tenancy::PerIdentity { base } => {
                let identity = identity
                    .ok_or_else(|| StorageError::UnknownIdentity("<none>".to_string()))?;
                let rel = RelativePath::root().join(identity.as_str());
                StorageRoot::open(ensure_directory_chain(base, &rel)?)?
            }
        };

        for folder in default_folders {
            let name = validate_segment(folder.as_ref())?;
            let rel = RelativePath::root().join(name);
            ensure_directory_chain(&root, &rel)?;
            debug!(folder = %rel, "Default folder present");
        }

        info!(
            identity = identity.map(Identity::as_str).unwrap_or("<single>"),
            root = %root.path().display(),
            "Provisioned storage root"
        );
        Ok(root)
    }
}
