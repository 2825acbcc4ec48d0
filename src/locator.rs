//! Resolving the managed application's executable
//!
//! The default lookup mirrors how an npm-installed `electron` package finds
//! its binary: `node_modules/<name>/path.txt` names a file under the
//! package's `dist/` directory. Failing that we try `node_modules/.bin`
//! and finally `PATH`.

use crate::error::LauncherError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Env var the electron package itself honours for a custom dist directory.
pub const DIST_OVERRIDE_ENV: &str = "ELECTRON_OVERRIDE_DIST_PATH";

/// Indirection that decides which binary `spawn` launches.
pub trait ExecutableLocator: Send + Sync {
    fn locate(&self) -> Result<PathBuf, LauncherError>;
}

/// Always returns the same path; a missing file surfaces as a spawn failure.
#[derive(Debug, Clone)]
pub struct FixedLocator {
    path: PathBuf,
}

impl FixedLocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExecutableLocator for FixedLocator {
    fn locate(&self) -> Result<PathBuf, LauncherError> {
        Ok(self.path.clone())
    }
}

/// Looks a package/program name up the way a JS project would.
#[derive(Debug, Clone)]
pub struct NamedLocator {
    name: String,
    search_root: PathBuf,
}

impl NamedLocator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_root = root.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn package_binary(&self, dir: &Path) -> Option<PathBuf> {
        let package = dir.join("node_modules").join(&self.name);
        let relative = fs::read_to_string(package.join("path.txt")).ok()?;
        let relative = relative.trim();
        if relative.is_empty() {
            return None;
        }

        let dist = match std::env::var_os(DIST_OVERRIDE_ENV) {
            Some(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => package.join("dist"),
        };
        let candidate = dist.join(relative);
        candidate.is_file().then_some(candidate)
    }

    fn bin_shim(&self, dir: &Path) -> Option<PathBuf> {
        let bin_dir = dir.join("node_modules").join(".bin");
        let mut names = vec![self.name.clone()];
        if cfg!(windows) {
            names.insert(0, format!("{}.cmd", self.name));
        }
        names
            .into_iter()
            .map(|name| bin_dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}

impl ExecutableLocator for NamedLocator {
    fn locate(&self) -> Result<PathBuf, LauncherError> {
        let as_path = Path::new(&self.name);
        if as_path.is_absolute() || as_path.components().count() > 1 {
            let path = if as_path.is_absolute() {
                as_path.to_path_buf()
            } else {
                self.search_root.join(as_path)
            };
            return if path.is_file() {
                Ok(path)
            } else {
                Err(LauncherError::ExecutableNotFound {
                    name: self.name.clone(),
                })
            };
        }

        for dir in self.search_root.ancestors() {
            if let Some(found) = self.package_binary(dir).or_else(|| self.bin_shim(dir)) {
                debug!("Resolved {} to {}", self.name, found.display());
                return Ok(found);
            }
        }

        which::which(&self.name).map_err(|_| LauncherError::ExecutableNotFound {
            name: self.name.clone(),
        })
    }
}

/// Treats anything that looks like a path as fixed, everything else as a name.
pub fn locator_for(name_or_path: &str, search_root: &Path) -> Box<dyn ExecutableLocator> {
    let candidate = Path::new(name_or_path);
    if candidate.is_absolute() {
        Box::new(FixedLocator::new(candidate))
    } else {
        Box::new(NamedLocator::new(name_or_path).with_search_root(search_root))
    }
}
