// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use directories::BaseDirs;
use std::path::{Path, PathBuf};
use tracing::warn;

const APP_DIR: &str = "suricasta-console";

pub trait PathProvider {
    fn config_dir(&self) -> PathBuf;
    fn data_dir(&self) -> PathBuf;
    fn cache_dir(&self) -> PathBuf;

    fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    fn state_file(&self) -> PathBuf {
        self.data_dir().join("state.yaml")
    }

    /// Where ruleset exports land by default.
    fn export_dir(&self) -> PathBuf {
        self.data_dir().join("rulesets")
    }
}

pub struct UnixSystemPaths;

impl PathProvider for UnixSystemPaths {
    fn config_dir(&self) -> PathBuf {
        PathBuf::from("/etc").join(APP_DIR)
    }

    fn data_dir(&self) -> PathBuf {
        PathBuf::from("/var/lib").join(APP_DIR)
    }

    fn cache_dir(&self) -> PathBuf {
        PathBuf::from("/var/cache").join(APP_DIR)
    }
}

pub struct UserPaths {
    base_dirs: BaseDirs,
}

impl UserPaths {
    pub fn new() -> Option<Self> {
        BaseDirs::new().map(|base_dirs| Self { base_dirs })
    }
}

impl PathProvider for UserPaths {
    fn config_dir(&self) -> PathBuf {
        self.base_dirs.config_dir().join(APP_DIR)
    }

    fn data_dir(&self) -> PathBuf {
        self.base_dirs.data_local_dir().join(APP_DIR)
    }

    fn cache_dir(&self) -> PathBuf {
        self.base_dirs.cache_dir().join(APP_DIR)
    }
}

/// Paths rooted in one directory, used by tests and `--root`.
pub struct RootedPaths {
    root: PathBuf,
}

impl RootedPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PathProvider for RootedPaths {
    fn config_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    fn data_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }
}

pub fn get_path_provider(user_mode: bool, root: Option<&Path>) -> Box<dyn PathProvider> {
    if let Some(root) = root {
        return Box::new(RootedPaths::new(root));
    }
    if user_mode {
        match UserPaths::new() {
            Some(paths) => Box::new(paths),
            None => {
                warn!("Could not determine user directories, falling back to system paths");
                Box::new(UnixSystemPaths)
            }
        }
    } else {
        Box::new(UnixSystemPaths)
    }
}

pub fn ensure_dir_exists(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                anyhow::anyhow!("Permission denied creating directory {}", path.display())
            } else {
                anyhow::anyhow!("Failed to create directory {}: {}", path.display(), e)
            }
        })?;
    }
    Ok(())
}
