// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::AuditLog;
use crate::catalog::Catalog;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub catalog: Catalog,
    #[serde(default)]
    pub audit: AuditLog,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or an empty one when nothing has been saved yet.
    pub fn load(&self) -> Result<State> {
        if !self.path.exists() {
            debug!("No state at {}, starting empty", self.path.display());
            return Ok(State::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state from {}", self.path.display()))?;
        let state: State = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(state)
    }

    /// Write through a temporary file so a failed write never leaves a
    /// truncated state behind.
    pub fn save(&self, state: &State) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::paths::ensure_dir_exists(parent).with_context(|| {
                format!(
                    "Failed to create state directory {}: permission denied",
                    parent.display()
                )
            })?;
        }

        let yaml = serde_yaml::to_string(state)?;
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).with_context(|| {
            format!(
                "Failed to write state to {}: permission denied",
                tmp.display()
            )
        })?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                tmp.display(),
                self.path.display()
            )
        })?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}
