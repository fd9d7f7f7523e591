// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

const DEFAULT_SURICATA_VERSION: &str = "7.0.0";
const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Revert a change when its audit entry cannot be written.
    pub atomic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub suricata_version: String,
    pub history_limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_actor: Option<String>,
    pub audit: AuditSettings,
    /// Where the public source index is downloaded from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_index_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            suricata_version: DEFAULT_SURICATA_VERSION.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_actor: None,
            audit: AuditSettings::default(),
            source_index_url: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when it is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    /// The user recorded in audit entries: the `--actor` flag, then the
    /// configured default, then `$USER`.
    pub fn actor(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| self.default_actor.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "admin".to_string())
    }

    /// Substitute the Suricata version into a source URL template.
    pub fn expand_uri(&self, uri: &str) -> String {
        uri.replace("%(__version__)s", &self.suricata_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.suricata_version, "7.0.0");
        assert!(!settings.audit.atomic);
    }

    #[test]
    fn test_load_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "suricata-version: 6.0.15\naudit:\n  atomic: true\ndefault-actor: ops\nsource-index-url: http://mirror/index.yaml\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.suricata_version, "6.0.15");
        assert!(settings.audit.atomic);
        assert_eq!(settings.history_limit, 50);
        assert_eq!(settings.actor(None), "ops");
        assert_eq!(settings.actor(Some("alice")), "alice");
        assert_eq!(
            settings.source_index_url.as_deref(),
            Some("http://mirror/index.yaml")
        );
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "history-limit: lots\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_expand_uri() {
        let settings = Settings::default();
        assert_eq!(
            settings.expand_uri("https://rules.example/open/suricata-%(__version__)s/rules.tar.gz"),
            "https://rules.example/open/suricata-7.0.0/rules.tar.gz"
        );
    }
}
