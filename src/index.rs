// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::Journal;
use crate::catalog::{Catalog, RulesetId, SourceId};
use crate::config::Settings;
use crate::error::Error;
use crate::fetch::{self, CACHE_MIN_AGE_SECS};
use crate::paths::PathProvider;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_INDEX_URL: &str = "https://www.openinfosecfoundation.org/rules/index.yaml";
const INDEX_FILENAME: &str = "index.yaml";
const INDEX_VERSION: u32 = 1;
const SECRET_CODE: &str = "%(secret-code)s";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceInfo {
    pub vendor: String,
    pub summary: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, serde_yaml::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obsolete: Option<String>,
}

impl SourceInfo {
    pub fn requires_secret_code(&self) -> bool {
        self.url.contains(SECRET_CODE)
    }

    /// The source URL with the secret code filled in. The Suricata version
    /// placeholder stays and is expanded on every fetch.
    pub fn source_uri(&self, id: &str, secret_code: Option<&str>) -> crate::error::Result<String> {
        if !self.requires_secret_code() {
            return Ok(self.url.clone());
        }
        match secret_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Ok(self.url.replace(SECRET_CODE, code)),
            None => Err(Error::MissingParameter {
                name: id.to_string(),
                parameter: "secret-code".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceIndex {
    pub version: u32,
    pub sources: BTreeMap<String, SourceInfo>,
}

impl SourceIndex {
    pub fn parse(content: &str) -> Result<Self> {
        let index: SourceIndex =
            serde_yaml::from_str(content).context("Failed to parse source index")?;
        if index.version != INDEX_VERSION {
            anyhow::bail!("Unsupported source index version {}", index.version);
        }
        Ok(index)
    }

    pub fn get(&self, id: &str) -> crate::error::Result<&SourceInfo> {
        self.sources
            .get(id)
            .ok_or_else(|| Error::UnknownIndexSource(id.to_string()))
    }
}

/// Differences between two downloads of the index.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl IndexChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn compare(old: Option<&SourceIndex>, new: &SourceIndex) -> IndexChanges {
    let Some(old) = old else {
        return IndexChanges {
            added: new.sources.keys().cloned().collect(),
            ..Default::default()
        };
    };
    let mut changes = IndexChanges::default();
    for (name, info) in &new.sources {
        match old.sources.get(name) {
            None => changes.added.push(name.clone()),
            Some(previous) if previous != info => changes.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    changes.removed = old
        .sources
        .keys()
        .filter(|name| !new.sources.contains_key(*name))
        .cloned()
        .collect();
    changes
}

/// The public source index, cached next to the source downloads.
pub struct IndexManager<'a> {
    path_provider: &'a dyn PathProvider,
    settings: &'a Settings,
}

impl<'a> IndexManager<'a> {
    pub fn new(path_provider: &'a dyn PathProvider, settings: &'a Settings) -> Self {
        Self {
            path_provider,
            settings,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.path_provider.cache_dir().join(INDEX_FILENAME)
    }

    /// `SOURCE_INDEX_URL` from the environment wins over the configuration.
    pub fn index_url(&self) -> String {
        std::env::var("SOURCE_INDEX_URL")
            .ok()
            .or_else(|| self.settings.source_index_url.clone())
            .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string())
    }

    pub fn read_local(&self) -> Result<Option<SourceIndex>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        SourceIndex::parse(&content).map(Some)
    }

    pub fn download(&self) -> Result<(SourceIndex, String)> {
        let url = self.index_url();
        info!("Downloading source index from {}", url);
        let content = fetch::http_get(&url)?.text()?;
        Ok((SourceIndex::parse(&content)?, content))
    }

    /// Refresh the cached index. `None` when the cache is recent enough
    /// and `force` is not set.
    pub fn update(&self, force: bool) -> Result<Option<IndexChanges>> {
        let path = self.index_path();
        if let Some(age) = fetch::cache_age(&path) {
            if !force && age < CACHE_MIN_AGE_SECS {
                debug!("Source index is {} seconds old, keeping it", age);
                return Ok(None);
            }
        }
        let previous = self.read_local()?;
        let (index, content) = self.download()?;
        fetch::write_cache(&path, content.as_bytes())?;
        Ok(Some(compare(previous.as_ref(), &index)))
    }

    /// The cached index, downloading it the first time.
    pub fn get_or_download(&self) -> Result<SourceIndex> {
        if let Some(index) = self.read_local()? {
            return Ok(index);
        }
        self.update(true)?;
        self.read_local()?
            .ok_or_else(|| anyhow::anyhow!("Source index missing after download"))
    }
}

/// Add a source from the index under `name` (the index id by default) and
/// activate it in `rulesets`.
#[allow(clippy::too_many_arguments)]
pub fn add_public_source(
    catalog: &mut Catalog,
    index: &SourceIndex,
    id: &str,
    name: Option<&str>,
    secret_code: Option<&str>,
    rulesets: &[RulesetId],
    audit: &mut Journal<'_>,
    actor: &str,
    comment: Option<&str>,
) -> crate::error::Result<SourceId> {
    let info = index.get(id)?;
    let uri = info.source_uri(id, secret_code)?;
    for ruleset in rulesets {
        catalog.ruleset(*ruleset)?;
    }
    let source = catalog.add_source(name.unwrap_or(id), &uri, audit, actor)?;
    for ruleset in rulesets {
        catalog.activate_source(source, *ruleset, audit, actor, comment)?;
    }
    Ok(source)
}
