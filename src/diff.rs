// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::catalog::Sid;
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One rule as it appears in a source file, before sid validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub sid: Option<Sid>,
    pub gid: u32,
    pub rev: u32,
    pub msg: String,
    pub content: String,
    pub enabled: bool,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub sid: Sid,
    pub gid: u32,
    pub rev: u32,
    #[serde(default)]
    pub msg: String,
    pub content: String,
    pub enabled: bool,
    #[serde(default)]
    pub category: String,
}

impl SnapshotEntry {
    /// Rendered the way it would appear in a rules file.
    pub fn render(&self) -> String {
        if self.enabled {
            self.content.clone()
        } else {
            format!("# {}", self.content)
        }
    }

    fn same_rule(&self, other: &SnapshotEntry) -> bool {
        self.content == other.content && self.enabled == other.enabled
    }
}

/// The full set of rules of a source (or of a built ruleset) at one point in
/// time, keyed by sid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub entries: BTreeMap<Sid, SnapshotEntry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from parsed rules. Entries without a sid are dropped
    /// and counted; a duplicated sid keeps the highest revision.
    pub fn from_parsed(rules: impl IntoIterator<Item = ParsedRule>) -> (Self, usize) {
        let mut snapshot = Snapshot::new();
        let mut skipped = 0;
        for rule in rules {
            let Some(sid) = rule.sid else {
                debug!("Skipping rule without sid: {}", rule.content);
                skipped += 1;
                continue;
            };
            let entry = SnapshotEntry {
                sid,
                gid: rule.gid,
                rev: rule.rev,
                msg: rule.msg,
                content: rule.content,
                enabled: rule.enabled,
                category: rule.category,
            };
            snapshot.insert(entry);
        }
        (snapshot, skipped)
    }

    pub fn insert(&mut self, entry: SnapshotEntry) {
        match self.entries.get(&entry.sid) {
            Some(existing) if existing.rev > entry.rev => {
                debug!(
                    "Keeping sid {} rev {} over rev {}",
                    entry.sid, existing.rev, entry.rev
                );
            }
            _ => {
                self.entries.insert(entry.sid, entry);
            }
        }
    }

    pub fn get(&self, sid: Sid) -> Option<&SnapshotEntry> {
        self.entries.get(&sid)
    }

    pub fn contains(&self, sid: Sid) -> bool {
        self.entries.contains_key(&sid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.values()
    }

    /// Rules file text, ordered by (gid, sid).
    pub fn to_rules(&self) -> String {
        let mut sorted: Vec<&SnapshotEntry> = self.entries.values().collect();
        sorted.sort_by_key(|r| (r.gid, r.sid));
        let mut buf = String::new();
        for rule in sorted {
            buf.push_str(&rule.render());
            buf.push('\n');
        }
        buf
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    #[serde(default)]
    pub added: Vec<SnapshotEntry>,
    /// New versions of the rules whose content changed.
    #[serde(default)]
    pub updated: Vec<SnapshotEntry>,
    #[serde(default)]
    pub deleted: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn stats(&self) -> DiffStats {
        DiffStats {
            added: self.added.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }
}

/// Classify every sid of `old` and `new` as added, updated or deleted.
/// Unchanged rules are left out.
pub fn diff(old: &Snapshot, new: &Snapshot) -> SnapshotDiff {
    let mut result = SnapshotDiff::default();

    for (sid, entry) in &new.entries {
        match old.entries.get(sid) {
            None => result.added.push(entry.clone()),
            Some(previous) if !previous.same_rule(entry) => result.updated.push(entry.clone()),
            Some(_) => {}
        }
    }

    for (sid, entry) in &old.entries {
        if !new.entries.contains_key(sid) {
            result.deleted.push(entry.clone());
        }
    }

    result
}

pub struct RuleParser {
    rule_regex: Regex,
    sid_regex: Regex,
    gid_regex: Regex,
    rev_regex: Regex,
    msg_regex: Regex,
}

impl RuleParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rule_regex: Regex::new(
                r"^(#\s*)?(alert|drop|pass|reject|rejectsrc|rejectdst|rejectboth)\s+.*\(.*\)\s*$",
            )?,
            sid_regex: Regex::new(r"sid:\s*(\d+)")?,
            gid_regex: Regex::new(r"gid:\s*(\d+)")?,
            rev_regex: Regex::new(r"rev:\s*(\d+)")?,
            msg_regex: Regex::new(r#"msg:\s*"([^"]+)""#)?,
        })
    }

    /// Parse the rules of one file. Commented lines are only taken as
    /// disabled rules when they carry a sid.
    pub fn parse(&self, content: &[u8], category: &str) -> Vec<ParsedRule> {
        let content_str = String::from_utf8_lossy(content);
        let mut rules = Vec::new();

        for line in content_str.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') && !trimmed.contains("sid:") {
                continue;
            }
            if !self.rule_regex.is_match(trimmed) {
                continue;
            }

            let enabled = !trimmed.starts_with('#');
            let text = trimmed.trim_start_matches('#').trim_start();

            let sid = self
                .sid_regex
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<Sid>().ok())
                .filter(|sid| *sid > 0);

            let gid = self
                .gid_regex
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(1);

            let rev = self
                .rev_regex
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(1);

            let msg = self
                .msg_regex
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            rules.push(ParsedRule {
                sid,
                gid,
                rev,
                msg,
                content: text.to_string(),
                enabled,
                category: category.to_string(),
            });
        }

        rules
    }

    /// Parse and build a snapshot in one go.
    pub fn snapshot(&self, content: &[u8], category: &str) -> (Snapshot, usize) {
        Snapshot::from_parsed(self.parse(content, category))
    }
}
