// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::{Journal, NewAction, ObjectRef, Verb};
use crate::catalog::{Catalog, CategoryId, Rule, SourceId, SourceUpdate};
use crate::diff::{self, RuleParser, Snapshot, SnapshotDiff};
use crate::error::Result;
use crate::fetch::SourceFile;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// md5 over the rules files of a source, in file name order.
pub fn checksum(files: &[SourceFile]) -> String {
    let mut sorted: Vec<&SourceFile> = files.iter().filter(|f| f.is_rules()).collect();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));
    let mut context = md5::Context::new();
    for file in sorted {
        context.consume(file.filename.as_bytes());
        context.consume(&file.content);
    }
    format!("{:x}", context.compute())
}

/// Category name of a rules file: its stem.
fn category_name(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

pub struct SourceUpdater<'a, 'b> {
    catalog: &'a mut Catalog,
    audit: &'a mut Journal<'b>,
    parser: RuleParser,
}

impl<'a, 'b> SourceUpdater<'a, 'b> {
    pub fn new(catalog: &'a mut Catalog, audit: &'a mut Journal<'b>) -> Result<Self> {
        Ok(Self {
            catalog,
            audit,
            parser: RuleParser::new()?,
        })
    }

    /// Parse the rules files into one snapshot. Rules whose sid already
    /// belongs to another source are skipped.
    fn snapshot(&self, source: SourceId, files: &[SourceFile]) -> (Snapshot, usize) {
        let mut snapshot = Snapshot::new();
        let mut skipped = 0;
        for file in files.iter().filter(|f| f.is_rules()) {
            let (parsed, file_skipped) = self
                .parser
                .snapshot(&file.content, &category_name(&file.filename));
            skipped += file_skipped;
            for entry in parsed.entries.into_values() {
                match self.catalog.source_of_rule(entry.sid) {
                    Ok(owner) if owner != source => {
                        warn!(
                            "Skipping sid {}: already provided by source {}",
                            entry.sid, owner
                        );
                        skipped += 1;
                    }
                    _ => snapshot.insert(entry),
                }
            }
        }
        (snapshot, skipped)
    }

    /// Apply freshly fetched files to a source. Returns `None` when the
    /// content is the same as the last update.
    pub fn update(
        &mut self,
        source: SourceId,
        files: &[SourceFile],
        actor: &str,
    ) -> Result<Option<SourceUpdate>> {
        let version = checksum(files);
        let current = self.catalog.source(source)?;
        if current.latest_update().map(|u| u.version.as_str()) == Some(version.as_str()) {
            debug!("Source {} unchanged at version {}", current.name, version);
            return Ok(None);
        }

        let (snapshot, skipped) = self.snapshot(source, files);
        let changes = diff::diff(&current.snapshot, &snapshot);
        let stats = changes.stats();
        self.audit.write(
            NewAction::new(actor, Verb::Modify, ObjectRef::Source(source)).options(format!(
                "update: {} added, {} updated, {} deleted",
                stats.added, stats.updated, stats.deleted
            )),
        )?;

        let fresh_categories = self.apply(source, &snapshot, &changes)?;
        self.activate_new_categories(source, &fresh_categories);

        let update = SourceUpdate {
            version,
            created: Utc::now(),
            skipped,
            changes,
        };
        let target = self.catalog.source_mut(source)?;
        target.snapshot = snapshot;
        target.updates.push(update.clone());
        info!(
            "Updated source {}: {} added, {} updated, {} deleted, {} skipped",
            target.name, stats.added, stats.updated, stats.deleted, skipped
        );
        Ok(Some(update))
    }

    /// Bring the catalog in line with the diff. Returns the categories that
    /// did not exist before.
    fn apply(
        &mut self,
        source: SourceId,
        snapshot: &Snapshot,
        changes: &SnapshotDiff,
    ) -> Result<Vec<CategoryId>> {
        let before: Vec<CategoryId> = self
            .catalog
            .categories_of_source(source)
            .map(|c| c.id)
            .collect();

        for entry in changes.added.iter().chain(&changes.updated) {
            let category = self.catalog.ensure_category(source, &entry.category);
            match self.catalog.rule_mut(entry.sid) {
                Ok(rule) => {
                    rule.gid = entry.gid;
                    rule.rev = entry.rev;
                    rule.msg = entry.msg.clone();
                    rule.content = entry.content.clone();
                    rule.state = entry.enabled;
                    rule.category = category;
                }
                Err(_) => self.catalog.insert_rule(Rule {
                    sid: entry.sid,
                    gid: entry.gid,
                    rev: entry.rev,
                    msg: entry.msg.clone(),
                    content: entry.content.clone(),
                    state: entry.enabled,
                    category,
                    overrides: BTreeMap::new(),
                }),
            }
        }

        // A rule can move to another file without its text changing.
        for entry in snapshot.iter() {
            let category = self.catalog.ensure_category(source, &entry.category);
            if let Ok(rule) = self.catalog.rule_mut(entry.sid) {
                rule.category = category;
            }
        }

        // Anything of this source missing from the new snapshot goes, which
        // also covers rules the previous snapshot did not know about.
        let gone: Vec<_> = self
            .catalog
            .rules
            .values()
            .filter(|r| !snapshot.contains(r.sid))
            .filter(|r| {
                self.catalog
                    .category(r.category)
                    .is_ok_and(|c| c.source == source)
            })
            .map(|r| r.sid)
            .collect();
        for sid in gone {
            self.catalog.remove_rule(sid, &mut *self.audit);
        }

        let empty: Vec<CategoryId> = self
            .catalog
            .categories_of_source(source)
            .filter(|c| self.catalog.rules_in_category(c.id).next().is_none())
            .map(|c| c.id)
            .collect();
        for id in empty {
            debug!("Removing empty category {}", id);
            self.catalog.remove_category(id, &mut *self.audit);
        }

        Ok(self
            .catalog
            .categories_of_source(source)
            .map(|c| c.id)
            .filter(|id| !before.contains(id))
            .collect())
    }

    /// New categories join every ruleset the source is active in.
    fn activate_new_categories(&mut self, source: SourceId, categories: &[CategoryId]) {
        for ruleset in self.catalog.rulesets.values_mut() {
            if ruleset.sources.contains(&source) {
                ruleset.categories.extend(categories.iter().copied());
            }
        }
    }
}
