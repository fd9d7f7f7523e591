// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::{Journal, NewAction, ObjectRef, Verb};
use crate::diff::{Snapshot, SnapshotDiff};
use crate::error::{Error, Result};
use crate::threshold::{Threshold, ThresholdSpec};
use crate::transform::{Axis, Override, Transform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

pub type Sid = u32;
pub type CategoryId = u32;
pub type SourceId = u32;
pub type RulesetId = u32;
pub type ThresholdId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub sid: Sid,
    pub gid: u32,
    pub rev: u32,
    #[serde(default)]
    pub msg: String,
    pub content: String,
    /// Enabled in its source.
    pub state: bool,
    pub category: CategoryId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<RulesetId, BTreeMap<Axis, Override>>,
}

impl Rule {
    pub fn stored(&self, ruleset: RulesetId, axis: Axis) -> Option<Override> {
        self.overrides
            .get(&ruleset)
            .and_then(|axes| axes.get(&axis))
            .copied()
    }

    pub(crate) fn store(&mut self, ruleset: RulesetId, axis: Axis, value: Override) {
        self.overrides.entry(ruleset).or_default().insert(axis, value);
    }

    pub(crate) fn remove(&mut self, ruleset: RulesetId, axis: Axis) -> Option<Override> {
        let axes = self.overrides.get_mut(&ruleset)?;
        let previous = axes.remove(&axis);
        if axes.is_empty() {
            self.overrides.remove(&ruleset);
        }
        previous
    }

    /// Restore a previously read slot, including its absence.
    pub(crate) fn restore(&mut self, ruleset: RulesetId, axis: Axis, value: Option<Override>) {
        match value {
            Some(value) => self.store(ruleset, axis, value),
            None => {
                self.remove(ruleset, axis);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub source: SourceId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<RulesetId, BTreeMap<Axis, Transform>>,
}

impl Category {
    pub fn stored(&self, ruleset: RulesetId, axis: Axis) -> Option<Transform> {
        self.overrides
            .get(&ruleset)
            .and_then(|axes| axes.get(&axis))
            .copied()
    }

    pub(crate) fn store(&mut self, ruleset: RulesetId, value: Transform) {
        self.overrides
            .entry(ruleset)
            .or_default()
            .insert(value.axis(), value);
    }

    pub(crate) fn remove(&mut self, ruleset: RulesetId, axis: Axis) -> Option<Transform> {
        let axes = self.overrides.get_mut(&ruleset)?;
        let previous = axes.remove(&axis);
        if axes.is_empty() {
            self.overrides.remove(&ruleset);
        }
        previous
    }

    pub(crate) fn restore(&mut self, ruleset: RulesetId, axis: Axis, value: Option<Transform>) {
        match value {
            Some(value) => self.store(ruleset, value),
            None => {
                self.remove(ruleset, axis);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUpdate {
    /// md5 of the fetched content.
    pub version: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub skipped: usize,
    pub changes: SnapshotDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub uri: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub snapshot: Snapshot,
    #[serde(default)]
    pub updates: Vec<SourceUpdate>,
}

impl Source {
    pub fn latest_update(&self) -> Option<&SourceUpdate> {
        self.updates.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetBuild {
    pub created: DateTime<Utc>,
    pub changes: SnapshotDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub id: RulesetId,
    pub name: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub sources: BTreeSet<SourceId>,
    #[serde(default)]
    pub categories: BTreeSet<CategoryId>,
    /// Rules suppressed in this ruleset.
    #[serde(default)]
    pub suppressed: BTreeSet<Sid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Snapshot>,
    #[serde(default)]
    pub builds: Vec<RulesetBuild>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    next_category: CategoryId,
    #[serde(default)]
    next_source: SourceId,
    #[serde(default)]
    next_ruleset: RulesetId,
    #[serde(default)]
    next_threshold: ThresholdId,
    #[serde(default)]
    pub rules: BTreeMap<Sid, Rule>,
    #[serde(default)]
    pub categories: BTreeMap<CategoryId, Category>,
    #[serde(default)]
    pub sources: BTreeMap<SourceId, Source>,
    #[serde(default)]
    pub rulesets: BTreeMap<RulesetId, Ruleset>,
    #[serde(default)]
    pub thresholds: BTreeMap<ThresholdId, Threshold>,
}

fn next_id(counter: &mut u32) -> u32 {
    *counter += 1;
    *counter
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(&self, sid: Sid) -> Result<&Rule> {
        self.rules.get(&sid).ok_or(Error::UnknownRule(sid))
    }

    pub(crate) fn rule_mut(&mut self, sid: Sid) -> Result<&mut Rule> {
        self.rules.get_mut(&sid).ok_or(Error::UnknownRule(sid))
    }

    pub fn category(&self, id: CategoryId) -> Result<&Category> {
        self.categories
            .get(&id)
            .ok_or_else(|| Error::unknown_category(id))
    }

    pub(crate) fn category_mut(&mut self, id: CategoryId) -> Result<&mut Category> {
        self.categories
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_category(id))
    }

    pub fn source(&self, id: SourceId) -> Result<&Source> {
        self.sources.get(&id).ok_or_else(|| Error::unknown_source(id))
    }

    pub(crate) fn source_mut(&mut self, id: SourceId) -> Result<&mut Source> {
        self.sources
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_source(id))
    }

    pub fn ruleset(&self, id: RulesetId) -> Result<&Ruleset> {
        self.rulesets
            .get(&id)
            .ok_or_else(|| Error::unknown_ruleset(id))
    }

    pub(crate) fn ruleset_mut(&mut self, id: RulesetId) -> Result<&mut Ruleset> {
        self.rulesets
            .get_mut(&id)
            .ok_or_else(|| Error::unknown_ruleset(id))
    }

    pub fn threshold(&self, id: ThresholdId) -> Result<&Threshold> {
        self.thresholds.get(&id).ok_or(Error::UnknownThreshold(id))
    }

    /// Look a ruleset up by name, or by id when the name is numeric.
    pub fn find_ruleset(&self, name: &str) -> Result<&Ruleset> {
        self.rulesets
            .values()
            .find(|r| r.name == name)
            .or_else(|| {
                name.parse::<RulesetId>()
                    .ok()
                    .and_then(|id| self.rulesets.get(&id))
            })
            .ok_or_else(|| Error::UnknownRuleset(name.to_string()))
    }

    pub fn find_source(&self, name: &str) -> Result<&Source> {
        self.sources
            .values()
            .find(|s| s.name == name)
            .or_else(|| {
                name.parse::<SourceId>()
                    .ok()
                    .and_then(|id| self.sources.get(&id))
            })
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    /// Accepts an id, `source/category`, or a category name that is unique
    /// across sources.
    pub fn find_category(&self, name: &str) -> Result<&Category> {
        if let Ok(id) = name.parse::<CategoryId>() {
            return self.category(id);
        }

        let matches: Vec<&Category> = match name.rsplit_once('/') {
            Some((source, category)) => {
                let source = self.find_source(source)?;
                self.categories
                    .values()
                    .filter(|c| c.source == source.id && c.name == category)
                    .collect()
            }
            None => self.categories.values().filter(|c| c.name == name).collect(),
        };

        match matches.as_slice() {
            [category] => Ok(category),
            [] => Err(Error::UnknownCategory(name.to_string())),
            _ => Err(Error::UnknownCategory(format!(
                "{name} is ambiguous, use source/category"
            ))),
        }
    }

    pub fn rules_in_category(&self, id: CategoryId) -> impl Iterator<Item = &Rule> {
        self.rules.values().filter(move |r| r.category == id)
    }

    pub fn categories_of_source(&self, id: SourceId) -> impl Iterator<Item = &Category> {
        self.categories.values().filter(move |c| c.source == id)
    }

    pub fn source_of_rule(&self, sid: Sid) -> Result<SourceId> {
        let rule = self.rule(sid)?;
        Ok(self.category(rule.category)?.source)
    }

    pub fn thresholds_for(&self, sid: Sid) -> impl Iterator<Item = &Threshold> {
        self.thresholds.values().filter(move |t| t.sid == sid)
    }

    pub fn thresholds_in(&self, ruleset: RulesetId) -> impl Iterator<Item = &Threshold> {
        self.thresholds.values().filter(move |t| t.ruleset == ruleset)
    }

    /// Sorted ruleset ids, used as the default selection for bulk edits.
    pub fn ruleset_ids(&self) -> Vec<RulesetId> {
        self.rulesets.keys().copied().collect()
    }

    /// Case-insensitive search of rule text, category names and ruleset
    /// names.
    pub fn search(&self, pattern: &str) -> SearchResults<'_> {
        let needle = pattern.to_lowercase();
        let matches = |text: &str| text.to_lowercase().contains(&needle);
        SearchResults {
            rules: self.rules.values().filter(|r| matches(&r.content)).collect(),
            categories: self
                .categories
                .values()
                .filter(|c| matches(&c.name))
                .collect(),
            rulesets: self.rulesets.values().filter(|r| matches(&r.name)).collect(),
        }
    }

    pub fn add_source(
        &mut self,
        name: &str,
        uri: &str,
        audit: &mut Journal<'_>,
        actor: &str,
    ) -> Result<SourceId> {
        if self.sources.values().any(|s| s.name == name) {
            return Err(Error::DuplicateSource(name.to_string()));
        }
        let id = self.next_source + 1;
        audit.write(NewAction::new(actor, Verb::Create, ObjectRef::Source(id)).options("source"))?;

        self.next_source = id;
        self.sources.insert(
            id,
            Source {
                id,
                name: name.to_string(),
                uri: uri.to_string(),
                created: Utc::now(),
                snapshot: Snapshot::new(),
                updates: Vec::new(),
            },
        );
        info!("Added source {} ({})", name, id);
        Ok(id)
    }

    /// Rename a source or point it somewhere else. Returns false when
    /// nothing changed.
    pub fn edit_source(
        &mut self,
        id: SourceId,
        name: Option<&str>,
        uri: Option<&str>,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<bool> {
        if let Some(name) = name {
            if self.sources.values().any(|s| s.name == name && s.id != id) {
                return Err(Error::DuplicateSource(name.to_string()));
            }
        }
        let source = self.source(id)?;
        let name = name.filter(|n| *n != source.name);
        let uri = uri.filter(|u| *u != source.uri);
        let mut options = Vec::new();
        if name.is_some() {
            options.push("name");
        }
        if uri.is_some() {
            options.push("uri");
        }
        if options.is_empty() {
            return Ok(false);
        }
        audit.write(
            NewAction::new(actor, Verb::Modify, ObjectRef::Source(id))
                .options(options.join(", "))
                .comment(comment),
        )?;

        let source = self.source_mut(id)?;
        if let Some(name) = name {
            source.name = name.to_string();
        }
        if let Some(uri) = uri {
            source.uri = uri.to_string();
        }
        info!("Edited source {}", id);
        Ok(true)
    }

    /// Delete a source with its categories and rules. Rulesets stop using it.
    pub fn delete_source(
        &mut self,
        id: SourceId,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<Source> {
        let name = self.source(id)?.name.clone();
        let tombstone = audit.write(
            NewAction::new(actor, Verb::Delete, ObjectRef::Source(id))
                .options(format!("source {name}"))
                .comment(comment),
        )?;

        let categories: Vec<CategoryId> = self.categories_of_source(id).map(|c| c.id).collect();
        let sids: Vec<Sid> = self
            .rules
            .values()
            .filter(|r| categories.contains(&r.category))
            .map(|r| r.sid)
            .collect();
        for sid in sids {
            self.remove_rule(sid, audit);
        }
        for category in categories {
            self.remove_category(category, audit);
        }
        for ruleset in self.rulesets.values_mut() {
            ruleset.sources.remove(&id);
        }
        audit.cascade(ObjectRef::Source(id), tombstone);
        let source = self
            .sources
            .remove(&id)
            .ok_or_else(|| Error::unknown_source(id))?;
        info!("Deleted source {} ({})", source.name, id);
        Ok(source)
    }

    /// Find or create the category `name` of a source.
    pub(crate) fn ensure_category(&mut self, source: SourceId, name: &str) -> CategoryId {
        if let Some(category) = self
            .categories
            .values()
            .find(|c| c.source == source && c.name == name)
        {
            return category.id;
        }
        let id = next_id(&mut self.next_category);
        self.categories.insert(
            id,
            Category {
                id,
                name: name.to_string(),
                source,
                overrides: BTreeMap::new(),
            },
        );
        id
    }

    pub(crate) fn insert_rule(&mut self, rule: Rule) {
        self.rules.insert(rule.sid, rule);
    }

    /// Remove a rule with everything hanging off it.
    pub(crate) fn remove_rule(&mut self, sid: Sid, audit: &mut Journal<'_>) -> Option<Rule> {
        let rule = self.rules.remove(&sid)?;
        let thresholds: Vec<ThresholdId> = self.thresholds_for(sid).map(|t| t.id).collect();
        for id in thresholds {
            self.thresholds.remove(&id);
            audit.cascade(ObjectRef::Threshold(id), None);
        }
        for ruleset in self.rulesets.values_mut() {
            ruleset.suppressed.remove(&sid);
        }
        audit.cascade(ObjectRef::Rule(sid), None);
        Some(rule)
    }

    pub(crate) fn remove_category(&mut self, id: CategoryId, audit: &mut Journal<'_>) {
        if self.categories.remove(&id).is_some() {
            for ruleset in self.rulesets.values_mut() {
                ruleset.categories.remove(&id);
            }
            audit.cascade(ObjectRef::Category(id), None);
        }
    }

    pub fn create_ruleset(
        &mut self,
        name: &str,
        sources: &[SourceId],
        activate_categories: bool,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<RulesetId> {
        if self.rulesets.values().any(|r| r.name == name) {
            return Err(Error::DuplicateRuleset(name.to_string()));
        }
        for source in sources {
            self.source(*source)?;
        }
        let id = self.next_ruleset + 1;
        audit.write(
            NewAction::new(actor, Verb::Create, ObjectRef::Ruleset(id))
                .ruleset(id)
                .options("ruleset")
                .comment(comment),
        )?;

        let categories: BTreeSet<CategoryId> = if activate_categories {
            self.categories
                .values()
                .filter(|c| sources.contains(&c.source))
                .map(|c| c.id)
                .collect()
        } else {
            BTreeSet::new()
        };
        self.next_ruleset = id;
        self.rulesets.insert(
            id,
            Ruleset {
                id,
                name: name.to_string(),
                created: Utc::now(),
                sources: sources.iter().copied().collect(),
                categories,
                suppressed: BTreeSet::new(),
                build: None,
                builds: Vec::new(),
            },
        );
        info!("Created ruleset {} ({})", name, id);
        Ok(id)
    }

    /// Copy a ruleset with its sources, categories, suppressions,
    /// transformations and thresholds. Build history is not copied.
    pub fn copy_ruleset(
        &mut self,
        id: RulesetId,
        name: &str,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<RulesetId> {
        let original = self.ruleset(id)?.clone();
        if self.rulesets.values().any(|r| r.name == name) {
            return Err(Error::DuplicateRuleset(name.to_string()));
        }
        let copy_id = self.next_ruleset + 1;
        audit.write(
            NewAction::new(actor, Verb::Create, ObjectRef::Ruleset(copy_id))
                .ruleset(copy_id)
                .options(format!("copy of {}", original.name))
                .comment(comment),
        )?;

        self.next_ruleset = copy_id;
        self.rulesets.insert(
            copy_id,
            Ruleset {
                id: copy_id,
                name: name.to_string(),
                created: Utc::now(),
                sources: original.sources,
                categories: original.categories,
                suppressed: original.suppressed,
                build: None,
                builds: Vec::new(),
            },
        );

        for rule in self.rules.values_mut() {
            if let Some(axes) = rule.overrides.get(&id).cloned() {
                rule.overrides.insert(copy_id, axes);
            }
        }
        for category in self.categories.values_mut() {
            if let Some(axes) = category.overrides.get(&id).cloned() {
                category.overrides.insert(copy_id, axes);
            }
        }
        let thresholds: Vec<Threshold> = self.thresholds_in(id).cloned().collect();
        for threshold in thresholds {
            let threshold_id = next_id(&mut self.next_threshold);
            self.thresholds.insert(
                threshold_id,
                Threshold {
                    id: threshold_id,
                    ruleset: copy_id,
                    ..threshold
                },
            );
        }
        Ok(copy_id)
    }

    pub fn rename_ruleset(
        &mut self,
        id: RulesetId,
        name: &str,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        if self.rulesets.values().any(|r| r.name == name && r.id != id) {
            return Err(Error::DuplicateRuleset(name.to_string()));
        }
        if self.ruleset(id)?.name == name {
            return Ok(());
        }
        audit.write(
            NewAction::new(actor, Verb::Modify, ObjectRef::Ruleset(id))
                .ruleset(id)
                .options("rename")
                .comment(comment),
        )?;
        self.ruleset_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// Delete a ruleset along with its transformations and thresholds. The
    /// delete entry is the only one about the ruleset itself that stays;
    /// entries about other objects that name the ruleset are history and
    /// are kept.
    pub fn delete_ruleset(
        &mut self,
        id: RulesetId,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<Ruleset> {
        let name = self.ruleset(id)?.name.clone();
        let tombstone = audit.write(
            NewAction::new(actor, Verb::Delete, ObjectRef::Ruleset(id))
                .options(format!("ruleset {name}"))
                .comment(comment),
        )?;

        let ruleset = self
            .rulesets
            .remove(&id)
            .ok_or_else(|| Error::unknown_ruleset(id))?;
        for rule in self.rules.values_mut() {
            rule.overrides.remove(&id);
        }
        for category in self.categories.values_mut() {
            category.overrides.remove(&id);
        }
        let thresholds: Vec<ThresholdId> = self.thresholds_in(id).map(|t| t.id).collect();
        for threshold in thresholds {
            self.thresholds.remove(&threshold);
            audit.cascade(ObjectRef::Threshold(threshold), None);
        }
        audit.cascade(ObjectRef::Ruleset(id), tombstone);

        info!("Deleted ruleset {} ({})", ruleset.name, id);
        Ok(ruleset)
    }

    /// Activate a source and all of its categories in a ruleset.
    pub fn activate_source(
        &mut self,
        source: SourceId,
        ruleset: RulesetId,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<usize> {
        self.source(source)?;
        let target = self.ruleset(ruleset)?;
        let newly_active = !target.sources.contains(&source);
        let categories: Vec<CategoryId> = self
            .categories_of_source(source)
            .map(|c| c.id)
            .filter(|id| !target.categories.contains(id))
            .collect();
        if !newly_active && categories.is_empty() {
            return Ok(0);
        }
        audit.write(
            NewAction::new(actor, Verb::Enable, ObjectRef::Source(source))
                .ruleset(ruleset)
                .comment(comment),
        )?;

        let added = categories.len();
        let target = self.ruleset_mut(ruleset)?;
        target.sources.insert(source);
        target.categories.extend(categories);
        Ok(added)
    }

    pub fn deactivate_source(
        &mut self,
        source: SourceId,
        ruleset: RulesetId,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        if !self.ruleset(ruleset)?.sources.contains(&source) {
            return Ok(());
        }
        audit.write(
            NewAction::new(actor, Verb::Disable, ObjectRef::Source(source))
                .ruleset(ruleset)
                .comment(comment),
        )?;

        let categories: Vec<CategoryId> = self.categories_of_source(source).map(|c| c.id).collect();
        let target = self.ruleset_mut(ruleset)?;
        target.sources.remove(&source);
        for category in categories {
            target.categories.remove(&category);
        }
        Ok(())
    }

    /// Flip whether a rule is available at all.
    pub fn toggle_availability(
        &mut self,
        sid: Sid,
        audit: &mut Journal<'_>,
        actor: &str,
    ) -> Result<bool> {
        self.rule(sid)?;
        audit.write(
            NewAction::new(actor, Verb::Modify, ObjectRef::Rule(sid)).options("rule availability"),
        )?;
        let rule = self.rule_mut(sid)?;
        rule.state = !rule.state;
        Ok(rule.state)
    }

    pub fn comment_rule(
        &self,
        sid: Sid,
        comment: &str,
        audit: &mut Journal<'_>,
        actor: &str,
    ) -> Result<u64> {
        self.rule(sid)?;
        if comment.trim().is_empty() {
            return Err(Error::NotPermitted("empty comment".to_string()));
        }
        audit.append(NewAction::new(actor, Verb::Comment, ObjectRef::Rule(sid)).comment(Some(comment)))
    }

    /// Add one threshold per ruleset. In atomic mode an audit failure stops
    /// at that ruleset; the thresholds added before it stay.
    pub fn add_threshold(
        &mut self,
        sid: Sid,
        rulesets: &[RulesetId],
        spec: &ThresholdSpec,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<Vec<ThresholdId>> {
        self.rule(sid)?;
        spec.validate()?;
        for ruleset in rulesets {
            self.ruleset(*ruleset)?;
        }

        let mut ids = Vec::new();
        for ruleset in rulesets {
            let id = self.next_threshold + 1;
            audit.write(
                NewAction::new(actor, Verb::Create, ObjectRef::Threshold(id))
                    .ruleset(*ruleset)
                    .options(spec.kind.to_string())
                    .comment(comment),
            )?;
            self.next_threshold = id;
            self.thresholds.insert(
                id,
                Threshold {
                    id,
                    sid,
                    ruleset: *ruleset,
                    spec: spec.clone(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn edit_threshold(
        &mut self,
        id: ThresholdId,
        spec: ThresholdSpec,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        spec.validate()?;
        let threshold = self.threshold(id)?;
        if threshold.spec == spec {
            return Ok(());
        }
        audit.write(
            NewAction::new(actor, Verb::Modify, ObjectRef::Threshold(id))
                .ruleset(threshold.ruleset)
                .options(spec.kind.to_string())
                .comment(comment),
        )?;
        if let Some(threshold) = self.thresholds.get_mut(&id) {
            threshold.spec = spec;
        }
        Ok(())
    }

    /// Delete a threshold. Its history goes with it apart from the delete
    /// entry.
    pub fn delete_threshold(
        &mut self,
        id: ThresholdId,
        audit: &mut Journal<'_>,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<Threshold> {
        let threshold = self.threshold(id)?;
        let tombstone = audit.write(
            NewAction::new(actor, Verb::Delete, ObjectRef::Threshold(id))
                .ruleset(threshold.ruleset)
                .options(threshold.spec.kind.to_string())
                .comment(comment),
        )?;
        let threshold = self
            .thresholds
            .remove(&id)
            .ok_or(Error::UnknownThreshold(id))?;
        audit.cascade(ObjectRef::Threshold(id), tombstone);
        Ok(threshold)
    }
}

/// Objects whose text or name matched a search.
#[derive(Debug, Default)]
pub struct SearchResults<'a> {
    pub rules: Vec<&'a Rule>,
    pub categories: Vec<&'a Category>,
    pub rulesets: Vec<&'a Ruleset>,
}

impl SearchResults<'_> {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.categories.is_empty() && self.rulesets.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::tests::FailingSink;
    use crate::audit::{AuditLog, AuditSink};
    use crate::threshold::{parse_net, TrackBy};
    use crate::transform::Action;

    pub(crate) fn journal(audit: &mut AuditLog) -> Journal<'_> {
        Journal::new(audit, false)
    }

    /// Source "et/open" (1) with categories "emerging-scan" (1: rules 1001,
    /// 1002) and "emerging-dos" (2: rule 2001), and rulesets "prod" (1) and
    /// "lab" (2) with everything active.
    pub(crate) fn test_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let mut audit = AuditLog::new();
        let mut audit = journal(&mut audit);
        let source = catalog
            .add_source("et/open", "https://example.com/rules.tar.gz", &mut audit, "admin")
            .unwrap();
        let scan = catalog.ensure_category(source, "emerging-scan");
        let dos = catalog.ensure_category(source, "emerging-dos");
        for (sid, category, content) in [
            (
                1001,
                scan,
                "alert tcp $EXTERNAL_NET any -> $HOME_NET 22 (msg:\"ET SCAN ssh\"; sid:1001; rev:1;)",
            ),
            (
                1002,
                scan,
                "alert tcp $HOME_NET any -> $EXTERNAL_NET 445 (msg:\"ET SCAN outbound smb\"; sid:1002; rev:1;)",
            ),
            (
                2001,
                dos,
                "alert udp $EXTERNAL_NET any -> $HOME_NET 53 (msg:\"ET DOS dns\"; sid:2001; rev:2;)",
            ),
        ] {
            catalog.insert_rule(Rule {
                sid,
                gid: 1,
                rev: 1,
                msg: String::new(),
                content: content.to_string(),
                state: true,
                category,
                overrides: BTreeMap::new(),
            });
        }
        catalog
            .create_ruleset("prod", &[source], true, &mut audit, "admin", None)
            .unwrap();
        catalog
            .create_ruleset("lab", &[source], true, &mut audit, "admin", None)
            .unwrap();
        catalog
    }

    #[test]
    fn test_fixture_layout() {
        let catalog = test_catalog();
        assert_eq!(catalog.find_ruleset("prod").unwrap().id, 1);
        assert_eq!(catalog.find_ruleset("2").unwrap().name, "lab");
        assert_eq!(catalog.ruleset(1).unwrap().categories.len(), 2);
        assert_eq!(catalog.rules_in_category(1).count(), 2);
        assert_eq!(catalog.source_of_rule(2001).unwrap(), 1);
    }

    #[test]
    fn test_find_category() {
        let catalog = test_catalog();
        assert_eq!(catalog.find_category("emerging-dos").unwrap().id, 2);
        assert_eq!(catalog.find_category("et/open/emerging-scan").unwrap().id, 1);
        assert_eq!(catalog.find_category("1").unwrap().name, "emerging-scan");
        assert!(catalog.find_category("nope").is_err());
    }

    #[test]
    fn test_duplicate_ruleset() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        assert!(matches!(
            catalog.create_ruleset("prod", &[], false, &mut journal(&mut audit), "admin", None),
            Err(Error::DuplicateRuleset(_))
        ));
        assert!(matches!(
            catalog.create_ruleset("x", &[42], false, &mut journal(&mut audit), "admin", None),
            Err(Error::UnknownSource(_))
        ));
        assert!(audit.is_empty());
    }

    #[test]
    fn test_copy_ruleset() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        catalog
            .rule_mut(1001)
            .unwrap()
            .store(1, Axis::Action, Override::Set(Transform::Action(Action::Drop)));
        catalog
            .category_mut(2)
            .unwrap()
            .store(1, Transform::Action(Action::Reject));
        catalog.ruleset_mut(1).unwrap().suppressed.insert(1002);
        catalog
            .add_threshold(
                1001,
                &[1],
                &ThresholdSpec::suppress(TrackBy::BySrc, None),
                &mut journal(&mut audit),
                "admin",
                None,
            )
            .unwrap();

        let copy = catalog
            .copy_ruleset(1, "prod-copy", &mut journal(&mut audit), "admin", Some("copy"))
            .unwrap();
        let copied = catalog.ruleset(copy).unwrap();
        assert!(copied.suppressed.contains(&1002));
        assert_eq!(copied.categories.len(), 2);
        assert_eq!(
            catalog.rule(1001).unwrap().stored(copy, Axis::Action),
            Some(Override::Set(Transform::Action(Action::Drop)))
        );
        assert_eq!(
            catalog.category(2).unwrap().stored(copy, Axis::Action),
            Some(Transform::Action(Action::Reject))
        );
        assert_eq!(catalog.thresholds_in(copy).count(), 1);
        assert_eq!(audit.len(), 2);
    }

    #[test]
    fn test_delete_ruleset_cascades() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        catalog
            .rename_ruleset(1, "production", &mut journal(&mut audit), "admin", None)
            .unwrap();
        catalog
            .rule_mut(1001)
            .unwrap()
            .store(1, Axis::Action, Override::Clear);
        audit
            .append(
                NewAction::new("admin", Verb::Disable, ObjectRef::Rule(1001))
                    .ruleset(1)
                    .options("action"),
            )
            .unwrap();
        catalog
            .category_mut(1)
            .unwrap()
            .store(1, Transform::Action(Action::Drop));
        let ids = catalog
            .add_threshold(
                1001,
                &[1, 2],
                &ThresholdSpec::suppress(TrackBy::BySrc, Some(parse_net("10.0.0.0/8").unwrap())),
                &mut journal(&mut audit),
                "admin",
                None,
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let deleted = catalog
            .delete_ruleset(1, &mut journal(&mut audit), "admin", None)
            .unwrap();
        assert_eq!(deleted.name, "production");
        assert!(catalog.rule(1001).unwrap().overrides.is_empty());
        assert!(catalog.category(1).unwrap().overrides.is_empty());
        assert_eq!(catalog.thresholds.len(), 1);
        assert!(catalog.find_ruleset("production").is_err());

        // The rename and the first threshold go; the rule's history in the
        // ruleset, the surviving threshold and the delete entry stay.
        let left: Vec<(Verb, ObjectRef)> = audit.entries().iter().map(|e| (e.verb, e.object)).collect();
        assert_eq!(
            left,
            vec![
                (Verb::Disable, ObjectRef::Rule(1001)),
                (Verb::Create, ObjectRef::Threshold(ids[1])),
                (Verb::Delete, ObjectRef::Ruleset(1)),
            ]
        );
        assert_eq!(
            audit.for_object(ObjectRef::Ruleset(1))[0].options.as_deref(),
            Some("ruleset production")
        );
    }

    #[test]
    fn test_rename_ruleset() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        assert!(catalog
            .rename_ruleset(1, "lab", &mut journal(&mut audit), "admin", None)
            .is_err());
        catalog
            .rename_ruleset(1, "production", &mut journal(&mut audit), "admin", None)
            .unwrap();
        catalog
            .rename_ruleset(1, "production", &mut journal(&mut audit), "admin", None)
            .unwrap();
        assert_eq!(catalog.ruleset(1).unwrap().name, "production");
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_activate_source() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        let mut journal = journal(&mut audit);
        let ruleset = catalog
            .create_ruleset("empty", &[], false, &mut journal, "admin", None)
            .unwrap();
        assert_eq!(
            catalog
                .activate_source(1, ruleset, &mut journal, "admin", None)
                .unwrap(),
            2
        );
        assert_eq!(
            catalog
                .activate_source(1, ruleset, &mut journal, "admin", None)
                .unwrap(),
            0
        );
        catalog
            .deactivate_source(1, ruleset, &mut journal, "admin", None)
            .unwrap();
        assert!(catalog.ruleset(ruleset).unwrap().categories.is_empty());
        drop(journal);
        assert_eq!(audit.len(), 3);
    }

    #[test]
    fn test_toggle_and_comment() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        let mut journal = journal(&mut audit);
        assert!(!catalog.toggle_availability(1001, &mut journal, "admin").unwrap());
        assert!(catalog.toggle_availability(1001, &mut journal, "admin").unwrap());
        let id = catalog
            .comment_rule(1001, "noisy on the DMZ", &mut journal, "alice")
            .unwrap();
        assert!(catalog.comment_rule(1001, " ", &mut journal, "alice").is_err());
        assert!(catalog.comment_rule(9, "x", &mut journal, "alice").is_err());
        drop(journal);
        assert_eq!(audit.get(id).unwrap().verb, Verb::Comment);
    }

    #[test]
    fn test_threshold_lifecycle() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        let ids = catalog
            .add_threshold(
                2001,
                &[2],
                &ThresholdSpec::suppress(TrackBy::ByDst, None),
                &mut journal(&mut audit),
                "admin",
                None,
            )
            .unwrap();
        let id = ids[0];

        let edited = ThresholdSpec::suppress(TrackBy::BySrc, None);
        catalog
            .edit_threshold(id, edited.clone(), &mut journal(&mut audit), "admin", None)
            .unwrap();
        assert_eq!(catalog.threshold(id).unwrap().spec, edited);
        // Same spec again is not a change.
        catalog
            .edit_threshold(id, edited, &mut journal(&mut audit), "admin", None)
            .unwrap();
        assert_eq!(audit.len(), 2);

        catalog
            .delete_threshold(id, &mut journal(&mut audit), "admin", Some("gone"))
            .unwrap();
        assert!(catalog.threshold(id).is_err());
        let left = audit.for_object(ObjectRef::Threshold(id));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].verb, Verb::Delete);
        assert_eq!(left[0].comment.as_deref(), Some("gone"));
        assert_eq!(audit.len(), 1);
        assert!(matches!(
            catalog.add_threshold(
                2001,
                &[99],
                &ThresholdSpec::suppress(TrackBy::ByDst, None),
                &mut journal(&mut audit),
                "admin",
                None
            ),
            Err(Error::UnknownRuleset(_))
        ));
    }

    #[test]
    fn test_remove_rule_cascades() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        let mut journal = journal(&mut audit);
        catalog.ruleset_mut(1).unwrap().suppressed.insert(1001);
        catalog
            .add_threshold(
                1001,
                &[1],
                &ThresholdSpec::suppress(TrackBy::BySrc, None),
                &mut journal,
                "admin",
                None,
            )
            .unwrap();
        catalog
            .comment_rule(1001, "note", &mut journal, "admin")
            .unwrap();

        assert!(catalog.remove_rule(1001, &mut journal).is_some());
        drop(journal);
        assert!(catalog.rule(1001).is_err());
        assert!(catalog.thresholds.is_empty());
        assert!(catalog.ruleset(1).unwrap().suppressed.is_empty());
        assert!(audit.is_empty());
    }

    #[test]
    fn test_edit_source() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        catalog
            .add_source("local", "file:///tmp/local.rules", &mut journal(&mut audit), "admin")
            .unwrap();
        assert!(matches!(
            catalog.edit_source(1, Some("local"), None, &mut journal(&mut audit), "admin", None),
            Err(Error::DuplicateSource(_))
        ));
        assert!(catalog
            .edit_source(
                1,
                Some("et/pro"),
                Some("https://example.com/pro.tar.gz"),
                &mut journal(&mut audit),
                "admin",
                None
            )
            .unwrap());
        assert!(!catalog
            .edit_source(1, Some("et/pro"), None, &mut journal(&mut audit), "admin", None)
            .unwrap());
        let source = catalog.find_source("et/pro").unwrap();
        assert_eq!(source.uri, "https://example.com/pro.tar.gz");
        let entries = audit.for_object(ObjectRef::Source(1));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].options.as_deref(), Some("name, uri"));
    }

    #[test]
    fn test_delete_source() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        catalog
            .add_threshold(
                2001,
                &[1],
                &ThresholdSpec::suppress(TrackBy::BySrc, None),
                &mut journal(&mut audit),
                "admin",
                None,
            )
            .unwrap();
        catalog
            .edit_source(1, None, Some("file:///x"), &mut journal(&mut audit), "admin", None)
            .unwrap();

        let source = catalog
            .delete_source(1, &mut journal(&mut audit), "admin", None)
            .unwrap();
        assert_eq!(source.name, "et/open");
        assert!(catalog.rules.is_empty());
        assert!(catalog.categories.is_empty());
        assert!(catalog.thresholds.is_empty());
        let prod = catalog.ruleset(1).unwrap();
        assert!(prod.sources.is_empty());
        assert!(prod.categories.is_empty());

        let left: Vec<(Verb, ObjectRef)> = audit.entries().iter().map(|e| (e.verb, e.object)).collect();
        assert_eq!(left, vec![(Verb::Delete, ObjectRef::Source(1))]);
        assert!(catalog.delete_source(1, &mut journal(&mut audit), "admin", None).is_err());
    }

    #[test]
    fn test_search() {
        let catalog = test_catalog();
        let found = catalog.search("ssh");
        assert_eq!(found.rules.len(), 1);
        assert_eq!(found.rules[0].sid, 1001);
        assert!(found.categories.is_empty());

        let found = catalog.search("SCAN");
        assert_eq!(found.rules.len(), 2);
        assert_eq!(found.categories.len(), 1);

        let found = catalog.search("Prod");
        assert_eq!(found.rulesets.len(), 1);
        assert!(catalog.search("nothing like this").is_empty());
    }

    #[test]
    fn test_audit_failure_keeps_change_with_warning() {
        let mut catalog = test_catalog();
        let mut sink = FailingSink;
        let mut journal = Journal::new(&mut sink, false);
        let spec = ThresholdSpec::suppress(TrackBy::BySrc, None);

        let source = catalog
            .add_source("local", "file:///x", &mut journal, "admin")
            .unwrap();
        catalog
            .edit_source(source, Some("local2"), None, &mut journal, "admin", None)
            .unwrap();
        let ruleset = catalog
            .create_ruleset("new", &[], false, &mut journal, "admin", None)
            .unwrap();
        assert_eq!(
            catalog
                .activate_source(1, ruleset, &mut journal, "admin", None)
                .unwrap(),
            2
        );
        catalog
            .deactivate_source(1, ruleset, &mut journal, "admin", None)
            .unwrap();
        let copy = catalog
            .copy_ruleset(ruleset, "copy", &mut journal, "admin", None)
            .unwrap();
        catalog
            .rename_ruleset(copy, "copy2", &mut journal, "admin", None)
            .unwrap();
        catalog
            .delete_ruleset(copy, &mut journal, "admin", None)
            .unwrap();
        assert!(!catalog.toggle_availability(1001, &mut journal, "admin").unwrap());
        let ids = catalog
            .add_threshold(1001, &[1], &spec, &mut journal, "admin", None)
            .unwrap();
        catalog
            .edit_threshold(
                ids[0],
                ThresholdSpec::suppress(TrackBy::ByDst, None),
                &mut journal,
                "admin",
                None,
            )
            .unwrap();
        catalog
            .delete_threshold(ids[0], &mut journal, "admin", None)
            .unwrap();
        catalog
            .delete_source(source, &mut journal, "admin", None)
            .unwrap();
        // A comment is its own audit entry, so it fails either way.
        assert!(catalog
            .comment_rule(1001, "note", &mut journal, "admin")
            .is_err());

        assert_eq!(journal.warnings().len(), 13);
        assert!(catalog.find_ruleset("new").is_ok());
        assert!(catalog.find_ruleset("copy2").is_err());
        assert!(catalog.find_source("local2").is_err());
        assert!(catalog.thresholds.is_empty());
    }

    #[test]
    fn test_audit_failure_atomic_refuses_change() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        let empty = catalog
            .create_ruleset("empty", &[], false, &mut journal(&mut audit), "admin", None)
            .unwrap();
        let spec = ThresholdSpec::suppress(TrackBy::BySrc, None);
        let threshold = catalog
            .add_threshold(2001, &[1], &spec, &mut journal(&mut audit), "admin", None)
            .unwrap()[0];
        let before = catalog.clone();

        let mut sink = FailingSink;
        let mut journal = Journal::new(&mut sink, true);
        assert!(matches!(
            catalog.add_source("local", "file:///x", &mut journal, "admin"),
            Err(Error::Audit(_))
        ));
        assert!(catalog
            .edit_source(1, Some("renamed"), None, &mut journal, "admin", None)
            .is_err());
        assert!(catalog.delete_source(1, &mut journal, "admin", None).is_err());
        assert!(catalog
            .create_ruleset("new", &[], false, &mut journal, "admin", None)
            .is_err());
        assert!(catalog
            .copy_ruleset(1, "copy", &mut journal, "admin", None)
            .is_err());
        assert!(catalog
            .rename_ruleset(1, "renamed", &mut journal, "admin", None)
            .is_err());
        assert!(catalog.delete_ruleset(1, &mut journal, "admin", None).is_err());
        assert!(catalog
            .activate_source(1, empty, &mut journal, "admin", None)
            .is_err());
        assert!(catalog
            .deactivate_source(1, 1, &mut journal, "admin", None)
            .is_err());
        assert!(catalog.toggle_availability(1001, &mut journal, "admin").is_err());
        assert!(catalog
            .comment_rule(1001, "note", &mut journal, "admin")
            .is_err());
        assert!(catalog
            .add_threshold(1001, &[1, 2], &spec, &mut journal, "admin", None)
            .is_err());
        assert!(catalog
            .edit_threshold(
                threshold,
                ThresholdSpec::suppress(TrackBy::ByDst, None),
                &mut journal,
                "admin",
                None
            )
            .is_err());
        assert!(catalog
            .delete_threshold(threshold, &mut journal, "admin", None)
            .is_err());
        assert!(journal.warnings().is_empty());

        assert_eq!(catalog, before);
        // Ids of refused creations are not used up.
        let mut audit = AuditLog::new();
        assert_eq!(
            catalog
                .add_source("local", "file:///x", &mut Journal::new(&mut audit, false), "admin")
                .unwrap(),
            2
        );
    }
}
