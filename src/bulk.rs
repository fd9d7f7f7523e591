// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::{AuditSink, NewAction, ObjectRef, Verb};
use crate::catalog::{Catalog, CategoryId, RulesetId, Sid};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::transform::{Axis, AxisRequest, Override, Setting, CATEGORY_DEFAULT};
use tracing::{info, warn};

/// One applied change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub ruleset: RulesetId,
    pub axis: Option<Axis>,
    pub verb: Verb,
    pub value: String,
    /// Id of the audit entry, when it could be written.
    pub audit_id: Option<u64>,
}

#[derive(Debug)]
pub struct RulesetFailure {
    pub ruleset: RulesetId,
    pub axis: Option<Axis>,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct BulkReport {
    pub changes: Vec<Change>,
    pub failures: Vec<RulesetFailure>,
    /// Audit writes that failed after the change was kept.
    pub warnings: Vec<String>,
}

impl BulkReport {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.failures.is_empty()
    }

    fn merge(&mut self, other: BulkReport) {
        self.changes.extend(other.changes);
        self.failures.extend(other.failures);
        self.warnings.extend(other.warnings);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    Suppress,
    Enable,
}

impl Switch {
    fn verb(&self) -> Verb {
        match self {
            Switch::Suppress => Verb::Disable,
            Switch::Enable => Verb::Enable,
        }
    }
}

pub struct BulkEditor<'a> {
    catalog: &'a mut Catalog,
    audit: &'a mut dyn AuditSink,
    atomic: bool,
    actor: &'a str,
    comment: Option<&'a str>,
}

impl<'a> BulkEditor<'a> {
    pub fn new(
        catalog: &'a mut Catalog,
        audit: &'a mut dyn AuditSink,
        settings: &Settings,
        actor: &'a str,
    ) -> Self {
        Self {
            catalog,
            audit,
            atomic: settings.audit.atomic,
            actor,
            comment: None,
        }
    }

    pub fn comment(mut self, comment: Option<&'a str>) -> Self {
        self.comment = comment;
        self
    }

    /// Apply rule-level transformations in each ruleset.
    pub fn edit_rule(
        &mut self,
        sid: Sid,
        request: &AxisRequest,
        rulesets: &[RulesetId],
    ) -> Result<BulkReport> {
        self.catalog.rule(sid)?;
        request.validate()?;

        let mut report = BulkReport::default();
        for &ruleset in rulesets {
            if let Err(error) = self.catalog.ruleset(ruleset) {
                report.failures.push(RulesetFailure {
                    ruleset,
                    axis: None,
                    error,
                });
                continue;
            }
            for (axis, setting) in request.iter() {
                self.apply_rule_axis(sid, ruleset, axis, setting, &mut report)?;
            }
        }
        Ok(report)
    }

    fn apply_rule_axis(
        &mut self,
        sid: Sid,
        ruleset: RulesetId,
        axis: Axis,
        setting: Setting,
        report: &mut BulkReport,
    ) -> Result<()> {
        let category = self.catalog.rule(sid)?.category;
        let category_value = self.catalog.category(category)?.stored(ruleset, axis);
        let rule = self.catalog.rule_mut(sid)?;
        let stored = rule.stored(ruleset, axis);
        let previous = match stored {
            Some(value) => value.value(),
            None => category_value,
        };

        let change = match setting {
            Setting::Inherit => {
                if stored.is_none() {
                    return Ok(());
                }
                rule.remove(ruleset, axis);
                if previous == category_value {
                    return Ok(());
                }
                (Verb::Enable, axis.label(category_value))
            }
            Setting::Set(value) => {
                // Asking for what already resolves, stored or inherited,
                // is not a change.
                if previous == Some(value) {
                    return Ok(());
                }
                rule.store(ruleset, axis, Override::Set(value));
                (Verb::Enable, value.to_string())
            }
            Setting::Clear => {
                if stored == Some(Override::Clear) {
                    return Ok(());
                }
                rule.store(ruleset, axis, Override::Clear);
                match previous {
                    Some(old) => (Verb::Disable, old.to_string()),
                    None => return Ok(()),
                }
            }
        };

        let (verb, value) = change;
        info!(
            "Rule {} {} {} in ruleset {}: {}",
            sid,
            axis,
            verb,
            ruleset,
            value
        );
        self.commit(
            report,
            Change {
                ruleset,
                axis: Some(axis),
                verb,
                value,
                audit_id: None,
            },
            ObjectRef::Rule(sid),
            move |catalog| {
                if let Ok(rule) = catalog.rule_mut(sid) {
                    rule.restore(ruleset, axis, stored);
                }
            },
        );
        Ok(())
    }

    /// Apply category-level transformations in each ruleset. Only one value
    /// per axis can be active on a category, so a new value replaces the old.
    pub fn transform_category(
        &mut self,
        id: CategoryId,
        request: &AxisRequest,
        rulesets: &[RulesetId],
    ) -> Result<BulkReport> {
        self.catalog.category(id)?;
        request.validate()?;
        for (axis, setting) in request.iter() {
            if setting == Setting::Inherit {
                return Err(Error::InvalidTransformation {
                    axis,
                    value: CATEGORY_DEFAULT.to_string(),
                });
            }
        }

        let mut report = BulkReport::default();
        for &ruleset in rulesets {
            if let Err(error) = self.catalog.ruleset(ruleset) {
                report.failures.push(RulesetFailure {
                    ruleset,
                    axis: None,
                    error,
                });
                continue;
            }
            for (axis, setting) in request.iter() {
                self.apply_category_axis(id, ruleset, axis, setting, &mut report)?;
            }
        }
        Ok(report)
    }

    fn apply_category_axis(
        &mut self,
        id: CategoryId,
        ruleset: RulesetId,
        axis: Axis,
        setting: Setting,
        report: &mut BulkReport,
    ) -> Result<()> {
        let category = self.catalog.category_mut(id)?;
        let current = category.stored(ruleset, axis);

        let (verb, value) = match setting {
            Setting::Set(value) if current != Some(value) => {
                // Clear whichever other value of the axis is active first.
                if current.is_some() {
                    category.remove(ruleset, axis);
                }
                category.store(ruleset, value);
                (Verb::Enable, value.to_string())
            }
            Setting::Clear => match current {
                Some(old) => {
                    category.remove(ruleset, axis);
                    (Verb::Disable, old.to_string())
                }
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        info!(
            "Category {} {} {} in ruleset {}: {}",
            id, axis, verb, ruleset, value
        );
        self.commit(
            report,
            Change {
                ruleset,
                axis: Some(axis),
                verb,
                value,
                audit_id: None,
            },
            ObjectRef::Category(id),
            move |catalog| {
                if let Ok(category) = catalog.category_mut(id) {
                    category.restore(ruleset, axis, current);
                }
            },
        );
        Ok(())
    }

    /// Apply one category request to every category active in `ruleset`.
    pub fn apply_to_categories(
        &mut self,
        ruleset: RulesetId,
        request: &AxisRequest,
    ) -> Result<BulkReport> {
        let categories: Vec<CategoryId> = self
            .catalog
            .ruleset(ruleset)?
            .categories
            .iter()
            .copied()
            .collect();
        let mut report = BulkReport::default();
        for category in categories {
            report.merge(self.transform_category(category, request, &[ruleset])?);
        }
        Ok(report)
    }

    /// Suppress or re-enable a rule inside rulesets.
    pub fn switch_rule(
        &mut self,
        sid: Sid,
        switch: Switch,
        rulesets: &[RulesetId],
    ) -> Result<BulkReport> {
        self.catalog.rule(sid)?;
        let mut report = BulkReport::default();
        for &ruleset in rulesets {
            let target = match self.catalog.ruleset_mut(ruleset) {
                Ok(target) => target,
                Err(error) => {
                    report.failures.push(RulesetFailure {
                        ruleset,
                        axis: None,
                        error,
                    });
                    continue;
                }
            };
            let changed = match switch {
                Switch::Suppress => target.suppressed.insert(sid),
                Switch::Enable => target.suppressed.remove(&sid),
            };
            if !changed {
                continue;
            }
            self.commit(
                &mut report,
                Change {
                    ruleset,
                    axis: None,
                    verb: switch.verb(),
                    value: "rule".to_string(),
                    audit_id: None,
                },
                ObjectRef::Rule(sid),
                move |catalog| {
                    if let Ok(target) = catalog.ruleset_mut(ruleset) {
                        match switch {
                            Switch::Suppress => target.suppressed.remove(&sid),
                            Switch::Enable => target.suppressed.insert(sid),
                        };
                    }
                },
            );
        }
        Ok(report)
    }

    /// Remove a category from, or add it back to, rulesets. The category's
    /// source has to be active in the ruleset to enable it.
    pub fn switch_category(
        &mut self,
        id: CategoryId,
        switch: Switch,
        rulesets: &[RulesetId],
    ) -> Result<BulkReport> {
        let source = self.catalog.category(id)?.source;
        let mut report = BulkReport::default();
        for &ruleset in rulesets {
            let target = match self.catalog.ruleset_mut(ruleset) {
                Ok(target) => target,
                Err(error) => {
                    report.failures.push(RulesetFailure {
                        ruleset,
                        axis: None,
                        error,
                    });
                    continue;
                }
            };
            let changed = match switch {
                Switch::Suppress => target.categories.remove(&id),
                Switch::Enable => {
                    if !target.sources.contains(&source) {
                        let error = Error::NotPermitted(format!(
                            "source {} is not active in ruleset {}",
                            source, target.name
                        ));
                        report.failures.push(RulesetFailure {
                            ruleset,
                            axis: None,
                            error,
                        });
                        continue;
                    }
                    target.categories.insert(id)
                }
            };
            if !changed {
                continue;
            }
            self.commit(
                &mut report,
                Change {
                    ruleset,
                    axis: None,
                    verb: switch.verb(),
                    value: "category".to_string(),
                    audit_id: None,
                },
                ObjectRef::Category(id),
                move |catalog| {
                    if let Ok(target) = catalog.ruleset_mut(ruleset) {
                        match switch {
                            Switch::Suppress => target.categories.insert(id),
                            Switch::Enable => target.categories.remove(&id),
                        };
                    }
                },
            );
        }
        Ok(report)
    }

    /// Record `change`. When the audit write fails the change is kept with a
    /// warning, or undone and reported as a failure in atomic mode.
    fn commit(
        &mut self,
        report: &mut BulkReport,
        change: Change,
        object: ObjectRef,
        undo: impl FnOnce(&mut Catalog),
    ) {
        let options = match change.axis {
            Some(axis) => format!("{}: {}", axis, change.value),
            None => change.value.clone(),
        };
        let action = NewAction::new(self.actor, change.verb, object)
            .ruleset(change.ruleset)
            .options(options)
            .comment(self.comment);

        match self.audit.append(action) {
            Ok(id) => report.changes.push(Change {
                audit_id: Some(id),
                ..change
            }),
            Err(error) if self.atomic => {
                warn!("Reverting change on {}: {}", object, error);
                undo(&mut *self.catalog);
                report.failures.push(RulesetFailure {
                    ruleset: change.ruleset,
                    axis: change.axis,
                    error,
                });
            }
            Err(error) => {
                warn!("Change on {} kept without audit entry: {}", object, error);
                report
                    .warnings
                    .push(format!("{object} in ruleset {}: {error}", change.ruleset));
                report.changes.push(change);
            }
        }
    }
}
