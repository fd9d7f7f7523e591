// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::catalog::{Catalog, CategoryId, RulesetId, Sid};
use crate::error::Result;
use crate::transform::{Axis, Override, Setting, Transform};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Rule(Sid),
    Category(CategoryId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Rule(sid) => write!(f, "rule {sid}"),
            Subject::Category(id) => write!(f, "category {id}"),
        }
    }
}

/// Which level a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Rule,
    Category,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// `None` is the axis' "no transformation".
    pub value: Option<Transform>,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesetResolution {
    pub ruleset: RulesetId,
    pub name: String,
    resolutions: [Resolution; 3],
}

impl RulesetResolution {
    pub fn get(&self, axis: Axis) -> Resolution {
        self.resolutions[axis_index(axis)]
    }

    pub fn is_transformed(&self) -> bool {
        self.resolutions.iter().any(|r| r.value.is_some())
    }
}

fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::Action => 0,
        Axis::Lateral => 1,
        Axis::Target => 2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus<T> {
    /// Every ruleset holds this value or nothing. `None` when all are unset.
    Agreed(Option<T>),
    Mixed,
}

/// Reduce one stored value per ruleset to the value they agree on.
///
/// A value is agreed when its occurrences plus the unset rulesets account for
/// every ruleset; any observed value failing that makes the result mixed.
pub fn consensus<T: Copy + Eq + Hash>(values: &[Option<T>]) -> Consensus<T> {
    let total = values.len();
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut unset = 0;
    for value in values {
        match value {
            Some(value) => *counts.entry(*value).or_insert(0) += 1,
            None => unset += 1,
        }
    }

    let mut agreed = None;
    for (value, count) in counts {
        if count + unset != total {
            return Consensus::Mixed;
        }
        agreed = Some(value);
    }
    Consensus::Agreed(agreed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisDefault {
    pub setting: Setting,
    /// Rulesets disagree; `setting` is the subject's fallback.
    pub mixed: bool,
}

/// Initial values for a bulk edit of one subject across all rulesets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDefaults {
    axes: [AxisDefault; 3],
    /// Rulesets carrying a stored value. Empty when any axis is mixed.
    pub rulesets: Vec<RulesetId>,
}

impl EditDefaults {
    pub fn get(&self, axis: Axis) -> AxisDefault {
        self.axes[axis_index(axis)]
    }

    pub fn is_mixed(&self) -> bool {
        self.axes.iter().any(|a| a.mixed)
    }
}

pub struct Resolver<'a> {
    catalog: &'a Catalog,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn resolution(&self, subject: Subject, ruleset: RulesetId, axis: Axis) -> Result<Resolution> {
        let category = match subject {
            Subject::Rule(sid) => {
                let rule = self.catalog.rule(sid)?;
                if let Some(stored) = rule.stored(ruleset, axis) {
                    return Ok(Resolution {
                        value: stored.value(),
                        origin: Origin::Rule,
                    });
                }
                self.catalog.category(rule.category)?
            }
            Subject::Category(id) => self.catalog.category(id)?,
        };

        Ok(match category.stored(ruleset, axis) {
            Some(value) => Resolution {
                value: Some(value),
                origin: Origin::Category,
            },
            None => Resolution {
                value: None,
                origin: Origin::Default,
            },
        })
    }

    /// Effective value: rule override, then category override, then none.
    pub fn resolve(&self, subject: Subject, ruleset: RulesetId, axis: Axis) -> Result<Option<Transform>> {
        Ok(self.resolution(subject, ruleset, axis)?.value)
    }

    pub fn is_transformed(
        &self,
        subject: Subject,
        ruleset: RulesetId,
        axis: Axis,
        value: Option<Transform>,
    ) -> Result<bool> {
        Ok(self.resolve(subject, ruleset, axis)? == value)
    }

    /// Resolved values of every axis for each ruleset.
    pub fn table(&self, subject: Subject) -> Result<Vec<RulesetResolution>> {
        let mut table = Vec::new();
        for ruleset in self.catalog.rulesets.values() {
            let mut resolutions = [Resolution {
                value: None,
                origin: Origin::Default,
            }; 3];
            for axis in Axis::ALL {
                resolutions[axis_index(axis)] = self.resolution(subject, ruleset.id, axis)?;
            }
            table.push(RulesetResolution {
                ruleset: ruleset.id,
                name: ruleset.name.clone(),
                resolutions,
            });
        }
        Ok(table)
    }

    /// Pre-populate a bulk edit of `subject` from what its own level stores
    /// in every ruleset.
    pub fn edit_defaults(&self, subject: Subject) -> Result<EditDefaults> {
        let rulesets = self.catalog.ruleset_ids();
        let mut with_values = BTreeSet::new();
        let fallback = match subject {
            Subject::Rule(_) => Setting::Inherit,
            Subject::Category(_) => Setting::Clear,
        };
        let mut axes = [AxisDefault {
            setting: fallback,
            mixed: false,
        }; 3];

        for axis in Axis::ALL {
            let default = match subject {
                Subject::Rule(sid) => {
                    let rule = self.catalog.rule(sid)?;
                    let values: Vec<Option<Override>> =
                        rulesets.iter().map(|r| rule.stored(*r, axis)).collect();
                    with_values.extend(
                        rulesets
                            .iter()
                            .zip(&values)
                            .filter(|(_, v)| v.is_some())
                            .map(|(r, _)| *r),
                    );
                    match consensus(&values) {
                        Consensus::Agreed(Some(Override::Set(value))) => AxisDefault {
                            setting: Setting::Set(value),
                            mixed: false,
                        },
                        Consensus::Agreed(Some(Override::Clear)) => AxisDefault {
                            setting: Setting::Clear,
                            mixed: false,
                        },
                        Consensus::Agreed(None) => AxisDefault {
                            setting: fallback,
                            mixed: false,
                        },
                        Consensus::Mixed => AxisDefault {
                            setting: fallback,
                            mixed: true,
                        },
                    }
                }
                Subject::Category(id) => {
                    let category = self.catalog.category(id)?;
                    let values: Vec<Option<Transform>> =
                        rulesets.iter().map(|r| category.stored(*r, axis)).collect();
                    with_values.extend(
                        rulesets
                            .iter()
                            .zip(&values)
                            .filter(|(_, v)| v.is_some())
                            .map(|(r, _)| *r),
                    );
                    match consensus(&values) {
                        Consensus::Agreed(Some(value)) => AxisDefault {
                            setting: Setting::Set(value),
                            mixed: false,
                        },
                        Consensus::Agreed(None) => AxisDefault {
                            setting: fallback,
                            mixed: false,
                        },
                        Consensus::Mixed => AxisDefault {
                            setting: fallback,
                            mixed: true,
                        },
                    }
                }
            };
            axes[axis_index(axis)] = default;
        }

        let mut defaults = EditDefaults {
            axes,
            rulesets: with_values.into_iter().collect(),
        };
        if defaults.is_mixed() {
            defaults.rulesets.clear();
        }
        Ok(defaults)
    }
}
