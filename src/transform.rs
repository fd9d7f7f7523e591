// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label shared by every axis for "defer to the category".
pub const CATEGORY_DEFAULT: &str = "category";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Action,
    Lateral,
    Target,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Action, Axis::Lateral, Axis::Target];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Action => "action",
            Axis::Lateral => "lateral",
            Axis::Target => "target",
        }
    }

    /// How "no transformation" is spelled on this axis.
    pub fn none_label(&self) -> &'static str {
        match self {
            Axis::Action => "none",
            Axis::Lateral => "no",
            Axis::Target => "none",
        }
    }

    /// Every concrete value the axis accepts.
    pub fn domain(&self) -> Vec<Transform> {
        match self {
            Axis::Action => vec![
                Transform::Action(Action::Drop),
                Transform::Action(Action::Reject),
                Transform::Action(Action::Filestore),
                Transform::Action(Action::Bypass),
            ],
            Axis::Lateral => vec![
                Transform::Lateral(Lateral::Yes),
                Transform::Lateral(Lateral::Auto),
            ],
            Axis::Target => vec![
                Transform::Target(Target::Source),
                Transform::Target(Target::Destination),
                Transform::Target(Target::Auto),
            ],
        }
    }

    /// Render a resolved value, using the none label for `None`.
    pub fn label(&self, value: Option<Transform>) -> String {
        match value {
            Some(value) => value.to_string(),
            None => self.none_label().to_string(),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "action" => Ok(Axis::Action),
            "lateral" => Ok(Axis::Lateral),
            "target" => Ok(Axis::Target),
            _ => Err(Error::UnknownAxis(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Drop,
    Reject,
    Filestore,
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lateral {
    Yes,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    #[serde(rename = "src")]
    Source,
    #[serde(rename = "dst")]
    Destination,
    #[serde(rename = "auto")]
    Auto,
}

/// A concrete transformation value, tagged with its axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Action(Action),
    Lateral(Lateral),
    Target(Target),
}

impl Transform {
    pub fn axis(&self) -> Axis {
        match self {
            Transform::Action(_) => Axis::Action,
            Transform::Lateral(_) => Axis::Lateral,
            Transform::Target(_) => Axis::Target,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::Action(Action::Drop) => "drop",
            Transform::Action(Action::Reject) => "reject",
            Transform::Action(Action::Filestore) => "filestore",
            Transform::Action(Action::Bypass) => "bypass",
            Transform::Lateral(Lateral::Yes) => "yes",
            Transform::Lateral(Lateral::Auto) => "auto",
            Transform::Target(Target::Source) => "src",
            Transform::Target(Target::Destination) => "dst",
            Transform::Target(Target::Auto) => "auto",
        }
    }

    /// Parse a concrete value of the given axis. Sentinels are rejected.
    pub fn parse(axis: Axis, value: &str) -> Result<Self> {
        let wanted = value.trim().to_ascii_lowercase();
        axis.domain()
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| Error::InvalidTransformation {
                axis,
                value: value.to_string(),
            })
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested value for one axis of a subject in a ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    /// Drop the rule-level override and follow the category.
    Inherit,
    /// Explicitly no transformation.
    Clear,
    Set(Transform),
}

impl Setting {
    pub fn parse(axis: Axis, value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case(CATEGORY_DEFAULT) {
            Ok(Setting::Inherit)
        } else if trimmed.eq_ignore_ascii_case(axis.none_label()) {
            Ok(Setting::Clear)
        } else {
            Transform::parse(axis, trimmed).map(Setting::Set)
        }
    }

    /// Reject a value that does not belong to `axis`.
    pub fn check(&self, axis: Axis) -> Result<()> {
        match self {
            Setting::Set(t) if t.axis() != axis => Err(Error::InvalidTransformation {
                axis,
                value: t.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn label(&self, axis: Axis) -> String {
        match self {
            Setting::Inherit => CATEGORY_DEFAULT.to_string(),
            Setting::Clear => axis.none_label().to_string(),
            Setting::Set(t) => t.to_string(),
        }
    }
}

/// What a rule stores for one axis in one ruleset. Stored as an optional
/// transform since YAML cannot nest enum tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<Transform>", into = "Option<Transform>")]
pub enum Override {
    Clear,
    Set(Transform),
}

impl Override {
    pub fn value(&self) -> Option<Transform> {
        match self {
            Override::Clear => None,
            Override::Set(t) => Some(*t),
        }
    }
}

impl From<Option<Transform>> for Override {
    fn from(value: Option<Transform>) -> Self {
        match value {
            Some(t) => Override::Set(t),
            None => Override::Clear,
        }
    }
}

impl From<Override> for Option<Transform> {
    fn from(value: Override) -> Self {
        value.value()
    }
}

/// Per-axis request used by the bulk editor. Axes left out are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisRequest {
    pub action: Option<Setting>,
    pub lateral: Option<Setting>,
    pub target: Option<Setting>,
}

impl AxisRequest {
    pub fn get(&self, axis: Axis) -> Option<Setting> {
        match axis {
            Axis::Action => self.action,
            Axis::Lateral => self.lateral,
            Axis::Target => self.target,
        }
    }

    pub fn set(&mut self, axis: Axis, setting: Setting) {
        match axis {
            Axis::Action => self.action = Some(setting),
            Axis::Lateral => self.lateral = Some(setting),
            Axis::Target => self.target = Some(setting),
        }
    }

    pub fn with(mut self, axis: Axis, setting: Setting) -> Self {
        self.set(axis, setting);
        self
    }

    /// Build from optional CLI style strings.
    pub fn parse(
        action: Option<&str>,
        lateral: Option<&str>,
        target: Option<&str>,
    ) -> Result<Self> {
        let mut request = AxisRequest::default();
        for (axis, value) in [
            (Axis::Action, action),
            (Axis::Lateral, lateral),
            (Axis::Target, target),
        ] {
            if let Some(value) = value {
                request.set(axis, Setting::parse(axis, value)?);
            }
        }
        Ok(request)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, Setting)> + '_ {
        Axis::ALL
            .into_iter()
            .filter_map(|axis| self.get(axis).map(|s| (axis, s)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn validate(&self) -> Result<()> {
        for (axis, setting) in self.iter() {
            setting.check(axis)?;
        }
        Ok(())
    }
}
