// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::catalog::{CategoryId, RulesetId, Sid, SourceId, ThresholdId};
use crate::transform::Axis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {axis} transformation: {value}")]
    InvalidTransformation { axis: Axis, value: String },

    #[error("unknown axis: {0}")]
    UnknownAxis(String),

    #[error("rule {0} not found")]
    UnknownRule(Sid),

    #[error("category {0} not found")]
    UnknownCategory(String),

    #[error("ruleset {0} not found")]
    UnknownRuleset(String),

    #[error("source {0} not found")]
    UnknownSource(String),

    #[error("source {0} is not in the source index")]
    UnknownIndexSource(String),

    #[error("source {name} requires the {parameter} parameter")]
    MissingParameter { name: String, parameter: String },

    #[error("threshold {0} not found")]
    UnknownThreshold(ThresholdId),

    #[error("user action {0} not found")]
    UnknownAction(u64),

    #[error("ruleset {0} already exists")]
    DuplicateRuleset(String),

    #[error("source {0} already exists")]
    DuplicateSource(String),

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("{0}")]
    NotPermitted(String),

    #[error("audit log write failed: {0}")]
    Audit(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn unknown_ruleset(id: RulesetId) -> Self {
        Error::UnknownRuleset(id.to_string())
    }

    pub(crate) fn unknown_category(id: CategoryId) -> Self {
        Error::UnknownCategory(id.to_string())
    }

    pub(crate) fn unknown_source(id: SourceId) -> Self {
        Error::UnknownSource(id.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
