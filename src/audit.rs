// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::catalog::{CategoryId, RulesetId, Sid, SourceId, ThresholdId};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Modify,
    Delete,
    Enable,
    Disable,
    Comment,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Create => "create",
            Verb::Modify => "modify",
            Verb::Delete => "delete",
            Verb::Enable => "enable",
            Verb::Disable => "disable",
            Verb::Comment => "comment",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectRef {
    Rule(Sid),
    Category(CategoryId),
    Source(SourceId),
    Ruleset(RulesetId),
    Threshold(ThresholdId),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Rule(sid) => write!(f, "rule {sid}"),
            ObjectRef::Category(id) => write!(f, "category {id}"),
            ObjectRef::Source(id) => write!(f, "source {id}"),
            ObjectRef::Ruleset(id) => write!(f, "ruleset {id}"),
            ObjectRef::Threshold(id) => write!(f, "threshold {id}"),
        }
    }
}

/// An entry about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAction {
    pub user: String,
    pub verb: Verb,
    pub object: ObjectRef,
    pub ruleset: Option<RulesetId>,
    pub options: Option<String>,
    pub comment: Option<String>,
}

impl NewAction {
    pub fn new(user: &str, verb: Verb, object: ObjectRef) -> Self {
        Self {
            user: user.to_string(),
            verb,
            object,
            ruleset: None,
            options: None,
            comment: None,
        }
    }

    pub fn ruleset(mut self, ruleset: RulesetId) -> Self {
        self.ruleset = Some(ruleset);
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    pub fn comment(mut self, comment: Option<&str>) -> Self {
        self.comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAction {
    pub id: u64,
    pub date: DateTime<Utc>,
    pub user: String,
    pub verb: Verb,
    pub object: ObjectRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset: Option<RulesetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.user, self.verb, self.object)?;
        if let Some(options) = &self.options {
            write!(f, " ({options})")?;
        }
        if let Some(ruleset) = self.ruleset {
            write!(f, " in ruleset {ruleset}")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, ": {comment}")?;
        }
        Ok(())
    }
}

/// Where audit entries are written. Returns the id of the new entry.
pub trait AuditSink {
    fn append(&mut self, action: NewAction) -> Result<u64>;

    /// Called when `object` is deleted. The entry `keep`, usually the one
    /// recording the deletion, survives.
    fn cascade(&mut self, _object: ObjectRef, _keep: Option<u64>) {}
}

/// Writes the entries of catalog operations ahead of the change they
/// describe. In atomic mode a failed write is an error and the operation
/// must not go ahead; otherwise the failure is kept as a warning.
pub struct Journal<'a> {
    sink: &'a mut dyn AuditSink,
    atomic: bool,
    warnings: Vec<String>,
}

impl<'a> Journal<'a> {
    pub fn new(sink: &'a mut dyn AuditSink, atomic: bool) -> Self {
        Self {
            sink,
            atomic,
            warnings: Vec::new(),
        }
    }

    /// `Ok(None)` when the entry could not be written but the change may
    /// still be made.
    pub fn write(&mut self, action: NewAction) -> Result<Option<u64>> {
        let object = action.object;
        match self.sink.append(action) {
            Ok(id) => Ok(Some(id)),
            Err(err) if self.atomic => {
                warn!("Refusing change on {}: {}", object, err);
                Err(err)
            }
            Err(err) => {
                warn!("Change on {} made without audit entry: {}", object, err);
                self.warnings.push(format!("{object}: {err}"));
                Ok(None)
            }
        }
    }

    /// Entries that are the change itself, like comments, always have to
    /// be written.
    pub fn append(&mut self, action: NewAction) -> Result<u64> {
        self.sink.append(action)
    }

    pub fn cascade(&mut self, object: ObjectRef, keep: Option<u64>) {
        self.sink.cascade(object, keep);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLog {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    entries: Vec<UserAction>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&UserAction> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[UserAction] {
        &self.entries
    }

    /// Newest first, at most `limit` entries.
    pub fn history(&self, limit: usize) -> Vec<&UserAction> {
        self.entries.iter().rev().take(limit).collect()
    }

    pub fn for_object(&self, object: ObjectRef) -> Vec<&UserAction> {
        self.entries.iter().filter(|e| e.object == object).collect()
    }

    /// Only the author of a comment may delete it, and only comments can be
    /// deleted this way.
    pub fn delete_comment(&mut self, id: u64, user: &str) -> Result<()> {
        let position = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(Error::UnknownAction(id))?;
        let entry = &self.entries[position];
        if entry.verb != Verb::Comment {
            return Err(Error::NotPermitted(format!(
                "user action {id} is not a comment"
            )));
        }
        if entry.user != user {
            return Err(Error::NotPermitted(format!(
                "comment {id} belongs to {}",
                entry.user
            )));
        }
        self.entries.remove(position);
        Ok(())
    }

    /// Drop every entry about a deleted object except `keep`. Returns how
    /// many went.
    pub fn remove_object(&mut self, object: ObjectRef, keep: Option<u64>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.object != object || Some(e.id) == keep);
        before - self.entries.len()
    }
}

impl AuditSink for AuditLog {
    fn append(&mut self, action: NewAction) -> Result<u64> {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(UserAction {
            id,
            date: Utc::now(),
            user: action.user,
            verb: action.verb,
            object: action.object,
            ruleset: action.ruleset,
            options: action.options,
            comment: action.comment,
        });
        Ok(id)
    }

    fn cascade(&mut self, object: ObjectRef, keep: Option<u64>) {
        self.remove_object(object, keep);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink that refuses every write.
    pub(crate) struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&mut self, _action: NewAction) -> Result<u64> {
            Err(Error::Audit("journal unavailable".to_string()))
        }
    }

    #[test]
    fn test_append_and_history() {
        let mut log = AuditLog::new();
        let first = log
            .append(NewAction::new("alice", Verb::Create, ObjectRef::Ruleset(1)).options("ruleset"))
            .unwrap();
        let second = log
            .append(
                NewAction::new("bob", Verb::Enable, ObjectRef::Rule(1001))
                    .ruleset(1)
                    .options("drop")
                    .comment(Some("  block it ")),
            )
            .unwrap();
        assert!(second > first);
        assert_eq!(log.len(), 2);

        let history = log.history(10);
        assert_eq!(history[0].id, second);
        assert_eq!(history[0].comment.as_deref(), Some("block it"));
        assert_eq!(log.history(1).len(), 1);
        assert_eq!(
            history[0].to_string(),
            "bob enable rule 1001 (drop) in ruleset 1: block it"
        );
    }

    #[test]
    fn test_empty_comment_is_dropped() {
        let action = NewAction::new("a", Verb::Comment, ObjectRef::Rule(1)).comment(Some("   "));
        assert_eq!(action.comment, None);
    }

    #[test]
    fn test_delete_comment_by_author_only() {
        let mut log = AuditLog::new();
        let comment = log
            .append(NewAction::new("alice", Verb::Comment, ObjectRef::Rule(1)).comment(Some("hi")))
            .unwrap();
        let enable = log
            .append(NewAction::new("alice", Verb::Enable, ObjectRef::Rule(1)))
            .unwrap();

        assert!(matches!(
            log.delete_comment(comment, "bob"),
            Err(Error::NotPermitted(_))
        ));
        assert!(matches!(
            log.delete_comment(enable, "alice"),
            Err(Error::NotPermitted(_))
        ));
        assert!(matches!(
            log.delete_comment(999, "alice"),
            Err(Error::UnknownAction(999))
        ));

        log.delete_comment(comment, "alice").unwrap();
        assert!(log.get(comment).is_none());
        assert!(log.get(enable).is_some());
    }

    #[test]
    fn test_remove_object_cascades() {
        let mut log = AuditLog::new();
        log.append(NewAction::new("a", Verb::Enable, ObjectRef::Rule(1)))
            .unwrap();
        log.append(NewAction::new("a", Verb::Disable, ObjectRef::Rule(1)))
            .unwrap();
        log.append(NewAction::new("a", Verb::Enable, ObjectRef::Rule(2)))
            .unwrap();
        assert_eq!(log.remove_object(ObjectRef::Rule(1), None), 2);
        assert_eq!(log.len(), 1);
        assert_eq!(log.for_object(ObjectRef::Rule(2)).len(), 1);
    }

    #[test]
    fn test_remove_object_keeps_tombstone() {
        let mut log = AuditLog::new();
        log.append(NewAction::new("a", Verb::Create, ObjectRef::Threshold(4)))
            .unwrap();
        let delete = log
            .append(NewAction::new("a", Verb::Delete, ObjectRef::Threshold(4)))
            .unwrap();
        assert_eq!(log.remove_object(ObjectRef::Threshold(4), Some(delete)), 1);
        let left = log.for_object(ObjectRef::Threshold(4));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].verb, Verb::Delete);
    }

    #[test]
    fn test_journal_failure_policy() {
        let action = || NewAction::new("a", Verb::Modify, ObjectRef::Source(1));

        let mut sink = FailingSink;
        let mut journal = Journal::new(&mut sink, false);
        assert_eq!(journal.write(action()).unwrap(), None);
        assert_eq!(journal.warnings().len(), 1);
        assert!(journal.append(action()).is_err());

        let mut sink = FailingSink;
        let mut journal = Journal::new(&mut sink, true);
        assert!(matches!(journal.write(action()), Err(Error::Audit(_))));
        assert!(journal.take_warnings().is_empty());

        let mut log = AuditLog::new();
        let mut journal = Journal::new(&mut log, true);
        assert_eq!(journal.write(action()).unwrap(), Some(1));
    }
}
