// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::{Journal, NewAction, ObjectRef, Verb};
use crate::catalog::{Catalog, RulesetBuild, RulesetId};
use crate::diff::{self, Snapshot, SnapshotEntry};
use crate::error::Result;
use crate::resolve::{Resolver, Subject};
use crate::transform::{Action, Axis, Lateral, Target, Transform};
use chrono::Utc;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RULES_FILENAME: &str = "suricata.rules";
const THRESHOLD_FILENAME: &str = "threshold.config";

/// Rewrites rule text for the transformations in effect.
pub struct RuleRewriter {
    action_regex: Regex,
    header_regex: Regex,
    msg_regex: Regex,
    external_regex: Regex,
}

impl RuleRewriter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            action_regex: Regex::new(r"^(alert|drop|reject|rejectsrc|rejectdst|rejectboth)\b")?,
            header_regex: Regex::new(r"^\S+\s+\S+\s+(\S+)\s+\S+\s+(?:->|<>)\s+(\S+)")?,
            msg_regex: Regex::new(r#"msg:\s*"([^"]*)""#)?,
            external_regex: Regex::new(r"([\s\[,])\$EXTERNAL_NET\b")?,
        })
    }

    /// Replace `$EXTERNAL_NET` with `any` in the rule header. Only the bare
    /// variable is replaced; a negated `!$EXTERNAL_NET` is left as is.
    fn lateral(&self, content: &str) -> String {
        match content.find('(') {
            Some(start) => {
                let (header, options) = content.split_at(start);
                let header = self.external_regex.replace_all(header, "${1}any");
                format!("{header}{options}")
            }
            None => content.to_string(),
        }
    }

    pub fn apply(&self, content: &str, transform: Transform) -> String {
        match transform {
            Transform::Action(Action::Drop) => self.set_action(content, "drop"),
            Transform::Action(Action::Reject) => self.set_action(content, "reject"),
            Transform::Action(Action::Filestore) => add_keyword(content, "filestore"),
            Transform::Action(Action::Bypass) => add_keyword(content, "bypass"),
            Transform::Lateral(Lateral::Yes) => self.lateral(content),
            Transform::Lateral(Lateral::Auto) => {
                if self.msg(content).to_ascii_lowercase().contains("outbound") {
                    content.to_string()
                } else {
                    self.lateral(content)
                }
            }
            Transform::Target(target) => {
                if content.contains("target:") {
                    return content.to_string();
                }
                let side = match target {
                    Target::Source => "src_ip",
                    Target::Destination => "dest_ip",
                    Target::Auto => {
                        let source = self
                            .header_regex
                            .captures(content)
                            .and_then(|c| c.get(1))
                            .map(|m| m.as_str());
                        if source == Some("$HOME_NET") {
                            "src_ip"
                        } else {
                            "dest_ip"
                        }
                    }
                };
                add_option(content, &format!("target:{side};"))
            }
        }
    }

    /// Pass rules keep their action.
    fn set_action(&self, content: &str, action: &str) -> String {
        self.action_regex.replace(content, action).into_owned()
    }

    fn msg<'c>(&self, content: &'c str) -> &'c str {
        self.msg_regex
            .captures(content)
            .and_then(|c| c.get(1))
            .map_or("", |m| m.as_str())
    }
}

fn add_keyword(content: &str, keyword: &str) -> String {
    let option = format!("{keyword};");
    if content.contains(&option) {
        return content.to_string();
    }
    add_option(content, &option)
}

/// Insert an option before the closing parenthesis.
fn add_option(content: &str, option: &str) -> String {
    let trimmed = content.trim_end();
    match trimmed.strip_suffix(')') {
        Some(body) => {
            let body = body.trim_end();
            if body.ends_with(';') || body.ends_with('(') {
                format!("{body} {option})")
            } else {
                format!("{body}; {option})")
            }
        }
        None => content.to_string(),
    }
}

pub struct Export {
    pub rules: String,
    pub thresholds: String,
}

impl Export {
    /// Write `suricata.rules` and `threshold.config` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let rules = dir.join(RULES_FILENAME);
        let thresholds = dir.join(THRESHOLD_FILENAME);
        fs::write(&rules, &self.rules)?;
        fs::write(&thresholds, &self.thresholds)?;
        Ok(vec![rules, thresholds])
    }
}

pub struct RulesetBuilder<'a> {
    catalog: &'a Catalog,
    rewriter: RuleRewriter,
}

impl<'a> RulesetBuilder<'a> {
    pub fn new(catalog: &'a Catalog) -> Result<Self> {
        Ok(Self {
            catalog,
            rewriter: RuleRewriter::new()?,
        })
    }

    /// The rules of a ruleset with their transformations applied.
    pub fn build(&self, ruleset: RulesetId) -> Result<Snapshot> {
        let target = self.catalog.ruleset(ruleset)?;
        let resolver = Resolver::new(self.catalog);
        let mut snapshot = Snapshot::new();

        for rule in self.catalog.rules.values() {
            if !rule.state || target.suppressed.contains(&rule.sid) {
                continue;
            }
            if !target.categories.contains(&rule.category) {
                continue;
            }
            let category = self.catalog.category(rule.category)?;
            if !target.sources.contains(&category.source) {
                continue;
            }

            let mut content = rule.content.clone();
            for axis in Axis::ALL {
                if let Some(value) = resolver.resolve(Subject::Rule(rule.sid), ruleset, axis)? {
                    content = self.rewriter.apply(&content, value);
                }
            }
            snapshot.insert(SnapshotEntry {
                sid: rule.sid,
                gid: rule.gid,
                rev: rule.rev,
                msg: rule.msg.clone(),
                content,
                enabled: true,
                category: category.name.clone(),
            });
        }
        debug!("Built {} rules for ruleset {}", snapshot.len(), ruleset);
        Ok(snapshot)
    }

    pub fn export(&self, ruleset: RulesetId) -> Result<Export> {
        let snapshot = self.build(ruleset)?;
        let mut thresholds: Vec<String> = self
            .catalog
            .thresholds_in(ruleset)
            .map(|t| t.to_string())
            .collect();
        thresholds.sort();
        let mut threshold_text = thresholds.join("\n");
        if !threshold_text.is_empty() {
            threshold_text.push('\n');
        }
        Ok(Export {
            rules: snapshot.to_rules(),
            thresholds: threshold_text,
        })
    }
}

/// Build a ruleset, record what changed since the previous build and keep
/// the new build.
pub fn update_ruleset(
    catalog: &mut Catalog,
    ruleset: RulesetId,
    audit: &mut Journal<'_>,
    actor: &str,
) -> Result<RulesetBuild> {
    let snapshot = RulesetBuilder::new(catalog)?.build(ruleset)?;
    let changes = match &catalog.ruleset(ruleset)?.build {
        Some(previous) => diff::diff(previous, &snapshot),
        None => diff::diff(&Snapshot::new(), &snapshot),
    };
    let stats = changes.stats();
    audit.write(
        NewAction::new(actor, Verb::Modify, ObjectRef::Ruleset(ruleset))
            .ruleset(ruleset)
            .options(format!(
                "update: {} added, {} updated, {} deleted",
                stats.added, stats.updated, stats.deleted
            )),
    )?;

    let target = catalog.ruleset_mut(ruleset)?;
    let build = RulesetBuild {
        created: Utc::now(),
        changes,
    };
    target.build = Some(snapshot);
    target.builds.push(build.clone());
    info!(
        "Updated ruleset {}: {} added, {} updated, {} deleted",
        target.name, stats.added, stats.updated, stats.deleted
    );
    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::tests::FailingSink;
    use crate::audit::{AuditLog, Journal};
    use crate::catalog::tests::test_catalog;
    use crate::threshold::{ThresholdSpec, TrackBy};
    use crate::transform::Override;

    #[test]
    fn test_rewrite_action() {
        let rewriter = RuleRewriter::new().unwrap();
        let rule = "alert tcp any any -> any 80 (msg:\"x\"; sid:1;)";
        assert_eq!(
            rewriter.apply(rule, Transform::Action(Action::Drop)),
            "drop tcp any any -> any 80 (msg:\"x\"; sid:1;)"
        );
        assert_eq!(
            rewriter.apply(rule, Transform::Action(Action::Filestore)),
            "alert tcp any any -> any 80 (msg:\"x\"; sid:1; filestore;)"
        );
        let pass = "pass tcp any any -> any 80 (sid:2;)";
        assert_eq!(rewriter.apply(pass, Transform::Action(Action::Reject)), pass);
    }

    #[test]
    fn test_rewrite_lateral() {
        let rewriter = RuleRewriter::new().unwrap();
        let inbound =
            "alert tcp $EXTERNAL_NET any -> $HOME_NET 22 (msg:\"ssh from $EXTERNAL_NET\"; sid:1;)";
        assert_eq!(
            rewriter.apply(inbound, Transform::Lateral(Lateral::Yes)),
            "alert tcp any any -> $HOME_NET 22 (msg:\"ssh from $EXTERNAL_NET\"; sid:1;)"
        );
        let outbound =
            "alert tcp $HOME_NET any -> $EXTERNAL_NET 445 (msg:\"ET outbound smb\"; sid:2;)";
        assert_eq!(
            rewriter.apply(outbound, Transform::Lateral(Lateral::Auto)),
            outbound
        );
        assert!(rewriter
            .apply(outbound, Transform::Lateral(Lateral::Yes))
            .starts_with("alert tcp $HOME_NET any -> any 445"));
    }

    #[test]
    fn test_rewrite_lateral_whole_token_only() {
        let rewriter = RuleRewriter::new().unwrap();
        let negated = "alert tcp !$EXTERNAL_NET any -> $HOME_NET 22 (sid:3;)";
        assert_eq!(
            rewriter.apply(negated, Transform::Lateral(Lateral::Yes)),
            negated
        );
        let grouped = "alert ip [$EXTERNAL_NET,10.0.0.0/8] any -> [$HOME_NET,$EXTERNAL_NET_EXTRA] any (sid:4;)";
        assert_eq!(
            rewriter.apply(grouped, Transform::Lateral(Lateral::Yes)),
            "alert ip [any,10.0.0.0/8] any -> [$HOME_NET,$EXTERNAL_NET_EXTRA] any (sid:4;)"
        );
    }

    #[test]
    fn test_rewrite_target() {
        let rewriter = RuleRewriter::new().unwrap();
        let rule = "alert tcp $HOME_NET any -> $EXTERNAL_NET 445 (sid:2;)";
        assert_eq!(
            rewriter.apply(rule, Transform::Target(Target::Auto)),
            "alert tcp $HOME_NET any -> $EXTERNAL_NET 445 (sid:2; target:src_ip;)"
        );
        let inbound = "alert tcp $EXTERNAL_NET any -> $HOME_NET 22 (sid:1;)";
        assert!(rewriter
            .apply(inbound, Transform::Target(Target::Auto))
            .contains("target:dest_ip;"));
        let tagged = "alert tcp any any -> any any (sid:3; target:src_ip;)";
        assert_eq!(
            rewriter.apply(tagged, Transform::Target(Target::Destination)),
            tagged
        );
    }

    #[test]
    fn test_build_applies_resolution() {
        let mut catalog = test_catalog();
        catalog
            .category_mut(1)
            .unwrap()
            .store(1, Transform::Action(Action::Drop));
        catalog
            .rule_mut(1002)
            .unwrap()
            .store(1, Axis::Action, Override::Clear);
        catalog.ruleset_mut(1).unwrap().suppressed.insert(2001);

        let builder = RulesetBuilder::new(&catalog).unwrap();
        let prod = builder.build(1).unwrap();
        assert_eq!(prod.len(), 2);
        assert!(prod.get(1001).unwrap().content.starts_with("drop tcp"));
        assert!(prod.get(1002).unwrap().content.starts_with("alert tcp"));
        assert!(!prod.contains(2001));

        let lab = builder.build(2).unwrap();
        assert_eq!(lab.len(), 3);
        assert!(lab.get(1001).unwrap().content.starts_with("alert tcp"));
    }

    #[test]
    fn test_build_skips_inactive() {
        let mut catalog = test_catalog();
        catalog.rule_mut(1001).unwrap().state = false;
        catalog.ruleset_mut(2).unwrap().categories.remove(&2);
        let snapshot = RulesetBuilder::new(&catalog).unwrap().build(2).unwrap();
        assert_eq!(snapshot.entries.keys().copied().collect::<Vec<_>>(), vec![1002]);

        catalog.ruleset_mut(2).unwrap().sources.clear();
        let snapshot = RulesetBuilder::new(&catalog).unwrap().build(2).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_update_ruleset_changelog() {
        let mut catalog = test_catalog();
        let mut log = AuditLog::new();
        let mut audit = Journal::new(&mut log, false);
        let first = update_ruleset(&mut catalog, 1, &mut audit, "admin").unwrap();
        assert_eq!(first.changes.added.len(), 3);

        let second = update_ruleset(&mut catalog, 1, &mut audit, "admin").unwrap();
        assert!(second.changes.is_empty());

        catalog
            .category_mut(2)
            .unwrap()
            .store(1, Transform::Action(Action::Reject));
        let third = update_ruleset(&mut catalog, 1, &mut audit, "admin").unwrap();
        assert_eq!(third.changes.updated.len(), 1);
        assert_eq!(third.changes.updated[0].sid, 2001);
        assert_eq!(catalog.ruleset(1).unwrap().builds.len(), 3);
        drop(audit);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_update_ruleset_refused_when_audit_fails_atomically() {
        let mut catalog = test_catalog();
        let mut sink = FailingSink;
        let mut journal = Journal::new(&mut sink, true);
        assert!(update_ruleset(&mut catalog, 1, &mut journal, "admin").is_err());
        let ruleset = catalog.ruleset(1).unwrap();
        assert!(ruleset.build.is_none());
        assert!(ruleset.builds.is_empty());

        let mut sink = FailingSink;
        let mut journal = Journal::new(&mut sink, false);
        let build = update_ruleset(&mut catalog, 1, &mut journal, "admin").unwrap();
        assert_eq!(build.changes.added.len(), 3);
        assert_eq!(journal.warnings().len(), 1);
        assert_eq!(catalog.ruleset(1).unwrap().builds.len(), 1);
    }

    #[test]
    fn test_export() {
        let mut catalog = test_catalog();
        let mut audit = AuditLog::new();
        catalog
            .add_threshold(
                1001,
                &[1],
                &ThresholdSpec::suppress(TrackBy::BySrc, None),
                &mut Journal::new(&mut audit, false),
                "admin",
                None,
            )
            .unwrap();
        let export = RulesetBuilder::new(&catalog).unwrap().export(1).unwrap();
        assert_eq!(export.rules.lines().count(), 3);
        assert_eq!(
            export.thresholds,
            "suppress gen_id 1, sig_id 1001, track by_src\n"
        );

        let dir = tempfile::tempdir().unwrap();
        let written = export.write(&dir.path().join("prod")).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_to_string(&written[0]).unwrap(), export.rules);
    }
}
