// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use crate::audit::Journal;
use crate::bulk::{BulkEditor, BulkReport, Switch};
use crate::catalog::{Catalog, RulesetId, Sid};
use crate::cli::{
    AxisArgs, CategoryCommand, Commands, RuleCommand, RulesetArgs, RulesetCommand,
    SourceCommand, ThresholdArgs, ThresholdCommand,
};
use crate::config::Settings;
use crate::diff::{self, RuleParser, SnapshotDiff};
use crate::fetch;
use crate::generate::{self, RulesetBuilder};
use crate::index::{self, IndexChanges, IndexManager};
use crate::paths::PathProvider;
use crate::resolve::{EditDefaults, Origin, Resolution, Resolver, Subject};
use crate::source::SourceUpdater;
use crate::store::{State, StateStore};
use crate::threshold::{self, parse_net, Rate, ThresholdKind, ThresholdSpec, TrackBy};
use crate::transform::{Axis, AxisRequest, Setting, CATEGORY_DEFAULT};
use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::io::IsTerminal;
use std::path::Path;

pub struct Console<'a> {
    path_provider: &'a dyn PathProvider,
    settings: &'a Settings,
    store: StateStore,
    state: State,
    actor: String,
    comment: Option<String>,
    dirty: bool,
}

impl<'a> Console<'a> {
    pub fn open(
        path_provider: &'a dyn PathProvider,
        settings: &'a Settings,
        actor: String,
        comment: Option<String>,
    ) -> Result<Self> {
        let store = StateStore::new(path_provider.state_file());
        let state = store.load()?;
        Ok(Self {
            path_provider,
            settings,
            store,
            state,
            actor,
            comment,
            dirty: false,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.state.catalog
    }

    pub fn run(&mut self, command: Commands) -> Result<()> {
        let result = match command {
            Commands::Source(command) => self.source(command),
            Commands::Ruleset(command) => self.ruleset(command),
            Commands::Rule(command) => self.rule(command),
            Commands::Category(command) => self.category(command),
            Commands::Threshold(command) => self.threshold(command),
            Commands::Diff { old, new } => diff_files(&old, &new),
            Commands::History { limit, rule } => {
                self.history(limit.unwrap_or(self.settings.history_limit), rule);
                Ok(())
            }
            Commands::Search { pattern } => {
                self.search(&pattern);
                Ok(())
            }
            Commands::DeleteComment { id } => {
                self.state.audit.delete_comment(id, &self.actor)?;
                self.dirty = true;
                println!("Deleted comment {}", id);
                Ok(())
            }
        };
        // Keep whatever was applied before a failure.
        if self.dirty {
            self.store.save(&self.state)?;
        }
        result
    }

    /// Run a catalog operation against the audit log and report the entries
    /// that could not be written. The state is saved even when the
    /// operation fails part way.
    fn journaled<T>(
        &mut self,
        operation: impl FnOnce(&mut Catalog, &mut Journal<'_>, &str) -> crate::error::Result<T>,
    ) -> Result<T> {
        let mut journal = Journal::new(&mut self.state.audit, self.settings.audit.atomic);
        self.dirty = true;
        let result = operation(&mut self.state.catalog, &mut journal, &self.actor);
        for warning in journal.take_warnings() {
            eprintln!(
                "{}: no audit entry for {}",
                "Warning".yellow(),
                warning
            );
        }
        Ok(result?)
    }

    fn ruleset_id(&self, name: &str) -> Result<RulesetId> {
        Ok(self.state.catalog.find_ruleset(name)?.id)
    }

    fn source(&mut self, command: SourceCommand) -> Result<()> {
        match command {
            SourceCommand::Add { name, uri } => {
                let id = self.journaled(|catalog, audit, actor| {
                    catalog.add_source(&name, &uri, audit, actor)
                })?;
                println!("Added source {} ({})", name.cyan(), id);
            }
            SourceCommand::Update { name, force, quiet } => {
                let ids: Vec<_> = match name {
                    Some(name) => vec![self.state.catalog.find_source(&name)?.id],
                    None => self.state.catalog.sources.keys().copied().collect(),
                };
                if ids.is_empty() {
                    println!("{}: No sources configured", "Info".yellow());
                }
                for id in ids {
                    if let Err(err) = self.update_source(id, force, quiet) {
                        eprintln!("{}: {:#}", "Error".red(), err);
                    }
                }
            }
            SourceCommand::Changelog { name, limit } => {
                let source = self.state.catalog.find_source(&name)?;
                if source.updates.is_empty() {
                    println!("Source {} has never been updated", name.cyan());
                }
                for update in source.updates.iter().rev().take(limit) {
                    println!(
                        "{} version {} ({} skipped)",
                        update.created.format("%Y-%m-%d %H:%M:%S").to_string().bold(),
                        update.version.bright_black(),
                        update.skipped
                    );
                    print_changes(&update.changes);
                }
            }
            SourceCommand::List => {
                for source in self.state.catalog.sources.values() {
                    let rules: usize = self
                        .state
                        .catalog
                        .categories_of_source(source.id)
                        .map(|c| self.state.catalog.rules_in_category(c.id).count())
                        .sum();
                    let updated = source
                        .latest_update()
                        .map(|u| u.created.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:>4} {} {} rules, updated {}",
                        source.id,
                        source.name.cyan(),
                        rules,
                        updated
                    );
                    println!("     {}", source.uri.bright_black());
                }
            }
            SourceCommand::Edit {
                name,
                new_name,
                uri,
            } => {
                let id = self.state.catalog.find_source(&name)?.id;
                let comment = self.comment.clone();
                let changed = self.journaled(|catalog, audit, actor| {
                    catalog.edit_source(
                        id,
                        new_name.as_deref(),
                        uri.as_deref(),
                        audit,
                        actor,
                        comment.as_deref(),
                    )
                })?;
                if changed {
                    println!("Updated source {}", name.cyan());
                } else {
                    println!("{}: Nothing to change", "Info".yellow());
                }
            }
            SourceCommand::Delete { name } => {
                let id = self.state.catalog.find_source(&name)?.id;
                let comment = self.comment.clone();
                self.journaled(|catalog, audit, actor| {
                    catalog.delete_source(id, audit, actor, comment.as_deref())
                })?;
                println!("Deleted source {}", name.cyan());
            }
            SourceCommand::Index { update, force } => {
                let manager = IndexManager::new(self.path_provider, self.settings);
                if update || force {
                    match manager.update(force)? {
                        Some(changes) => print_index_changes(&changes),
                        None => println!(
                            "{}: Source index is recent, use --force to download it again",
                            "Info".yellow()
                        ),
                    }
                }
                let index = manager.get_or_download()?;
                for (id, info) in &index.sources {
                    let mut notes = Vec::new();
                    if info.requires_secret_code() {
                        notes.push("secret code".yellow().to_string());
                    }
                    if info.deprecated.is_some() || info.obsolete.is_some() {
                        notes.push("deprecated".red().to_string());
                    }
                    println!("{} {} {}", id.cyan(), info.summary, notes.join(" "));
                    println!("    {} {}", info.vendor, info.license.as_deref().unwrap_or(""));
                }
            }
            SourceCommand::AddPublic {
                id,
                name,
                secret_code,
                rulesets,
            } => {
                let public = IndexManager::new(self.path_provider, self.settings).get_or_download()?;
                let needs_code = public.get(&id)?.requires_secret_code();
                let secret_code = match secret_code {
                    None if needs_code && std::io::stdin().is_terminal() => Some(
                        inquire::Password::new("Secret code:")
                            .without_confirmation()
                            .prompt()?,
                    ),
                    code => code,
                };
                let rulesets = rulesets
                    .iter()
                    .map(|r| self.ruleset_id(r))
                    .collect::<Result<Vec<_>>>()?;
                let comment = self.comment.clone();
                let source = self.journaled(|catalog, audit, actor| {
                    index::add_public_source(
                        catalog,
                        &public,
                        &id,
                        name.as_deref(),
                        secret_code.as_deref(),
                        &rulesets,
                        audit,
                        actor,
                        comment.as_deref(),
                    )
                })?;
                println!(
                    "Added source {} ({}), run `source update` to fetch it",
                    name.as_deref().unwrap_or(&id).cyan(),
                    source
                );
            }
        }
        Ok(())
    }

    fn search(&self, pattern: &str) {
        let found = self.state.catalog.search(pattern);
        if found.is_empty() {
            println!("Nothing matches {}", pattern.cyan());
            return;
        }
        for rule in &found.rules {
            println!("{} {} {}", "rule".bold(), rule.sid, rule.content.bright_black());
        }
        for category in &found.categories {
            let source = self
                .state
                .catalog
                .source(category.source)
                .map(|s| s.name.as_str())
                .unwrap_or("?");
            println!("{} {}/{}", "category".bold(), source, category.name.cyan());
        }
        for ruleset in &found.rulesets {
            println!("{} {} ({})", "ruleset".bold(), ruleset.name.cyan(), ruleset.id);
        }
    }

    fn update_source(&mut self, id: u32, force: bool, quiet: bool) -> Result<()> {
        let source = self.state.catalog.source(id)?;
        let name = source.name.clone();
        let uri = self.settings.expand_uri(&source.uri);
        if !quiet {
            println!("\nProcessing source: {}", name.cyan());
        }

        let fetcher = fetch::fetcher_for(&uri, self.path_provider, quiet);
        let files = fetcher
            .fetch(&uri, force)
            .with_context(|| format!("Failed to fetch source {name}"))?;
        let update = self.journaled(|catalog, audit, actor| {
            SourceUpdater::new(catalog, audit)?.update(id, &files, actor)
        })?;
        match update {
            Some(update) => {
                if !quiet {
                    let stats = update.changes.stats();
                    println!(
                        "  {} added, {} updated, {} deleted",
                        stats.added.to_string().green(),
                        stats.updated.to_string().yellow(),
                        stats.deleted.to_string().red()
                    );
                }
            }
            None => {
                if !quiet {
                    println!("  {}", "No change".yellow());
                }
            }
        }
        Ok(())
    }

    fn ruleset(&mut self, command: RulesetCommand) -> Result<()> {
        let comment = self.comment.clone();
        let comment = comment.as_deref();
        match command {
            RulesetCommand::Add {
                name,
                sources,
                no_categories,
                axes,
            } => {
                let request = AxisRequest::parse(
                    axes.action.as_deref(),
                    axes.lateral.as_deref(),
                    axes.target.as_deref(),
                )?;
                request.validate()?;
                let sources = sources
                    .iter()
                    .map(|s| Ok(self.state.catalog.find_source(s)?.id))
                    .collect::<Result<Vec<_>>>()?;
                let id = self.journaled(|catalog, audit, actor| {
                    catalog.create_ruleset(&name, &sources, !no_categories, audit, actor, comment)
                })?;
                println!("Created ruleset {} ({})", name.cyan(), id);
                if !request.is_empty() {
                    let report = BulkEditor::new(
                        &mut self.state.catalog,
                        &mut self.state.audit,
                        self.settings,
                        &self.actor,
                    )
                    .comment(comment)
                    .apply_to_categories(id, &request)?;
                    self.print_report(&report);
                }
            }
            RulesetCommand::Copy { name, new_name } => {
                let id = self.ruleset_id(&name)?;
                let copy = self.journaled(|catalog, audit, actor| {
                    catalog.copy_ruleset(id, &new_name, audit, actor, comment)
                })?;
                println!("Copied {} to {} ({})", name.cyan(), new_name.cyan(), copy);
            }
            RulesetCommand::Rename { name, new_name } => {
                let id = self.ruleset_id(&name)?;
                self.journaled(|catalog, audit, actor| {
                    catalog.rename_ruleset(id, &new_name, audit, actor, comment)
                })?;
                println!("Renamed {} to {}", name.cyan(), new_name.cyan());
            }
            RulesetCommand::Delete { name } => {
                let id = self.ruleset_id(&name)?;
                self.journaled(|catalog, audit, actor| {
                    catalog.delete_ruleset(id, audit, actor, comment)
                })?;
                println!("Deleted ruleset {}", name.cyan());
            }
            RulesetCommand::ActivateSource { name, source } => {
                let id = self.ruleset_id(&name)?;
                let source_id = self.state.catalog.find_source(&source)?.id;
                let added = self.journaled(|catalog, audit, actor| {
                    catalog.activate_source(source_id, id, audit, actor, comment)
                })?;
                println!(
                    "Activated {} in {}: {} categories added",
                    source.cyan(),
                    name.cyan(),
                    added
                );
            }
            RulesetCommand::DeactivateSource { name, source } => {
                let id = self.ruleset_id(&name)?;
                let source_id = self.state.catalog.find_source(&source)?.id;
                self.journaled(|catalog, audit, actor| {
                    catalog.deactivate_source(source_id, id, audit, actor, comment)
                })?;
                println!("Deactivated {} in {}", source.cyan(), name.cyan());
            }
            RulesetCommand::Update { name } => {
                let id = self.ruleset_id(&name)?;
                let build = self.journaled(|catalog, audit, actor| {
                    generate::update_ruleset(catalog, id, audit, actor)
                })?;
                let stats = build.changes.stats();
                println!(
                    "Updated {}: {} added, {} updated, {} deleted",
                    name.cyan(),
                    stats.added.to_string().green(),
                    stats.updated.to_string().yellow(),
                    stats.deleted.to_string().red()
                );
            }
            RulesetCommand::Changelog { name, limit } => {
                let ruleset = self.state.catalog.find_ruleset(&name)?;
                if ruleset.builds.is_empty() {
                    println!("Ruleset {} has never been built", name.cyan());
                }
                for build in ruleset.builds.iter().rev().take(limit) {
                    println!(
                        "{}",
                        build.created.format("%Y-%m-%d %H:%M:%S").to_string().bold()
                    );
                    print_changes(&build.changes);
                }
            }
            RulesetCommand::Export { name, output } => {
                let id = self.ruleset_id(&name)?;
                let export = RulesetBuilder::new(&self.state.catalog)?.export(id)?;
                let dir = output.unwrap_or_else(|| self.path_provider.export_dir().join(&name));
                let written = export
                    .write(&dir)
                    .with_context(|| format!("Failed to export to {}", dir.display()))?;
                for path in written {
                    println!("Wrote {}", path.display());
                }
            }
            RulesetCommand::List => {
                for ruleset in self.state.catalog.rulesets.values() {
                    println!(
                        "{:>4} {} {} sources, {} categories, {} suppressed, {} thresholds",
                        ruleset.id,
                        ruleset.name.cyan(),
                        ruleset.sources.len(),
                        ruleset.categories.len(),
                        ruleset.suppressed.len(),
                        self.state.catalog.thresholds_in(ruleset.id).count()
                    );
                }
            }
        }
        Ok(())
    }

    fn rule(&mut self, command: RuleCommand) -> Result<()> {
        let comment = self.comment.clone();
        let comment = comment.as_deref();
        match command {
            RuleCommand::Show { sid } => self.show(Subject::Rule(sid))?,
            RuleCommand::Edit {
                sid,
                rulesets,
                axes,
            } => {
                let subject = Subject::Rule(sid);
                self.state.catalog.rule(sid)?;
                let defaults = Resolver::new(&self.state.catalog).edit_defaults(subject)?;
                let request = self.axis_request(&axes, subject, &defaults)?;
                let rulesets = self.select_rulesets(&rulesets, Some(&defaults))?;
                let report = BulkEditor::new(
                    &mut self.state.catalog,
                    &mut self.state.audit,
                    self.settings,
                    &self.actor,
                )
                .comment(comment)
                .edit_rule(sid, &request, &rulesets)?;
                self.finish(&report);
            }
            RuleCommand::Suppress { sid, rulesets } => {
                self.switch_rule(sid, Switch::Suppress, &rulesets)?
            }
            RuleCommand::Enable { sid, rulesets } => {
                self.switch_rule(sid, Switch::Enable, &rulesets)?
            }
            RuleCommand::Comment { sid, text } => {
                let id = self.journaled(|catalog, audit, actor| {
                    catalog.comment_rule(sid, &text, audit, actor)
                })?;
                println!("Added comment {} on rule {}", id, sid);
            }
            RuleCommand::Toggle { sid } => {
                let state = self.journaled(|catalog, audit, actor| {
                    catalog.toggle_availability(sid, audit, actor)
                })?;
                let label = if state {
                    "available".green()
                } else {
                    "unavailable".red()
                };
                println!("Rule {} is now {}", sid, label);
            }
            RuleCommand::Threshold {
                sid,
                rulesets,
                spec,
                force,
            } => {
                self.state.catalog.rule(sid)?;
                let spec = threshold_spec(&spec, None)?;
                let rulesets = self.select_rulesets(&rulesets, None)?;
                let mut targets = Vec::new();
                for ruleset in rulesets {
                    let existing = threshold::containers(
                        self.state.catalog.thresholds_in(ruleset),
                        sid,
                        &spec,
                    );
                    match existing.first() {
                        Some(covering) if !force => println!(
                            "{}: ruleset {} already has {} (threshold {}), skipping",
                            "Info".yellow(),
                            ruleset,
                            covering,
                            covering.id
                        ),
                        _ => targets.push(ruleset),
                    }
                }
                if !targets.is_empty() {
                    let ids = self.journaled(|catalog, audit, actor| {
                        catalog.add_threshold(sid, &targets, &spec, audit, actor, comment)
                    })?;
                    for id in ids {
                        println!("Added {} {}", spec.kind, id);
                    }
                }
            }
        }
        Ok(())
    }

    fn switch_rule(&mut self, sid: Sid, switch: Switch, rulesets: &RulesetArgs) -> Result<()> {
        self.state.catalog.rule(sid)?;
        let rulesets = self.select_rulesets(rulesets, None)?;
        let comment = self.comment.clone();
        let report = BulkEditor::new(
            &mut self.state.catalog,
            &mut self.state.audit,
            self.settings,
            &self.actor,
        )
        .comment(comment.as_deref())
        .switch_rule(sid, switch, &rulesets)?;
        self.finish(&report);
        Ok(())
    }

    fn category(&mut self, command: CategoryCommand) -> Result<()> {
        let comment = self.comment.clone();
        let comment = comment.as_deref();
        match command {
            CategoryCommand::Show { name } => {
                let id = self.state.catalog.find_category(&name)?.id;
                self.show(Subject::Category(id))?;
            }
            CategoryCommand::Transform {
                name,
                rulesets,
                axes,
            } => {
                let id = self.state.catalog.find_category(&name)?.id;
                let subject = Subject::Category(id);
                let defaults = Resolver::new(&self.state.catalog).edit_defaults(subject)?;
                let request = self.axis_request(&axes, subject, &defaults)?;
                let rulesets = self.select_rulesets(&rulesets, Some(&defaults))?;
                let report = BulkEditor::new(
                    &mut self.state.catalog,
                    &mut self.state.audit,
                    self.settings,
                    &self.actor,
                )
                .comment(comment)
                .transform_category(id, &request, &rulesets)?;
                self.finish(&report);
            }
            CategoryCommand::Suppress { name, rulesets } => {
                self.switch_category(&name, Switch::Suppress, &rulesets, comment)?
            }
            CategoryCommand::Enable { name, rulesets } => {
                self.switch_category(&name, Switch::Enable, &rulesets, comment)?
            }
        }
        Ok(())
    }

    fn switch_category(
        &mut self,
        name: &str,
        switch: Switch,
        rulesets: &RulesetArgs,
        comment: Option<&str>,
    ) -> Result<()> {
        let id = self.state.catalog.find_category(name)?.id;
        let rulesets = self.select_rulesets(rulesets, None)?;
        let report = BulkEditor::new(
            &mut self.state.catalog,
            &mut self.state.audit,
            self.settings,
            &self.actor,
        )
        .comment(comment)
        .switch_category(id, switch, &rulesets)?;
        self.finish(&report);
        Ok(())
    }

    fn threshold(&mut self, command: ThresholdCommand) -> Result<()> {
        let comment = self.comment.clone();
        let comment = comment.as_deref();
        match command {
            ThresholdCommand::Edit { id, spec } => {
                let current = self.state.catalog.threshold(id)?.spec.gid;
                let spec = threshold_spec(&spec, Some(current))?;
                self.journaled(|catalog, audit, actor| {
                    catalog.edit_threshold(id, spec, audit, actor, comment)
                })?;
                println!("Updated threshold {}", id);
            }
            ThresholdCommand::Delete { id } => {
                let deleted = self.journaled(|catalog, audit, actor| {
                    catalog.delete_threshold(id, audit, actor, comment)
                })?;
                println!("Deleted {}", deleted);
            }
        }
        Ok(())
    }

    fn history(&self, limit: usize, rule: Option<Sid>) {
        let entries = match rule {
            Some(sid) => {
                let mut entries = self
                    .state
                    .audit
                    .for_object(crate::audit::ObjectRef::Rule(sid));
                entries.reverse();
                entries.truncate(limit);
                entries
            }
            None => self.state.audit.history(limit),
        };
        for entry in entries {
            println!(
                "{:>5} {} {}",
                entry.id,
                entry.date.format("%Y-%m-%d %H:%M:%S").to_string().bright_black(),
                entry
            );
        }
    }

    fn show(&self, subject: Subject) -> Result<()> {
        let catalog = &self.state.catalog;
        match subject {
            Subject::Rule(sid) => {
                let rule = catalog.rule(sid)?;
                let category = catalog.category(rule.category)?;
                println!("{} {}", "Rule".bold(), sid);
                println!("  gid {} rev {}, category {}", rule.gid, rule.rev, category.name.cyan());
                if !rule.state {
                    println!("  {}", "unavailable".red());
                }
                println!("  {}", rule.content.bright_black());
            }
            Subject::Category(id) => {
                let category = catalog.category(id)?;
                let source = catalog.source(category.source)?;
                println!("{} {}/{}", "Category".bold(), source.name, category.name.cyan());
                println!("  {} rules", catalog.rules_in_category(id).count());
            }
        }

        let resolver = Resolver::new(catalog);
        for row in resolver.table(subject)? {
            let ruleset = catalog.ruleset(row.ruleset)?;
            let active = match subject {
                Subject::Rule(sid) => {
                    let rule = catalog.rule(sid)?;
                    if ruleset.suppressed.contains(&sid) {
                        "suppressed".red().to_string()
                    } else if ruleset.categories.contains(&rule.category) {
                        "active".green().to_string()
                    } else {
                        "inactive".bright_black().to_string()
                    }
                }
                Subject::Category(id) => {
                    if ruleset.categories.contains(&id) {
                        "active".green().to_string()
                    } else {
                        "inactive".bright_black().to_string()
                    }
                }
            };
            let axes: Vec<String> = Axis::ALL
                .iter()
                .map(|axis| format!("{}={}", axis, describe(*axis, row.get(*axis))))
                .collect();
            println!("  {:<16} {:<10} {}", row.name, active, axes.join(" "));
        }

        if let Subject::Rule(sid) = subject {
            for threshold in catalog.thresholds_for(sid) {
                println!("  [{}] ruleset {}: {}", threshold.id, threshold.ruleset, threshold);
            }
            for entry in self.state.audit.for_object(crate::audit::ObjectRef::Rule(sid)) {
                println!("  {} {}", entry.id.to_string().bright_black(), entry);
            }
        }
        Ok(())
    }

    /// Axis values from the flags, or prompted for on a terminal.
    fn axis_request(
        &self,
        args: &AxisArgs,
        subject: Subject,
        defaults: &EditDefaults,
    ) -> Result<AxisRequest> {
        let request = AxisRequest::parse(
            args.action.as_deref(),
            args.lateral.as_deref(),
            args.target.as_deref(),
        )?;
        if !request.is_empty() {
            return Ok(request);
        }
        if !std::io::stdin().is_terminal() {
            anyhow::bail!("Nothing to change, use --action, --lateral or --target");
        }

        let mut request = AxisRequest::default();
        for axis in Axis::ALL {
            let mut options = Vec::new();
            if let Subject::Rule(_) = subject {
                options.push(CATEGORY_DEFAULT.to_string());
            }
            options.push(axis.none_label().to_string());
            options.extend(axis.domain().iter().map(|t| t.to_string()));

            let default = defaults.get(axis);
            let label = default.setting.label(axis);
            let cursor = options.iter().position(|o| *o == label).unwrap_or(0);
            let mut prompt = format!("{axis}:");
            if default.mixed {
                prompt = format!("{axis} (rulesets disagree):");
            }
            let choice = inquire::Select::new(&prompt, options)
                .with_starting_cursor(cursor)
                .prompt()?;
            let setting = Setting::parse(axis, &choice)?;
            if default.mixed || setting != default.setting {
                request.set(axis, setting);
            }
        }
        Ok(request)
    }

    /// Rulesets named with `--ruleset`, or picked interactively with the
    /// rulesets already carrying values pre-selected.
    fn select_rulesets(
        &self,
        args: &RulesetArgs,
        defaults: Option<&EditDefaults>,
    ) -> Result<Vec<RulesetId>> {
        if !args.rulesets.is_empty() {
            return args.rulesets.iter().map(|r| self.ruleset_id(r)).collect();
        }
        if !std::io::stdin().is_terminal() {
            anyhow::bail!("No ruleset given, use --ruleset");
        }

        let catalog = &self.state.catalog;
        let ids = catalog.ruleset_ids();
        if ids.is_empty() {
            anyhow::bail!("No rulesets exist yet");
        }
        let options: Vec<String> = ids
            .iter()
            .filter_map(|id| catalog.ruleset(*id).ok())
            .map(|r| r.name.clone())
            .collect();
        let selected: Vec<usize> = defaults
            .map(|d| {
                ids.iter()
                    .enumerate()
                    .filter(|(_, id)| d.rulesets.contains(id))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default();

        let chosen = inquire::MultiSelect::new("Select rulesets:", options)
            .with_default(&selected)
            .with_page_size(15)
            .prompt()?;
        chosen.iter().map(|name| self.ruleset_id(name)).collect()
    }

    fn finish(&mut self, report: &BulkReport) {
        if !report.changes.is_empty() {
            self.dirty = true;
        }
        self.print_report(report);
    }

    fn print_report(&self, report: &BulkReport) {
        let name = |id: RulesetId| {
            self.state
                .catalog
                .ruleset(id)
                .map(|r| r.name.clone())
                .unwrap_or_else(|_| id.to_string())
        };
        for change in &report.changes {
            let what = match change.axis {
                Some(axis) => format!("{} {}", axis, change.value),
                None => change.value.clone(),
            };
            println!("  {}: {} {}", name(change.ruleset).cyan(), change.verb, what.green());
        }
        for warning in &report.warnings {
            eprintln!("{}: {}", "Warning".yellow(), warning);
        }
        for failure in &report.failures {
            eprintln!(
                "{}: ruleset {}: {}",
                "Error".red(),
                name(failure.ruleset),
                failure.error
            );
        }
        if report.is_noop() {
            println!("{}", "No change".yellow());
        }
    }
}

fn describe(axis: Axis, resolution: Resolution) -> String {
    let value = axis.label(resolution.value);
    match resolution.origin {
        Origin::Rule => value.bold().to_string(),
        Origin::Category => format!("{value}*"),
        Origin::Default => value.bright_black().to_string(),
    }
}

fn threshold_spec(args: &ThresholdArgs, gid: Option<u32>) -> Result<ThresholdSpec> {
    let kind: ThresholdKind = args.kind.parse()?;
    let track: TrackBy = args.track.parse()?;
    let mut spec = match kind {
        ThresholdKind::Suppress => {
            let net = args.net.as_deref().map(parse_net).transpose()?;
            ThresholdSpec::suppress(track, net)
        }
        ThresholdKind::Threshold => {
            if args.net.is_some() {
                anyhow::bail!("--net only applies to suppressions");
            }
            ThresholdSpec::threshold(
                track,
                Rate {
                    rate_type: args.rate_type.parse()?,
                    count: args.count,
                    seconds: args.seconds,
                },
            )
        }
    };
    if let Some(gid) = gid {
        spec.gid = gid;
    }
    spec.validate()?;
    Ok(spec)
}

fn print_index_changes(changes: &IndexChanges) {
    if changes.is_empty() {
        println!("{}", "No change in the source index".yellow());
    }
    for name in &changes.added {
        println!("Source {} was {}", name.cyan(), "added".green());
    }
    for name in &changes.removed {
        println!("Source {} was {}", name.cyan(), "removed".red());
    }
    for name in &changes.changed {
        println!("Source {} was {}", name.cyan(), "changed".yellow());
    }
}

fn print_changes(changes: &SnapshotDiff) {
    if changes.is_empty() {
        println!("  {}", "No change".bright_black());
    }
    for entry in &changes.added {
        println!("  {} {} {}", "+".green(), entry.sid, entry.msg);
    }
    for entry in &changes.updated {
        println!("  {} {} {}", "~".yellow(), entry.sid, entry.msg);
    }
    for entry in &changes.deleted {
        println!("  {} {} {}", "-".red(), entry.sid, entry.msg);
    }
}

fn diff_files(old: &Path, new: &Path) -> Result<()> {
    let parser = RuleParser::new()?;
    let load = |path: &Path| -> Result<_> {
        let content =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let category = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(parser.snapshot(&content, &category))
    };
    let (old_snapshot, old_skipped) = load(old)?;
    let (new_snapshot, new_skipped) = load(new)?;
    let changes = diff::diff(&old_snapshot, &new_snapshot);
    print_changes(&changes);

    let stats = changes.stats();
    println!(
        "{} added, {} updated, {} deleted",
        stats.added.to_string().green(),
        stats.updated.to_string().yellow(),
        stats.deleted.to_string().red()
    );
    if old_skipped + new_skipped > 0 {
        println!(
            "{}: {} entries without a sid were ignored",
            "Info".yellow(),
            old_skipped + new_skipped
        );
    }
    Ok(())
}
