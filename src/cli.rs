// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

use clap::builder::styling::{AnsiColor, Color, Style};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "suricasta-console")]
#[command(about = "Suricata Ruleset Console")]
#[command(version)]
#[command(styles = get_styles())]
#[command(args_conflicts_with_subcommands = false)]
#[command(subcommand_precedence_over_arg = true)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Use user-specific directories instead of system directories"
    )]
    pub user: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Keep configuration, state and cache under DIR"
    )]
    pub root: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (can be used multiple times)"
    )]
    pub verbose: u8,

    #[arg(long, global = true, help = "User recorded in the audit log")]
    pub actor: Option<String>,

    #[arg(
        short = 'm',
        long,
        global = true,
        help = "Comment recorded with the change in the audit log"
    )]
    pub comment: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(subcommand, about = "Manage rule sources")]
    Source(SourceCommand),

    #[command(subcommand, about = "Manage rulesets")]
    Ruleset(RulesetCommand),

    #[command(subcommand, about = "Inspect and transform rules")]
    Rule(RuleCommand),

    #[command(subcommand, about = "Inspect and transform categories")]
    Category(CategoryCommand),

    #[command(subcommand, about = "Manage thresholds and suppressions")]
    Threshold(ThresholdCommand),

    #[command(about = "Compare two rules files")]
    Diff {
        #[arg(help = "Old rules file")]
        old: PathBuf,
        #[arg(help = "New rules file")]
        new: PathBuf,
    },

    #[command(about = "Show the audit log, newest first")]
    History {
        #[arg(short = 'n', long, help = "Number of entries to show")]
        limit: Option<usize>,
        #[arg(long, help = "Only entries about this rule")]
        rule: Option<u32>,
    },

    #[command(about = "Find rules, categories and rulesets by text")]
    Search {
        #[arg(help = "Case-insensitive text to look for")]
        pattern: String,
    },

    #[command(about = "Delete one of your comments from the audit log")]
    DeleteComment {
        #[arg(help = "Id of the comment entry")]
        id: u64,
    },
}

#[derive(Subcommand)]
pub enum SourceCommand {
    #[command(about = "Add a rule source")]
    Add {
        name: String,
        #[arg(help = "URL or local path; %(__version__)s is replaced by the Suricata version")]
        uri: String,
    },
    #[command(about = "Fetch sources and apply their changes")]
    Update {
        #[arg(help = "Source to update, all when omitted")]
        name: Option<String>,
        #[arg(
            short = 'f',
            long = "force",
            help = "Force download even if cache is recent"
        )]
        force: bool,
        #[arg(short = 'q', long = "quiet", help = "Only output warnings and errors")]
        quiet: bool,
    },
    #[command(about = "Show the changes of past source updates")]
    Changelog {
        name: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    #[command(about = "List sources")]
    List,
    #[command(about = "Rename a source or change its URI")]
    Edit {
        name: String,
        #[arg(long = "name", value_name = "NAME", help = "New name")]
        new_name: Option<String>,
        #[arg(long, help = "New URL or local path")]
        uri: Option<String>,
    },
    #[command(about = "Delete a source with its categories and rules")]
    Delete { name: String },
    #[command(about = "List the public source index")]
    Index {
        #[arg(short = 'u', long, help = "Download the index again first")]
        update: bool,
        #[arg(short = 'f', long, help = "Download even if the cached index is recent")]
        force: bool,
    },
    #[command(about = "Add a source from the public source index")]
    AddPublic {
        #[arg(help = "Index id, e.g. et/open")]
        id: String,
        #[arg(long, help = "Source name, the index id when omitted")]
        name: Option<String>,
        #[arg(long, help = "Secret code for sources that require one")]
        secret_code: Option<String>,
        #[arg(short = 'r', long = "ruleset", help = "Ruleset to activate it in, can be repeated")]
        rulesets: Vec<String>,
    },
}

/// Transformation values for each axis, `category` to inherit and the axis
/// none label to clear.
#[derive(Args, Debug, Clone, Default)]
pub struct AxisArgs {
    #[arg(long, help = "drop, reject, filestore, bypass, none or category")]
    pub action: Option<String>,
    #[arg(long, help = "yes, auto, no or category")]
    pub lateral: Option<String>,
    #[arg(long, help = "src, dst, auto, none or category")]
    pub target: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RulesetArgs {
    #[arg(
        short = 'r',
        long = "ruleset",
        help = "Ruleset name or id, can be repeated; prompts when omitted"
    )]
    pub rulesets: Vec<String>,
}

#[derive(Subcommand)]
pub enum RulesetCommand {
    #[command(about = "Create a ruleset")]
    Add {
        name: String,
        #[arg(short = 's', long = "source", help = "Source to activate, can be repeated")]
        sources: Vec<String>,
        #[arg(long, help = "Do not activate the categories of the sources")]
        no_categories: bool,
        #[command(flatten)]
        axes: AxisArgs,
    },
    #[command(about = "Copy a ruleset")]
    Copy { name: String, new_name: String },
    #[command(about = "Rename a ruleset")]
    Rename { name: String, new_name: String },
    #[command(about = "Delete a ruleset")]
    Delete { name: String },
    #[command(about = "Activate a source and all of its categories")]
    ActivateSource { name: String, source: String },
    #[command(about = "Deactivate a source")]
    DeactivateSource { name: String, source: String },
    #[command(about = "Build the ruleset and record what changed")]
    Update { name: String },
    #[command(about = "Show the changes of past builds")]
    Changelog {
        name: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        limit: usize,
    },
    #[command(about = "Write suricata.rules and threshold.config")]
    Export {
        name: String,
        #[arg(short = 'o', long, help = "Output directory")]
        output: Option<PathBuf>,
    },
    #[command(about = "List rulesets")]
    List,
}

#[derive(Subcommand)]
pub enum RuleCommand {
    #[command(about = "Show a rule with its transformations per ruleset")]
    Show { sid: u32 },
    #[command(about = "Set rule transformations in rulesets")]
    Edit {
        sid: u32,
        #[command(flatten)]
        rulesets: RulesetArgs,
        #[command(flatten)]
        axes: AxisArgs,
    },
    #[command(about = "Suppress a rule in rulesets")]
    Suppress {
        sid: u32,
        #[command(flatten)]
        rulesets: RulesetArgs,
    },
    #[command(about = "Re-enable a suppressed rule in rulesets")]
    Enable {
        sid: u32,
        #[command(flatten)]
        rulesets: RulesetArgs,
    },
    #[command(about = "Comment on a rule")]
    Comment { sid: u32, text: String },
    #[command(about = "Toggle whether a rule is available at all")]
    Toggle { sid: u32 },
    #[command(about = "Add a threshold or suppression for a rule")]
    Threshold {
        sid: u32,
        #[command(flatten)]
        rulesets: RulesetArgs,
        #[command(flatten)]
        spec: ThresholdArgs,
        #[arg(long, help = "Add even where an existing entry already covers it")]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ThresholdArgs {
    #[arg(long, default_value = "suppress", help = "suppress or threshold")]
    pub kind: String,
    #[arg(long, default_value = "by_src", help = "by_src or by_dst")]
    pub track: String,
    #[arg(long, help = "Network for suppressions, e.g. 10.0.0.0/8")]
    pub net: Option<String>,
    #[arg(long = "type", default_value = "limit", help = "limit, threshold or both")]
    pub rate_type: String,
    #[arg(long, default_value_t = 1)]
    pub count: u32,
    #[arg(long, default_value_t = 60)]
    pub seconds: u32,
}

#[derive(Subcommand)]
pub enum CategoryCommand {
    #[command(about = "Show a category with its transformations per ruleset")]
    Show { name: String },
    #[command(about = "Set category transformations in rulesets")]
    Transform {
        name: String,
        #[command(flatten)]
        rulesets: RulesetArgs,
        #[command(flatten)]
        axes: AxisArgs,
    },
    #[command(about = "Remove a category from rulesets")]
    Suppress {
        name: String,
        #[command(flatten)]
        rulesets: RulesetArgs,
    },
    #[command(about = "Add a category back to rulesets")]
    Enable {
        name: String,
        #[command(flatten)]
        rulesets: RulesetArgs,
    },
}

#[derive(Subcommand)]
pub enum ThresholdCommand {
    #[command(about = "Change a threshold")]
    Edit {
        id: u32,
        #[command(flatten)]
        spec: ThresholdArgs,
    },
    #[command(about = "Delete a threshold")]
    Delete { id: u32 },
}

fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Blue))),
        )
        .usage(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Yellow))),
        )
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .valid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .invalid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}
