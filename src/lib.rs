// SPDX-License-Identifier: AGPL-3.0-only
// SPDX-FileCopyrightText: Copyright 2025 Jason Ish <jason@codemonkey.net>

pub mod audit;
pub mod bulk;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod index;
pub mod paths;
pub mod resolve;
pub mod source;
pub mod store;
pub mod threshold;
pub mod transform;

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log to stderr, RUST_LOG takes precedence over the verbosity flag.
pub fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: cli::Cli) -> Result<()> {
    init_logging(cli.verbose);

    // If on Windows, always user --user mode for now.
    let user = cfg!(target_os = "windows") || cli.user;

    let path_provider = paths::get_path_provider(user, cli.root.as_deref());
    let settings = config::Settings::load(&path_provider.config_file())?;
    let actor = settings.actor(cli.actor.as_deref());
    debug!("Acting as {}", actor);

    let mut console =
        commands::Console::open(path_provider.as_ref(), &settings, actor, cli.comment)?;
    console.run(cli.command)
}
