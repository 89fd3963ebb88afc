mod cli;
mod commands;
mod config;
mod resources;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{CertCommand, Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub manifest: Option<PathBuf>,
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        manifest: cli.manifest,
        vault_addr: cli.vault_addr,
        vault_token: cli.vault_token,
    };

    match cli.command {
        Command::Plan(args) => commands::reconcile::plan(&ctx, args.json),
        Command::Apply(args) => commands::reconcile::apply(&ctx, args.yes),
        Command::Cert(cmd) => match cmd {
            CertCommand::Issue { service } => commands::cert::issue(&ctx, &service),
            CertCommand::Watch { service } => commands::cert::watch(&ctx, &service),
        },
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "infrakit", &mut io::stdout());
            Ok(())
        }
    }
}
