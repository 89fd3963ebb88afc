use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "infrakit")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge Vault infrastructure from a manifest", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Manifest file [default: ~/.config/infrakit/infrakit.toml]
    #[arg(short, long, env = "INFRAKIT_MANIFEST", global = true)]
    pub manifest: Option<PathBuf>,

    /// Vault address, used when the manifest does not set one
    #[arg(long, env = "VAULT_ADDR", global = true)]
    pub vault_addr: Option<String>,

    /// Vault token
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true, global = true)]
    pub vault_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change, without changing anything
    Plan(PlanArgs),

    /// Converge all resource groups to the manifest
    Apply(ApplyArgs),

    /// Issue and rotate service certificates
    #[command(subcommand)]
    Cert(CertCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
pub enum CertCommand {
    /// Issue one certificate and print its details
    Issue {
        /// Service the certificate is issued for (common name)
        #[arg(short, long)]
        service: String,
    },

    /// Keep a certificate fresh in the foreground until interrupted
    Watch {
        /// Service the certificate is issued for (common name)
        #[arg(short, long)]
        service: String,
    },
}
