//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ensure a Route 53 DNSSEC signing key and its alias exist in AWS KMS.
///
/// Module inputs come from `--config` and `DNSSEC_KMS_*` environment
/// variables; AWS credentials and region from the standard provider chain.
#[derive(Debug, Parser)]
#[command(name = "dnssec-kms", version)]
pub struct Cli {
    /// JSON file with module inputs. Environment variables override it.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Show the changes `apply` would make.
    Plan,
    /// Create or update the key and alias, then print the outputs.
    Apply,
    /// Print the outputs of the existing key and alias.
    Output,
    /// Delete the alias and schedule the key for deletion.
    Destroy,
    /// Print the key policy for the current caller.
    Policy,
}

impl Command {
    /// Whether the command needs the caller's account and partition.
    pub fn needs_caller_context(self) -> bool {
        matches!(self, Command::Plan | Command::Apply | Command::Policy)
    }
}
