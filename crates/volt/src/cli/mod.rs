mod init;
mod member_id;
mod run;

pub use init::InitCommand;
pub use member_id::MemberIdCommand;
pub use run::RunCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// volt - monitoring fleet coordination
#[derive(Parser)]
#[command(name = "volt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Join the cluster and run until interrupted.
    Run(RunCommand),

    /// Write a default configuration file.
    Init(InitCommand),

    /// Print the member ID derived from this host and a listen address.
    MemberId(MemberIdCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Init(cmd) => cmd.execute(),
            Commands::MemberId(cmd) => cmd.execute(),
        }
    }
}
