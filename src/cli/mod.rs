//! Command-line interface for useradmin.

use clap::{Parser, Subcommand};

/// useradmin - user account administration web app
#[derive(Parser)]
#[command(name = "useradmin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the web server (the default when no command is given)
    Serve {
        /// Override `server.port` from the config file
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create default config file
    #[command(alias = "--init")]
    Init,

    /// Load the configuration and report whether it is valid
    CheckConfig,
}

impl Cli {
    /// The requested command, `serve` when none was given.
    #[must_use]
    pub fn command_or_default(self) -> Commands {
        self.command.unwrap_or(Commands::Serve { port: None })
    }
}
