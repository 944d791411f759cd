//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Solace - anonymous AI support conversations with live streaming replies
#[derive(Parser, Debug)]
#[command(name = "solace")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file to layer over the global and project files
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the conversation relay server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Base URL of the model backend
        #[arg(long)]
        upstream: Option<String>,

        /// Model to generate replies with
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Chat with a running relay from the terminal
    Chat {
        /// Anonymous user id (a fresh one is generated if omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// Relay server URL (defaults to the configured host and port)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Forget a user's conversation on a running relay
    Clear {
        /// User whose conversation to clear
        #[arg(short, long)]
        user: String,

        /// Relay server URL (defaults to the configured host and port)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "solace", "-vv", "serve", "--port", "9000", "--model", "mistral",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve { port, model, host, upstream } => {
                assert_eq!(port, Some(9000));
                assert_eq!(model.as_deref(), Some("mistral"));
                assert!(host.is_none() && upstream.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn clear_requires_user() {
        assert!(Cli::try_parse_from(["solace", "clear"]).is_err());
        assert!(Cli::try_parse_from(["solace", "clear", "--user", "anon"]).is_ok());
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["solace", "config", "--config", "/tmp/s.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
    }
}
