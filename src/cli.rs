use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelway")]
#[command(author, version, about = "Resolve movies and episodes to playable streams")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Start {
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_overrides_are_optional() {
        let cli = Cli::parse_from(["reelway", "start"]);
        assert!(matches!(cli.command, Commands::Start { host: None, port: None }));

        let cli = Cli::parse_from(["reelway", "-v", "start", "--host", "127.0.0.1", "-p", "9000"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Start { host, port } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn validate_takes_positional_path() {
        let cli = Cli::parse_from(["reelway", "validate", "conf.json"]);
        match cli.command {
            Commands::Validate { config } => assert_eq!(config, Some(PathBuf::from("conf.json"))),
            _ => panic!("expected validate"),
        }
    }
}
