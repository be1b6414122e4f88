//! CLI argument parsing using clap

use crate::distributed::DEFAULT_AGENT_PORT;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// iodrive - distributed storage I/O load generator
#[derive(Parser, Debug)]
#[command(name = "iodrive")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the jobs described by a config file
    Run {
        /// TOML run description
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Write the final report as JSON (overrides `json_output`)
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,

        /// Print nothing but errors
        #[arg(short, long)]
        quiet: bool,
    },

    /// Serve jobs for a remote controller
    Agent {
        /// Address to listen on
        #[arg(long, env = "IODRIVE_LISTEN", default_value_t = default_listen())]
        listen: String,
    },

    /// Validate a config file and print the resolved jobs
    Check {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", DEFAULT_AGENT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_structure() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from(["iodrive", "-vv", "run", "jobs.toml", "--json", "out.json"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run { config, json, quiet } => {
                assert_eq!(config, PathBuf::from("jobs.toml"));
                assert_eq!(json, Some(PathBuf::from("out.json")));
                assert!(!quiet);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_agent_default_listen() {
        let cli = Cli::parse_from(["iodrive", "agent"]);
        match cli.command {
            Command::Agent { listen } => assert_eq!(listen, "0.0.0.0:9999"),
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::parse_from(["iodrive", "agent", "--listen", "127.0.0.1:7000", "-v"]);
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Command::Agent { ref listen } if listen == "127.0.0.1:7000"));
    }

    #[test]
    fn test_check_requires_config() {
        assert!(Cli::try_parse_from(["iodrive", "check"]).is_err());
    }
}
