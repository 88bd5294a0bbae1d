//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerostore - schema-driven record store
#[derive(Parser, Debug)]
#[command(name = "aerostore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Prepare storage for the configured collection
    Init {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,
    },

    /// Create a record from the JSON document on stdin
    Create {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,
    },

    /// Fetch a record by id
    Get {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,

        /// Record id
        #[arg(long)]
        id: String,
    },

    /// Run the find request on stdin
    Find {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,
    },

    /// Count all records
    Count {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,
    },

    /// Remove every record and its attachments
    Drop {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,
    },

    /// Rewrite the record log without superseded frames (file backend)
    Compact {
        #[arg(long, default_value = "./aerostore.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_requires_id() {
        assert!(Cli::try_parse_from(["aerostore", "get"]).is_err());

        let cli = Cli::try_parse_from(["aerostore", "get", "--id", "abc"]).unwrap();
        match cli.command {
            Command::Get { config, id } => {
                assert_eq!(id, "abc");
                assert_eq!(config, PathBuf::from("./aerostore.json"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
