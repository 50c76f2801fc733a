use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use clap::{Parser, Subcommand};

use dstore::metadata::Format;

#[derive(Parser)]
#[command(name = "dstore")]
#[command(about = "Store and retrieve data as Data Store chains on a ledger")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Builds the entries for a file and submits them to the ledger
    Generate {
        /// The file to store
        input: PathBuf,

        /// Compress the data before storing it (gzip or zlib)
        #[arg(long, value_parser = parse_format)]
        compress: Option<Format>,

        /// Namespace appended to the chain name, may be repeated
        #[arg(short, long)]
        namespace: Vec<String>,

        /// Application JSON stored in the Metadata
        #[arg(short, long)]
        metadata: Option<String>,

        /// Only print what would be submitted
        #[arg(long)]
        dry_run: bool,
    },

    /// Prints the Metadata of a Data Store chain
    Info {
        /// Hex chain id
        chain_id: String,
    },

    /// Downloads the data of a Data Store chain
    Fetch {
        /// Hex chain id
        chain_id: String,

        /// Where to write the data, only created once it is verified
        output: PathBuf,
    },
}

fn parse_format(format: &str) -> Result<Format, String> {
    format.parse::<Format>().map_err(|e| e.to_string())
}

const DEFAULT_CONFIG: &str = r#"
    ledger = "ledger.sqlite"
    workers = 0
"#;

// Configuration
#[derive(Deserialize, Debug, PartialEq)]
pub struct Config {
    /// Sqlite file of the ledger, relative to the working directory
    pub ledger: PathBuf,

    /// Download workers, 0 for one per cpu
    #[serde(default)]
    pub workers: usize,

    /// Hex ed25519 seed paying for the entries, a fresh one is used per run
    /// otherwise
    pub signing_key: Option<String>,
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config, dstore::Error> {
        let config = match path {
            None => toml::from_str(DEFAULT_CONFIG)?,
            Some(p) => toml::from_str(&fs::read_to_string(p)?)?,
        };
        Ok(config)
    }
}
