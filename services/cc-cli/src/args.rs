//! CLI argument definitions using clap
//!
//! - cc-cli products                               # list licensed products
//! - cc-cli cutchart -p powermax105 -o out.xlsx    # download one product
//! - cc-cli cutchart --type db -o all.db           # download everything
//! - cc-cli --logout                               # forget the saved sign-in

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cutchart_api::ArtifactType;

#[derive(Debug, Parser)]
#[command(name = "cc-cli")]
#[command(about = "Download cut chart data from the cut chart API")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (falls back to CONFIG_PATH, then ./cc-cli.toml)
    #[arg(long)]
    pub config: Option<String>,

    /// Log at debug level
    #[arg(long, short)]
    pub debug: bool,

    /// Write logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Answer yes to the sign-in prompt
    #[arg(long, short)]
    pub yes: bool,

    /// Remove the saved sign-in; runs before any command
    #[arg(long)]
    pub logout: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List the short names of products you can download
    Products,

    /// Download cut chart data to a file
    Cutchart {
        /// Product short name; omit with --type db to get every product
        #[arg(long, short)]
        product: Option<String>,

        #[arg(long, short, value_enum, default_value_t = Units::English)]
        units: Units,

        #[arg(long = "type", short = 't', value_enum, default_value_t = FileType::Xlsx)]
        file_type: FileType,

        /// Where to write the data; overwritten if it exists
        #[arg(long, short)]
        outfile: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Units {
    English,
    Metric,
}

impl Units {
    pub fn as_str(self) -> &'static str {
        match self {
            Units::English => "english",
            Units::Metric => "metric",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FileType {
    Xlsx,
    Db,
}

impl From<FileType> for ArtifactType {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::Xlsx => ArtifactType::Spreadsheet,
            FileType::Db => ArtifactType::Database,
        }
    }
}

impl Command {
    /// Checks clap cannot express: a spreadsheet needs a product.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Cutchart {
                product, file_type, ..
            } if *file_type == FileType::Xlsx
                && product.as_deref().is_none_or(str::is_empty) =>
            {
                Err("a --product must be given to download cut chart data as xlsx".into())
            }
            _ => Ok(()),
        }
    }
}
