//! Response formats the API can negotiate

use std::fmt;
use std::str::FromStr;

pub const JSON_MIME: &str = "application/json";
pub const SPREADSHEET_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const DATABASE_MIME: &str = "application/octet-stream";

/// What the caller wants back, selecting the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactType {
    Json,
    /// `.xlsx` workbook
    Spreadsheet,
    /// Raw database file
    Database,
}

impl ArtifactType {
    pub fn accept(self) -> &'static str {
        match self {
            ArtifactType::Json => JSON_MIME,
            ArtifactType::Spreadsheet => SPREADSHEET_MIME,
            ArtifactType::Database => DATABASE_MIME,
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactType::Json => "json",
            ArtifactType::Spreadsheet => "xlsx",
            ArtifactType::Database => "db",
        })
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ArtifactType::Json),
            "xlsx" => Ok(ArtifactType::Spreadsheet),
            "db" => Ok(ArtifactType::Database),
            other => Err(format!("unknown file type '{other}' (expected xlsx or db)")),
        }
    }
}
