//! Tracing setup and the vocabulary ETL jobs log with.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Step of an ETL pipeline a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extract,
    Transform,
    Load,
}

/// Padded to a fixed width so log columns line up.
impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Extract => "EXTRACT",
            PipelineStage::Transform => "TRANSFORM",
            PipelineStage::Load => "LOAD",
        };
        write!(f, "{label:<10}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtlStatus {
    Success,
    Failure,
    InProgress,
}

impl fmt::Display for EtlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EtlStatus::Success => "SUCCESS",
            EtlStatus::Failure => "FAILURE",
            EtlStatus::InProgress => "IN PROGRESS",
        })
    }
}

/// Catalogue entry for an API call that came back with `status`.
pub fn api_failure(status: u16) -> &'static str {
    match status {
        401 | 403 => messages::API_AUTH_FAILED,
        429 => messages::API_LIMIT_EXCEEDED,
        _ => messages::API_FAILED,
    }
}

/// Message catalogue shared by the pipelines.
pub mod messages {
    pub const API_AUTH_FAILED: &str = "API authentication failed. Check your credentials";
    pub const API_FAILED: &str = "Failed to retrieve data from the API";
    pub const API_LIMIT_EXCEEDED: &str = "API rate limit exceeded. Please try again later";
    pub const API_DATA_RETRIEVED: &str = "Data successfully retrieved from the API";

    pub const DB_QUERY: &str = "Error executing a database query";
    pub const DB_QUERY_EXECUTED: &str = "Database query executed successfully";

    pub const FILE_NOT_FOUND: &str = "The specified file was not found";
    pub const FILE_WRITE: &str = "Error writing data to the file";
    pub const FILE_WRITE_OK: &str = "Data successfully written to the file";

    pub const ETL_CONFIG: &str = "ETL configuration error";
    pub const ETL_DATA_TRANSFORMED: &str = "Data transformation completed successfully";

    pub const BROWSER_ERROR: &str = "Browser encountered an error";
    pub const BROWSER_DRIVER_MISSING: &str = "Browser binary not found at the specified path";
    pub const BROWSER_OPEN: &str = "Opening browser";
    pub const BROWSER_GO_TO_PAGE: &str = "Accessing page";
    pub const BROWSER_IMPORT_COOKIES: &str = "Importing cookies";

    pub const TABLE_DROP_DUPLICATES: &str = "Dropping duplicates";
    pub const TABLE_CONVERT_TYPES: &str = "Converting data types";

    pub const GSHEET_GET_SHEET: &str = "Getting data from sheet";
    pub const GSHEET_GET_SPREADSHEET: &str = "Getting data from spreadsheet";
    pub const GSHEET_UPDATE_SHEET: &str = "Updating sheet data";

    pub const BQ_GET_TABLE: &str = "Getting data from table";
}
