//! CLI error type.

use std::fmt;

use terrastream::{CoordError, ProviderError};

/// Errors surfaced to the terminal.
#[derive(Debug)]
pub enum CliError {
    /// Invalid coordinate or tile address input.
    Coord(CoordError),

    /// HTTP client could not be constructed.
    Http(ProviderError),

    /// Invalid command-line input.
    Input(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Coord(e) => write!(f, "invalid coordinate: {e}"),
            CliError::Http(e) => write!(f, "http client: {e}"),
            CliError::Input(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Coord(e) => Some(e),
            CliError::Http(e) => Some(e),
            CliError::Input(_) => None,
        }
    }
}

impl From<CoordError> for CliError {
    fn from(e: CoordError) -> Self {
        CliError::Coord(e)
    }
}

impl From<ProviderError> for CliError {
    fn from(e: ProviderError) -> Self {
        CliError::Http(e)
    }
}
