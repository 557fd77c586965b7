//! Tile endpoint description and HTTP transport.
//!
//! A [`TileEndpoint`] knows how to turn a tile address into a request URL
//! for one remote data source; the [`HttpClient`] trait abstracts the
//! blocking transport so services can be tested against a mock.

mod endpoint;
mod http;

pub use endpoint::{TileEndpoint, UrlPattern};
pub use http::{HttpClient, ReqwestClient};

use thiserror::Error;

/// Errors from a single fetch attempt.
///
/// There is no retry at this level: a failed attempt is reported once and
/// resolved by the caller's fallback logic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("http transport error: {0}")]
    Http(String),

    #[error("http status {code} from {url}")]
    Status { code: u16, url: String },
}

#[cfg(test)]
pub use http::tests::MockHttpClient;
