//! Upstream API access
//!
//! A [`Source`] turns `(method, params)` into a lazy stream of decoded JSON
//! items. Two implementations ship with the crate:
//!
//! - [`HttpSource`]: the live v1.1 REST and streaming endpoints, OAuth signed
//! - [`ReplaySource`]: captured responses read back from JSONL files

pub mod http;
pub mod replay;

pub use http::HttpSource;
pub use replay::{ReplayConfig, ReplaySource};

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::retry::{FailureKind, Retryable};

/// Request parameters, kept sorted for stable signing.
pub type Params = BTreeMap<String, String>;

/// Items of one response, decoded lazily.
pub type Response = Box<dyn Iterator<Item = Result<Value, SourceError>>>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Request timed out: {0}")]
    TimedOut(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The connection broke while a chunked body was being read.
    #[error("Chunked transfer interrupted: {0}")]
    Chunked(String),

    #[error("Cannot decode response: {0}")]
    Decode(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl Retryable for SourceError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            SourceError::TimedOut(_) => FailureKind::TimedOut,
            SourceError::RateLimited(_) => FailureKind::RateLimited,
            SourceError::Chunked(_) => FailureKind::ConnectionLost,
            SourceError::Decode(_) | SourceError::Http { .. } | SourceError::Other(_) => {
                FailureKind::Other
            },
        }
    }
}

pub trait Source {
    /// Issue one request. Errors raised while iterating the response are
    /// reported as `Err` items.
    fn request(&mut self, method: &str, params: &Params) -> Result<Response, SourceError>;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn request(&mut self, method: &str, params: &Params) -> Result<Response, SourceError> {
        (**self).request(method, params)
    }
}

/// Build a [`Params`] map from string pairs.
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
