//! tweetsql ingestion library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls tweets from the Twitter v1.1 streaming and REST APIs and stores them
//! as relational rows.
//!
//! # Pipeline
//!
//! ```text
//! Source ──> classify ──> FieldMapper ──> BatchWriter ──> Storage
//!   ^                                         ^
//!   └──────────── RetryController ────────────┘
//! ```
//!
//! - [`source`]: the API behind a trait (live HTTP or JSONL replay)
//! - [`classify`]: tweets vs. heartbeats, delete notices and status envelopes
//! - [`mapper`]: raw JSON to a fixed-width [`Row`](tweetsql_common::Row)
//! - [`writer`]: buffering, monthly partitioning and flushing
//! - [`retry`]: bounded backoff around every network and database call
//! - [`ingest`]: the request loop tying it together
//!
//! # Example
//!
//! ```no_run
//! use tweetsql_ingest::config::TweetSqlConfig;
//! use tweetsql_ingest::source::{ReplayConfig, ReplaySource};
//! use tweetsql_ingest::storage::SqliteStorage;
//! use tweetsql_ingest::writer::WriteOptions;
//! use tweetsql_ingest::{Params, TweetSql};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut twt = TweetSql::new(
//!         TweetSqlConfig::new("tweets"),
//!         ReplaySource::new(ReplayConfig::new("./captures")),
//!         SqliteStorage::open("tweets.db")?,
//!     )?;
//!     let report = twt.tweets_to_storage("replay", Params::new(), &WriteOptions::default());
//!     println!("{} rows written", report.write.rows_written);
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod mapper;
pub mod path;
pub mod retry;
pub mod schema;
pub mod source;
pub mod storage;
pub mod writer;

pub use client::{IngestReport, TweetSql};
pub use config::{Credentials, ExistingTable, TweetSqlConfig};
pub use error::{ConfigError, IngestError, MapError, Result};
pub use source::Params;
pub use storage::WriteMode;
