//! The [`TweetSql`] entry point
//!
//! Wires a [`Source`], a [`Storage`] and a validated [`TweetSqlConfig`] into
//! one object with a call per common ingestion task:
//!
//! ```no_run
//! use tweetsql_ingest::config::{Credentials, TweetSqlConfig};
//! use tweetsql_ingest::source::{params, HttpSource};
//! use tweetsql_ingest::storage::{SqliteStorage, WriteMode};
//! use tweetsql_ingest::TweetSql;
//!
//! fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::new("key", "secret", "token", "token-secret");
//!     let mut twt = TweetSql::new(
//!         TweetSqlConfig::new("tweets"),
//!         HttpSource::new(credentials)?,
//!         SqliteStorage::open("tweets.db")?,
//!     )?;
//!     twt.search_to_storage(params([("q", "\"Taylor Swift\"")]), WriteMode::Replace);
//!     Ok(())
//! }
//! ```

use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tweetsql_common::{Row, WarningSink};

use crate::config::{TweetSqlConfig, BACKFILL_FLUSH_EVERY};
use crate::error::Result;
use crate::ingest::{IngestStats, RequestRows};
use crate::mapper::FieldMapper;
use crate::retry::RetryController;
use crate::source::{Params, Source};
use crate::storage::{Storage, WriteMode};
use crate::writer::{BatchWriter, WriteOptions, WriteSummary};

/// Combined counters of one `*_to_storage` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub ingest: IngestStats,
    pub write: WriteSummary,
}

pub struct TweetSql<A, S> {
    source: A,
    writer: BatchWriter<S>,
    mapper: FieldMapper,
    flush_every: usize,
}

impl<A, S> std::fmt::Debug for TweetSql<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TweetSql")
            .field("writer", &self.writer)
            .field("mapper", &self.mapper)
            .field("flush_every", &self.flush_every)
            .finish()
    }
}

impl<A: Source, S: Storage> TweetSql<A, S> {
    /// Validate `config`, open its warning sink and prepare the table.
    pub fn new(config: TweetSqlConfig, source: A, storage: S) -> Result<Self> {
        config.validate()?;
        let warnings = WarningSink::open(config.error_file.as_deref())?;
        let retry = RetryController::new(config.retry.clone(), warnings);
        Self::with_controller(config, source, storage, retry)
    }

    /// Like [`TweetSql::new`] with a ready-made retry controller.
    pub fn with_controller(
        config: TweetSqlConfig,
        source: A,
        storage: S,
        retry: RetryController,
    ) -> Result<Self> {
        let schema = Arc::new(config.validate()?);

        let mut mapper = FieldMapper::new(schema.clone());
        if let Some(geolocator) = &config.geolocator {
            mapper = mapper.with_geolocator(geolocator.clone());
        }

        let mut writer = BatchWriter::new(storage, retry, config.table.clone(), schema);
        writer.prepare(config.existing_table);
        info!(table = %config.table, "Pipeline ready");

        Ok(Self {
            source,
            writer,
            mapper,
            flush_every: config.flush_every,
        })
    }

    /// Hide or show the progress spinner while writing.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.writer = self.writer.with_progress(show);
        self
    }

    pub fn writer(&self) -> &BatchWriter<S> {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut BatchWriter<S> {
        &mut self.writer
    }

    pub fn source_mut(&mut self) -> &mut A {
        &mut self.source
    }

    /// Rows for one API method, without storing them.
    pub fn api_request(&mut self, method: &str, params: Params) -> RequestRows<'_, A> {
        RequestRows::new(
            &mut self.source,
            self.mapper.clone(),
            self.writer.retry().clone(),
            method,
            params,
        )
    }

    /// Stream the rows of `method` into storage.
    pub fn tweets_to_storage(&mut self, method: &str, params: Params, options: &WriteOptions) -> IngestReport {
        let mut rows = RequestRows::new(
            &mut self.source,
            self.mapper.clone(),
            self.writer.retry().clone(),
            method,
            params,
        );
        let write = self.writer.write(rows.by_ref(), options);
        let ingest = rows.stats().clone();
        info!(
            method,
            requests = ingest.requests,
            rows = ingest.rows,
            rejected = ingest.rejected,
            written = write.rows_written,
            "Ingestion finished"
        );
        IngestReport { ingest, write }
    }

    /// The ~1% random sample stream, into monthly tables.
    pub fn random_sample_to_storage(&mut self, mode: WriteMode) -> IngestReport {
        let options = WriteOptions::new(mode).monthly(true).flush_every(self.flush_every);
        self.tweets_to_storage("statuses/sample", Params::new(), &options)
    }

    /// The filter stream (`track`, `follow`, `locations`, ...).
    pub fn filter_stream_to_storage(&mut self, params: Params, options: &WriteOptions) -> IngestReport {
        self.tweets_to_storage("statuses/filter", params, options)
    }

    /// Every accessible tweet of one user, newest first.
    pub fn user_timeline(&mut self, params: Params) -> RequestRows<'_, A> {
        self.api_request("statuses/user_timeline", params)
    }

    pub fn user_timeline_to_storage(&mut self, params: Params, mode: WriteMode) -> IngestReport {
        let options = WriteOptions::new(mode).flush_every(BACKFILL_FLUSH_EVERY);
        self.tweets_to_storage("statuses/user_timeline", params, &options)
    }

    pub fn search(&mut self, params: Params) -> RequestRows<'_, A> {
        self.api_request("search/tweets", params)
    }

    pub fn search_to_storage(&mut self, params: Params, mode: WriteMode) -> IngestReport {
        let options = WriteOptions::new(mode).flush_every(BACKFILL_FLUSH_EVERY);
        self.tweets_to_storage("search/tweets", params, &options)
    }

    /// Write caller-built rows; `options` may redirect table and columns.
    pub fn write_rows<I>(&mut self, rows: I, options: &WriteOptions) -> WriteSummary
    where
        I: IntoIterator<Item = Row>,
    {
        self.writer.write(rows, options)
    }

    pub fn insert_rows<I: IntoIterator<Item = Row>>(&mut self, rows: I) -> WriteSummary {
        let options = WriteOptions::new(WriteMode::Insert).flush_every(self.flush_every);
        self.writer.write(rows, &options)
    }

    pub fn insert_row(&mut self, row: Row) -> WriteSummary {
        self.insert_rows(std::iter::once(row))
    }

    pub fn replace_rows<I: IntoIterator<Item = Row>>(&mut self, rows: I) -> WriteSummary {
        let options = WriteOptions::new(WriteMode::Replace).flush_every(self.flush_every);
        self.writer.write(rows, &options)
    }

    pub fn replace_row(&mut self, row: Row) -> WriteSummary {
        self.replace_rows(std::iter::once(row))
    }

    /// Run a query through the retry controller.
    pub fn query(&mut self, sql: &str) -> Option<Vec<Row>> {
        self.writer.query(sql)
    }
}
