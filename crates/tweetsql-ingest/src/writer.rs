//! Buffered row writer with optional monthly partitioning
//!
//! Rows are accumulated until `flush_every` is reached, then written with one
//! multi-row statement per destination table. With monthly partitioning the
//! destination is `<table>_<YYYY_MM>`, the label taken from `created_time`.
//! Every storage call goes through the [`RetryController`]; a batch whose
//! retries run out is counted as dropped and writing continues.

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use tweetsql_common::{Cell, Row};

use crate::config::{ExistingTable, DEFAULT_FLUSH_EVERY, DROP_GRACE};
use crate::retry::RetryController;
use crate::schema::{is_identifier, Schema, CREATED_TIME_COLUMN};
use crate::storage::{drop_statement, write_statement, Storage, WriteMode};

/// Rows between two progress updates.
const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub mode: WriteMode,
    /// Split rows into `<table>_<YYYY_MM>` tables.
    pub monthly: bool,
    pub flush_every: usize,
    /// Destination override; the writer's table otherwise.
    pub table: Option<String>,
    /// Column list override; the schema's columns otherwise.
    pub columns: Option<Vec<String>>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Insert,
            monthly: false,
            flush_every: DEFAULT_FLUSH_EVERY,
            table: None,
            columns: None,
        }
    }
}

impl WriteOptions {
    pub fn new(mode: WriteMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn monthly(mut self, monthly: bool) -> Self {
        self.monthly = monthly;
        self
    }

    pub fn flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every.max(1);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Outcome of one [`BatchWriter::write`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub rows_received: usize,
    pub rows_written: usize,
    /// All-null rows refused before buffering.
    pub rows_rejected: usize,
    pub rows_dropped: usize,
    pub batches_flushed: usize,
    pub batches_dropped: usize,
    pub tables: BTreeSet<String>,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.rows_received += other.rows_received;
        self.rows_written += other.rows_written;
        self.rows_rejected += other.rows_rejected;
        self.rows_dropped += other.rows_dropped;
        self.batches_flushed += other.batches_flushed;
        self.batches_dropped += other.batches_dropped;
        self.tables.extend(other.tables);
    }
}

/// `2014-01-15 10:00:00` -> `2014_01`.
pub fn partition_label(cell: &Cell) -> Option<String> {
    let text = cell.as_text()?.trim();
    let date = NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()?;
    Some(date.format("%Y_%m").to_string())
}

pub struct BatchWriter<S> {
    storage: S,
    retry: RetryController,
    table: String,
    schema: Arc<Schema>,
    known_tables: HashSet<String>,
    show_progress: bool,
}

impl<S> std::fmt::Debug for BatchWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("table", &self.table)
            .field("known_tables", &self.known_tables)
            .finish()
    }
}

impl<S: Storage> BatchWriter<S> {
    pub fn new(storage: S, retry: RetryController, table: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            storage,
            retry,
            table: table.into(),
            schema,
            known_tables: HashSet::new(),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Make sure the primary table exists, dropping it first if `policy` asks.
    pub fn prepare(&mut self, policy: ExistingTable) {
        let table = self.table.clone();
        if policy != ExistingTable::Keep && self.check_exists(&table) == Some(true) {
            if policy == ExistingTable::DropAfterGrace {
                self.retry.warn(format!(
                    "Table {} exists and will be dropped in {} seconds, press Ctrl-C to cancel",
                    table,
                    DROP_GRACE.as_secs()
                ));
                self.retry.pause(DROP_GRACE, true);
            }
            let sql = drop_statement(&table);
            if self.execute(&sql).is_some() {
                info!(table = %table, "Dropped existing table");
                self.known_tables.remove(&table);
            }
        }
        self.ensure_table(&table);
    }

    /// Run one statement through the retry controller.
    pub fn execute(&mut self, sql: &str) -> Option<u64> {
        self.retry
            .run(sql, &mut self.storage, |s| s.execute(sql), |s| s.reconnect())
    }

    pub fn query(&mut self, sql: &str) -> Option<Vec<Row>> {
        self.retry
            .run(sql, &mut self.storage, |s| s.query(sql), |s| s.reconnect())
    }

    fn check_exists(&mut self, table: &str) -> Option<bool> {
        let label = format!("table_exists({})", table);
        self.retry
            .run(&label, &mut self.storage, |s| s.table_exists(table), |s| s.reconnect())
    }

    /// Create `table` from the schema template unless it is known to exist.
    fn ensure_table(&mut self, table: &str) -> bool {
        if self.known_tables.contains(table) {
            return true;
        }
        match self.check_exists(table) {
            None => return false,
            Some(true) => {},
            Some(false) => {
                for statement in self.schema.create_statements(table) {
                    if self.execute(&statement).is_none() {
                        return false;
                    }
                }
                info!(table = %table, "Created table");
            },
        }
        self.known_tables.insert(table.to_string());
        true
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        let template = "{spinner:.green} {msg} {pos} rows [{elapsed_precise}]";
        if let Ok(style) = ProgressStyle::default_spinner().template(template) {
            bar.set_style(style);
        }
        bar.set_message(format!("Writing to {}", self.table));
        bar
    }

    /// Buffer, partition and flush `rows`.
    pub fn write<I>(&mut self, rows: I, options: &WriteOptions) -> WriteSummary
    where
        I: IntoIterator<Item = Row>,
    {
        let table = options.table.clone().unwrap_or_else(|| self.table.clone());
        let columns: Vec<String> = options.columns.clone().unwrap_or_else(|| {
            self.schema.column_names().into_iter().map(str::to_string).collect()
        });
        let created = columns.iter().position(|c| c == CREATED_TIME_COLUMN);
        let flush_every = options.flush_every.max(1);

        if let Some(bad) = std::iter::once(&table).chain(&columns).find(|name| !is_identifier(name)) {
            // `rows` stays unread, it may be a live stream
            self.retry.warn(format!("Invalid table or column name '{}', refusing to write", bad));
            return WriteSummary::default();
        }

        let progress = self.progress_bar();
        let mut summary = WriteSummary::default();
        let mut buffer: Vec<Row> = Vec::with_capacity(flush_every.min(DEFAULT_FLUSH_EVERY));

        for row in rows {
            summary.rows_received += 1;
            if row.is_all_null() {
                summary.rows_rejected += 1;
                self.retry.warn("Refusing to write an all-null row");
                continue;
            }
            buffer.push(row);

            if summary.rows_received % PROGRESS_EVERY == 0 {
                progress.set_position(summary.rows_received as u64);
                debug!(rows = summary.rows_received, table = %table, "Rows received");
            }
            if buffer.len() >= flush_every {
                let batch = std::mem::take(&mut buffer);
                self.flush(batch, &table, &columns, created, options, &mut summary);
            }
        }
        if !buffer.is_empty() {
            self.flush(buffer, &table, &columns, created, options, &mut summary);
        }

        progress.finish_and_clear();
        info!(
            table = %table,
            received = summary.rows_received,
            written = summary.rows_written,
            dropped = summary.rows_dropped,
            "Write finished"
        );
        summary
    }

    fn flush(
        &mut self,
        rows: Vec<Row>,
        table: &str,
        columns: &[String],
        created: Option<usize>,
        options: &WriteOptions,
        summary: &mut WriteSummary,
    ) {
        let mut groups: BTreeMap<String, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let destination = options
                .monthly
                .then(|| created.and_then(|i| row.get(i)).and_then(partition_label))
                .flatten()
                .map_or_else(|| table.to_string(), |label| format!("{}_{}", table, label));
            groups.entry(destination).or_default().push(row);
        }

        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        for (destination, batch) in groups {
            let written = if self.ensure_table(&destination) {
                let sql = write_statement(options.mode, &destination, &column_refs);
                self.retry.run(
                    &sql,
                    &mut self.storage,
                    |s| s.execute_many(&sql, &batch),
                    |s| s.reconnect(),
                )
            } else {
                None
            };

            match written {
                Some(_) => {
                    debug!(table = %destination, rows = batch.len(), "Flushed batch");
                    summary.rows_written += batch.len();
                    summary.batches_flushed += 1;
                    summary.tables.insert(destination);
                },
                None => {
                    summary.rows_dropped += batch.len();
                    summary.batches_dropped += 1;
                },
            }
        }
    }
}
