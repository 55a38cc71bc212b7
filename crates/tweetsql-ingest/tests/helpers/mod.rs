//! Test helpers for tweetsql integration tests
//!
//! - scripted API source with canned responses
//! - storage wrapper that fails a configurable number of times
//! - recording sleeper so waits are observed instead of slept

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tweetsql_common::logging::WarningLog;
use tweetsql_common::{Row, WarningSink};
use tweetsql_ingest::retry::{RetryController, RetryPolicy, Sleeper};
use tweetsql_ingest::source::{Params, Response, Source, SourceError};
use tweetsql_ingest::storage::{SqliteStorage, Storage, StorageError};

/// One canned reply: either a failed request or a list of items.
pub type Reply = Result<Vec<Result<Value, SourceError>>, SourceError>;

#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _verbose: bool) {
        self.waits.lock().unwrap().push(duration);
    }
}

/// Retry controller writing to an in-memory warning log, never sleeping.
pub fn controller() -> (RetryController, Arc<RecordingSleeper>, WarningLog) {
    let (sink, log) = WarningSink::in_memory();
    let sleeper = Arc::new(RecordingSleeper::default());
    let retry = RetryController::new(RetryPolicy::default(), sink).with_sleeper(sleeper.clone());
    (retry, sleeper, log)
}

#[derive(Default)]
pub struct ScriptedSource {
    replies: VecDeque<Reply>,
    pub requests: Vec<(String, Params)>,
}

impl ScriptedSource {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
            requests: Vec::new(),
        }
    }

    pub fn items(items: Vec<Value>) -> Self {
        Self::new(vec![Ok(items.into_iter().map(Ok).collect())])
    }
}

impl Source for ScriptedSource {
    fn request(&mut self, method: &str, params: &Params) -> Result<Response, SourceError> {
        self.requests.push((method.to_string(), params.clone()));
        match self.replies.pop_front() {
            Some(Ok(items)) => Ok(Box::new(items.into_iter())),
            Some(Err(err)) => Err(err),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// SQLite storage whose next `failures` batch writes fail with `error`.
pub struct FlakyStorage {
    inner: SqliteStorage,
    failures: usize,
    error: StorageError,
    pub write_attempts: usize,
    pub reconnects: usize,
}

impl FlakyStorage {
    pub fn new(failures: usize, error: StorageError) -> Self {
        Self {
            inner: SqliteStorage::in_memory().unwrap(),
            failures,
            error,
            write_attempts: 0,
            reconnects: 0,
        }
    }
}

impl Storage for FlakyStorage {
    fn execute(&mut self, sql: &str) -> Result<u64, StorageError> {
        self.inner.execute(sql)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Row]) -> Result<u64, StorageError> {
        self.write_attempts += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(self.error.clone());
        }
        self.inner.execute_many(sql, rows)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError> {
        self.inner.query(sql)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        self.inner.table_exists(table)
    }

    fn reconnect(&mut self) -> Result<(), StorageError> {
        // Keep the in-memory database; only count the call
        self.reconnects += 1;
        Ok(())
    }
}

/// A minimal v1.1 tweet.
pub fn tweet(id: i64, created_at: &str) -> Value {
    json!({
        "id": id,
        "id_str": id.to_string(),
        "text": format!("tweet number {}", id),
        "created_at": created_at,
        "source": "<a href=\"http://twitter.com\" rel=\"nofollow\">Twitter Web Client</a>",
        "lang": "en",
        "user": {
            "id_str": "474257339",
            "location": "Philadelphia",
            "friends_count": 10,
            "followers_count": 20,
            "time_zone": "Eastern Time (US & Canada)"
        },
        "coordinates": null
    })
}

/// `count(*)` of a table.
pub fn count<S: Storage>(storage: &mut S, table: &str) -> i64 {
    let rows = storage.query(&format!("SELECT count(*) FROM {}", table)).unwrap();
    rows[0].get(0).and_then(|c| c.as_i64()).unwrap()
}
