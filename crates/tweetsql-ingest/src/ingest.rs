//! Request driving: source -> classifier -> mapper
//!
//! [`RequestRows`] is a pull-based iterator over the rows produced by one API
//! method. It owns the retry state of the request and decides, per method,
//! what happens when a response ends:
//!
//! - `Stream` (`statuses/sample`, `statuses/filter`): reconnect and keep going.
//!   A connection that delivered no tweets, or carried an error envelope,
//!   counts as a failed attempt
//! - `Paginated` (`statuses/user_timeline`, `search/tweets`): ask for the next
//!   page below the last id seen, stop at an empty page
//! - `Once`: anything else, a single response
//!
//! Failures never escape as errors. They are warned about, retried within
//! the attempt budget, and the iterator simply ends once the budget is spent.

use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info};
use tweetsql_common::Row;

use crate::classify::{classify, Disposition};
use crate::mapper::FieldMapper;
use crate::retry::{RetryController, RetryState};
use crate::source::{Params, Response, Source, SourceError};

/// Page size requested from paginated endpoints (the API maximum).
pub const PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    Stream,
    Paginated,
    Once,
}

impl RequestShape {
    pub fn for_method(method: &str) -> Self {
        match method {
            "statuses/sample" | "statuses/filter" => RequestShape::Stream,
            "statuses/user_timeline" | "search/tweets" => RequestShape::Paginated,
            _ => RequestShape::Once,
        }
    }
}

/// Counters for one [`RequestRows`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub requests: usize,
    pub items: usize,
    pub rows: usize,
    /// Heartbeats, delete notices and control notices.
    pub skipped: usize,
    /// Records the mapper refused.
    pub rejected: usize,
    pub rate_limited: usize,
    pub pages: usize,
    /// The attempt budget ran out.
    pub gave_up: bool,
}

fn item_id(item: &Value) -> Option<i64> {
    match item.get("id_str") {
        Some(Value::String(s)) => s.parse().ok(),
        _ => item.get("id").and_then(Value::as_i64),
    }
}

pub struct RequestRows<'a, A: Source + ?Sized> {
    source: &'a mut A,
    mapper: FieldMapper,
    retry: RetryController,
    method: String,
    params: Params,
    shape: RequestShape,
    state: RetryState,
    response: Option<Response>,
    /// Position of the next item within the current response.
    index: usize,
    /// Rows of the current page, released once the page ends cleanly.
    page: Vec<Row>,
    page_forwarded: usize,
    page_last_id: Option<i64>,
    ready: VecDeque<Row>,
    stats: IngestStats,
    done: bool,
}

impl<'a, A: Source + ?Sized> RequestRows<'a, A> {
    pub fn new(
        source: &'a mut A,
        mapper: FieldMapper,
        retry: RetryController,
        method: impl Into<String>,
        mut params: Params,
    ) -> Self {
        let method = method.into();
        let shape = RequestShape::for_method(&method);
        if shape == RequestShape::Paginated {
            params.insert("count".to_string(), PAGE_SIZE.to_string());
        }
        Self {
            source,
            mapper,
            retry,
            method,
            params,
            shape,
            state: RetryState::default(),
            response: None,
            index: 0,
            page: Vec::new(),
            page_forwarded: 0,
            page_last_id: None,
            ready: VecDeque::new(),
            stats: IngestStats::default(),
            done: false,
        }
    }

    pub fn shape(&self) -> RequestShape {
        self.shape
    }

    /// Parameters of the next request, including the pagination cursor.
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    fn label(&self) -> String {
        format!("{} {:?}", self.method, self.params)
    }

    fn discard_response(&mut self) {
        self.response = None;
        self.page.clear();
        self.page_forwarded = 0;
        self.page_last_id = None;
    }

    fn open(&mut self) -> bool {
        if self.retry.exhausted(&self.state) {
            let label = self.label();
            self.retry.give_up(&self.state, &label);
            self.stats.gave_up = true;
            self.done = true;
            return false;
        }

        debug!(method = %self.method, attempt = self.state.attempts, "Opening request");
        match self.source.request(&self.method, &self.params) {
            Ok(response) => {
                self.stats.requests += 1;
                self.response = Some(response);
                self.index = 0;
                true
            },
            Err(err) => {
                if matches!(err, SourceError::RateLimited(_)) {
                    self.stats.rate_limited += 1;
                }
                self.retry.record_failure(&mut self.state, &err);
                false
            },
        }
    }

    fn finish_response(&mut self) {
        self.response = None;

        match self.shape {
            RequestShape::Once => {
                self.state.reset();
                self.done = true;
            },
            RequestShape::Stream => {
                // Heartbeats and delete notices alone do not make a clean cycle
                let forwarded = std::mem::take(&mut self.page_forwarded);
                if forwarded == 0 {
                    let err = SourceError::Other("stream closed without sending tweets".to_string());
                    self.retry.record_failure(&mut self.state, &err);
                } else {
                    info!(method = %self.method, "Stream ended, reconnecting");
                    self.state.reset();
                }
            },
            RequestShape::Paginated => {
                self.state.reset();
                self.stats.pages += 1;
                self.ready.extend(self.page.drain(..));

                let cursor = self.page_last_id.take().filter(|_| self.page_forwarded > 0);
                self.page_forwarded = 0;
                match cursor {
                    Some(id) => {
                        self.params.insert("max_id".to_string(), (id - 1).to_string());
                        debug!(method = %self.method, max_id = id - 1, "Next page");
                    },
                    None => self.done = true,
                }
            },
        }
    }

    fn emit(&mut self, row: Row) -> Option<Row> {
        self.stats.rows += 1;
        if self.shape == RequestShape::Paginated {
            self.page.push(row);
            None
        } else {
            Some(row)
        }
    }
}

impl<A: Source + ?Sized> Iterator for RequestRows<'_, A> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                return Some(row);
            }
            if self.done {
                return None;
            }
            if self.response.is_none() && !self.open() {
                continue;
            }

            let next = self.response.as_mut().and_then(Iterator::next);
            let item = match next {
                None => {
                    self.finish_response();
                    continue;
                },
                Some(Err(err)) => {
                    // Mid-response failures restart the request
                    self.discard_response();
                    self.retry.record_failure(&mut self.state, &err);
                    continue;
                },
                Some(Ok(item)) => item,
            };

            let index = self.index;
            self.index += 1;
            self.stats.items += 1;

            match classify(index, &item) {
                Disposition::Forward => {
                    self.page_forwarded += 1;
                    if let Some(id) = item_id(&item) {
                        self.page_last_id = Some(id);
                    }
                    match self.mapper.map(&item) {
                        Ok(row) => {
                            if let Some(row) = self.emit(row) {
                                return Some(row);
                            }
                        },
                        Err(err) => {
                            self.stats.rejected += 1;
                            self.retry.warn(format!("Rejected record: {}", err));
                        },
                    }
                },
                Disposition::Skip(reason) => {
                    self.stats.skipped += 1;
                    debug!(?reason, "Skipping item");
                },
                Disposition::RetryRequest(status) => {
                    self.stats.rate_limited += 1;
                    self.discard_response();
                    self.retry.wait_rate_limited(status);
                },
                Disposition::AbandonResponse(status) => {
                    self.discard_response();
                    if self.shape == RequestShape::Stream {
                        let err = SourceError::Other(format!("Error message received from Twitter {}", status));
                        self.retry.record_failure(&mut self.state, &err);
                    } else {
                        self.retry.warn(format!(
                            "Error message received from Twitter {}, dropping the rest of this response [{}]",
                            status,
                            self.label()
                        ));
                        self.done = true;
                    }
                },
            }
        }
    }
}
