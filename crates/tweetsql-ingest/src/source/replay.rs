//! Replay of captured API output
//!
//! Reads JSONL files (one response item per line) from a file or a directory
//! and serves them as a single response, whatever method is requested. Useful
//! for ingesting archived stream captures offline.
//!
//! The input is replayed once: a repeated request (after a failure in the
//! middle of a response) resumes at the first line not yet served.

use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Params, Response, Source, SourceError};

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Input file or directory path.
    pub input: PathBuf,

    /// Log and skip undecodable lines instead of surfacing them as errors.
    pub continue_on_error: bool,

    /// Limit number of files to read.
    pub limit: Option<usize>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            continue_on_error: true,
            limit: None,
        }
    }
}

impl ReplayConfig {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplaySource {
    config: ReplayConfig,
    /// Lines served so far, across all files.
    served: Arc<AtomicUsize>,
}

fn is_capture(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == "jsonl" || ext == "json" || ext == "ndjson")
}

impl ReplaySource {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Files to read, in a deterministic order.
    pub fn files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let input = &self.config.input;
        let mut files = if input.is_file() {
            vec![input.clone()]
        } else if input.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(input)
                .map_err(|e| SourceError::Other(format!("{}: {}", input.display(), e)))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_capture(p))
                .collect();
            entries.sort();
            entries
        } else {
            return Err(SourceError::Other(format!(
                "Input path does not exist: {}",
                input.display()
            )));
        };

        if let Some(limit) = self.config.limit {
            files.truncate(limit);
        }
        Ok(files)
    }
}

struct ReplayItems {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, usize, std::io::Lines<BufReader<File>>)>,
    continue_on_error: bool,
    /// Lines already served by earlier requests.
    skip: usize,
    served: Arc<AtomicUsize>,
    done: bool,
}

impl ReplayItems {
    fn open_next(&mut self) -> Option<Result<(), SourceError>> {
        let path = self.files.next()?;
        debug!(path = %path.display(), "Replaying capture");
        Some(match File::open(&path) {
            Ok(file) => {
                self.current = Some((path, 0, BufReader::new(file).lines()));
                Ok(())
            },
            Err(e) => Err(SourceError::Other(format!("{}: {}", path.display(), e))),
        })
    }
}

impl Iterator for ReplayItems {
    type Item = Result<Value, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.current.is_none() {
                match self.open_next()? {
                    Ok(()) => {},
                    Err(e) if self.continue_on_error => {
                        warn!("{}", e);
                        continue;
                    },
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    },
                }
            }
            let Some((path, line_num, lines)) = self.current.as_mut() else {
                continue;
            };

            let Some(line) = lines.next() else {
                self.current = None;
                continue;
            };
            *line_num += 1;

            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }

            let parsed = line
                .map_err(|e| SourceError::Other(e.to_string()))
                .and_then(|line| {
                    if line.trim().is_empty() {
                        Ok(None)
                    } else {
                        serde_json::from_str(&line)
                            .map(Some)
                            .map_err(|e| SourceError::Decode(e.to_string()))
                    }
                });

            match parsed {
                Ok(Some(value)) => {
                    self.served.fetch_add(1, Ordering::Relaxed);
                    return Some(Ok(value));
                },
                Ok(None) => {
                    self.served.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) if self.continue_on_error => {
                    self.served.fetch_add(1, Ordering::Relaxed);
                    warn!("{}:{}: {}", path.display(), line_num, e);
                },
                Err(e) => {
                    // The failing line is served again on the next request
                    self.done = true;
                    return Some(Err(e));
                },
            }
        }
    }
}

impl Source for ReplaySource {
    fn request(&mut self, method: &str, _params: &Params) -> Result<Response, SourceError> {
        let files = self.files()?;
        debug!(method, files = files.len(), "Replay request");
        Ok(Box::new(ReplayItems {
            files: files.into_iter(),
            current: None,
            continue_on_error: self.config.continue_on_error,
            skip: self.served.load(Ordering::Relaxed),
            served: self.served.clone(),
            done: false,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_reads_directory_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.jsonl", "{\"id\": 3}\n");
        write(dir.path(), "a.jsonl", "{\"id\": 1}\n\n{\"id\": 2}\n");
        write(dir.path(), "notes.txt", "{\"id\": 99}\n");

        let mut source = ReplaySource::new(ReplayConfig::new(dir.path()));
        let items: Vec<_> = source
            .request("statuses/sample", &Params::new())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(items, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
    }

    #[test]
    fn test_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.jsonl", "{\"id\": 1}\n{broken\n{\"id\": 2}\n");

        let mut lenient = ReplaySource::new(ReplayConfig::new(dir.path()));
        assert_eq!(lenient.request("x", &Params::new()).unwrap().count(), 2);

        let mut strict = ReplaySource::new(ReplayConfig {
            continue_on_error: false,
            ..ReplayConfig::new(dir.path())
        });
        let items: Vec<_> = strict.request("x", &Params::new()).unwrap().collect();
        assert_eq!(items.len(), 2, "Strict replay stops at the bad line");
        assert!(matches!(items[1], Err(SourceError::Decode(_))));

        let again: Vec<_> = strict.request("x", &Params::new()).unwrap().collect();
        assert_eq!(again.len(), 1);
        assert!(matches!(again[0], Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_repeated_request_resumes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.jsonl", "{\"id\": 1}\n\n{\"id\": 2}\n");
        write(dir.path(), "b.jsonl", "{\"id\": 3}\n");

        let mut source = ReplaySource::new(ReplayConfig::new(dir.path()));
        let mut first = source.request("x", &Params::new()).unwrap();
        assert_eq!(first.next().unwrap().unwrap(), json!({"id": 1}));
        assert_eq!(first.next().unwrap().unwrap(), json!({"id": 2}));
        drop(first);

        let rest: Vec<_> = source
            .request("x", &Params::new())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rest, vec![json!({"id": 3})]);
        assert_eq!(source.request("x", &Params::new()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_input() {
        let mut source = ReplaySource::new(ReplayConfig::new("/nonexistent/capture.jsonl"));
        assert!(source.request("x", &Params::new()).is_err());
    }
}
