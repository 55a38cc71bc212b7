//! Pipeline configuration
//!
//! [`TweetSqlConfig`] gathers everything needed to build a pipeline and
//! checks it in one place; [`Credentials`] holds the four OAuth values, given
//! inline or read from a key file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::mapper::Geolocator;
use crate::retry::RetryPolicy;
use crate::schema::{validate_table_name, Schema};

/// Rows buffered before a flush, for stream ingestion.
pub const DEFAULT_FLUSH_EVERY: usize = 8000;
/// Rows buffered before a flush, for timelines and searches.
pub const BACKFILL_FLUSH_EVERY: usize = 1000;
/// Countdown before an existing table is dropped.
pub const DROP_GRACE: Duration = Duration::from_secs(10);

/// Key file labels, in the order the values appear in [`Credentials`].
pub const KEY_FILE_LABELS: [&str; 4] = ["API_KEY", "API_SECRET", "ACCESS_TOKEN", "ACCESS_SECRET"];

/// What to do when the destination table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingTable {
    /// Keep it and append.
    #[default]
    Keep,
    /// Drop and recreate after a countdown that Ctrl-C can interrupt.
    DropAfterGrace,
    DropImmediately,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

/// Credentials as given on the command line; any of them may be missing.
#[derive(Debug, Clone, Default)]
pub struct InlineCredentials {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub access_token: Option<String>,
    pub access_secret: Option<String>,
}

impl InlineCredentials {
    fn values(&self) -> [Option<&str>; 4] {
        [
            self.consumer_key.as_deref(),
            self.consumer_secret.as_deref(),
            self.access_token.as_deref(),
            self.access_secret.as_deref(),
        ]
    }

    fn present(&self) -> usize {
        self.values().iter().filter(|v| v.is_some_and(|v| !v.is_empty())).count()
    }
}

impl Credentials {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_token: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: access_token.into(),
            access_secret: access_secret.into(),
        }
    }

    /// Parse `LABEL value` lines. Unknown labels and blank lines are ignored.
    pub fn parse_key_file(text: &str) -> Result<Self, ConfigError> {
        let mut found: BTreeMap<&str, String> = BTreeMap::new();

        for (line_num, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (label, value) = line.split_once(char::is_whitespace).ok_or_else(|| {
                ConfigError::KeyFile(format!("line {}: expected 'LABEL value'", line_num + 1))
            })?;
            if let Some(label) = KEY_FILE_LABELS.iter().copied().find(|l| *l == label) {
                found.insert(label, value.trim().to_string());
            }
        }

        let mut take = |label: &str| {
            found
                .remove(label)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::KeyFile(format!("missing {}", label)))
        };
        Ok(Self {
            consumer_key: take(KEY_FILE_LABELS[0])?,
            consumer_secret: take(KEY_FILE_LABELS[1])?,
            access_token: take(KEY_FILE_LABELS[2])?,
            access_secret: take(KEY_FILE_LABELS[3])?,
        })
    }

    pub fn from_key_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::KeyFile(format!("{}: {}", path.display(), e)))?;
        Self::parse_key_file(&text)
    }

    /// Pick inline credentials or the key file.
    ///
    /// All four inline values win over a key file. A key file is only read
    /// when no inline value was given; a partial inline set is an error.
    pub fn resolve(inline: &InlineCredentials, key_file: Option<&Path>) -> Result<Self, ConfigError> {
        match (inline.present(), key_file) {
            (4, key_file) => {
                if key_file.is_some() {
                    info!("Found both a key file and all four API keys inline, using the inline keys");
                }
                let [a, b, c, d] = inline.values().map(|v| v.unwrap_or_default().to_string());
                Ok(Self::new(a, b, c, d))
            },
            (0, Some(path)) => {
                let credentials = Self::from_key_file(path)?;
                info!(path = %path.display(), "Read API keys file");
                Ok(credentials)
            },
            (0, None) => Err(ConfigError::MissingCredentials(
                "give all four keys inline or an API keys file".to_string(),
            )),
            (n, _) => Err(ConfigError::MissingCredentials(format!(
                "only {} of 4 keys given inline",
                n
            ))),
        }
    }
}

/// Everything needed to build a pipeline.
#[derive(Clone)]
pub struct TweetSqlConfig {
    /// Destination table, or prefix of the monthly tables.
    pub table: String,
    /// Column declarations; `None` for the default tweet layout.
    pub declarations: Option<Vec<String>>,
    /// Column names in row order; `None` to take them from the declarations.
    pub columns: Option<Vec<String>>,
    /// Column name -> extraction path; `None` for the default map.
    pub extraction: Option<BTreeMap<String, String>>,
    pub existing_table: ExistingTable,
    /// Warning sink file, opened in append mode; stderr when unset.
    pub error_file: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub flush_every: usize,
    pub geolocator: Option<Arc<dyn Geolocator>>,
}

impl fmt::Debug for TweetSqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TweetSqlConfig")
            .field("table", &self.table)
            .field("declarations", &self.declarations)
            .field("columns", &self.columns)
            .field("extraction", &self.extraction)
            .field("existing_table", &self.existing_table)
            .field("error_file", &self.error_file)
            .field("retry", &self.retry)
            .field("flush_every", &self.flush_every)
            .field("geolocator", &self.geolocator.is_some())
            .finish()
    }
}

impl Default for TweetSqlConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            declarations: None,
            columns: None,
            extraction: None,
            existing_table: ExistingTable::Keep,
            error_file: None,
            retry: RetryPolicy::default(),
            flush_every: DEFAULT_FLUSH_EVERY,
            geolocator: None,
        }
    }
}

impl TweetSqlConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_declarations(mut self, declarations: Vec<String>) -> Self {
        self.declarations = Some(declarations);
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_extraction(mut self, extraction: BTreeMap<String, String>) -> Self {
        self.extraction = Some(extraction);
        self
    }

    pub fn with_existing_table(mut self, policy: ExistingTable) -> Self {
        self.existing_table = policy;
        self
    }

    pub fn with_error_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_file = Some(path.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    pub fn with_geolocator(mut self, geolocator: Arc<dyn Geolocator>) -> Self {
        self.geolocator = Some(geolocator);
        self
    }

    /// Check the configuration and build its schema.
    pub fn validate(&self) -> Result<Schema, ConfigError> {
        validate_table_name(&self.table)?;
        if self.flush_every == 0 {
            return Err(ConfigError::ZeroFlushThreshold);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Schema::from_parts(
            self.declarations.as_deref(),
            self.columns.as_deref(),
            self.extraction.as_ref(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const KEY_FILE: &str = "API_KEY key\nAPI_SECRET secret\n\nACCESS_TOKEN 1-token\nACCESS_SECRET asecret\n";

    #[test]
    fn test_parse_key_file() {
        let credentials = Credentials::parse_key_file(KEY_FILE).unwrap();
        assert_eq!(credentials, Credentials::new("key", "secret", "1-token", "asecret"));
    }

    #[test]
    fn test_key_file_missing_label() {
        let err = Credentials::parse_key_file("API_KEY key\nAPI_SECRET secret\n").unwrap_err();
        assert_eq!(err, ConfigError::KeyFile("missing ACCESS_TOKEN".to_string()));
        assert!(Credentials::parse_key_file("API_KEY").is_err());
    }

    #[test]
    fn test_inline_credentials_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        std::fs::write(&path, KEY_FILE).unwrap();

        let inline = InlineCredentials {
            consumer_key: Some("k".into()),
            consumer_secret: Some("s".into()),
            access_token: Some("t".into()),
            access_secret: Some("a".into()),
        };
        assert_eq!(
            Credentials::resolve(&inline, Some(&path)).unwrap(),
            Credentials::new("k", "s", "t", "a")
        );
        assert_eq!(
            Credentials::resolve(&InlineCredentials::default(), Some(&path)).unwrap().consumer_key,
            "key"
        );
    }

    #[test]
    fn test_missing_credentials() {
        assert!(matches!(
            Credentials::resolve(&InlineCredentials::default(), None),
            Err(ConfigError::MissingCredentials(_))
        ));
        let partial = InlineCredentials {
            consumer_key: Some("k".into()),
            ..Default::default()
        };
        assert!(matches!(
            Credentials::resolve(&partial, None),
            Err(ConfigError::MissingCredentials(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let shown = format!("{:?}", Credentials::new("key", "secret", "token", "asecret"));
        assert!(shown.contains("key"));
        assert!(!shown.contains("asecret"));
    }

    #[test]
    fn test_validate() {
        assert_eq!(TweetSqlConfig::default().validate().unwrap_err(), ConfigError::MissingTable);
        assert_eq!(
            TweetSqlConfig::new("tweets").with_flush_every(0).validate().unwrap_err(),
            ConfigError::ZeroFlushThreshold
        );
        assert_eq!(
            TweetSqlConfig::new("tweets")
                .with_retry(RetryPolicy::default().with_max_attempts(0))
                .validate()
                .unwrap_err(),
            ConfigError::ZeroAttempts
        );
        assert_eq!(TweetSqlConfig::new("tweets").validate().unwrap().width(), 17);
    }
}
