//! tweetsql - store tweets from the Twitter API in SQLite

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tweetsql_common::logging::{init_logging, LogConfig, LogLevel};
use tweetsql_ingest::config::{
    Credentials, ExistingTable, InlineCredentials, TweetSqlConfig, BACKFILL_FLUSH_EVERY,
    DEFAULT_FLUSH_EVERY,
};
use tweetsql_ingest::source::{params, HttpSource, Params, ReplayConfig, ReplaySource, Source};
use tweetsql_ingest::storage::{SqliteStorage, WriteMode};
use tweetsql_ingest::writer::WriteOptions;
use tweetsql_ingest::{IngestReport, TweetSql};

#[derive(Parser, Debug)]
#[command(name = "tweetsql")]
#[command(author, version, about = "Store tweets from the Twitter API in SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database file
    #[arg(short = 'd', long = "db", env = "TWEETSQL_DB", global = true)]
    database: Option<PathBuf>,

    /// Table to write to, or prefix of the monthly tables
    #[arg(short, long, env = "TWEETSQL_TABLE", global = true)]
    table: Option<String>,

    #[command(flatten)]
    keys: KeyArgs,

    /// Twitter REST API host
    #[arg(short = 'H', long, default_value = "api.twitter.com", global = true)]
    host: String,

    /// Twitter streaming API host
    #[arg(long, default_value = "stream.twitter.com", global = true)]
    stream_host: String,

    /// Append warnings to this file instead of stderr
    #[arg(long, env = "TWEETSQL_ERROR_FILE", global = true)]
    error_file: Option<PathBuf>,

    /// Use REPLACE instead of INSERT
    #[arg(long, global = true)]
    replace: bool,

    /// Write into one table per month (<table>_YYYY_MM), always on for `sample`
    #[arg(long, global = true)]
    monthly: bool,

    /// Rows buffered before each flush
    #[arg(long, global = true)]
    flush_every: Option<usize>,

    /// Drop the table first if it exists
    #[arg(long, global = true)]
    drop_existing: bool,

    /// With --drop-existing, skip the 10 second countdown
    #[arg(long, global = true, requires = "drop_existing")]
    no_grace: bool,

    /// Print the final report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Twitter API key
    #[arg(long, env = "TWITTER_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Twitter API secret
    #[arg(long, env = "TWITTER_API_SECRET", global = true, hide_env_values = true)]
    api_secret: Option<String>,

    /// Twitter app access token
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", global = true, hide_env_values = true)]
    access_token: Option<String>,

    /// Twitter app access token secret
    #[arg(long, env = "TWITTER_ACCESS_SECRET", global = true, hide_env_values = true)]
    access_secret: Option<String>,

    /// File with the 4 keys on separate lines, each preceded by its label
    /// (API_KEY, API_SECRET, ACCESS_TOKEN, ACCESS_SECRET) and a space
    #[arg(short = 'k', long, global = true)]
    api_keys_file: Option<PathBuf>,
}

impl KeyArgs {
    fn resolve(&self) -> Result<Credentials> {
        let inline = InlineCredentials {
            consumer_key: self.api_key.clone(),
            consumer_secret: self.api_secret.clone(),
            access_token: self.access_token.clone(),
            access_secret: self.access_secret.clone(),
        };
        Ok(Credentials::resolve(&inline, self.api_keys_file.as_deref())?)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Random sample of all public tweets, into monthly tables
    Sample,

    /// Tweets matching a filter, as they are posted
    Filter {
        /// Comma separated phrases to track
        #[arg(long)]
        track: Option<String>,

        /// Comma separated user ids to follow
        #[arg(long)]
        follow: Option<String>,

        /// Comma separated bounding boxes (lon,lat pairs, south-west first)
        #[arg(long)]
        locations: Option<String>,
    },

    /// All accessible tweets of one user
    Timeline {
        #[arg(long, conflicts_with = "user_id", required_unless_present = "user_id")]
        screen_name: Option<String>,

        #[arg(long)]
        user_id: Option<String>,
    },

    /// Tweets matching a search query
    Search {
        /// Search query, e.g. '"Taylor Swift" OR "Jennifer Lawrence"'
        #[arg(short, long)]
        query: String,

        /// Restrict to one language
        #[arg(long)]
        lang: Option<String>,
    },

    /// Hydrate tweets by id
    Lookup {
        /// Comma separated tweet ids
        #[arg(long)]
        id: String,
    },

    /// Ingest captured API output from JSONL files
    Replay {
        /// JSONL file or directory of captures
        input: PathBuf,

        /// Stop at the first undecodable line
        #[arg(long)]
        strict: bool,
    },
}

fn optional_params(pairs: &[(&str, &Option<String>)]) -> Params {
    params(
        pairs
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone()))),
    )
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tweetsql")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    // Everything configurable is checked before any I/O
    let Some(database) = cli.database.clone() else {
        bail!("Missing database, pass --db or set TWEETSQL_DB");
    };
    let existing_table = match (cli.drop_existing, cli.no_grace) {
        (false, _) => ExistingTable::Keep,
        (true, false) => ExistingTable::DropAfterGrace,
        (true, true) => ExistingTable::DropImmediately,
    };
    let mut config = TweetSqlConfig::new(cli.table.clone().unwrap_or_default())
        .with_existing_table(existing_table)
        .with_flush_every(cli.flush_every.unwrap_or(DEFAULT_FLUSH_EVERY));
    if let Some(path) = &cli.error_file {
        config = config.with_error_file(path);
    }
    config.validate()?;

    let source: Box<dyn Source> = match &cli.command {
        Command::Replay { input, strict } => Box::new(ReplaySource::new(ReplayConfig {
            continue_on_error: !strict,
            ..ReplayConfig::new(input)
        })),
        _ => {
            let credentials = cli.keys.resolve()?;
            Box::new(
                HttpSource::new(credentials)?
                    .with_api_host(&cli.host)
                    .with_stream_host(&cli.stream_host),
            )
        },
    };

    let storage = SqliteStorage::open(&database)?;
    let mut twt = TweetSql::new(config, source, storage)?;

    let mode = if cli.replace {
        WriteMode::Replace
    } else {
        WriteMode::Insert
    };
    let options = |default_flush: usize| {
        WriteOptions::new(mode)
            .monthly(cli.monthly)
            .flush_every(cli.flush_every.unwrap_or(default_flush))
    };

    let report: IngestReport = match cli.command {
        Command::Sample => {
            info!("Reading the random sample stream");
            twt.random_sample_to_storage(mode)
        },
        Command::Filter {
            track,
            follow,
            locations,
        } => {
            let params = optional_params(&[
                ("track", &track),
                ("follow", &follow),
                ("locations", &locations),
            ]);
            if params.is_empty() {
                bail!("filter needs at least one of --track, --follow or --locations");
            }
            twt.filter_stream_to_storage(params, &options(DEFAULT_FLUSH_EVERY))
        },
        Command::Timeline {
            screen_name,
            user_id,
        } => {
            let params = optional_params(&[("screen_name", &screen_name), ("user_id", &user_id)]);
            info!(?params, "Finding tweets for user");
            twt.tweets_to_storage("statuses/user_timeline", params, &options(BACKFILL_FLUSH_EVERY))
        },
        Command::Search { query, lang } => {
            let mut params = optional_params(&[("lang", &lang)]);
            params.insert("q".to_string(), query);
            twt.tweets_to_storage("search/tweets", params, &options(BACKFILL_FLUSH_EVERY))
        },
        Command::Lookup { id } => {
            twt.tweets_to_storage("statuses/lookup", params([("id", id)]), &options(DEFAULT_FLUSH_EVERY))
        },
        Command::Replay { .. } => {
            twt.tweets_to_storage("replay", Params::new(), &options(DEFAULT_FLUSH_EVERY))
        },
    };

    info!(
        rows = report.ingest.rows,
        rejected = report.ingest.rejected,
        written = report.write.rows_written,
        dropped = report.write.rows_dropped,
        tables = ?report.write.tables,
        "Done"
    );
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_monthly_help_mentions_sample() {
        let cli = Cli::command();
        let monthly = cli.get_arguments().find(|arg| arg.get_id() == "monthly").unwrap();
        assert!(monthly.get_help().unwrap().to_string().contains("sample"));
    }

    #[test]
    fn test_sample_accepts_monthly() {
        let cli = Cli::try_parse_from(["tweetsql", "sample", "--monthly"]).unwrap();
        assert!(cli.monthly);
        assert!(matches!(cli.command, Command::Sample));
    }
}
