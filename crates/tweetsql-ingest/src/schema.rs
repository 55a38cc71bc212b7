//! Column layout of the destination table
//!
//! A [`Schema`] ties together three inputs that must stay consistent:
//!
//! 1. the column declarations used to create tables
//!    (`"message_id bigint(20) primary key"`, `"index datedex (created_time)"`),
//! 2. the ordered column names rows are written with,
//! 3. the extraction path for each column.
//!
//! Inconsistent inputs are rejected by [`Schema::from_parts`] before anything
//! touches the network or the database.

use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::path::FieldPath;

/// Column holding the tweet id; natural key for `REPLACE` and the pagination cursor.
pub const MESSAGE_ID_COLUMN: &str = "message_id";
/// Column holding the creation time; drives monthly partition labels.
pub const CREATED_TIME_COLUMN: &str = "created_time";
pub const SOURCE_COLUMN: &str = "source";
pub const COORDINATES_COLUMN: &str = "coordinates";
pub const COORDINATES_ADDRESS_COLUMN: &str = "coordinates_address";
pub const COORDINATES_STATE_COLUMN: &str = "coordinates_state";

/// Columns filled from the record's coordinates rather than an extraction path.
const GEO_COLUMNS: [&str; 3] = [
    COORDINATES_COLUMN,
    COORDINATES_ADDRESS_COLUMN,
    COORDINATES_STATE_COLUMN,
];

pub const DEFAULT_COLUMN_DECLARATIONS: &[&str] = &[
    "user_id bigint(20)",
    "message_id bigint(20) primary key",
    "message text",
    "created_time datetime",
    "in_reply_to_message_id bigint(20)",
    "in_reply_to_user_id bigint(20)",
    "retweet_message_id bigint(20)",
    "source varchar(128)",
    "lang varchar(4)",
    "time_zone varchar(64)",
    "friend_count int(6)",
    "followers_count int(6)",
    "user_location varchar(200)",
    "tweet_location varchar(200)",
    "coordinates varchar(128)",
    "coordinates_address varchar(64)",
    "coordinates_state varchar(3)",
    "index useriddex (user_id)",
    "index datedex (created_time)",
];

pub const DEFAULT_EXTRACTION_PATHS: &[(&str, &str)] = &[
    ("message_id", "['id_str']"),
    ("message", "['text']"),
    ("created_time", "['created_at']"),
    ("user_id", "['user']['id_str']"),
    ("in_reply_to_message_id", "['in_reply_to_status_id_str']"),
    ("in_reply_to_user_id", "['in_reply_to_user_id_str']"),
    ("retweet_message_id", "['retweeted_status']['id_str']"),
    ("user_location", "['user']['location']"),
    ("tweet_location", "['place']['full_name']"),
    ("friend_count", "['user']['friends_count']"),
    ("followers_count", "['user']['followers_count']"),
    ("time_zone", "['user']['time_zone']"),
    ("lang", "['lang']"),
    ("source", "['source']"),
];

/// Column-specific post-processing applied after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    /// `Wed Aug 27 13:08:45 +0000 2008` -> `2008-08-27 13:08:45`
    ParseTimestamp,
    /// `<a href="...">Client</a>` -> `Client`
    StripMarkup,
}

impl Transform {
    fn for_column(name: &str) -> Self {
        match name {
            CREATED_TIME_COLUMN => Transform::ParseTimestamp,
            SOURCE_COLUMN => Transform::StripMarkup,
            _ => Transform::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    /// Full declaration text, e.g. `message_id bigint(20) primary key`.
    pub declaration: String,
    pub path: Option<FieldPath>,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// Column list inside the parentheses, e.g. `user_id`.
    pub columns: String,
}

enum Declaration {
    Column { name: String, text: String },
    Index(IndexSpec),
}

fn parse_declaration(text: &str) -> Result<Declaration, ConfigError> {
    let trimmed = text.trim();
    let bad = || ConfigError::InvalidDeclaration(text.to_string());

    let mut tokens = trimmed.splitn(2, char::is_whitespace);
    let first = tokens.next().filter(|t| !t.is_empty()).ok_or_else(bad)?;
    let rest = tokens.next().map(str::trim).unwrap_or_default();

    if first.eq_ignore_ascii_case("index") || first.eq_ignore_ascii_case("key") {
        let open = rest.find('(').ok_or_else(bad)?;
        let name = rest[..open].trim();
        let columns = rest[open + 1..]
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(bad)?
            .trim();
        if name.is_empty() || !is_identifier(name) || !columns.split(',').all(|c| is_identifier(c.trim())) {
            return Err(bad());
        }
        return Ok(Declaration::Index(IndexSpec {
            name: name.to_string(),
            columns: columns.to_string(),
        }));
    }

    if rest.is_empty() || !is_identifier(first) {
        return Err(bad());
    }
    Ok(Declaration::Column {
        name: first.to_string(),
        text: trimmed.to_string(),
    })
}

pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject table names that cannot be spliced into SQL as-is.
pub fn validate_table_name(table: &str) -> Result<(), ConfigError> {
    if table.is_empty() {
        return Err(ConfigError::MissingTable);
    }
    if !is_identifier(table) {
        return Err(ConfigError::InvalidTableName(table.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
    indexes: Vec<IndexSpec>,
}

impl Schema {
    /// Build a schema from optional declarations, column names and extraction map.
    ///
    /// - declarations only: column names are taken from the declarations;
    /// - declarations and columns: the non-index declaration count must match;
    /// - columns only: rejected;
    /// - neither: the default tweet layout.
    ///
    /// Without a custom extraction map the default paths are used and columns
    /// without a default stay null. With a custom map, every column except the
    /// coordinate columns needs an entry.
    pub fn from_parts(
        declarations: Option<&[String]>,
        columns: Option<&[String]>,
        extraction: Option<&BTreeMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let declarations: Vec<String> = match declarations {
            Some(decls) => decls.to_vec(),
            None if columns.is_some() => return Err(ConfigError::ColumnsWithoutDeclarations),
            None => DEFAULT_COLUMN_DECLARATIONS.iter().map(|d| d.to_string()).collect(),
        };

        let mut column_decls = Vec::new();
        let mut indexes = Vec::new();
        for text in &declarations {
            match parse_declaration(text)? {
                Declaration::Column { name, text } => column_decls.push((name, text)),
                Declaration::Index(index) => indexes.push(index),
            }
        }

        let names: Vec<String> = match columns {
            Some(columns) => {
                if let Some(bad) = columns.iter().find(|c| !is_identifier(c)) {
                    return Err(ConfigError::InvalidColumnName(bad.clone()));
                }
                if columns.len() != column_decls.len() {
                    return Err(ConfigError::ColumnCountMismatch {
                        columns: columns.len(),
                        declarations: column_decls.len(),
                    });
                }
                columns.to_vec()
            },
            None => column_decls.iter().map(|(name, _)| name.clone()).collect(),
        };

        let default_paths: BTreeMap<String, String> = DEFAULT_EXTRACTION_PATHS
            .iter()
            .map(|(column, path)| (column.to_string(), path.to_string()))
            .collect();
        let custom = extraction.is_some();
        let paths = extraction.unwrap_or(&default_paths);

        let mut specs = Vec::with_capacity(names.len());
        for (name, (_, declaration)) in names.into_iter().zip(column_decls) {
            let path = match paths.get(&name) {
                Some(expr) => Some(FieldPath::parse(expr)?),
                None if custom && !GEO_COLUMNS.contains(&name.as_str()) => {
                    return Err(ConfigError::MissingExtraction(name))
                },
                None => None,
            };
            specs.push(ColumnSpec {
                transform: Transform::for_column(&name),
                name,
                declaration,
                path,
            });
        }

        Ok(Self {
            columns: specs,
            indexes,
        })
    }

    /// The default tweet layout.
    pub fn tweets() -> Result<Self, ConfigError> {
        Self::from_parts(None, None, None)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// DDL for `table`: one `CREATE TABLE` plus one `CREATE INDEX` per index.
    ///
    /// Index names are prefixed with the table name so that monthly tables
    /// sharing one database do not collide.
    pub fn create_statements(&self, table: &str) -> Vec<String> {
        let body = self
            .columns
            .iter()
            .map(|c| c.declaration.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut statements = vec![format!("CREATE TABLE {} ({})", table, body)];
        statements.extend(self.indexes.iter().map(|index| {
            format!(
                "CREATE INDEX {}_{} ON {} ({})",
                table, index.name, table, index.columns
            )
        }));
        statements
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_layout() {
        let schema = Schema::tweets().unwrap();
        assert_eq!(schema.width(), 17);
        assert_eq!(schema.indexes().len(), 2);
        assert_eq!(schema.position(MESSAGE_ID_COLUMN), Some(1));
        assert_eq!(schema.position(CREATED_TIME_COLUMN), Some(3));

        let created = &schema.columns()[3];
        assert_eq!(created.transform, Transform::ParseTimestamp);
        assert_eq!(created.path, Some(FieldPath::key("created_at")));

        let coordinates = &schema.columns()[schema.position(COORDINATES_COLUMN).unwrap()];
        assert_eq!(coordinates.path, None);
    }

    #[test]
    fn test_column_count_must_match_declarations() {
        let decls = strings(&["user_id bigint(20)", "message_id bigint(20)", "index u (user_id)"]);
        let columns = strings(&["user_id"]);

        let err = Schema::from_parts(Some(&decls), Some(&columns), None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ColumnCountMismatch {
                columns: 1,
                declarations: 2
            }
        );

        let columns = strings(&["user_id", "message_id"]);
        let schema = Schema::from_parts(Some(&decls), Some(&columns), None).unwrap();
        assert_eq!(schema.column_names(), vec!["user_id", "message_id"]);
    }

    #[test]
    fn test_column_names_must_be_identifiers() {
        let decls = strings(&["user_id bigint(20)", "message text"]);
        for bad in ["bad name", "x); DROP TABLE t; --", ""] {
            let columns = strings(&["user_id", bad]);
            assert_eq!(
                Schema::from_parts(Some(&decls), Some(&columns), None).unwrap_err(),
                ConfigError::InvalidColumnName(bad.to_string())
            );
        }
    }

    #[test]
    fn test_columns_without_declarations_fail() {
        let columns = strings(&["user_id"]);
        assert_eq!(
            Schema::from_parts(None, Some(&columns), None).unwrap_err(),
            ConfigError::ColumnsWithoutDeclarations
        );
    }

    #[test]
    fn test_custom_map_must_cover_columns() {
        let decls = strings(&["message_id bigint(20) primary key", "message text", "coordinates varchar(128)"]);
        let mut map = BTreeMap::new();
        map.insert("message_id".to_string(), "id_str".to_string());

        let err = Schema::from_parts(Some(&decls), None, Some(&map)).unwrap_err();
        assert_eq!(err, ConfigError::MissingExtraction("message".to_string()));

        map.insert("message".to_string(), "full_text".to_string());
        let schema = Schema::from_parts(Some(&decls), None, Some(&map)).unwrap();
        assert_eq!(schema.columns()[1].path, Some(FieldPath::key("full_text")));
    }

    #[test]
    fn test_bad_path_fails_construction() {
        let decls = strings(&["message text"]);
        let mut map = BTreeMap::new();
        map.insert("message".to_string(), "['text'".to_string());
        assert!(matches!(
            Schema::from_parts(Some(&decls), None, Some(&map)),
            Err(ConfigError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_create_statements() {
        let decls = strings(&[
            "message_id bigint(20) primary key",
            "created_time datetime",
            "index datedex (created_time)",
        ]);
        let schema = Schema::from_parts(Some(&decls), None, None).unwrap();
        assert_eq!(
            schema.create_statements("tweets_2014_01"),
            vec![
                "CREATE TABLE tweets_2014_01 (message_id bigint(20) primary key, created_time datetime)"
                    .to_string(),
                "CREATE INDEX tweets_2014_01_datedex ON tweets_2014_01 (created_time)".to_string(),
            ]
        );
    }

    #[test]
    fn test_rejects_malformed_declarations() {
        for bad in [
            "",
            "message",
            "index (user_id)",
            "index u user_id",
            "drop;table text",
            "index u (user_id); DROP TABLE t; --)",
        ] {
            let decls = strings(&[bad]);
            assert!(
                Schema::from_parts(Some(&decls), None, None).is_err(),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("tweets_2014_01").is_ok());
        assert_eq!(validate_table_name(""), Err(ConfigError::MissingTable));
        assert!(validate_table_name("tweets; drop").is_err());
    }
}
