//! Typed extraction paths into raw API records
//!
//! A [`FieldPath`] is a sequence of key/index steps evaluated against a
//! `serde_json::Value`. Two textual notations are accepted:
//!
//! - bracket notation, as found in older column maps: `['user']['id_str']`,
//!   `['coordinates']['coordinates'][0]`
//! - dotted notation: `user.id_str`, `coordinates.coordinates.0`
//!
//! Missing segments resolve to `None`; evaluation never fails.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    steps: Vec<PathStep>,
}

impl FieldPath {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// Single-key path.
    pub fn key(key: impl Into<String>) -> Self {
        Self::new(vec![PathStep::Key(key.into())])
    }

    pub fn then_key(mut self, key: impl Into<String>) -> Self {
        self.steps.push(PathStep::Key(key.into()));
        self
    }

    pub fn then_index(mut self, index: usize) -> Self {
        self.steps.push(PathStep::Index(index));
        self
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Walk `value` along the path.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.steps.iter().try_fold(value, |current, step| match (step, current) {
            (PathStep::Key(key), Value::Object(map)) => map.get(key),
            (PathStep::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            },
            (PathStep::Index(i), Value::Array(items)) => items.get(*i),
            (PathStep::Index(i), Value::Object(map)) => map.get(&i.to_string()),
            _ => None,
        })
    }

    /// Parse either notation.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid(expr, "empty path"));
        }

        let steps = if trimmed.starts_with('[') {
            parse_brackets(expr, trimmed)?
        } else {
            parse_dotted(expr, trimmed)?
        };
        Ok(Self { steps })
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn parse_dotted(expr: &str, body: &str) -> Result<Vec<PathStep>, ConfigError> {
    body.split('.')
        .map(|segment| {
            let segment = segment.trim();
            if segment.is_empty() {
                Err(invalid(expr, "empty segment"))
            } else if let Ok(index) = segment.parse::<usize>() {
                Ok(PathStep::Index(index))
            } else {
                Ok(PathStep::Key(segment.to_string()))
            }
        })
        .collect()
}

fn parse_brackets(expr: &str, body: &str) -> Result<Vec<PathStep>, ConfigError> {
    let mut steps = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .ok_or_else(|| invalid(expr, format!("expected '[' at {:?}", rest)))?;

        let (step, after) = match inner.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let body = &inner[1..];
                let end = body
                    .find(quote)
                    .ok_or_else(|| invalid(expr, "unterminated quoted key"))?;
                (PathStep::Key(body[..end].to_string()), &body[end + 1..])
            },
            Some(_) => {
                let end = inner
                    .find(']')
                    .ok_or_else(|| invalid(expr, "missing ']'"))?;
                let index = inner[..end]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid(expr, format!("bad index {:?}", &inner[..end])))?;
                (PathStep::Index(index), &inner[end..])
            },
            None => return Err(invalid(expr, "missing ']'")),
        };

        rest = after
            .strip_prefix(']')
            .ok_or_else(|| invalid(expr, "missing ']'"))?
            .trim_start();
        steps.push(step);
    }

    Ok(steps)
}

impl FromStr for FieldPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            match step {
                PathStep::Key(key) => write!(f, "['{}']", key)?,
                PathStep::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bracket_and_dotted_notation_agree() {
        let bracket: FieldPath = "['user']['id_str']".parse().unwrap();
        let dotted: FieldPath = "user.id_str".parse().unwrap();
        assert_eq!(bracket, dotted);
        assert_eq!(bracket, FieldPath::key("user").then_key("id_str"));
    }

    #[test]
    fn test_indices() {
        let path: FieldPath = "['coordinates']['coordinates'][1]".parse().unwrap();
        let record = json!({"coordinates": {"coordinates": [-73.99, 40.73]}});
        assert_eq!(path.resolve(&record), Some(&json!(40.73)));

        let dotted: FieldPath = "coordinates.coordinates.0".parse().unwrap();
        assert_eq!(dotted.resolve(&record), Some(&json!(-73.99)));
    }

    #[test]
    fn test_missing_segments_resolve_to_none() {
        let path = FieldPath::key("retweeted_status").then_key("id");
        assert_eq!(path.resolve(&json!({"id": 1})), None);
        // Stepping into a scalar is a miss, not an error
        assert_eq!(path.resolve(&json!({"retweeted_status": 5})), None);
        // Explicit nulls resolve to null
        assert_eq!(path.resolve(&json!({"retweeted_status": {"id": null}})), Some(&Value::Null));
    }

    #[test]
    fn test_double_quoted_keys_with_brackets() {
        let path: FieldPath = r#"["odd]key"]"#.parse().unwrap();
        assert_eq!(path.steps(), &[PathStep::Key("odd]key".to_string())]);
    }

    #[test]
    fn test_rejects_malformed_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("['user'").is_err());
        assert!(FieldPath::parse("['user']x").is_err());
        assert!(FieldPath::parse("[abc]").is_err());
        assert!(FieldPath::parse("user..id").is_err());
    }

    #[test]
    fn test_display_uses_bracket_notation() {
        let path = FieldPath::key("place").then_key("full_name").then_index(0);
        assert_eq!(path.to_string(), "['place']['full_name'][0]");
        assert_eq!(FieldPath::parse(&path.to_string()).unwrap(), path);
    }
}
