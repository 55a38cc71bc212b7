//! Raw tweet -> [`Row`] conversion
//!
//! Every configured column is resolved through its [`FieldPath`], text is
//! entity-unescaped, and the two special columns are post-processed:
//! `created_time` is reformatted to `YYYY-MM-DD HH:MM:SS` and `source` loses
//! its anchor markup. Coordinates are handled separately and optionally fed
//! to a [`Geolocator`].

use chrono::DateTime;
use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity, unescape_with};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use std::sync::Arc;
use tweetsql_common::{Cell, Row};

use crate::error::MapError;
use crate::path::FieldPath;
use crate::schema::{
    Schema, Transform, COORDINATES_ADDRESS_COLUMN, COORDINATES_COLUMN, COORDINATES_STATE_COLUMN,
};

/// Timestamp layout used by the Twitter API, e.g. `Mon Jan 25 05:02:27 +0000 2010`.
pub const TWITTER_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
/// Layout written to storage.
pub const STORAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reverse geocoding hook: `(latitude, longitude) -> (state, address)`.
pub trait Geolocator: Send + Sync {
    fn locate(&self, latitude: f64, longitude: f64) -> (Option<String>, Option<String>);
}

impl<F> Geolocator for F
where
    F: Fn(f64, f64) -> (Option<String>, Option<String>) + Send + Sync,
{
    fn locate(&self, latitude: f64, longitude: f64) -> (Option<String>, Option<String>) {
        self(latitude, longitude)
    }
}

/// Reformat a Twitter timestamp into the storage layout (UTC).
pub fn twitter_time_to_storage(raw: &str) -> Result<String, MapError> {
    DateTime::parse_from_str(raw.trim(), TWITTER_TIME_FORMAT)
        .map(|ts| ts.naive_utc().format(STORAGE_TIME_FORMAT).to_string())
        .map_err(|e| MapError::Timestamp {
            raw: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Decode HTML/XML character references one at a time.
///
/// Bare `&` and unknown references stay literal; they never prevent the
/// other references in the same text from being decoded.
pub fn unescape_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        // `&name;`, `&#NN;` or `&#xHH;` with nothing in between that could
        // start another reference
        let decoded = tail[1..]
            .find(|c: char| c == ';' || c == '&' || c.is_whitespace())
            .filter(|&end| tail.as_bytes()[end + 1] == b';')
            .and_then(|end| {
                let reference = &tail[..end + 2];
                decode_reference(reference).map(|value| (value, reference.len()))
            });

        match decoded {
            Some((value, len)) => {
                out.push_str(&value);
                rest = &tail[len..];
            },
            None => {
                out.push('&');
                rest = &tail[1..];
            },
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(reference: &str) -> Option<String> {
    unescape_with(reference, |name| {
        resolve_predefined_entity(name).or_else(|| resolve_html5_entity(name))
    })
    .ok()
    .map(|decoded| decoded.into_owned())
}

/// Keep only the text of the single anchor element in a client `source` field.
///
/// `Ok(None)` means the element is well formed but empty.
pub fn strip_source_markup(raw: &str) -> Result<Option<String>, MapError> {
    let fail = |reason: String| MapError::SourceMarkup {
        raw: raw.to_string(),
        reason,
    };

    // Entities were already decoded; re-escape bare ampersands so URLs in
    // attributes parse.
    let escaped = raw.replace('&', "&amp;");
    let mut reader = Reader::from_str(&escaped);

    let mut depth = 0usize;
    let mut saw_root = false;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 && saw_root {
                    return Err(fail("more than one element".to_string()));
                }
                depth += 1;
                saw_root = true;
            },
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    if saw_root {
                        return Err(fail("more than one element".to_string()));
                    }
                    saw_root = true;
                }
            },
            Ok(Event::Text(t)) => {
                let chunk = t.unescape().map_err(|e| fail(e.to_string()))?;
                if depth == 0 {
                    if !chunk.trim().is_empty() {
                        return Err(fail("text outside of an element".to_string()));
                    }
                } else if depth == 1 {
                    text.push_str(&chunk);
                }
            },
            Ok(Event::CData(c)) if depth == 1 => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(fail(e.to_string())),
        }
    }

    if !saw_root {
        return Err(fail("no element found".to_string()));
    }
    if depth != 0 {
        return Err(fail("unclosed element".to_string()));
    }
    Ok(Some(text).filter(|t| !t.is_empty()))
}

fn json_to_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Cell::Int(i)
            } else if let Some(u) = n.as_u64() {
                Cell::Text(u.to_string())
            } else {
                n.as_f64().map_or(Cell::Null, Cell::Float)
            }
        },
        Value::String(s) => Cell::Text(unescape_entities(s)),
        other => Cell::Text(other.to_string()),
    }
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Positions of the coordinate-derived columns, when the schema has them.
#[derive(Debug, Clone, Copy, Default)]
struct GeoSlots {
    coordinates: Option<usize>,
    address: Option<usize>,
    state: Option<usize>,
}

/// Turns raw API records into rows for one [`Schema`].
#[derive(Clone)]
pub struct FieldMapper {
    schema: Arc<Schema>,
    geolocator: Option<Arc<dyn Geolocator>>,
    geo: GeoSlots,
}

impl std::fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMapper")
            .field("columns", &self.schema.width())
            .field("geolocator", &self.geolocator.is_some())
            .finish()
    }
}

impl FieldMapper {
    pub fn new(schema: Arc<Schema>) -> Self {
        let geo = GeoSlots {
            coordinates: schema.position(COORDINATES_COLUMN),
            address: schema.position(COORDINATES_ADDRESS_COLUMN),
            state: schema.position(COORDINATES_STATE_COLUMN),
        };
        Self {
            schema,
            geolocator: None,
            geo,
        }
    }

    pub fn with_geolocator(mut self, geolocator: Arc<dyn Geolocator>) -> Self {
        self.geolocator = Some(geolocator);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Map one record to exactly one row, or reject it.
    pub fn map(&self, record: &Value) -> Result<Row, MapError> {
        let mut cells = Vec::with_capacity(self.schema.width());

        for column in self.schema.columns() {
            let cell = column
                .path
                .as_ref()
                .and_then(|path| path.resolve(record))
                .map_or(Cell::Null, json_to_cell);

            let cell = match (column.transform, cell) {
                (Transform::ParseTimestamp, Cell::Text(raw)) => {
                    Cell::Text(twitter_time_to_storage(&raw)?)
                },
                (Transform::StripMarkup, Cell::Text(raw)) => strip_source_markup(&raw)?.into(),
                (_, cell) => cell,
            };
            cells.push(cell);
        }

        if cells.iter().all(Cell::is_null) {
            return Err(MapError::AllNull {
                id: record_id(record),
            });
        }

        self.fill_coordinates(record, &mut cells)?;
        Ok(Row::new(cells))
    }

    fn fill_coordinates(&self, record: &Value, cells: &mut [Cell]) -> Result<(), MapError> {
        let Some(point) = record.get(COORDINATES_COLUMN).filter(|c| !c.is_null()) else {
            return Ok(());
        };

        let pair = FieldPath::key(COORDINATES_COLUMN)
            .resolve(point)
            .and_then(Value::as_array)
            .filter(|pair| pair.len() == 2)
            .and_then(|pair| Some((coordinate(&pair[0])?, coordinate(&pair[1])?)));
        let Some((longitude, latitude)) = pair else {
            return Err(MapError::Coordinates {
                raw: point.to_string(),
                reason: "expected a [longitude, latitude] pair".to_string(),
            });
        };

        let (state, address) = match &self.geolocator {
            Some(geolocator) => {
                let (state, address) = geolocator.locate(latitude, longitude);
                let address = address.filter(|a| !a.is_empty()).unwrap_or_else(|| {
                    format!("{{\"lon\": {}, \"lat\": {}}}", longitude, latitude)
                });
                (state.filter(|s| !s.is_empty()), Some(address))
            },
            None => (None, None),
        };

        if let Some(i) = self.geo.coordinates {
            cells[i] = Cell::Text(format!("[{}, {}]", longitude, latitude));
        }
        if let Some(i) = self.geo.state {
            cells[i] = state.into();
        }
        if let Some(i) = self.geo.address {
            cells[i] = address.into();
        }
        Ok(())
    }
}

fn record_id(record: &Value) -> String {
    record
        .get("id_str")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| record.get("id").map(Value::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> FieldMapper {
        FieldMapper::new(Arc::new(Schema::tweets().unwrap()))
    }

    fn cell<'a>(mapper: &FieldMapper, row: &'a Row, column: &str) -> &'a Cell {
        row.get(mapper.schema().position(column).unwrap()).unwrap()
    }

    fn tweet() -> Value {
        json!({
            "id": 504710715954188288u64,
            "id_str": "504710715954188288",
            "text": "Fish &amp; chips &lt;3",
            "created_at": "Wed Aug 27 13:08:45 +0000 2014",
            "source": "<a href=\"http://twitter.com/download/iphone\" rel=\"nofollow\">Twitter for iPhone</a>",
            "in_reply_to_status_id_str": null,
            "lang": "en",
            "user": {
                "id_str": "474257339",
                "location": "Philadelphia",
                "friends_count": 12,
                "followers_count": 40,
                "time_zone": "Eastern Time (US & Canada)"
            },
            "place": {"full_name": "Philadelphia, PA"},
            "coordinates": null
        })
    }

    #[test]
    fn test_maps_default_columns() {
        let mapper = mapper();
        let row = mapper.map(&tweet()).unwrap();

        assert_eq!(row.len(), 17);
        assert_eq!(cell(&mapper, &row, "message_id"), &Cell::from("504710715954188288"));
        assert_eq!(cell(&mapper, &row, "user_id"), &Cell::from("474257339"));
        assert_eq!(cell(&mapper, &row, "message"), &Cell::from("Fish & chips <3"));
        assert_eq!(cell(&mapper, &row, "created_time"), &Cell::from("2014-08-27 13:08:45"));
        assert_eq!(cell(&mapper, &row, "source"), &Cell::from("Twitter for iPhone"));
        assert_eq!(cell(&mapper, &row, "friend_count"), &Cell::Int(12));
        assert_eq!(cell(&mapper, &row, "tweet_location"), &Cell::from("Philadelphia, PA"));
        assert_eq!(cell(&mapper, &row, "in_reply_to_message_id"), &Cell::Null);
        assert_eq!(cell(&mapper, &row, "retweet_message_id"), &Cell::Null);
        assert_eq!(cell(&mapper, &row, "coordinates"), &Cell::Null);
    }

    #[test]
    fn test_source_markup_is_stripped() {
        assert_eq!(
            strip_source_markup(r#"<a href="https://mobile.twitter.com" rel="nofollow">Twitter Web App</a>"#)
                .unwrap(),
            Some("Twitter Web App".to_string())
        );
        assert_eq!(
            strip_source_markup(r#"<a href="http://x.com/?a=1&b=2">Tweet & Share</a>"#).unwrap(),
            Some("Tweet & Share".to_string())
        );
        assert_eq!(strip_source_markup("<a href=\"x\"></a>").unwrap(), None);
    }

    #[test]
    fn test_bad_source_markup_rejects_record() {
        for raw in ["web", "<a href=\"x\">unclosed", "<a>one</a><a>two</a>"] {
            assert!(
                matches!(strip_source_markup(raw), Err(MapError::SourceMarkup { .. })),
                "{:?} should fail",
                raw
            );
        }

        let mut record = tweet();
        record["source"] = json!("web");
        assert!(matches!(mapper().map(&record), Err(MapError::SourceMarkup { .. })));
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(
            twitter_time_to_storage("Mon Jan 25 05:02:27 +0000 2010").unwrap(),
            "2010-01-25 05:02:27"
        );
        assert!(matches!(
            twitter_time_to_storage("2010-01-25"),
            Err(MapError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_all_null_record_is_rejected() {
        let err = mapper().map(&json!({"delete": {"status": {"id": 1}}})).unwrap_err();
        assert!(matches!(err, MapError::AllNull { .. }));
    }

    #[test]
    fn test_coordinates_without_geolocator() {
        let mapper = mapper();
        let mut record = tweet();
        record["coordinates"] = json!({"type": "Point", "coordinates": [-75.16, 39.95]});

        let row = mapper.map(&record).unwrap();
        assert_eq!(cell(&mapper, &row, "coordinates"), &Cell::from("[-75.16, 39.95]"));
        assert_eq!(cell(&mapper, &row, "coordinates_state"), &Cell::Null);
        assert_eq!(cell(&mapper, &row, "coordinates_address"), &Cell::Null);
    }

    #[test]
    fn test_coordinates_with_geolocator() {
        let mapper = mapper().with_geolocator(Arc::new(|lat: f64, lon: f64| {
            assert_eq!((lat, lon), (39.95, -75.16));
            (Some("PA".to_string()), Some("Philadelphia, PA".to_string()))
        }));
        let mut record = tweet();
        record["coordinates"] = json!({"type": "Point", "coordinates": [-75.16, 39.95]});

        let row = mapper.map(&record).unwrap();
        assert_eq!(cell(&mapper, &row, "coordinates_state"), &Cell::from("PA"));
        assert_eq!(cell(&mapper, &row, "coordinates_address"), &Cell::from("Philadelphia, PA"));
    }

    #[test]
    fn test_address_falls_back_to_raw_pair() {
        let mapper = mapper().with_geolocator(Arc::new(|_: f64, _: f64| (None, None)));
        let mut record = tweet();
        record["coordinates"] = json!({"type": "Point", "coordinates": ["2.35", "48.85"]});

        let row = mapper.map(&record).unwrap();
        assert_eq!(cell(&mapper, &row, "coordinates_state"), &Cell::Null);
        assert_eq!(
            cell(&mapper, &row, "coordinates_address"),
            &Cell::from(r#"{"lon": 2.35, "lat": 48.85}"#)
        );
    }

    #[test]
    fn test_malformed_coordinates() {
        let mut record = tweet();
        record["coordinates"] = json!({"type": "Point", "coordinates": [1.0]});
        assert!(matches!(mapper().map(&record), Err(MapError::Coordinates { .. })));
    }

    #[test]
    fn test_unescape_keeps_unknown_entities() {
        assert_eq!(unescape_entities("a &amp; b"), "a & b");
        assert_eq!(unescape_entities("Tom & Jerry"), "Tom & Jerry");
        assert_eq!(unescape_entities("&#233;t&#233;"), "été");
    }

    #[test]
    fn test_unescape_mixed_references() {
        assert_eq!(unescape_entities("Fish &amp; chips & more"), "Fish & chips & more");
        assert_eq!(unescape_entities("caf&eacute; &lt;3"), "café <3");
        assert_eq!(unescape_entities("wait&hellip; &amp; see"), "wait\u{2026} & see");
        assert_eq!(unescape_entities("&bogus; &gt; &"), "&bogus; > &");
        assert_eq!(unescape_entities("a&&amp;b;"), "a&&b;");
        assert_eq!(unescape_entities("x&nbsp;y"), "x\u{a0}y");
    }
}
