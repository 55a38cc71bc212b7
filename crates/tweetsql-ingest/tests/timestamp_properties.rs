//! Property tests for the text transforms applied by the mapper

use chrono::{DateTime, FixedOffset};
use proptest::prelude::*;
use tweetsql_ingest::mapper::{
    strip_source_markup, twitter_time_to_storage, unescape_entities, STORAGE_TIME_FORMAT,
    TWITTER_TIME_FORMAT,
};

// 2006-03-21 (first tweet) through 2030
const FIRST_TWEET: i64 = 1_142_899_200;
const LAST_INSTANT: i64 = 1_924_991_999;

proptest! {
    #[test]
    fn prop_timestamp_converts_to_utc_instant(
        secs in FIRST_TWEET..LAST_INSTANT,
        offset_minutes in -720i32..=840,
    ) {
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
        let utc = DateTime::from_timestamp(secs, 0).unwrap();
        let raw = utc.with_timezone(&offset).format(TWITTER_TIME_FORMAT).to_string();

        let stored = twitter_time_to_storage(&raw).unwrap();
        prop_assert_eq!(stored, utc.format(STORAGE_TIME_FORMAT).to_string());
    }

    #[test]
    fn prop_garbage_timestamps_are_rejected(raw in "[a-z0-9 ]{0,24}") {
        prop_assert!(twitter_time_to_storage(&raw).is_err());
    }

    #[test]
    fn prop_text_without_entities_is_unchanged(text in "[^&]{0,64}") {
        prop_assert_eq!(unescape_entities(&text), text);
    }

    #[test]
    fn prop_source_anchor_yields_its_label(label in "[A-Za-z0-9.]{1,32}") {
        let raw = format!("<a href=\"http://example.com/?a=1&b=2\" rel=\"nofollow\">{}</a>", label);
        prop_assert_eq!(strip_source_markup(&raw).unwrap(), Some(label));
    }
}
