//! Conversion between domain feed values and their persisted records.
//!
//! The write path is total: domain values are valid by construction. The read
//! path validates every row and is all-or-nothing, so a single corrupted row
//! fails the whole conversion instead of truncating the feed.

use feedstore_core::{CachedFeed, ConversionError, FeedImage, Timestamp};
use url::Url;
use uuid::Uuid;

use crate::records::{CacheRecord, FeedImageRecord};

/// Length of the hyphenated UUID form, the only accepted identifier encoding.
const HYPHENATED_UUID_LEN: usize = 36;

pub fn to_persisted(feed: &[FeedImage]) -> Vec<FeedImageRecord> {
    feed.iter()
        .map(|image| FeedImageRecord {
            id: image.id.hyphenated().to_string(),
            description: image.description.clone(),
            location: image.location.clone(),
            url: image.url.as_str().to_string(),
        })
        .collect()
}

pub fn to_domain(records: &[FeedImageRecord]) -> Result<Vec<FeedImage>, ConversionError> {
    records.iter().map(to_domain_image).collect()
}

/// Build the record persisted by an insert.
pub fn to_cache_record(feed: &[FeedImage], timestamp: Timestamp) -> CacheRecord {
    CacheRecord {
        timestamp,
        feed: to_persisted(feed),
    }
}

/// Map a stored cache record back to the value delivered by a retrieve.
pub fn to_cached_feed(record: &CacheRecord) -> Result<CachedFeed, ConversionError> {
    Ok(CachedFeed::new(to_domain(&record.feed)?, record.timestamp))
}

fn to_domain_image(record: &FeedImageRecord) -> Result<FeedImage, ConversionError> {
    Ok(FeedImage::new(
        parse_identifier(&record.id)?,
        record.description.clone(),
        record.location.clone(),
        parse_url(&record.url)?,
    ))
}

fn parse_identifier(value: &str) -> Result<Uuid, ConversionError> {
    let invalid = || ConversionError::InvalidIdentifier {
        value: value.to_string(),
    };
    // Uuid::try_parse also takes simple, braced and URN forms; only the
    // hyphenated form round-trips.
    if value.len() != HYPHENATED_UUID_LEN {
        return Err(invalid());
    }
    Uuid::try_parse(value).map_err(|_| invalid())
}

fn parse_url(value: &str) -> Result<Url, ConversionError> {
    Url::parse(value).map_err(|_| ConversionError::InvalidUrl {
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(id: &str, url: &str) -> FeedImageRecord {
        FeedImageRecord {
            id: id.to_string(),
            description: Some("a".to_string()),
            location: Some("loc".to_string()),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_to_domain_maps_valid_record() {
        let records = vec![record(
            "11111111-1111-1111-1111-111111111111",
            "http://example.com/a.png",
        )];

        let feed = to_domain(&records).expect("valid record should map");

        assert_eq!(feed.len(), 1);
        assert_eq!(
            feed[0].id,
            Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
        );
        assert_eq!(feed[0].description.as_deref(), Some("a"));
        assert_eq!(feed[0].location.as_deref(), Some("loc"));
        assert_eq!(feed[0].url.as_str(), "http://example.com/a.png");
    }

    #[test]
    fn test_to_domain_accepts_uppercase_identifier() {
        let records = vec![record(
            "ABCDEFAB-1111-4111-8111-111111111111",
            "http://example.com/a.png",
        )];
        assert!(to_domain(&records).is_ok());
    }

    #[test]
    fn test_to_domain_rejects_invalid_identifier() {
        let records = vec![record("not-a-uuid", "http://example.com/a.png")];
        assert_eq!(
            to_domain(&records),
            Err(ConversionError::InvalidIdentifier {
                value: "not-a-uuid".to_string()
            })
        );
    }

    #[test]
    fn test_to_domain_rejects_non_hyphenated_identifier() {
        let simple = "11111111111111111111111111111111";
        let braced = "{11111111-1111-1111-1111-111111111111}";
        for id in [simple, braced] {
            let records = vec![record(id, "http://example.com/a.png")];
            assert!(matches!(
                to_domain(&records),
                Err(ConversionError::InvalidIdentifier { .. })
            ));
        }
    }

    #[test]
    fn test_to_domain_rejects_relative_url() {
        let records = vec![record("11111111-1111-1111-1111-111111111111", "/a.png")];
        assert_eq!(
            to_domain(&records),
            Err(ConversionError::InvalidUrl {
                value: "/a.png".to_string()
            })
        );
    }

    #[test]
    fn test_to_domain_fails_whole_feed_on_one_bad_row() {
        let records = vec![
            record("11111111-1111-1111-1111-111111111111", "http://example.com/a.png"),
            record("22222222-2222-2222-2222-222222222222", ""),
            record("33333333-3333-3333-3333-333333333333", "http://example.com/c.png"),
        ];
        assert!(matches!(
            to_domain(&records),
            Err(ConversionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_to_domain_reports_first_failure() {
        let records = vec![
            record("11111111-1111-1111-1111-111111111111", "nope"),
            record("bad", "http://example.com/b.png"),
        ];
        assert!(matches!(
            to_domain(&records),
            Err(ConversionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_to_persisted_uses_hyphenated_lowercase_id() {
        let id = Uuid::parse_str("ABCDEFAB-1111-4111-8111-111111111111").unwrap();
        let image = FeedImage::new(id, None, None, Url::parse("https://example.com/x").unwrap());

        let records = to_persisted(&[image]);

        assert_eq!(records[0].id, "abcdefab-1111-4111-8111-111111111111");
        assert_eq!(records[0].url, "https://example.com/x");
        assert_eq!(records[0].description, None);
    }

    fn arb_feed_image() -> impl Strategy<Value = FeedImage> {
        (
            any::<[u8; 16]>(),
            proptest::option::of("[ -~]{0,24}"),
            proptest::option::of("[ -~]{0,24}"),
            "[a-z]{1,12}",
            "[a-z0-9]{0,12}",
        )
            .prop_map(|(bytes, description, location, host, path)| {
                let url = Url::parse(&format!("https://{host}.example.com/{path}"))
                    .expect("generated URL is absolute");
                FeedImage::new(Uuid::from_bytes(bytes), description, location, url)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Writing a feed and reading it back preserves every image in order.
        #[test]
        fn prop_persisted_feed_maps_back_in_order(
            feed in proptest::collection::vec(arb_feed_image(), 0..8)
        ) {
            let restored = to_domain(&to_persisted(&feed)).expect("domain values always map back");
            prop_assert_eq!(restored, feed);
        }

        /// Arbitrary identifier strings never panic the read path.
        #[test]
        fn prop_arbitrary_identifier_never_panics(id in ".*") {
            let records = vec![record(&id, "http://example.com/a.png")];
            let _ = to_domain(&records);
        }
    }
}
