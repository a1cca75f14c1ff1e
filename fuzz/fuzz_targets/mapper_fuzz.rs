//! Fuzz test for the persisted-record mapper
//!
//! Feeds arbitrary identifier and URL strings through the read-path mapper to
//! find panics. Every input must map to either a feed or a conversion error.
//!
//! Run with: cargo +nightly fuzz run mapper_fuzz -- -max_total_time=60

#![no_main]

use feedstore_storage::mapper;
use feedstore_storage::FeedImageRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Well-formed JSON is decoded as a whole feed; anything else becomes
    // one record per line, "id<TAB>url".
    let records: Vec<FeedImageRecord> = match serde_json::from_str(input) {
        Ok(records) => records,
        Err(_) => input
            .lines()
            .map(|line| {
                let (id, url) = line.split_once('\t').unwrap_or((line, ""));
                FeedImageRecord {
                    id: id.to_string(),
                    description: None,
                    location: None,
                    url: url.to_string(),
                }
            })
            .collect(),
    };

    if let Ok(feed) = mapper::to_domain(&records) {
        assert_eq!(feed.len(), records.len(), "Mapping must not drop records");

        // Identifiers written back must map to the same identifiers.
        let persisted = mapper::to_persisted(&feed);
        let remapped = mapper::to_domain(&persisted).expect("persisted feed maps back");
        for (before, after) in feed.iter().zip(&remapped) {
            assert_eq!(before.id, after.id, "Identifiers must survive persisting");
        }
    }
});
