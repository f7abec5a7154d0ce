//! Bloom-filter behaviour: no false negatives, useful negatives, and the
//! removing-range disablement.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::kv::{
        Apply, KeyValue, LexicographicOrder, Put, RangeEntry, SegmentEntry, Time,
    };
    use crate::segment::footer::Footer;
    use crate::segment::{Segment, SegmentConfig, SegmentWriter};

    fn put(key: &[u8], value: &[u8], time: u64) -> SegmentEntry {
        SegmentEntry::Fixed(KeyValue::Put(Put {
            key: key.to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: None,
        }))
    }

    fn write_and_open(entries: Vec<SegmentEntry>) -> (TempDir, Segment, Vec<u8>) {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::new(
            tmp.path(),
            SegmentConfig::default(),
            Arc::new(LexicographicOrder),
        );
        let closed = writer.write_all(entries).unwrap();
        assert_eq!(closed.len(), 1);
        let file = std::fs::read(&closed[0].path).unwrap();
        let segment = Segment::open(&closed[0].path, Arc::new(LexicographicOrder)).unwrap();
        (tmp, segment, file)
    }

    /// Every inserted key is a "maybe" — the no-false-negatives
    /// guarantee.
    #[test]
    fn no_false_negatives() {
        let entries: Vec<_> = (0u64..500)
            .map(|i| put(format!("present-{i:04}").as_bytes(), b"v", i))
            .collect();
        let (_tmp, segment, file) = write_and_open(entries);

        let (footer, _) = Footer::read(&file).unwrap();
        assert!(footer.bloom.is_some());

        for i in 0u64..500 {
            assert!(
                segment
                    .may_contain(format!("present-{i:04}").as_bytes())
                    .unwrap()
            );
        }
    }

    /// At a 1% target rate, a batch of absent keys produces definite
    /// negatives.
    #[test]
    fn absent_keys_are_mostly_negative() {
        let entries: Vec<_> = (0u64..500)
            .map(|i| put(format!("present-{i:04}").as_bytes(), b"v", i))
            .collect();
        let (_tmp, segment, _) = write_and_open(entries);

        let negatives = (0u64..200)
            .filter(|i| {
                !segment
                    .may_contain(format!("absent-{i:04}").as_bytes())
                    .unwrap()
            })
            .count();
        assert!(
            negatives > 150,
            "expected mostly definite negatives, got {negatives}/200"
        );
    }

    /// A removing range suppresses the filter entirely.
    #[test]
    fn removing_range_disables_bloom() {
        let entries = vec![
            put(b"a", b"1", 1),
            SegmentEntry::Range(RangeEntry {
                from_key: b"b".to_vec(),
                to_key: b"c".to_vec(),
                applies: vec![Apply::Remove {
                    time: Time::from_counter(2),
                    deadline: None,
                }],
            }),
        ];
        let (_tmp, segment, file) = write_and_open(entries);

        let (footer, _) = Footer::read(&file).unwrap();
        assert!(footer.bloom.is_none());
        assert!(footer.has_remove_range);
        assert!(segment.may_contain(b"anything").unwrap());
    }

    /// A non-removing range keeps the filter on disk but takes it out of
    /// the read path, since covered keys were never inserted.
    #[test]
    fn update_range_bypasses_bloom_on_read() {
        let entries = vec![
            put(b"a", b"1", 1),
            SegmentEntry::Range(RangeEntry {
                from_key: b"m".to_vec(),
                to_key: b"p".to_vec(),
                applies: vec![Apply::Update {
                    value: Some(b"v".to_vec()),
                    time: Time::from_counter(2),
                    deadline: None,
                }],
            }),
        ];
        let (_tmp, segment, file) = write_and_open(entries);

        let (footer, _) = Footer::read(&file).unwrap();
        assert!(footer.bloom.is_some());
        assert!(!footer.has_remove_range);
        // The covered key is reachable even though it is not in the
        // filter.
        assert!(segment.may_contain(b"n").unwrap());
        assert!(segment.get(b"n").unwrap().is_some());
    }
}
