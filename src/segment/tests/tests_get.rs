//! Point-lookup coverage across index configurations.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::Rng;
    use rand::rngs::ThreadRng;
    use tempfile::TempDir;

    use crate::kv::{
        Apply, Deadline, KeyValue, LexicographicOrder, Put, RangeEntry, SegmentEntry, Time,
    };
    use crate::segment::{
        BinarySearchConfig, BloomConfig, HashIndexConfig, Segment, SegmentConfig, SegmentWriter,
        SortedIndexConfig,
    };

    fn put(key: &[u8], value: &[u8], time: u64) -> SegmentEntry {
        SegmentEntry::Fixed(KeyValue::Put(Put {
            key: key.to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: None,
        }))
    }

    fn write_and_open(config: SegmentConfig, entries: Vec<SegmentEntry>) -> (TempDir, Segment) {
        let tmp = TempDir::new().unwrap();
        let mut writer =
            SegmentWriter::new(tmp.path(), config, Arc::new(LexicographicOrder));
        let closed = writer.write_all(entries).unwrap();
        assert_eq!(closed.len(), 1);
        let segment = Segment::open(&closed[0].path, Arc::new(LexicographicOrder)).unwrap();
        (tmp, segment)
    }

    fn random_corpus(rng: &mut ThreadRng, count: usize) -> Vec<SegmentEntry> {
        let mut keys: Vec<Vec<u8>> = (0..count)
            .map(|_| {
                let len = rng.random_range(1..=24);
                (0..len).map(|_| rng.random::<u8>()).collect()
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .enumerate()
            .map(|(i, key)| {
                let value_len = i % 50;
                put(&key, &vec![b'v'; value_len], i as u64)
            })
            .collect()
    }

    /// Every present key is found and every probed absent key is not,
    /// under each index configuration.
    #[test]
    fn get_consistency_across_configs() {
        let configs = [
            ("default", SegmentConfig::default()),
            (
                "no-hash",
                SegmentConfig {
                    hash_index: HashIndexConfig {
                        enabled: false,
                        ..HashIndexConfig::default()
                    },
                    ..SegmentConfig::default()
                },
            ),
            (
                "no-binary-search",
                SegmentConfig {
                    binary_search: BinarySearchConfig {
                        enabled: false,
                        ..BinarySearchConfig::default()
                    },
                    ..SegmentConfig::default()
                },
            ),
            (
                "no-bloom",
                SegmentConfig {
                    bloom: BloomConfig {
                        enabled: false,
                        ..BloomConfig::default()
                    },
                    ..SegmentConfig::default()
                },
            ),
            (
                "copied-hash",
                SegmentConfig {
                    hash_index: HashIndexConfig {
                        copy_index: true,
                        ..HashIndexConfig::default()
                    },
                    sorted_index: SortedIndexConfig {
                        prefix_compression: false,
                        ..SortedIndexConfig::default()
                    },
                    ..SegmentConfig::default()
                },
            ),
            (
                "normalised-full-index",
                SegmentConfig {
                    sorted_index: SortedIndexConfig {
                        normalise_for_binary_search: true,
                        ..SortedIndexConfig::default()
                    },
                    binary_search: BinarySearchConfig {
                        full_index: true,
                        ..BinarySearchConfig::default()
                    },
                    ..SegmentConfig::default()
                },
            ),
        ];

        let mut rng = rand::rng();
        for (name, config) in configs {
            let entries = random_corpus(&mut rng, 300);
            let (_tmp, segment) = write_and_open(config, entries.clone());

            for entry in &entries {
                let found = segment.get(entry.key()).unwrap();
                assert_eq!(found.as_ref(), Some(entry), "config {name}");
            }

            for _ in 0..100 {
                let len = rng.random_range(25..=32);
                let absent: Vec<u8> = (0..len).map(|_| rng.random::<u8>()).collect();
                assert_eq!(segment.get(&absent).unwrap(), None, "config {name}");
            }
        }
    }

    /// Deadlines survive the round-trip and readers can evaluate expiry.
    #[test]
    fn get_preserves_deadline() {
        let entries = vec![SegmentEntry::Fixed(KeyValue::Put(Put {
            key: b"expiring".to_vec(),
            value: Some(b"v".to_vec()),
            time: Time::from_counter(1),
            deadline: Deadline::from_nanos(1_000),
        }))];
        let (_tmp, segment) = write_and_open(SegmentConfig::default(), entries);

        let entry = segment.get(b"expiring").unwrap().unwrap();
        let deadline = entry.nearest_deadline().unwrap();
        assert!(deadline.has_passed_at(2_000));
        assert!(!deadline.has_passed_at(500));
    }

    /// A key inside a range resolves to the range entry itself; keys
    /// outside resolve to nothing.
    #[test]
    fn get_inside_range_returns_range() {
        let range = SegmentEntry::Range(RangeEntry {
            from_key: b"m".to_vec(),
            to_key: b"p".to_vec(),
            applies: vec![Apply::Update {
                value: Some(b"ranged".to_vec()),
                time: Time::from_counter(5),
                deadline: None,
            }],
        });
        let entries = vec![put(b"a", b"1", 1), range.clone(), put(b"z", b"2", 2)];
        let (_tmp, segment) = write_and_open(SegmentConfig::default(), entries);

        assert_eq!(segment.get(b"m").unwrap(), Some(range.clone()));
        assert_eq!(segment.get(b"n").unwrap(), Some(range.clone()));
        assert_eq!(segment.get(b"o~~").unwrap(), Some(range));
        assert_eq!(segment.get(b"p").unwrap(), None);
        assert_eq!(segment.get(b"l").unwrap(), None);
        assert!(segment.get(b"a").unwrap().is_some());
    }
}
