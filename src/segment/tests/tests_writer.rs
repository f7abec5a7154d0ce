//! Segment-writer behaviour: size-bounded splitting, ordering
//! enforcement, and closed-segment metadata.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::kv::{
        Apply, Function, KeyValue, LexicographicOrder, Put, RangeEntry, SegmentEntry, Time,
    };
    use crate::segment::{MaxKey, Segment, SegmentConfig, SegmentError, SegmentWriter};

    fn put(key: &[u8], value: &[u8], time: u64) -> SegmentEntry {
        SegmentEntry::Fixed(KeyValue::Put(Put {
            key: key.to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: None,
        }))
    }

    /// A small `min_segment_size` splits the stream into several files,
    /// all entries remain reachable in their own segment, and coverage
    /// is contiguous.
    #[test]
    fn splits_into_bounded_segments() {
        let tmp = TempDir::new().unwrap();
        let config = SegmentConfig {
            min_segment_size: 2 * 1024,
            ..SegmentConfig::default()
        };
        let entries: Vec<_> = (0u64..600)
            .map(|i| put(format!("key-{i:05}").as_bytes(), &vec![b'v'; 32], i))
            .collect();
        let mut writer = SegmentWriter::new(tmp.path(), config, Arc::new(LexicographicOrder));
        let closed = writer.write_all(entries.clone()).unwrap();
        assert!(closed.len() > 3, "expected several segments, got {}", closed.len());

        // Coverage is contiguous and ascending.
        for window in closed.windows(2) {
            let previous_max = match &window[0].max_key {
                MaxKey::Fixed(key) => key.clone(),
                MaxKey::Range { to_exclusive, .. } => to_exclusive.clone(),
            };
            assert!(previous_max < window[1].min_key);
        }

        // Every entry is in the segment whose bounds contain its key.
        let segments: Vec<_> = closed
            .iter()
            .map(|c| Segment::open(&c.path, Arc::new(LexicographicOrder)).unwrap())
            .collect();
        let mut total = 0u64;
        for (closed, segment) in closed.iter().zip(&segments) {
            total += closed.key_value_count;
            assert_eq!(
                segment.key_value_count().unwrap(),
                closed.key_value_count
            );
        }
        assert_eq!(total, entries.len() as u64);

        for entry in &entries {
            let owner = closed
                .iter()
                .zip(&segments)
                .rev()
                .find(|(meta, _)| meta.min_key.as_slice() <= entry.key())
                .map(|(_, segment)| segment)
                .expect("an owning segment");
            assert_eq!(owner.get(entry.key()).unwrap().as_ref(), Some(entry));
        }
    }

    /// Keys out of order or duplicated fail the write.
    #[test]
    fn rejects_unsorted_and_duplicate_keys() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::new(
            tmp.path(),
            SegmentConfig::default(),
            Arc::new(LexicographicOrder),
        );
        let unsorted = vec![put(b"b", b"1", 1), put(b"a", b"2", 2)];
        assert!(matches!(
            writer.write_all(unsorted),
            Err(SegmentError::Corruption(_))
        ));

        let duplicated = vec![put(b"a", b"1", 1), put(b"a", b"2", 2)];
        assert!(matches!(
            writer.write_all(duplicated),
            Err(SegmentError::Corruption(_))
        ));
    }

    /// A trailing range entry widens the closed segment's max-key to the
    /// range's exclusive end.
    #[test]
    fn range_tail_extends_max_key() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::new(
            tmp.path(),
            SegmentConfig::default(),
            Arc::new(LexicographicOrder),
        );
        let entries = vec![
            put(b"a", b"1", 1),
            SegmentEntry::Range(RangeEntry {
                from_key: b"m".to_vec(),
                to_key: b"z".to_vec(),
                applies: vec![Apply::Update {
                    value: None,
                    time: Time::from_counter(2),
                    deadline: None,
                }],
            }),
        ];
        let closed = writer.write_all(entries).unwrap();
        assert_eq!(closed[0].min_key, b"a".to_vec());
        assert_eq!(
            closed[0].max_key,
            MaxKey::Range {
                from: b"m".to_vec(),
                to_exclusive: b"z".to_vec()
            }
        );
    }

    /// Function ids referenced anywhere in the segment surface as a
    /// min/max pair on the closed segment.
    #[test]
    fn function_id_bounds() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::new(
            tmp.path(),
            SegmentConfig::default(),
            Arc::new(LexicographicOrder),
        );
        let entries = vec![
            SegmentEntry::Fixed(KeyValue::Function(Function {
                key: b"a".to_vec(),
                function: b"m-func".to_vec(),
                time: Time::from_counter(1),
                deadline: None,
            })),
            SegmentEntry::Range(RangeEntry {
                from_key: b"b".to_vec(),
                to_key: b"c".to_vec(),
                applies: vec![
                    Apply::Function {
                        function: b"a-func".to_vec(),
                        time: Time::from_counter(2),
                        deadline: None,
                    },
                    Apply::Function {
                        function: b"z-func".to_vec(),
                        time: Time::from_counter(3),
                        deadline: None,
                    },
                ],
            }),
        ];
        let closed = writer.write_all(entries).unwrap();
        assert_eq!(closed[0].min_function_id.as_deref(), Some(b"a-func".as_slice()));
        assert_eq!(closed[0].max_function_id.as_deref(), Some(b"z-func".as_slice()));
    }

    /// Segment files are published atomically: no `.tmp` remnants.
    #[test]
    fn no_temp_files_remain() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::new(
            tmp.path(),
            SegmentConfig {
                min_segment_size: 512,
                ..SegmentConfig::default()
            },
            Arc::new(LexicographicOrder),
        );
        let entries: Vec<_> = (0u64..200)
            .map(|i| put(format!("key-{i:04}").as_bytes(), &vec![b'v'; 16], i))
            .collect();
        writer.write_all(entries).unwrap();

        for entry in std::fs::read_dir(tmp.path()).unwrap() {
            let name = entry.unwrap().file_name();
            let name = name.to_string_lossy();
            assert!(
                name.ends_with(".seg"),
                "unexpected file in segment dir: {name}"
            );
        }
    }
}
