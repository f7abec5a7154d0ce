//! Entity model invariants: pending-apply collapse, time/deadline
//! accessors, range containment.

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use crate::kv::{
        Apply, Deadline, KeyValue, LexicographicOrder, PendingApply, RangeEntry, SegmentEntry,
        Time, TimeOrder, nearest_deadline,
    };

    fn apply_update(value: &[u8], time: u64) -> Apply {
        Apply::Update {
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: None,
        }
    }

    /// An empty apply sequence builds nothing.
    #[test]
    fn empty_applies_build_nothing() {
        assert_eq!(PendingApply::from_applies(b"k".to_vec(), Vec::new()), None);
    }

    /// A single apply collapses to its direct shape, never a PendingApply.
    #[test]
    fn single_apply_collapses() {
        let built = PendingApply::from_applies(b"k".to_vec(), vec![apply_update(b"v", 1)]).unwrap();
        match built {
            KeyValue::Update(update) => {
                assert_eq!(update.key, b"k");
                assert_eq!(update.value.as_deref(), Some(b"v".as_slice()));
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    /// A multi-apply sequence stays pending, reporting the last apply's
    /// time and the nearest deadline.
    #[test]
    fn pending_apply_time_and_deadline() {
        let applies = vec![
            Apply::Remove {
                time: Time::from_counter(1),
                deadline: Deadline::from_nanos(500),
            },
            Apply::Function {
                function: b"inc".to_vec(),
                time: Time::from_counter(2),
                deadline: Deadline::from_nanos(300),
            },
        ];
        let built = PendingApply::from_applies(b"k".to_vec(), applies).unwrap();
        assert_eq!(built.time(), &Time::from_counter(2));
        assert_eq!(built.deadline(), Deadline::from_nanos(300));
        assert!(matches!(built, KeyValue::PendingApply(_)));
    }

    /// Counter-derived times compare numerically under the default order.
    #[test]
    fn counter_times_order_numerically() {
        let order = LexicographicOrder;
        assert_eq!(
            order.cmp_times(&Time::from_counter(2), &Time::from_counter(10)),
            Ordering::Less
        );
        assert_eq!(
            order.cmp_times(&Time::NONE, &Time::from_counter(0)),
            Ordering::Less
        );
    }

    /// Deadline zero is the "absent" sentinel.
    #[test]
    fn zero_deadline_is_absent() {
        assert_eq!(Deadline::from_nanos(0), None);
        assert!(Deadline::from_nanos(1).is_some());
        assert_eq!(
            nearest_deadline(Deadline::from_nanos(900), Deadline::from_nanos(400)),
            Deadline::from_nanos(400)
        );
    }

    /// Range containment is inclusive at from-key, exclusive at to-key.
    #[test]
    fn range_containment_bounds() {
        let range = RangeEntry {
            from_key: b"b".to_vec(),
            to_key: b"d".to_vec(),
            applies: vec![Apply::Remove {
                time: Time::from_counter(1),
                deadline: None,
            }],
        };
        let cmp = LexicographicOrder;
        assert!(range.contains(b"b", &cmp));
        assert!(range.contains(b"c", &cmp));
        assert!(!range.contains(b"d", &cmp));
        assert!(!range.contains(b"a", &cmp));
        assert!(range.has_remove());
    }

    /// SegmentEntry::covers distinguishes exact match from containment.
    #[test]
    fn segment_entry_covers() {
        let cmp = LexicographicOrder;
        let fixed = SegmentEntry::Fixed(KeyValue::Remove(crate::kv::Remove {
            key: b"x".to_vec(),
            time: Time::from_counter(1),
            deadline: None,
        }));
        assert!(fixed.covers(b"x", &cmp));
        assert!(!fixed.covers(b"y", &cmp));

        let range = SegmentEntry::Range(RangeEntry {
            from_key: b"m".to_vec(),
            to_key: b"p".to_vec(),
            applies: vec![apply_update(b"v", 3)],
        });
        assert!(range.covers(b"n", &cmp));
        assert!(!range.covers(b"p", &cmp));
        assert_eq!(range.key(), b"m");
    }
}
