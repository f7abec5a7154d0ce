//! Merge rules between fixed resolved shapes: Put, Remove, Update, and
//! their TTL interactions.

#[cfg(test)]
mod tests {
    use crate::kv::{Deadline, KeyValue, LexicographicOrder, Put, Remove, Time, Update};
    use crate::merge::{Merger, NoFunctions};

    fn merger() -> Merger<'static> {
        Merger::new(&NoFunctions, &LexicographicOrder)
    }

    fn put(value: &[u8], time: u64) -> KeyValue {
        KeyValue::Put(Put {
            key: b"k".to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: None,
        })
    }

    fn put_expiring(value: &[u8], time: u64, deadline: u64) -> KeyValue {
        KeyValue::Put(Put {
            key: b"k".to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: Deadline::from_nanos(deadline),
        })
    }

    fn remove(time: u64) -> KeyValue {
        KeyValue::Remove(Remove {
            key: b"k".to_vec(),
            time: Time::from_counter(time),
            deadline: None,
        })
    }

    fn expire(time: u64, deadline: u64) -> KeyValue {
        KeyValue::Remove(Remove {
            key: b"k".to_vec(),
            time: Time::from_counter(time),
            deadline: Deadline::from_nanos(deadline),
        })
    }

    fn update(value: &[u8], time: u64) -> KeyValue {
        KeyValue::Update(Update {
            key: b"k".to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: None,
        })
    }

    fn update_expiring(value: &[u8], time: u64, deadline: u64) -> KeyValue {
        KeyValue::Update(Update {
            key: b"k".to_vec(),
            value: Some(value.to_vec()),
            time: Time::from_counter(time),
            deadline: Deadline::from_nanos(deadline),
        })
    }

    /// An older mutation never displaces a newer one.
    #[test]
    fn monotonicity_old_wins_on_lower_or_equal_time() {
        let m = merger();
        let newer = put(b"v2", 5);
        assert_eq!(m.merge(put(b"v1", 3), newer.clone()).unwrap(), newer);
        assert_eq!(m.merge(remove(5), newer.clone()).unwrap(), newer);
    }

    /// Merging an entry with itself is the identity.
    #[test]
    fn idempotent_at_equal_time() {
        let m = merger();
        for entry in [put(b"v", 2), remove(2), update(b"u", 2)] {
            assert_eq!(m.merge(entry.clone(), entry.clone()).unwrap(), entry);
        }
    }

    /// A newer Put replaces anything, including tombstones.
    #[test]
    fn put_wins_outright() {
        let m = merger();
        assert_eq!(m.merge(put(b"v2", 3), remove(1)).unwrap(), put(b"v2", 3));
        assert_eq!(m.merge(put(b"v2", 3), put(b"v1", 1)).unwrap(), put(b"v2", 3));
    }

    /// Put → Update → Remove resolves to the final tombstone.
    #[test]
    fn remove_absorbs_update_chain() {
        let m = merger();
        let step1 = m.merge(update(b"2", 2), put(b"1", 1)).unwrap();
        let resolved = m.merge(remove(3), step1).unwrap();
        assert_eq!(resolved, remove(3));
    }

    /// A permanent Remove absorbs every older shape.
    #[test]
    fn permanent_remove_is_absorbing() {
        let m = merger();
        for old in [
            put(b"v", 1),
            put_expiring(b"v", 1, 900),
            update(b"u", 1),
            remove(1),
            expire(1, 900),
        ] {
            assert_eq!(m.merge(remove(9), old).unwrap(), remove(9));
        }
    }

    /// An expiry on a live Put becomes the Put carrying the deadline.
    #[test]
    fn expire_lands_on_live_put() {
        let m = merger();
        let resolved = m.merge(expire(2, 700), put(b"v", 1)).unwrap();
        assert_eq!(resolved, put_expiring(b"v", 2, 700));
    }

    /// When both sides carry deadlines, the explicit newer expiry wins.
    #[test]
    fn newer_expiry_beats_existing_deadline() {
        let m = merger();
        let resolved = m.merge(expire(2, 700), put_expiring(b"v", 1, 300)).unwrap();
        assert_eq!(resolved, expire(2, 700));
    }

    /// Expiring an already-removed key leaves the tombstone in place.
    #[test]
    fn expire_does_not_revive_tombstone() {
        let m = merger();
        let resolved = m.merge(expire(2, 700), remove(1)).unwrap();
        assert_eq!(resolved, remove(2));
    }

    /// Remove vs Remove with two deadlines: the newer wins.
    #[test]
    fn expire_over_expire_takes_newer() {
        let m = merger();
        let resolved = m.merge(expire(2, 700), expire(1, 300)).unwrap();
        assert_eq!(resolved, expire(2, 700));
    }

    /// An Update without a deadline inherits the old Put's deadline.
    #[test]
    fn update_inherits_old_deadline() {
        let m = merger();
        let resolved = m.merge(update(b"v2", 2), put_expiring(b"v1", 1, 800)).unwrap();
        assert_eq!(resolved, put_expiring(b"v2", 2, 800));
    }

    /// An Update with its own deadline keeps it.
    #[test]
    fn update_keeps_own_deadline() {
        let m = merger();
        let resolved = m
            .merge(update_expiring(b"v2", 2, 400), put_expiring(b"v1", 1, 800))
            .unwrap();
        assert_eq!(resolved, put_expiring(b"v2", 2, 400));
    }

    /// Update over Update: newer value, inherited deadline.
    #[test]
    fn update_over_update() {
        let m = merger();
        let resolved = m
            .merge(update(b"v2", 2), update_expiring(b"v1", 1, 800))
            .unwrap();
        assert_eq!(resolved, update_expiring(b"v2", 2, 800));
    }

    /// An Update over an expiring Remove survives as the Update, adopting
    /// the pending expiry when it carries none of its own.
    #[test]
    fn update_over_expiring_remove() {
        let m = merger();
        let resolved = m.merge(update(b"v2", 2), expire(1, 800)).unwrap();
        assert_eq!(resolved, update_expiring(b"v2", 2, 800));
    }

    /// An Update over a permanent Remove cannot resurrect the key.
    #[test]
    fn update_over_permanent_remove_stays_removed() {
        let m = merger();
        let resolved = m.merge(update(b"v2", 2), remove(1)).unwrap();
        assert_eq!(resolved, remove(2));
    }
}
