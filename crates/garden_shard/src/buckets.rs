//! Due-time multimap backing the scheduler queue.

use crate::types::Millis;
use std::collections::BTreeMap;

/// Maps a due time to the items waiting on it.
///
/// Keys stay sorted, so the earliest deadline is always `first_key()`.
/// Empty buckets are dropped as soon as their last item goes away.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBuckets<T> {
    inner: BTreeMap<Millis, Vec<T>>,
}

impl<T> Default for TimeBuckets<T> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<T> TimeBuckets<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: Millis) -> Option<&[T]> {
        self.inner.get(&key).map(Vec::as_slice)
    }

    pub fn push(&mut self, key: Millis, item: T) {
        self.inner.entry(key).or_default().push(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, key: Millis, items: I) {
        let bucket = self.inner.entry(key).or_default();
        bucket.extend(items);
        if bucket.is_empty() {
            self.inner.remove(&key);
        }
    }

    /// Removes the whole bucket at `key`.
    pub fn remove_key(&mut self, key: Millis) -> Option<Vec<T>> {
        self.inner.remove(&key)
    }

    /// Sorted due times.
    pub fn keys(&self) -> Vec<Millis> {
        self.inner.keys().copied().collect()
    }

    pub fn first_key(&self) -> Option<Millis> {
        self.inner.keys().next().copied()
    }

    /// Detaches every bucket whose key is `<= now`, earliest first.
    pub fn take_due(&mut self, now: Millis) -> Vec<(Millis, Vec<T>)> {
        let later = match now.checked_add(1) {
            Some(split) => self.inner.split_off(&split),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.inner, later).into_iter().collect()
    }

    /// Number of distinct due times.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn item_count(&self) -> usize {
        self.inner.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<T: PartialEq> TimeBuckets<T> {
    /// Removes the first occurrence of `item` under `key`.
    pub fn remove(&mut self, key: Millis, item: &T) -> bool {
        let Some(bucket) = self.inner.get_mut(&key) else {
            return false;
        };
        let Some(index) = bucket.iter().position(|x| x == item) else {
            return false;
        };
        bucket.remove(index);
        if bucket.is_empty() {
            self.inner.remove(&key);
        }
        true
    }
}
