//! Fixed-capacity LRU arena used as one tier of a bucket.
//!
//! Entries live in a preallocated slab indexed 1-based; index 0 is the
//! sentinel of an intrusive doubly-linked list kept in a parallel
//! `[prev, next]` table. `links[0][NEXT]` is the MRU end and
//! `links[0][PREV]` the LRU end, so both ends share the splice code.
//! No per-entry allocation happens after construction.

use std::collections::HashMap;

use crate::byteview::ByteView;
use crate::store::EvictionCallback;

/// Link-table direction: predecessor side.
pub(crate) const PREV: usize = 0;
/// Link-table direction: successor side.
pub(crate) const NEXT: usize = 1;

/// One arena slot. `deadline` of 0 marks a tombstone, -1 never expires,
/// positive values are expiry instants in nanoseconds.
#[derive(Clone, Default)]
pub(crate) struct Entry {
    pub key: String,
    pub value: ByteView,
    pub deadline: i64,
}

pub(crate) struct Bucket {
    /// `[prev, next]` per slot, slot 0 is the sentinel
    links: Vec<[u16; 2]>,
    /// Preallocated entry slab
    entries: Vec<Entry>,
    /// Key to 1-based slot index; absent means "no such key"
    key_to_index: HashMap<String, u16>,
    /// Number of slots handed out so far
    size: u16,
    capacity: u16,
}

impl Bucket {
    pub fn new(capacity: u16) -> Self {
        let cap = capacity.max(1);
        let mut entries = Vec::new();
        entries.resize_with(cap as usize, Entry::default);
        Self {
            links: vec![[0, 0]; cap as usize + 1],
            entries,
            key_to_index: HashMap::with_capacity(cap as usize),
            size: 0,
            capacity: cap,
        }
    }

    /// Inserts or overwrites an entry and splices it to the MRU end.
    ///
    /// Returns true when a new slot was taken (insert), false for an
    /// in-place overwrite. A full bucket reuses the LRU slot, firing
    /// `on_evicted` if the victim was still live.
    pub fn put(
        &mut self,
        key: &str,
        value: ByteView,
        deadline: i64,
        on_evicted: Option<&EvictionCallback>,
    ) -> bool {
        if let Some(&idx) = self.key_to_index.get(key) {
            let entry = &mut self.entries[idx as usize - 1];
            entry.value = value;
            entry.deadline = deadline;
            self.adjust(idx, PREV, NEXT);
            return false;
        }

        if self.size == self.capacity {
            let tail_idx = self.links[0][PREV];
            let tail = &mut self.entries[tail_idx as usize - 1];
            if tail.deadline != 0 {
                if let Some(cb) = on_evicted {
                    cb(&tail.key, &tail.value);
                }
            }

            self.key_to_index.remove(&tail.key);
            tail.key = key.to_string();
            tail.value = value;
            tail.deadline = deadline;
            self.key_to_index.insert(key.to_string(), tail_idx);
            self.adjust(tail_idx, PREV, NEXT);
            return true;
        }

        self.size += 1;
        let idx = self.size;
        if self.key_to_index.is_empty() {
            self.links[0][PREV] = idx;
        } else {
            let head = self.links[0][NEXT];
            self.links[head as usize][PREV] = idx;
        }

        let entry = &mut self.entries[idx as usize - 1];
        entry.key = key.to_string();
        entry.value = value;
        entry.deadline = deadline;
        self.links[idx as usize] = [0, self.links[0][NEXT]];
        self.key_to_index.insert(key.to_string(), idx);
        self.links[0][NEXT] = idx;
        true
    }

    /// Looks up a key, splicing it to the MRU end. Does not check the
    /// deadline; tombstones are returned as-is for the caller to skip.
    pub fn get(&mut self, key: &str) -> Option<(ByteView, i64)> {
        let &idx = self.key_to_index.get(key)?;
        self.adjust(idx, PREV, NEXT);
        let entry = &self.entries[idx as usize - 1];
        Some((entry.value.clone(), entry.deadline))
    }

    /// Tombstones a live entry, splicing its slot to the LRU end for
    /// early reuse. Returns the value and the deadline it carried.
    pub fn del(&mut self, key: &str) -> Option<(ByteView, i64)> {
        let &idx = self.key_to_index.get(key)?;
        let entry = &mut self.entries[idx as usize - 1];
        if entry.deadline == 0 {
            return None;
        }
        let deadline = entry.deadline;
        entry.deadline = 0;
        let value = entry.value.clone();
        self.adjust(idx, NEXT, PREV);
        Some((value, deadline))
    }

    /// Visits live entries from MRU to LRU until `walker` returns false.
    pub fn walk<F>(&self, mut walker: F)
    where
        F: FnMut(&str, &ByteView, i64) -> bool,
    {
        let mut idx = self.links[0][NEXT];
        while idx != 0 {
            let entry = &self.entries[idx as usize - 1];
            if entry.deadline != 0 && !walker(&entry.key, &entry.value, entry.deadline) {
                return;
            }
            idx = self.links[idx as usize][NEXT];
        }
    }

    /// Moves a slot to one end of the list. `(PREV, NEXT)` targets the
    /// MRU end, `(NEXT, PREV)` the LRU end; a slot already there is left
    /// alone.
    fn adjust(&mut self, idx: u16, from: usize, to: usize) {
        let i = idx as usize;
        if self.links[i][from] == 0 {
            return;
        }

        let before = self.links[i][from];
        let after = self.links[i][to];
        self.links[after as usize][from] = before;
        self.links[before as usize][to] = after;

        let end = self.links[0][to];
        self.links[i][from] = 0;
        self.links[i][to] = end;
        self.links[end as usize][from] = idx;
        self.links[0][to] = idx;
    }
}

#[cfg(test)]
impl Bucket {
    /// Asserts the structural invariants of the arena and its list:
    /// the forward chain visits every allocated slot exactly once,
    /// `prev`/`next` are mutual inverses, the key index points at slots
    /// holding its keys, and live count equals allocated minus
    /// tombstoned slots.
    pub(crate) fn assert_list_integrity(&self) {
        let mut seen = vec![false; self.capacity as usize + 1];
        let mut visited = 0usize;
        let mut idx = self.links[0][NEXT];
        while idx != 0 {
            assert!(!seen[idx as usize], "slot {idx} visited twice");
            seen[idx as usize] = true;
            visited += 1;
            assert!(visited <= self.size as usize, "list longer than arena");

            let next = self.links[idx as usize][NEXT];
            assert_eq!(
                self.links[next as usize][PREV],
                idx,
                "prev/next are not mutual inverses at slot {idx}"
            );
            idx = next;
        }
        assert_eq!(visited, self.size as usize, "list skips allocated slots");

        if self.size > 0 {
            assert_eq!(self.links[self.links[0][PREV] as usize][NEXT], 0);
        }

        for (key, &slot) in &self.key_to_index {
            assert_ne!(slot, 0);
            assert_eq!(&self.entries[slot as usize - 1].key, key);
        }

        let tombstones = (1..=self.size)
            .filter(|&i| self.entries[i as usize - 1].deadline == 0)
            .count();
        let mut live = 0usize;
        self.walk(|_, _, _| {
            live += 1;
            true
        });
        assert_eq!(live, self.size as usize - tombstones);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_keys(bucket: &Bucket) -> Vec<String> {
        let mut keys = Vec::new();
        bucket.walk(|k, _, _| {
            keys.push(k.to_string());
            true
        });
        keys
    }

    #[test]
    fn test_put_and_get() {
        let mut bucket = Bucket::new(4);

        assert!(bucket.put("a", ByteView::from("1"), -1, None));
        assert!(!bucket.put("a", ByteView::from("2"), -1, None));

        let (value, deadline) = bucket.get("a").unwrap();
        assert_eq!(value.as_slice(), b"2");
        assert_eq!(deadline, -1);
        assert!(bucket.get("missing").is_none());
    }

    #[test]
    fn test_mru_order() {
        let mut bucket = Bucket::new(4);
        bucket.put("a", ByteView::from("1"), -1, None);
        bucket.put("b", ByteView::from("2"), -1, None);
        bucket.put("c", ByteView::from("3"), -1, None);

        assert_eq!(live_keys(&bucket), vec!["c", "b", "a"]);

        // Touching "a" moves it to the MRU end.
        bucket.get("a");
        assert_eq!(live_keys(&bucket), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_full_bucket_evicts_tail() {
        let evicted = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let cb: EvictionCallback =
            std::sync::Arc::new(move |k: &str, _: &ByteView| sink.lock().unwrap().push(k.to_string()));

        let mut bucket = Bucket::new(2);
        bucket.put("a", ByteView::from("1"), -1, Some(&cb));
        bucket.put("b", ByteView::from("2"), -1, Some(&cb));
        bucket.put("c", ByteView::from("3"), -1, Some(&cb));

        assert_eq!(*evicted.lock().unwrap(), vec!["a"]);
        assert!(bucket.get("a").is_none());
        assert_eq!(live_keys(&bucket), vec!["c", "b"]);
    }

    #[test]
    fn test_del_tombstones_and_moves_to_tail() {
        let mut bucket = Bucket::new(3);
        bucket.put("a", ByteView::from("1"), -1, None);
        bucket.put("b", ByteView::from("2"), -1, None);

        let (value, deadline) = bucket.del("a").unwrap();
        assert_eq!(value.as_slice(), b"1");
        assert_eq!(deadline, -1);

        // Second delete of the same key finds only the tombstone.
        assert!(bucket.del("a").is_none());
        assert_eq!(live_keys(&bucket), vec!["b"]);
    }

    #[test]
    fn test_tombstone_eviction_skips_callback() {
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sink = count.clone();
        let cb: EvictionCallback = std::sync::Arc::new(move |_: &str, _: &ByteView| {
            sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let mut bucket = Bucket::new(2);
        bucket.put("a", ByteView::from("1"), -1, Some(&cb));
        bucket.put("b", ByteView::from("2"), -1, Some(&cb));
        bucket.del("a");

        // "a" sits tombstoned at the tail; its slot is reused silently.
        bucket.put("c", ByteView::from("3"), -1, Some(&cb));
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(live_keys(&bucket), vec!["c", "b"]);
    }

    #[test]
    fn test_put_revives_tombstoned_slot() {
        let mut bucket = Bucket::new(2);
        bucket.put("a", ByteView::from("1"), -1, None);
        bucket.del("a");

        // The key index still maps "a" to its slot; put overwrites it.
        assert!(!bucket.put("a", ByteView::from("2"), -1, None));
        assert_eq!(bucket.get("a").unwrap().0.as_slice(), b"2");
    }

    #[test]
    fn test_walk_stops_when_asked() {
        let mut bucket = Bucket::new(4);
        bucket.put("a", ByteView::from("1"), -1, None);
        bucket.put("b", ByteView::from("2"), -1, None);
        bucket.put("c", ByteView::from("3"), -1, None);

        let mut seen = 0;
        bucket.walk(|_, _, _| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_single_slot_bucket() {
        let mut bucket = Bucket::new(1);
        bucket.put("a", ByteView::from("1"), -1, None);
        bucket.put("b", ByteView::from("2"), -1, None);

        assert!(bucket.get("a").is_none());
        assert_eq!(bucket.get("b").unwrap().0.as_slice(), b"2");
    }
}
