//! `src/model/entry_store.rs`
//!
//! The raw, unfiltered entry list shared between the read job (writer) and
//! the consumer (reader). Every mutation happens under one short lock.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::model::entry::{InternEntry, Uid};

#[derive(Debug)]
pub struct EntryStore {
    entries: Mutex<Vec<Arc<InternEntry>>>,

    /// Never reset, not even by `clear`, so a UID is never handed out twice.
    next_uid: AtomicU32,

    /// Bumped on every mutation; lets the consumer spot stale snapshots.
    revision: AtomicU64,

    /// Bumped under the entries lock whenever earlier writers must stop
    /// landing batches: on `clear` and on `retire_writers`.
    generation: AtomicU64,

    /// Set until the first scan of a session has finished.
    unset: AtomicBool,
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_uid: AtomicU32::new(0),
            revision: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            unset: AtomicBool::new(true),
        }
    }

    /// Safe to call from the scanning thread while readers hold older UIDs.
    pub fn generate_uid(&self) -> Uid {
        // Skip 0 which stands for "no entry".
        self.next_uid.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Splice a freshly scanned batch in. Returns whether anything was added.
    pub fn append(&self, batch: Vec<InternEntry>) -> bool {
        if batch.is_empty() {
            return false;
        }

        let added = batch.len();
        let mut entries = self.entries.lock();
        entries.extend(batch.into_iter().map(Arc::new));
        self.revision.fetch_add(1, Ordering::Release);

        debug!(
            marker = "ENTRY_STORE_APPEND",
            operation_type = "entry_store",
            added = added,
            total = entries.len(),
            "Appended entry batch"
        );
        true
    }

    /// Like [`Self::append`], but only while `generation` is still current.
    /// A writer that raced a reset gets `false` and its batch is dropped.
    pub fn append_if_current(&self, generation: u64, batch: Vec<InternEntry>) -> bool {
        if batch.is_empty() {
            return false;
        }

        let added = batch.len();
        let mut entries = self.entries.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(
                marker = "ENTRY_STORE_STALE_BATCH",
                operation_type = "entry_store",
                dropped = added,
                "Dropped batch from a retired writer"
            );
            return false;
        }
        entries.extend(batch.into_iter().map(Arc::new));
        self.revision.fetch_add(1, Ordering::Release);
        true
    }

    /// Current writer generation; hand it to [`Self::append_if_current`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate every generation handed out so far without touching the
    /// entries.
    pub fn retire_writers(&self) {
        let _entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop every entry and mark the store as unset again. Writers holding
    /// an older generation can no longer append.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.revision.fetch_add(1, Ordering::Release);
        drop(entries);
        self.unset.store(true, Ordering::Release);
    }

    /// Remove only the entries mirroring in-memory data. Returns how many went.
    pub fn clear_main_data(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !entry.is_main_data());
        let removed = before - entries.len();
        if removed > 0 {
            self.revision.fetch_add(1, Ordering::Release);
        }
        removed
    }

    pub fn mark_valid(&self) {
        self.unset.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.unset.load(Ordering::Acquire)
    }

    /// Cheap copy of the current list; entries themselves are shared.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<InternEntry>> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::TypeFlags;
    use std::collections::HashSet;

    fn batch(store: &EntryStore, names: &[&str]) -> Vec<InternEntry> {
        names
            .iter()
            .map(|name| {
                let mut entry = InternEntry::new(*name, TypeFlags::empty());
                entry.uid = store.generate_uid();
                entry
            })
            .collect()
    }

    #[test]
    fn test_uids_unique_across_clear() {
        let store = EntryStore::new();
        let first = batch(&store, &["a", "b"]);
        let mut seen: HashSet<Uid> = first.iter().map(|e| e.uid).collect();
        assert!(store.append(first));

        store.clear();
        assert!(store.is_empty());

        for entry in batch(&store, &["a", "b", "c"]) {
            assert_ne!(entry.uid, 0);
            assert!(seen.insert(entry.uid), "uid {} reused", entry.uid);
        }
    }

    #[test]
    fn test_append_empty_reports_nothing() {
        let store = EntryStore::new();
        let revision = store.revision();
        assert!(!store.append(Vec::new()));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_uid_generation_concurrent() {
        let store = Arc::new(EntryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || (0..1000).map(|_| store.generate_uid()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for uid in handle.join().unwrap() {
                assert!(all.insert(uid));
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_clear_rejects_older_writers() {
        let store = EntryStore::new();
        let before = store.generation();
        assert!(store.append_if_current(before, batch(&store, &["old/a"])));

        store.clear();
        let after = store.generation();
        assert_ne!(before, after);

        // A batch that was built before the reset never lands.
        assert!(!store.append_if_current(before, batch(&store, &["old/b"])));
        assert!(store.is_empty());

        assert!(store.append_if_current(after, batch(&store, &["new/a"])));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retire_writers_keeps_entries() {
        let store = EntryStore::new();
        let generation = store.generation();
        store.append(batch(&store, &["a"]));

        store.retire_writers();
        assert_eq!(store.len(), 1);
        assert!(!store.append_if_current(generation, batch(&store, &["b"])));
        assert!(store.append_if_current(store.generation(), batch(&store, &["b"])));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_clear_main_data_keeps_files() {
        use crate::model::entry::LocalData;
        use crate::model::id_code::IdCode;

        let store = EntryStore::new();
        let mut entries = batch(&store, &["file.txt", "Object/Cube"]);
        entries[1].local_data = Some(LocalData {
            id_code: IdCode::Object,
            name: "Cube".into(),
            preview: None,
        });
        store.append(entries);

        assert_eq!(store.clear_main_data(), 1);
        let left = store.snapshot();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].relpath, "file.txt");
    }
}
