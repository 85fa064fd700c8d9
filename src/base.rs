//! Cache-backed reference implementation of [`Operation`].

use crate::cache::BoundedCache;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::record::{KeyFn, Selector};
use crate::store::RecordStore;
use parking_lot::{Mutex, MutexGuard};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bottom layer of the operator stack.
///
/// Saves go to the [`RecordStore`] when one is wired and to the memory cache
/// when it is enabled. Without a store the selector-based reads, deletes and
/// counts are placeholders: they log a warning and return an empty result.
///
/// Save and delete calls are serialized per instance; reads are not. A read
/// that misses the cache fills it from the store only if no save or delete
/// ran while the store was being read.
///
/// # Example
///
/// ```
/// use store_guard::{BaseOperator, Operation};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct User { id: u32, name: String }
///
/// let users = BaseOperator::new("users").with_key_fn(|u: &User| u.id);
/// users.enable_memory_cache();
///
/// let alice = User { id: 1, name: "alice".to_string() };
/// assert_eq!(users.save_or_update(&alice).unwrap(), 1);
/// assert_eq!(users.read(&alice).unwrap(), Some(alice));
/// ```
pub struct BaseOperator<K, T> {
    tag: String,
    key_of: Option<KeyFn<K, T>>,
    cache: BoundedCache<K, T>,
    store: Option<Arc<dyn RecordStore<T>>>,
    write_lock: Mutex<()>,
    /// Bumped at the end of every save and delete, under `write_lock`.
    writes: AtomicU64,
}

impl<K, T> BaseOperator<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    /// Create an operator with a disabled default-capacity cache, no key
    /// function and no record store.
    pub fn new(tag: impl Into<String>) -> Self {
        BaseOperator {
            tag: tag.into(),
            key_of: None,
            cache: BoundedCache::default(),
            store: None,
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
        }
    }

    /// Create an operator whose cache follows `config`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn from_config(tag: impl Into<String>, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let operator = Self::new(tag).with_cache(BoundedCache::new(config.cache_capacity));
        if config.cache_enabled {
            operator.enable_memory_cache();
        }
        Ok(operator)
    }

    /// Set the function deriving a record's cache key.
    pub fn with_key_fn<F>(mut self, key_of: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    /// Wire the persistent record store.
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: RecordStore<T> + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    /// Same as [`with_store`](Self::with_store) for a store shared elsewhere.
    pub fn with_shared_store(mut self, store: Arc<dyn RecordStore<T>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the memory cache, e.g. with one using a custom weigher.
    pub fn with_cache(mut self, cache: BoundedCache<K, T>) -> Self {
        self.cache = cache;
        self
    }

    pub fn memory_cache(&self) -> &BoundedCache<K, T> {
        &self.cache
    }

    pub fn enable_memory_cache(&self) {
        self.cache.enable();
    }

    pub fn disable_memory_cache(&self) {
        self.cache.disable();
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    fn key_of(&self, record: &T) -> Result<K> {
        self.key_of
            .as_ref()
            .map(|key_of| key_of(record))
            .ok_or(Error::KeyExtractionMissing)
    }

    fn keys_of(&self, records: &[T]) -> Result<Vec<K>> {
        records.iter().map(|record| self.key_of(record)).collect()
    }

    fn begin_write(&self) -> WriteGuard<'_> {
        WriteGuard {
            _lock: self.write_lock.lock(),
            writes: &self.writes,
        }
    }

    /// Count reported by a cache-only save of `n` records.
    fn cached_count(&self, n: usize) -> usize {
        if self.cache.is_enabled() {
            n
        } else {
            0
        }
    }
}

/// Serializes one save or delete and counts it once it is done.
struct WriteGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    writes: &'a AtomicU64,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        // Runs before the lock field is released.
        self.writes.fetch_add(1, Ordering::AcqRel);
    }
}

impl<K, T> Operation<T> for BaseOperator<K, T>
where
    K: Hash + Eq + Clone + Send + Sync,
    T: Clone + Debug + Send + Sync,
{
    fn log_tag(&self) -> &str {
        &self.tag
    }

    fn save_or_update(&self, record: &T) -> Result<usize> {
        let key = self.key_of(record)?;
        let _guard = self.begin_write();

        let saved = match &self.store {
            Some(store) => store.save(record)?,
            None => self.cached_count(1),
        };
        self.cache.put(key, record.clone());
        Ok(saved)
    }

    fn save_or_update_all(&self, records: &[T]) -> Result<usize> {
        let keys = self.keys_of(records)?;
        let _guard = self.begin_write();

        let saved = match &self.store {
            Some(store) => store.save_all(records)?,
            None => self.cached_count(records.len()),
        };
        for (key, record) in keys.into_iter().zip(records) {
            self.cache.put(key, record.clone());
        }
        Ok(saved)
    }

    fn read(&self, record: &T) -> Result<Option<T>> {
        let key = self.key_of(record)?;
        if let Some(cached) = self.cache.get(&key) {
            debug!("✓ {}: cache hit for {:?}", self.tag, record);
            return Ok(Some(cached));
        }

        match &self.store {
            Some(store) => {
                let seen = self.writes.load(Ordering::Acquire);
                let found = store.read(record)?;
                if let Some(found) = &found {
                    let _guard = self.write_lock.lock();
                    // A write since the store read may have replaced or removed the row.
                    if self.writes.load(Ordering::Acquire) == seen {
                        self.cache.put(key, found.clone());
                    } else {
                        debug!("{}: skipped stale cache fill for {:?}", self.tag, record);
                    }
                }
                Ok(found)
            }
            None => Ok(None),
        }
    }

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>> {
        match &self.store {
            Some(store) => store.read_where(selector),
            None => {
                warn!("{}: dummy read: {:?}", self.tag, selector);
                Ok(Vec::new())
            }
        }
    }

    fn read_page(&self, page_size: usize, offset: usize, selector: &Selector) -> Result<Vec<T>> {
        match &self.store {
            Some(store) => store.read_page(page_size, offset, selector),
            None => {
                warn!(
                    "{}: dummy read: page_size = {}, offset = {}, {:?}",
                    self.tag, page_size, offset, selector
                );
                Ok(Vec::new())
            }
        }
    }

    fn read_all(&self) -> Result<Vec<T>> {
        match &self.store {
            Some(store) => store.read_all(),
            None => {
                warn!("{}: dummy read: all", self.tag);
                Ok(Vec::new())
            }
        }
    }

    fn delete(&self, record: &T) -> Result<usize> {
        let key = self.key_of(record)?;
        let _guard = self.begin_write();

        self.cache.remove(&key);
        match &self.store {
            Some(store) => store.delete(record),
            None => Ok(0),
        }
    }

    fn delete_where(&self, selector: &Selector) -> Result<usize> {
        let _guard = self.begin_write();

        match &self.store {
            Some(store) => {
                let removed = store.delete_where(selector)?;
                // Matching keys are unknown here.
                self.cache.clear();
                Ok(removed)
            }
            None => {
                warn!("{}: dummy delete: {:?}", self.tag, selector);
                Ok(0)
            }
        }
    }

    fn delete_many(&self, records: &[T]) -> Result<usize> {
        let keys = self.keys_of(records)?;
        let _guard = self.begin_write();

        for key in &keys {
            self.cache.remove(key);
        }
        match &self.store {
            Some(store) => store.delete_all_of(records),
            None => Ok(0),
        }
    }

    fn delete_all(&self) -> Result<usize> {
        let _guard = self.begin_write();

        self.cache.clear();
        match &self.store {
            Some(store) => store.delete_all(),
            None => {
                warn!("{}: dummy delete: all", self.tag);
                Ok(0)
            }
        }
    }

    fn count_all(&self) -> Result<usize> {
        match &self.store {
            Some(store) => store.count_all(),
            None => {
                warn!("{}: dummy count: all", self.tag);
                Ok(0)
            }
        }
    }

    fn count(&self, record: &T) -> Result<usize> {
        match &self.store {
            Some(store) => store.count(record),
            None => {
                warn!("{}: dummy count: {:?}", self.tag, record);
                Ok(0)
            }
        }
    }

    fn count_where(&self, selector: &Selector) -> Result<usize> {
        match &self.store {
            Some(store) => store.count_where(selector),
            None => {
                warn!("{}: dummy count: {:?}", self.tag, selector);
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;
    use serde::Serialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[derive(Clone, Debug, PartialEq, Serialize)]
    struct Note {
        id: u32,
        body: String,
    }

    fn note(id: u32, body: &str) -> Note {
        Note {
            id,
            body: body.to_string(),
        }
    }

    fn cached_notes() -> BaseOperator<u32, Note> {
        let notes = BaseOperator::new("notes").with_key_fn(|n: &Note| n.id);
        notes.enable_memory_cache();
        notes
    }

    fn stored_notes() -> BaseOperator<u32, Note> {
        cached_notes().with_store(InMemoryStore::new(|n: &Note| n.id))
    }

    #[test]
    fn test_save_then_read_from_cache() {
        let notes = cached_notes();
        let first = note(1, "hello");

        assert_eq!(notes.save_or_update(&first).expect("Failed to save"), 1);
        assert_eq!(notes.read(&note(1, "")).expect("Failed to read"), Some(first));
        assert_eq!(notes.read(&note(2, "")).expect("Failed to read"), None);
    }

    #[test]
    fn test_save_with_disabled_cache_reports_zero() {
        let notes = BaseOperator::new("notes").with_key_fn(|n: &Note| n.id);

        assert_eq!(notes.save_or_update(&note(1, "a")).expect("Failed to save"), 0);
        assert_eq!(
            notes
                .save_or_update_all(&[note(2, "b"), note(3, "c")])
                .expect("Failed to save"),
            0
        );
        assert!(notes.memory_cache().is_empty());
    }

    #[test]
    fn test_batch_save_returns_input_size() {
        let notes = cached_notes();
        let batch = vec![note(1, "a"), note(2, "b"), note(3, "c")];

        assert_eq!(notes.save_or_update_all(&batch).expect("Failed to save"), 3);
        assert_eq!(notes.memory_cache().len(), 3);
    }

    #[test]
    fn test_disabling_cache_hides_entries() {
        let notes = cached_notes();
        notes.save_or_update(&note(1, "a")).expect("Failed to save");

        notes.disable_memory_cache();
        assert_eq!(notes.read(&note(1, "")).expect("Failed to read"), None);

        notes.enable_memory_cache();
        assert_eq!(
            notes.read(&note(1, "")).expect("Failed to read"),
            Some(note(1, "a"))
        );
    }

    #[test]
    fn test_missing_key_fn_is_an_error() {
        let notes: BaseOperator<u32, Note> = BaseOperator::new("notes");
        notes.enable_memory_cache();

        assert!(matches!(
            notes.save_or_update(&note(1, "a")),
            Err(Error::KeyExtractionMissing)
        ));
        assert!(matches!(
            notes.read(&note(1, "a")),
            Err(Error::KeyExtractionMissing)
        ));
        assert!(matches!(
            notes.delete(&note(1, "a")),
            Err(Error::KeyExtractionMissing)
        ));
        assert!(matches!(
            notes.delete_many(&[note(1, "a")]),
            Err(Error::KeyExtractionMissing)
        ));
        // Calls without key derivation still work.
        assert_eq!(notes.count_all().expect("Failed to count"), 0);
        assert!(notes.read_all().expect("Failed to read").is_empty());
    }

    #[test]
    fn test_placeholder_calls_without_store() {
        let notes = cached_notes();
        notes
            .save_or_update_all(&[note(1, "a"), note(2, "b")])
            .expect("Failed to save");

        let mut selector = Selector::new();
        selector.insert("body".to_string(), json!("a"));

        assert!(notes.read_where(&selector).expect("Failed to read").is_empty());
        assert!(notes
            .read_page(10, 0, &selector)
            .expect("Failed to read")
            .is_empty());
        assert!(notes.read_all().expect("Failed to read").is_empty());
        assert_eq!(notes.delete_where(&selector).expect("Failed to delete"), 0);
        assert_eq!(notes.count_all().expect("Failed to count"), 0);
        assert_eq!(notes.count(&note(1, "")).expect("Failed to count"), 0);
        assert_eq!(notes.count_where(&selector).expect("Failed to count"), 0);

        // Placeholder delete leaves the cache alone.
        assert_eq!(notes.memory_cache().len(), 2);
    }

    #[test]
    fn test_delete_removes_cache_entries() {
        let notes = cached_notes();
        notes
            .save_or_update_all(&[note(1, "a"), note(2, "b"), note(3, "c")])
            .expect("Failed to save");

        assert_eq!(notes.delete(&note(1, "")).expect("Failed to delete"), 0);
        assert_eq!(notes.read(&note(1, "")).expect("Failed to read"), None);

        assert_eq!(
            notes
                .delete_many(&[note(2, ""), note(3, "")])
                .expect("Failed to delete"),
            0
        );
        assert!(notes.memory_cache().is_empty());
    }

    #[test]
    fn test_delete_all_clears_cache() {
        let notes = cached_notes();
        notes
            .save_or_update_all(&[note(1, "a"), note(2, "b")])
            .expect("Failed to save");

        assert_eq!(notes.delete_all().expect("Failed to delete"), 0);
        assert!(notes.memory_cache().is_empty());
    }

    #[test]
    fn test_store_read_through_populates_cache() {
        let store = Arc::new(InMemoryStore::new(|n: &Note| n.id));
        store.insert(note(7, "persisted"));

        let notes = cached_notes().with_shared_store(store.clone());
        assert!(notes.memory_cache().is_empty());

        let found = notes.read(&note(7, "")).expect("Failed to read");
        assert_eq!(found, Some(note(7, "persisted")));
        assert_eq!(notes.memory_cache().len(), 1);

        // Served from cache even after the store forgets the row.
        store.delete(&note(7, "")).expect("Failed to delete");
        assert_eq!(
            notes.read(&note(7, "")).expect("Failed to read"),
            Some(note(7, "persisted"))
        );
    }

    #[test]
    fn test_store_backed_calls_delegate() {
        let notes = stored_notes();
        assert_eq!(
            notes
                .save_or_update_all(&[note(1, "x"), note(2, "y"), note(3, "x")])
                .expect("Failed to save"),
            3
        );

        let mut selector = Selector::new();
        selector.insert("body".to_string(), json!("x"));

        assert_eq!(notes.read_where(&selector).expect("Failed to read").len(), 2);
        assert_eq!(
            notes.read_page(1, 1, &selector).expect("Failed to read"),
            vec![note(3, "x")]
        );
        assert_eq!(notes.read_all().expect("Failed to read").len(), 3);
        assert_eq!(notes.count_all().expect("Failed to count"), 3);
        assert_eq!(notes.count(&note(2, "")).expect("Failed to count"), 1);
        assert_eq!(notes.count_where(&selector).expect("Failed to count"), 2);

        assert_eq!(notes.delete(&note(2, "")).expect("Failed to delete"), 1);
        assert_eq!(notes.delete_where(&selector).expect("Failed to delete"), 2);
        assert!(notes.memory_cache().is_empty());
        assert_eq!(notes.count_all().expect("Failed to count"), 0);
    }

    #[test]
    fn test_from_config() {
        let config = StoreConfig {
            cache_capacity: 2,
            cache_enabled: true,
            ..Default::default()
        };
        let notes = BaseOperator::from_config("notes", &config)
            .expect("Failed to build operator")
            .with_key_fn(|n: &Note| n.id);

        assert!(notes.memory_cache().is_enabled());
        assert_eq!(notes.memory_cache().capacity(), 2);

        let invalid = StoreConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        assert!(BaseOperator::<u32, Note>::from_config("notes", &invalid).is_err());
    }

    /// Store whose first read parks on a barrier after fetching the row.
    struct GatedStore {
        rows: InMemoryStore<u32, Note>,
        gate: Mutex<Option<Arc<Barrier>>>,
    }

    impl GatedStore {
        fn new(gate: Arc<Barrier>) -> Self {
            GatedStore {
                rows: InMemoryStore::new(|n: &Note| n.id),
                gate: Mutex::new(Some(gate)),
            }
        }
    }

    impl RecordStore<Note> for GatedStore {
        fn save(&self, record: &Note) -> Result<usize> {
            self.rows.save(record)
        }

        fn read(&self, record: &Note) -> Result<Option<Note>> {
            let found = self.rows.read(record)?;
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                gate.wait();
                gate.wait();
            }
            Ok(found)
        }

        fn read_where(&self, selector: &Selector) -> Result<Vec<Note>> {
            self.rows.read_where(selector)
        }

        fn delete(&self, record: &Note) -> Result<usize> {
            self.rows.delete(record)
        }

        fn delete_where(&self, selector: &Selector) -> Result<usize> {
            self.rows.delete_where(selector)
        }
    }

    /// Run a read-through of note 1 that fetches "old" and finishes only
    /// after `write` has completed.
    fn read_racing(
        write: impl FnOnce(&BaseOperator<u32, Note>),
    ) -> Arc<BaseOperator<u32, Note>> {
        let gate = Arc::new(Barrier::new(2));
        let store = GatedStore::new(Arc::clone(&gate));
        store.rows.insert(note(1, "old"));
        let notes = Arc::new(cached_notes().with_store(store));

        let reader = {
            let notes = Arc::clone(&notes);
            thread::spawn(move || notes.read(&note(1, "")).expect("Failed to read"))
        };
        gate.wait();
        write(&notes);
        gate.wait();

        // The reader saw the row as it was before the write.
        assert_eq!(
            reader.join().expect("Reader thread panicked"),
            Some(note(1, "old"))
        );
        notes
    }

    #[test]
    fn test_read_through_does_not_resurrect_deleted_row() {
        let notes = read_racing(|notes| {
            assert_eq!(notes.delete(&note(1, "")).expect("Failed to delete"), 1);
        });

        assert_eq!(notes.memory_cache().get(&1), None);
        assert_eq!(notes.read(&note(1, "")).expect("Failed to read"), None);
        assert_eq!(notes.count(&note(1, "")).expect("Failed to count"), 0);
    }

    #[test]
    fn test_read_through_does_not_overwrite_newer_save() {
        let notes = read_racing(|notes| {
            notes
                .save_or_update(&note(1, "new"))
                .expect("Failed to save");
        });

        assert_eq!(
            notes.read(&note(1, "")).expect("Failed to read"),
            Some(note(1, "new"))
        );
    }

    /// Store recording the largest number of writers seen at once.
    struct OverlapStore {
        rows: InMemoryStore<u32, Note>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl OverlapStore {
        fn write<R>(&self, call: impl FnOnce() -> R) -> R {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::yield_now();
            let result = call();
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    impl RecordStore<Note> for OverlapStore {
        fn save(&self, record: &Note) -> Result<usize> {
            self.write(|| self.rows.save(record))
        }

        fn read(&self, record: &Note) -> Result<Option<Note>> {
            thread::yield_now();
            self.rows.read(record)
        }

        fn read_where(&self, selector: &Selector) -> Result<Vec<Note>> {
            self.rows.read_where(selector)
        }

        fn delete(&self, record: &Note) -> Result<usize> {
            self.write(|| self.rows.delete(record))
        }

        fn delete_where(&self, selector: &Selector) -> Result<usize> {
            self.write(|| self.rows.delete_where(selector))
        }
    }

    #[test]
    fn test_concurrent_writes_are_serialized_and_cache_matches_store() {
        let store = Arc::new(OverlapStore {
            rows: InMemoryStore::new(|n: &Note| n.id),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let notes = Arc::new(cached_notes().with_shared_store(store.clone()));

        let handles: Vec<_> = (0..8u32)
            .map(|worker| {
                let notes = Arc::clone(&notes);
                thread::spawn(move || {
                    for step in 0..200u32 {
                        let id = (worker + step) % 6;
                        match (worker + step) % 3 {
                            0 => {
                                let body = format!("w{}s{}", worker, step);
                                notes.save_or_update(&note(id, &body)).expect("Failed to save");
                            }
                            1 => {
                                notes.delete(&note(id, "")).expect("Failed to delete");
                            }
                            _ => {
                                notes.read(&note(id, "")).expect("Failed to read");
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Worker thread panicked");
        }

        assert_eq!(store.peak.load(Ordering::SeqCst), 1);
        for id in 0..6u32 {
            let stored = store.rows.read(&note(id, "")).expect("Failed to read store");
            if let Some(cached) = notes.memory_cache().get(&id) {
                assert_eq!(Some(cached), stored, "cache disagrees with store for {}", id);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_read_after_save_returns_record(
            id in any::<u32>(),
            body in "[a-z]{0,12}",
        ) {
            let notes = cached_notes();
            let record = note(id, &body);
            notes.save_or_update(&record).expect("Failed to save");
            prop_assert_eq!(notes.read(&note(id, "")).expect("Failed to read"), Some(record));
        }
    }
}
