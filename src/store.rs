//! Record store collaborator.
//!
//! A [`RecordStore`] is the persistent side of a [`BaseOperator`](crate::BaseOperator).
//! Without one the operator runs in cache-only mode and the selector-based
//! calls are placeholders.

use crate::error::Result;
use crate::record::{KeyFn, Selector};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Trait for the persistent record store behind a `BaseOperator`.
///
/// Implement this for SQLite, Postgres or any other storage. Signal transient
/// locking with `Error::LockContention` so the retry layer can wait it out.
///
/// # Example
///
/// ```ignore
/// impl RecordStore<User> for UserTable {
///     fn save(&self, user: &User) -> Result<usize> {
///         self.conn.execute("INSERT OR REPLACE INTO users ...", params![..])
///             .map_err(classify)
///     }
///     // ...
/// }
/// ```
pub trait RecordStore<T>: Send + Sync {
    /// Insert or replace one record, returning the number of rows written.
    fn save(&self, record: &T) -> Result<usize>;

    fn save_all(&self, records: &[T]) -> Result<usize> {
        let mut written = 0;
        for record in records {
            written += self.save(record)?;
        }
        Ok(written)
    }

    /// Fetch the stored version of `record`, matched by identity.
    fn read(&self, record: &T) -> Result<Option<T>>;

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>>;

    fn read_page(&self, page_size: usize, offset: usize, selector: &Selector) -> Result<Vec<T>> {
        Ok(self
            .read_where(selector)?
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect())
    }

    fn read_all(&self) -> Result<Vec<T>> {
        self.read_where(&Selector::new())
    }

    fn delete(&self, record: &T) -> Result<usize>;

    fn delete_all_of(&self, records: &[T]) -> Result<usize> {
        let mut removed = 0;
        for record in records {
            removed += self.delete(record)?;
        }
        Ok(removed)
    }

    fn delete_where(&self, selector: &Selector) -> Result<usize>;

    fn delete_all(&self) -> Result<usize> {
        self.delete_where(&Selector::new())
    }

    fn count(&self, record: &T) -> Result<usize> {
        Ok(usize::from(self.read(record)?.is_some()))
    }

    fn count_where(&self, selector: &Selector) -> Result<usize> {
        Ok(self.read_where(selector)?.len())
    }

    fn count_all(&self) -> Result<usize> {
        self.count_where(&Selector::new())
    }
}

/// In-memory record store, ordered by key.
///
/// Selectors match records whose JSON form has every selector field with an
/// equal value; an empty selector matches everything.
pub struct InMemoryStore<K, T> {
    key_of: KeyFn<K, T>,
    rows: RwLock<BTreeMap<K, T>>,
}

impl<K, T> InMemoryStore<K, T>
where
    K: Ord + Clone,
    T: Clone + Serialize,
{
    pub fn new<F>(key_of: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        InMemoryStore {
            key_of: Arc::new(key_of),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert a record directly, bypassing any operator.
    pub fn insert(&self, record: T) {
        let key = (self.key_of)(&record);
        self.rows.write().insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn matches(record: &T, selector: &Selector) -> bool {
        if selector.is_empty() {
            return true;
        }
        match serde_json::to_value(record) {
            Ok(serde_json::Value::Object(fields)) => selector
                .iter()
                .all(|(name, expected)| fields.get(name) == Some(expected)),
            Ok(_) => false,
            Err(e) => {
                warn!("Record could not be matched against selector: {}", e);
                false
            }
        }
    }
}

impl<K, T> RecordStore<T> for InMemoryStore<K, T>
where
    K: Ord + Clone + Send + Sync,
    T: Clone + Serialize + Send + Sync,
{
    fn save(&self, record: &T) -> Result<usize> {
        self.insert(record.clone());
        Ok(1)
    }

    fn read(&self, record: &T) -> Result<Option<T>> {
        let key = (self.key_of)(record);
        Ok(self.rows.read().get(&key).cloned())
    }

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|record| Self::matches(record, selector))
            .cloned()
            .collect())
    }

    fn delete(&self, record: &T) -> Result<usize> {
        let key = (self.key_of)(record);
        Ok(usize::from(self.rows.write().remove(&key).is_some()))
    }

    fn delete_where(&self, selector: &Selector) -> Result<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, record| !Self::matches(record, selector));
        Ok(before - rows.len())
    }
}
