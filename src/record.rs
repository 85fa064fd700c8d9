//! Types exchanged between operators, record stores and listeners.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Key/value criteria handed to a record store untouched.
///
/// Operators never interpret a selector; its meaning belongs to the store.
pub type Selector = BTreeMap<String, serde_json::Value>;

/// Injected function deriving a record's cache key.
pub type KeyFn<K, T> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// The input a call was made with, handed back to listeners on completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Source<T> {
    /// Calls without input (`read_all`, `delete_all`, `count_all`).
    None,
    Record(T),
    Records(Vec<T>),
    Selector(Selector),
    Page {
        page_size: usize,
        offset: usize,
        selector: Selector,
    },
}

impl<T> Source<T> {
    /// The single record this call was made with, if any.
    pub fn record(&self) -> Option<&T> {
        match self {
            Source::Record(record) => Some(record),
            _ => None,
        }
    }

    /// The selector this call was made with, if any.
    pub fn selector(&self) -> Option<&Selector> {
        match self {
            Source::Selector(selector) | Source::Page { selector, .. } => Some(selector),
            _ => None,
        }
    }
}
