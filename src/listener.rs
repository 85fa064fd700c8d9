//! Completion callbacks for [`AsyncOperator`](crate::AsyncOperator).
//!
//! Callbacks run on the dispatch loop, in submission order per operator.

use crate::record::Source;

/// Receives the completion of any asynchronous call.
///
/// Closures taking `(count, source)` are listeners:
///
/// ```
/// use store_guard::{Listener, Source};
///
/// let listener = |count: usize, _source: &Source<u32>| println!("done: {}", count);
/// listener.on_done(1, &Source::None);
/// ```
pub trait Listener<T>: Send + Sync {
    fn on_done(&self, count: usize, source: &Source<T>);
}

/// Receives read results; `on_done` fires right after `on_read`.
pub trait ReadListener<T>: Listener<T> {
    fn on_read(&self, count: usize, source: &Source<T>, results: &[T]);
}

impl<T, F> Listener<T> for F
where
    F: Fn(usize, &Source<T>) + Send + Sync,
{
    fn on_done(&self, count: usize, source: &Source<T>) {
        self(count, source)
    }
}
