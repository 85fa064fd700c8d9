//! Lock-contention retry decorator.

use crate::config::{StoreConfig, DEFAULT_RETRY_WAIT_MS};
use crate::error::Result;
use crate::operation::Operation;
use crate::record::Selector;
use parking_lot::{Condvar, Mutex};
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Wraps an [`Operation`] so that lock contention is waited out and every
/// other failure degrades to a default value.
///
/// A call failing with `Error::LockContention` is repeated after a short
/// fixed wait, with no attempt limit and no backoff growth: under sustained
/// contention the calling thread blocks for as long as the contention lasts.
/// Use [`AsyncOperator`](crate::AsyncOperator) on top to keep that wait off
/// the caller's thread.
///
/// Any other error is logged and swallowed; the call returns `0`, `None` or
/// an empty vector, so every method of this layer returns `Ok`.
///
/// # Example
///
/// ```
/// use store_guard::{BaseOperator, Operation, RetryOperator};
///
/// let base = BaseOperator::new("users").with_key_fn(|id: &u32| *id);
/// let safe = RetryOperator::new(base);
///
/// // No key function error here: nothing needs a key.
/// assert_eq!(safe.count_all().unwrap(), 0);
/// ```
pub struct RetryOperator<O> {
    inner: O,
    wait: Duration,
    monitor: Mutex<()>,
    signal: Condvar,
}

impl<O> RetryOperator<O> {
    pub fn new(inner: O) -> Self {
        Self::with_wait(inner, Duration::from_millis(DEFAULT_RETRY_WAIT_MS))
    }

    /// Wrap `inner`, waiting `wait` between contended attempts.
    pub fn with_wait(inner: O, wait: Duration) -> Self {
        RetryOperator {
            inner,
            wait,
            monitor: Mutex::new(()),
            signal: Condvar::new(),
        }
    }

    /// Wrap `inner` using the configured retry wait.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn from_config(inner: O, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_wait(inner, config.retry_wait()))
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Block for one retry interval. Nothing signals the condition variable;
    /// the wait always runs out its timeout.
    fn pause(&self) {
        let mut guard = self.monitor.lock();
        let _ = self.signal.wait_for(&mut guard, self.wait);
    }

    fn guarded<R>(
        &self,
        tag: &str,
        method: &str,
        fallback: impl Fn() -> R,
        call: impl Fn(&O) -> Result<R>,
    ) -> R {
        let mut retries: u64 = 0;
        loop {
            match call(&self.inner) {
                Ok(value) => return value,
                Err(e) if e.is_recoverable() => {
                    retries += 1;
                    warn!("{}: {}: {} (retry #{})", tag, method, e, retries);
                    self.pause();
                }
                Err(e) => {
                    error!("{}: {}: {}", tag, method, e);
                    return fallback();
                }
            }
        }
    }
}

impl<T, O> Operation<T> for RetryOperator<O>
where
    T: Debug,
    O: Operation<T>,
{
    fn log_tag(&self) -> &str {
        self.inner.log_tag()
    }

    fn save_or_update(&self, record: &T) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: save_or_update: {:?}", tag, record);

        let started = Instant::now();
        let saved = self.guarded(tag, "save_or_update", || 0, |op| op.save_or_update(record));
        debug!("{}: save_or_update: cost = {:?}", tag, started.elapsed());
        Ok(saved)
    }

    fn save_or_update_all(&self, records: &[T]) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: save_or_update: size = {}", tag, records.len());

        let started = Instant::now();
        let saved = self.guarded(
            tag,
            "save_or_update",
            || 0,
            |op| op.save_or_update_all(records),
        );
        debug!("{}: save_or_update: cost = {:?}", tag, started.elapsed());
        Ok(saved)
    }

    fn read(&self, record: &T) -> Result<Option<T>> {
        let tag = self.inner.log_tag();
        debug!("{}: read: {:?}", tag, record);
        Ok(self.guarded(tag, "read", || None, |op| op.read(record)))
    }

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>> {
        let tag = self.inner.log_tag();
        debug!("{}: read: {:?}", tag, selector);
        Ok(self.guarded(tag, "read", Vec::new, |op| op.read_where(selector)))
    }

    fn read_page(&self, page_size: usize, offset: usize, selector: &Selector) -> Result<Vec<T>> {
        let tag = self.inner.log_tag();
        debug!(
            "{}: read: page_size = {}, offset = {}, selector = {:?}",
            tag, page_size, offset, selector
        );
        Ok(self.guarded(tag, "read", Vec::new, |op| {
            op.read_page(page_size, offset, selector)
        }))
    }

    fn read_all(&self) -> Result<Vec<T>> {
        let tag = self.inner.log_tag();
        debug!("{}: read: all", tag);
        Ok(self.guarded(tag, "read", Vec::new, |op| op.read_all()))
    }

    fn delete(&self, record: &T) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: delete: {:?}", tag, record);
        Ok(self.guarded(tag, "delete", || 0, |op| op.delete(record)))
    }

    fn delete_where(&self, selector: &Selector) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: delete: {:?}", tag, selector);
        Ok(self.guarded(tag, "delete", || 0, |op| op.delete_where(selector)))
    }

    fn delete_many(&self, records: &[T]) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: delete: size = {}", tag, records.len());
        Ok(self.guarded(tag, "delete", || 0, |op| op.delete_many(records)))
    }

    fn delete_all(&self) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: delete: all", tag);
        Ok(self.guarded(tag, "delete", || 0, |op| op.delete_all()))
    }

    fn count_all(&self) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: count: all", tag);
        Ok(self.guarded(tag, "count", || 0, |op| op.count_all()))
    }

    fn count(&self, record: &T) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: count: {:?}", tag, record);
        Ok(self.guarded(tag, "count", || 0, |op| op.count(record)))
    }

    fn count_where(&self, selector: &Selector) -> Result<usize> {
        let tag = self.inner.log_tag();
        debug!("{}: count: {:?}", tag, selector);
        Ok(self.guarded(tag, "count", || 0, |op| op.count_where(selector)))
    }
}
