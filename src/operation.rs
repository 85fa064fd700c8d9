//! The operation contract shared by every layer of the stack.

use crate::error::Result;
use crate::record::Selector;

/// Uniform CRUD-shaped capability set over records of type `T`.
///
/// Implemented by [`BaseOperator`](crate::BaseOperator) and by the decorators
/// wrapping it ([`RetryOperator`](crate::RetryOperator),
/// [`AsyncOperator`](crate::AsyncOperator)). Counts are whatever the
/// implementing layer guarantees; see each implementation.
pub trait Operation<T>: Send + Sync {
    /// Identifier used to prefix log lines and name worker threads.
    fn log_tag(&self) -> &str;

    // ---- save ----

    fn save_or_update(&self, record: &T) -> Result<usize>;

    fn save_or_update_all(&self, records: &[T]) -> Result<usize>;

    // ---- read ----

    /// Keyed lookup of a single record.
    fn read(&self, record: &T) -> Result<Option<T>>;

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>>;

    fn read_page(&self, page_size: usize, offset: usize, selector: &Selector) -> Result<Vec<T>>;

    fn read_all(&self) -> Result<Vec<T>>;

    // ---- delete ----

    fn delete(&self, record: &T) -> Result<usize>;

    fn delete_where(&self, selector: &Selector) -> Result<usize>;

    fn delete_many(&self, records: &[T]) -> Result<usize>;

    fn delete_all(&self) -> Result<usize>;

    // ---- count ----

    fn count_all(&self) -> Result<usize>;

    fn count(&self, record: &T) -> Result<usize>;

    fn count_where(&self, selector: &Selector) -> Result<usize>;
}

impl<T, O> Operation<T> for std::sync::Arc<O>
where
    O: Operation<T> + ?Sized,
{
    fn log_tag(&self) -> &str {
        (**self).log_tag()
    }

    fn save_or_update(&self, record: &T) -> Result<usize> {
        (**self).save_or_update(record)
    }

    fn save_or_update_all(&self, records: &[T]) -> Result<usize> {
        (**self).save_or_update_all(records)
    }

    fn read(&self, record: &T) -> Result<Option<T>> {
        (**self).read(record)
    }

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>> {
        (**self).read_where(selector)
    }

    fn read_page(&self, page_size: usize, offset: usize, selector: &Selector) -> Result<Vec<T>> {
        (**self).read_page(page_size, offset, selector)
    }

    fn read_all(&self) -> Result<Vec<T>> {
        (**self).read_all()
    }

    fn delete(&self, record: &T) -> Result<usize> {
        (**self).delete(record)
    }

    fn delete_where(&self, selector: &Selector) -> Result<usize> {
        (**self).delete_where(selector)
    }

    fn delete_many(&self, records: &[T]) -> Result<usize> {
        (**self).delete_many(records)
    }

    fn delete_all(&self) -> Result<usize> {
        (**self).delete_all()
    }

    fn count_all(&self) -> Result<usize> {
        (**self).count_all()
    }

    fn count(&self, record: &T) -> Result<usize> {
        (**self).count(record)
    }

    fn count_where(&self, selector: &Selector) -> Result<usize> {
        (**self).count_where(selector)
    }
}
