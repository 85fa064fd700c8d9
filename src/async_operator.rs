//! Asynchronous dispatch decorator.
//!
//! Every call is queued on the operator's worker thread and returns a
//! placeholder at once; the real result reaches the listeners through the
//! dispatch loop. Within one operator, calls execute and complete in the
//! order they were made.

use crate::dispatch::DispatchContext;
use crate::error::Result;
use crate::listener::{Listener, ReadListener};
use crate::operation::Operation;
use crate::record::{Selector, Source};
use crate::retry::RetryOperator;
use crate::worker::Worker;
use parking_lot::{Mutex, RwLock};
use std::fmt::Debug;
use std::sync::Arc;

/// Kind tag of a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Save,
    Read,
    Delete,
    Count,
}

enum Request<T> {
    Save(T),
    SaveAll(Vec<T>),
    Read(T),
    ReadWhere(Selector),
    ReadPage {
        page_size: usize,
        offset: usize,
        selector: Selector,
    },
    ReadAll,
    Delete(T),
    DeleteWhere(Selector),
    DeleteMany(Vec<T>),
    DeleteAll,
    CountAll,
    Count(T),
    CountWhere(Selector),
}

impl<T> Request<T> {
    fn kind(&self) -> OperationKind {
        match self {
            Request::Save(_) | Request::SaveAll(_) => OperationKind::Save,
            Request::Read(_)
            | Request::ReadWhere(_)
            | Request::ReadPage { .. }
            | Request::ReadAll => OperationKind::Read,
            Request::Delete(_)
            | Request::DeleteWhere(_)
            | Request::DeleteMany(_)
            | Request::DeleteAll => OperationKind::Delete,
            Request::CountAll | Request::Count(_) | Request::CountWhere(_) => OperationKind::Count,
        }
    }

    /// Run against `op`, returning the count and, for reads, the results.
    fn perform(&self, op: &dyn Operation<T>) -> Result<(usize, Option<Vec<T>>)> {
        let outcome = match self {
            Request::Save(record) => (op.save_or_update(record)?, None),
            Request::SaveAll(records) => (op.save_or_update_all(records)?, None),
            Request::Read(record) => {
                let found: Vec<T> = op.read(record)?.into_iter().collect();
                (found.len(), Some(found))
            }
            Request::ReadWhere(selector) => listed(op.read_where(selector)?),
            Request::ReadPage {
                page_size,
                offset,
                selector,
            } => listed(op.read_page(*page_size, *offset, selector)?),
            Request::ReadAll => listed(op.read_all()?),
            Request::Delete(record) => (op.delete(record)?, None),
            Request::DeleteWhere(selector) => (op.delete_where(selector)?, None),
            Request::DeleteMany(records) => (op.delete_many(records)?, None),
            Request::DeleteAll => (op.delete_all()?, None),
            Request::CountAll => (op.count_all()?, None),
            Request::Count(record) => (op.count(record)?, None),
            Request::CountWhere(selector) => (op.count_where(selector)?, None),
        };
        Ok(outcome)
    }

    fn into_source(self) -> Source<T> {
        match self {
            Request::Save(record)
            | Request::Read(record)
            | Request::Delete(record)
            | Request::Count(record) => Source::Record(record),
            Request::SaveAll(records) | Request::DeleteMany(records) => Source::Records(records),
            Request::ReadWhere(selector)
            | Request::DeleteWhere(selector)
            | Request::CountWhere(selector) => Source::Selector(selector),
            Request::ReadPage {
                page_size,
                offset,
                selector,
            } => Source::Page {
                page_size,
                offset,
                selector,
            },
            Request::ReadAll | Request::DeleteAll | Request::CountAll => Source::None,
        }
    }
}

fn listed<T>(results: Vec<T>) -> (usize, Option<Vec<T>>) {
    (results.len(), Some(results))
}

/// A submitted call together with the listeners resolved when it was made.
struct PendingTask<T> {
    request: Request<T>,
    listener: Option<Arc<dyn Listener<T>>>,
    read_listener: Option<Arc<dyn ReadListener<T>>>,
}

impl<T: Send + 'static> PendingTask<T> {
    fn run(self, op: &dyn Operation<T>, context: &DispatchContext) {
        let kind = self.request.kind();
        let (count, results) = match self.request.perform(op) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{}: async {:?} failed: {}", op.log_tag(), kind, e);
                return;
            }
        };

        let message = CompletionMessage {
            kind,
            count,
            source: self.request.into_source(),
            results,
            listener: self.listener,
            read_listener: self.read_listener,
        };
        if !context.post(move || message.deliver()) {
            warn!(
                "{}: dispatch loop is gone, {:?} completion dropped",
                op.log_tag(),
                kind
            );
        }
    }
}

/// Completion of one task, delivered on the dispatch loop.
struct CompletionMessage<T> {
    kind: OperationKind,
    count: usize,
    source: Source<T>,
    results: Option<Vec<T>>,
    listener: Option<Arc<dyn Listener<T>>>,
    read_listener: Option<Arc<dyn ReadListener<T>>>,
}

impl<T> CompletionMessage<T> {
    fn deliver(self) {
        if self.kind == OperationKind::Read {
            if let Some(read_listener) = &self.read_listener {
                let results = self.results.as_deref().unwrap_or(&[]);
                read_listener.on_read(self.count, &self.source, results);
                read_listener.on_done(self.count, &self.source);
            }
        }

        if let Some(listener) = &self.listener {
            // A read listener also installed as generic listener gets one on_done.
            let already_done = self.kind == OperationKind::Read
                && self.read_listener.as_ref().is_some_and(|read_listener| {
                    Arc::as_ptr(read_listener) as *const () == Arc::as_ptr(listener) as *const ()
                });
            if !already_done {
                listener.on_done(self.count, &self.source);
            }
        }
    }
}

/// Non-blocking decorator: runs calls on a dedicated worker thread and reports
/// results to listeners through a [`DispatchContext`].
///
/// Direct return values are placeholders: `1` for a single save, the input
/// length for a batch save, the input record for a keyed read, an empty vector
/// for other reads and `0` for deletes and counts.
///
/// Listener slots: `set_*` installs a persistent listener; `on_*` installs a
/// once-listener taken by the next matching call and then cleared. A once
/// slot wins over the persistent slot. Reads resolve both the generic and
/// the read slots; other calls resolve the generic slot only.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use store_guard::{dispatch, AsyncOperator, BaseOperator, Operation, Source};
///
/// let (context, dispatch_loop) = dispatch::channel();
/// let base = BaseOperator::new("ids").with_key_fn(|id: &u32| *id);
/// base.enable_memory_cache();
///
/// let ids = AsyncOperator::wrap(base, context);
/// ids.on_listener(Arc::new(|count: usize, _: &Source<u32>| assert_eq!(count, 3)))
///     .save_or_update_all(&[1, 2, 3])
///     .unwrap();
///
/// drop(ids);
/// dispatch_loop.run_blocking();
/// ```
pub struct AsyncOperator<T> {
    worker: Worker<T>,
    listener: RwLock<Option<Arc<dyn Listener<T>>>>,
    once_listener: Mutex<Option<Arc<dyn Listener<T>>>>,
    read_listener: RwLock<Option<Arc<dyn ReadListener<T>>>>,
    once_read_listener: Mutex<Option<Arc<dyn ReadListener<T>>>>,
}

impl<T> AsyncOperator<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Wrap a retry-guarded operation, posting completions to `context`.
    ///
    /// This is the entry point for an operation that already is a
    /// [`RetryOperator`], e.g. one built with
    /// [`RetryOperator::from_config`]; it is used as is.
    pub fn new<O>(inner: RetryOperator<O>, context: DispatchContext) -> Self
    where
        O: Operation<T> + 'static,
    {
        AsyncOperator {
            worker: Worker::new(Arc::new(inner), context),
            listener: RwLock::new(None),
            once_listener: Mutex::new(None),
            read_listener: RwLock::new(None),
            once_read_listener: Mutex::new(None),
        }
    }

    /// Wrap `inner` in a [`RetryOperator`] with the default wait first.
    ///
    /// `inner` must not be a `RetryOperator` already: the second retry layer
    /// would log every call twice. Pass retry-guarded operations to
    /// [`new`](Self::new) instead.
    pub fn wrap<O>(inner: O, context: DispatchContext) -> Self
    where
        O: Operation<T> + 'static,
    {
        Self::new(RetryOperator::new(inner), context)
    }

    /// Install the listener used by every call without a once-listener.
    pub fn set_listener(&self, listener: Arc<dyn Listener<T>>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    /// Install the read listener used by every read without a once-listener.
    pub fn set_read_listener(&self, listener: Arc<dyn ReadListener<T>>) {
        *self.read_listener.write() = Some(listener);
    }

    pub fn clear_read_listener(&self) {
        *self.read_listener.write() = None;
    }

    /// Install a listener for the next call only.
    pub fn on_listener(&self, listener: Arc<dyn Listener<T>>) -> &Self {
        *self.once_listener.lock() = Some(listener);
        self
    }

    /// Install a read listener for the next read only.
    pub fn on_read_listener(&self, listener: Arc<dyn ReadListener<T>>) -> &Self {
        *self.once_read_listener.lock() = Some(listener);
        self
    }

    /// Run `command` against the wrapped operation on the worker thread,
    /// after every call submitted before it.
    pub fn execute<F>(&self, command: F)
    where
        F: FnOnce(&dyn Operation<T>) + Send + 'static,
    {
        self.worker.submit(move |op, _| command(op));
    }

    /// Run `message` on the dispatch loop, ordered with completions already
    /// posted. Returns `false` if the loop is gone.
    pub fn post<F>(&self, message: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.worker.context().post(message)
    }

    fn resolve_listener(&self) -> Option<Arc<dyn Listener<T>>> {
        let once = self.once_listener.lock().take();
        once.or_else(|| self.listener.read().clone())
    }

    fn resolve_read_listener(&self) -> Option<Arc<dyn ReadListener<T>>> {
        let once = self.once_read_listener.lock().take();
        once.or_else(|| self.read_listener.read().clone())
    }

    fn submit(&self, request: Request<T>) {
        let read_listener = match request.kind() {
            OperationKind::Read => self.resolve_read_listener(),
            _ => None,
        };
        let task = PendingTask {
            request,
            listener: self.resolve_listener(),
            read_listener,
        };
        self.worker.submit(move |op, context| task.run(op, context));
    }
}

impl<T> Operation<T> for AsyncOperator<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn log_tag(&self) -> &str {
        self.worker.operation().log_tag()
    }

    fn save_or_update(&self, record: &T) -> Result<usize> {
        self.submit(Request::Save(record.clone()));
        Ok(1)
    }

    fn save_or_update_all(&self, records: &[T]) -> Result<usize> {
        self.submit(Request::SaveAll(records.to_vec()));
        Ok(records.len())
    }

    fn read(&self, record: &T) -> Result<Option<T>> {
        self.submit(Request::Read(record.clone()));
        Ok(Some(record.clone()))
    }

    fn read_where(&self, selector: &Selector) -> Result<Vec<T>> {
        self.submit(Request::ReadWhere(selector.clone()));
        Ok(Vec::new())
    }

    fn read_page(&self, page_size: usize, offset: usize, selector: &Selector) -> Result<Vec<T>> {
        self.submit(Request::ReadPage {
            page_size,
            offset,
            selector: selector.clone(),
        });
        Ok(Vec::new())
    }

    fn read_all(&self) -> Result<Vec<T>> {
        self.submit(Request::ReadAll);
        Ok(Vec::new())
    }

    fn delete(&self, record: &T) -> Result<usize> {
        self.submit(Request::Delete(record.clone()));
        Ok(0)
    }

    fn delete_where(&self, selector: &Selector) -> Result<usize> {
        self.submit(Request::DeleteWhere(selector.clone()));
        Ok(0)
    }

    fn delete_many(&self, records: &[T]) -> Result<usize> {
        self.submit(Request::DeleteMany(records.to_vec()));
        Ok(0)
    }

    fn delete_all(&self) -> Result<usize> {
        self.submit(Request::DeleteAll);
        Ok(0)
    }

    fn count_all(&self) -> Result<usize> {
        self.submit(Request::CountAll);
        Ok(0)
    }

    fn count(&self, record: &T) -> Result<usize> {
        self.submit(Request::Count(record.clone()));
        Ok(0)
    }

    fn count_where(&self, selector: &Selector) -> Result<usize> {
        self.submit(Request::CountWhere(selector.clone()));
        Ok(0)
    }
}
