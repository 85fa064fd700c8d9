//! Single-consumer worker thread owned by one [`AsyncOperator`](crate::AsyncOperator).

use crate::dispatch::{panic_payload_message, DispatchContext};
use crate::operation::Operation;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

/// Unit of work run on the worker against the wrapped operation.
pub(crate) type Job<T> = Box<dyn FnOnce(&dyn Operation<T>, &DispatchContext) + Send>;

static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Lazily started worker running jobs one at a time, in submission order.
///
/// The thread exits once the worker is dropped and its queue has drained.
pub(crate) struct Worker<T> {
    inner: Arc<dyn Operation<T>>,
    context: DispatchContext,
    queue: Mutex<Option<mpsc::UnboundedSender<Job<T>>>>,
}

impl<T: 'static> Worker<T> {
    pub(crate) fn new(inner: Arc<dyn Operation<T>>, context: DispatchContext) -> Self {
        Worker {
            inner,
            context,
            queue: Mutex::new(None),
        }
    }

    pub(crate) fn operation(&self) -> &dyn Operation<T> {
        self.inner.as_ref()
    }

    pub(crate) fn context(&self) -> &DispatchContext {
        &self.context
    }

    #[cfg(test)]
    pub(crate) fn is_started(&self) -> bool {
        self.queue.lock().is_some()
    }

    /// Queue `job`, starting the thread on first use.
    pub(crate) fn submit<F>(&self, job: F)
    where
        F: FnOnce(&dyn Operation<T>, &DispatchContext) + Send + 'static,
    {
        let mut queue = self.queue.lock();
        if queue.is_none() {
            *queue = self.start();
        }

        let Some(tx) = queue.as_ref() else {
            error!("{}: no worker thread, task dropped", self.inner.log_tag());
            return;
        };
        if tx.send(Box::new(job)).is_err() {
            error!("{}: worker thread gone, task dropped", self.inner.log_tag());
            *queue = None;
        }
    }

    fn start(&self) -> Option<mpsc::UnboundedSender<Job<T>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = format!(
            "Async{}#{}",
            self.inner.log_tag(),
            WORKER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let inner = Arc::clone(&self.inner);
        let context = self.context.clone();
        let thread_name = name.clone();

        match thread::Builder::new()
            .name(name)
            .spawn(move || run(&thread_name, rx, inner, context))
        {
            Ok(_) => Some(tx),
            Err(e) => {
                error!(
                    "{}: failed to spawn worker thread: {}",
                    self.inner.log_tag(),
                    e
                );
                None
            }
        }
    }
}

fn run<T>(
    name: &str,
    mut rx: mpsc::UnboundedReceiver<Job<T>>,
    inner: Arc<dyn Operation<T>>,
    context: DispatchContext,
) {
    info!("✓ Worker {} started", name);
    while let Some(job) = rx.blocking_recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(inner.as_ref(), &context)));
        if let Err(payload) = outcome {
            error!(
                "{}: uncaught panic on {}: {}",
                inner.log_tag(),
                name,
                panic_payload_message(&*payload)
            );
        }
    }
    debug!("Worker {} stopped", name);
}
