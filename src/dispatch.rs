//! Ordered dispatch context for completion delivery.
//!
//! Workers post messages onto a [`DispatchContext`]; a single
//! [`DispatchLoop`] consumes them first-in first-out and runs listener
//! callbacks. Messages posted by one worker are delivered in the order they
//! were posted.
//!
//! # Example
//!
//! ```
//! use store_guard::dispatch;
//!
//! let (context, mut dispatch_loop) = dispatch::channel();
//! context.post(|| println!("delivered on the dispatch loop"));
//! assert_eq!(dispatch_loop.dispatch_pending(), 1);
//! ```

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tokio::sync::mpsc;

type Envelope = Box<dyn FnOnce() + Send + 'static>;

/// Create a connected context/loop pair.
pub fn channel() -> (DispatchContext, DispatchLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchContext { tx }, DispatchLoop { rx })
}

/// Cloneable handle used to post messages to the dispatch loop.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl DispatchContext {
    /// Queue `message` for the dispatch loop.
    ///
    /// Returns `false` if the loop has been dropped; the message is discarded.
    pub fn post<F>(&self, message: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(message)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single consumer of a dispatch channel.
///
/// The blocking entry points must not be called from inside an async runtime.
pub struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl DispatchLoop {
    /// Deliver messages until every [`DispatchContext`] is dropped.
    pub async fn run(mut self) {
        while let Some(envelope) = self.rx.recv().await {
            deliver(envelope);
        }
        debug!("Dispatch loop finished: all contexts dropped");
    }

    /// Blocking variant of [`run`](Self::run).
    pub fn run_blocking(mut self) {
        while let Some(envelope) = self.rx.blocking_recv() {
            deliver(envelope);
        }
        debug!("Dispatch loop finished: all contexts dropped");
    }

    /// Run the loop on its own named thread.
    ///
    /// # Errors
    /// Returns `Err` if the thread cannot be spawned.
    pub fn spawn(self, name: impl Into<String>) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(name.into())
            .spawn(move || self.run_blocking())
    }

    /// Deliver whatever is queued right now without waiting for more.
    ///
    /// Returns the number of messages delivered.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            deliver(envelope);
            delivered += 1;
        }
        delivered
    }
}

fn deliver(envelope: Envelope) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(envelope)) {
        error!(
            "Dispatch callback panicked: {}",
            panic_payload_message(&*payload)
        );
    }
}

pub(crate) fn panic_payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else {
        "unknown panic".to_string()
    }
}
