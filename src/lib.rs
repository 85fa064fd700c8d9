//! # store-guard
//!
//! A layered facade over a record store that suffers from transient lock
//! contention.
//!
//! ## Layers
//!
//! - **[`BaseOperator`]:** CRUD operations backed by a bounded LRU memory cache
//!   and, optionally, a [`RecordStore`]
//! - **[`RetryOperator`]:** waits out `LockContention` errors and degrades any
//!   other failure to an empty result
//! - **[`AsyncOperator`]:** moves every call onto a dedicated worker thread and
//!   reports results to listeners, in call order, through a dispatch loop
//!
//! All three implement the same [`Operation`] trait and wrap each other by
//! composition.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use store_guard::{dispatch, AsyncOperator, BaseOperator, Operation, Source};
//!
//! #[derive(Clone, Debug)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! // 1. Base layer: key function and memory cache
//! let users = BaseOperator::new("users")
//!     .with_key_fn(|user: &User| user.id)
//!     .with_store(UserTable::open("app.db")?);
//! users.enable_memory_cache();
//!
//! // 2. Dispatch loop delivering completions
//! let (context, dispatch_loop) = dispatch::channel();
//! dispatch_loop.spawn("users-dispatch")?;
//!
//! // 3. Retry + async layers
//! let users = AsyncOperator::wrap(users, context);
//! users
//!     .on_listener(Arc::new(|count: usize, _: &Source<User>| println!("saved {}", count)))
//!     .save_or_update(&user)?;
//! ```

#[macro_use]
extern crate log;

pub mod async_operator;
pub mod base;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod operation;
pub mod record;
pub mod retry;
pub mod store;
mod worker;

// Re-exports for convenience
pub use async_operator::{AsyncOperator, OperationKind};
pub use base::BaseOperator;
pub use cache::BoundedCache;
pub use config::StoreConfig;
pub use dispatch::{DispatchContext, DispatchLoop};
pub use error::{Error, Result};
pub use listener::{Listener, ReadListener};
pub use operation::Operation;
pub use record::{KeyFn, Selector, Source};
pub use retry::RetryOperator;
pub use store::{InMemoryStore, RecordStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
