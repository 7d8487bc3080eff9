//! gitmill - turns git history into activity events.
//!
//! Workers claim repositories from a shared registry table, clone just
//! enough history to cover what changed since the last run, derive one
//! activity per contribution found in each commit (authorship, commits on
//! behalf of others, and credit trailers such as `Signed-off-by:`), and
//! publish those activities to a message broker.
//!
//! # Features
//!
//! - `postgres` / `sqlite` - database backends.
//! - `migrate` - schema migrations and [`connect_and_migrate`].
//! - `redis` - the Redis Streams broker.
//! - `http-classifier` - the HTTP maintainer classifier.
//!
//! # Example
//!
//! ```ignore
//! use gitmill::{connect_and_migrate, queue::QueueService, worker::RepositoryWorker};
//!
//! let db = Arc::new(connect_and_migrate("sqlite://gitmill.db?mode=rwc").await?);
//! let worker = RepositoryWorker::new(
//!     Arc::clone(&db),
//!     clone,
//!     commits,
//!     maintainer,
//!     software_value,
//!     queue,
//!     options,
//! );
//! worker.run(cancel).await?;
//! ```

pub mod clone;
pub mod commit;
pub mod db;
pub mod entity;
pub mod error;
pub mod maintainer;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod software_value;
pub mod vcs;
pub mod worker;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::{DatabaseOptions, connect, connect_with};
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use error::{Error, Result};
