//! Module version ledger backed by Fjall
//!
//! Tracks every module version announced by the upstream index, the outcome
//! of each processing attempt at module and package granularity, and when a
//! version is due to be processed again.
//!
//! ## Components
//!
//! - Index ledger (`index`): raw (path, version, timestamp) announcements
//! - Version state store (`versions`): one state machine per module version,
//!   plus the package rows of its latest attempt
//! - Fetch scheduler (`scheduler`): eligible versions, newest first, with an
//!   optional lease-based claim
//! - Stats (`stats`): status histogram, recent failures, manual re-queue
//!
//! Synchronous operations live on [`FjallStore`]; async callers go through
//! [`VersionStateStore`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fetchledger::ledger::{FjallStore, OpContext};
//!
//! let store = FjallStore::open("data/ledger")?;
//! let ctx = OpContext::background();
//! for state in store.get_next_modules_to_fetch(&ctx, 100)? {
//!     // fetch, process, then record the attempt
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod context;
pub mod error;
mod index;
pub mod partitions;
mod scheduler;
pub mod service;
mod stats;
pub mod store;
mod versions;

pub use backoff::{RetryPolicy, SuccessPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::OpContext;
pub use error::{ErrorKind, Result, StoreError};
pub use service::{LedgerService, ReadOnlyLedger, VersionStateStore};
pub use store::{FjallStore, StoreCounts};
