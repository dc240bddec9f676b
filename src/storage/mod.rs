//! Storage Engine Module
//!
//! This module provides the machinery behind [`TtlMap`](crate::TtlMap): the
//! entry type, the expiration heap, the locked keyed store, and the reaper
//! task that removes entries as they expire.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌───────────────────────┐     ┌───────────────────────┐    │
//! │  │ HashMap<key, Slot>    │<───>│ ExpiryHeap (min by    │    │
//! │  │ (lookup by key)       │     │ deadline)             │    │
//! │  └───────────────────────┘     └───────────────────────┘    │
//! │                 one RwLock guards both                      │
//! └─────────────────────────────────────────────────────────────┘
//!              ▲                              │ wakeup / draining
//!              │ sweep, flush                 ▼
//!              ┌──────────────────────────────┐
//!              │        ExpiryReaper          │
//!              │   (Background Tokio Task)    │
//!              └──────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **O(1) lookup**: keyed access through a `HashMap`
//! - **O(log n) expiry bookkeeping**: insert and remove-any on the heap
//! - **Exact wakeups**: the reaper sleeps until the soonest deadline
//! - **Orderly shutdown**: draining flushes every entry through the listeners
//!
//! ## Example
//!
//! ```
//! use ttlmap::storage::{Entry, Expiration};
//! use std::time::Duration;
//!
//! let session = Entry::new("token123", Expiration::After(Duration::from_secs(3600)));
//! assert!(session.expires());
//! assert!(!session.is_expired());
//!
//! let config = Entry::persistent("debug=false");
//! assert_eq!(config.ttl(), Duration::MAX);
//! ```

pub mod entry;
pub(crate) mod engine;
pub(crate) mod expiry;
pub(crate) mod heap;

// Re-export commonly used types
pub use entry::{Entry, Expiration};
pub(crate) use engine::StorageEngine;
pub(crate) use expiry::ExpiryReaper;
