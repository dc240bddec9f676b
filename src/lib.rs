//! # ttlmap - A Concurrent Map with Self-Expiring Entries
//!
//! `ttlmap` is an in-memory, string-keyed map whose entries may carry a
//! time-to-live. Expired entries are removed by a background task the moment
//! they fall due, without anyone polling for them, and listeners are told
//! why each entry left the map.
//!
//! ## Features
//!
//! - **Exact expiry**: a min-heap of deadlines tells the reaper when to wake
//! - **Expire vs. evict**: separate listeners for timeouts and for
//!   overwrites / shutdown flushes
//! - **Insert policies**: overwrite, insert-only, or update-only writes
//! - **Orderly shutdown**: `drain` flushes every entry and stops the reaper
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TtlMap                                    │
//! │                                                                         │
//! │   get / len ──(read)──┐          set / delete ──(write)──┐              │
//! │                       ▼                                  ▼              │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         StorageEngine                            │  │
//! │  │   HashMap<key, Slot{entry, heap index}>  <──>  ExpiryHeap        │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                       ▲                                  │              │
//! │        sweep / flush  │                  wakeup/draining │              │
//! │                     ┌─┴──────────────────────────────────▼─┐            │
//! │                     │            ExpiryReaper              │            │
//! │                     │       (Background Tokio Task)        │            │
//! │                     └──────────────────────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use ttlmap::{Entry, MapOptions, TtlMap};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ttlmap::Result<()> {
//!     let options = MapOptions::new()
//!         .on_will_evict(|key, _: &Entry<u64>| println!("evicted: {}", key));
//!     let map = TtlMap::new(options)?;
//!
//!     map.insert("session", Entry::with_ttl(42, Duration::from_secs(30)))?;
//!     map.insert("config", Entry::persistent(7))?;
//!     assert_eq!(*map.get("session")?.value(), 42);
//!
//!     // Don't forget to drain the map when it is no longer needed
//!     map.drain().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: entries, the expiration heap, the locked store and the reaper
//! - [`TtlMap`]: the public map
//! - [`MapOptions`] / [`KeyExist`]: configuration and write policies
//! - [`Error`]: failure kinds
//!
//! ## Design Highlights
//!
//! ### One Lock, Two Indexes
//!
//! The hash map and the expiration heap change together under one `RwLock`.
//! Every slot remembers its position in the heap, so deleting or overwriting
//! any key is O(log n).
//!
//! ### Listeners Run Under the Lock
//!
//! Expire and evict listeners are called synchronously while the write lock
//! is held, so slow listeners delay every other writer. Listeners must not
//! call back into the map.

pub mod error;
mod map;
pub mod options;
pub mod storage;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use map::TtlMap;
pub use options::{KeyExist, Listener, MapOptions};
pub use storage::{Entry, Expiration};
