//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the core storage engine behind [`TtlMap`](crate::TtlMap).
//! It couples a keyed store with an expiration heap under a single lock.
//!
//! ## Design Decisions
//!
//! 1. **One lock domain**: the hash map, the heap and the drained flag change
//!    together, so one `RwLock` guards all three. Readers (`get`, `len`) share
//!    it; writers and the reaper take it exclusively.
//! 2. **Recorded heap positions**: each slot in the hash map remembers where
//!    its key sits in the heap array, so removing any key costs O(log n).
//! 3. **Listeners under the lock**: expire/evict listeners run while the write
//!    lock is held. Their running time adds directly to the critical section.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    RwLock<Store>                             │
//! │  ┌──────────────────────────┐   ┌─────────────────────────┐  │
//! │  │ HashMap<key, Slot>       │   │ ExpiryHeap              │  │
//! │  │   Slot { entry, index } ─┼──>│   [key, deadline] ...   │  │
//! │  └──────────────────────────┘   └─────────────────────────┘  │
//! │  drained: bool                                               │
//! └──────────────────────────────────────────────────────────────┘
//!   wakeup: Notify          (coalesced "heap root may have moved")
//!   draining: watch<bool>   (flips once, when drain begins)
//! ```

use crate::error::{Error, Result};
use crate::options::{KeyExist, Listener, MapOptions};
use crate::storage::entry::Entry;
use crate::storage::heap::{ExpiryHeap, HeapSlot};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tracing::debug;

/// A stored entry plus its current position in the expiration heap.
#[derive(Debug)]
struct Slot<V> {
    entry: Entry<V>,
    index: usize,
}

/// Why an entry left the map through a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Expired,
    Evicted,
}

/// Keyed store and expiration heap, kept in 1:1 correspondence.
///
/// Not synchronized on its own; [`StorageEngine`] wraps it in a lock.
#[derive(Debug)]
pub(crate) struct Store<V> {
    slots: HashMap<Arc<str>, Slot<V>>,
    heap: ExpiryHeap,
    drained: bool,
}

impl<V> Store<V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            heap: ExpiryHeap::with_capacity(capacity),
            drained: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.drained
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Entry<V>> {
        self.slots.get(key).map(|slot| &slot.entry)
    }

    /// Inserts an entry under a key that must be absent.
    ///
    /// Returns the heap position the new slot settled at.
    pub(crate) fn insert(&mut self, key: &str, entry: Entry<V>) -> usize {
        debug_assert!(!self.slots.contains_key(key), "insert over live key");

        let key: Arc<str> = Arc::from(key);
        let deadline = entry.expires_at();
        self.slots.insert(Arc::clone(&key), Slot { entry, index: 0 });

        let slots = &mut self.slots;
        self.heap
            .push(HeapSlot::new(key, deadline), &mut |key, index| {
                if let Some(slot) = slots.get_mut(key) {
                    slot.index = index;
                }
            })
    }

    /// Removes a key from both structures.
    ///
    /// Returns the owned key, the entry, and the heap position it held.
    pub(crate) fn remove(&mut self, key: &str) -> Option<(Arc<str>, Entry<V>, usize)> {
        let (key, slot) = self.slots.remove_entry(key)?;

        let slots = &mut self.slots;
        self.heap.remove(slot.index, &mut |key, index| {
            if let Some(slot) = slots.get_mut(key) {
                slot.index = index;
            }
        });

        Some((key, slot.entry, slot.index))
    }

    /// Returns the key and entry at the heap root.
    pub(crate) fn peek(&self) -> Option<(&Arc<str>, &Entry<V>)> {
        let root = self.heap.peek()?;
        self.slots
            .get_key_value(&root.key)
            .map(|(key, slot)| (key, &slot.entry))
    }

    /// Returns the soonest expiration among timed entries.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().and_then(|root| root.deadline)
    }

    /// Removes the root entry if it is due at `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<(Arc<str>, Entry<V>)> {
        let due = self.peek().is_some_and(|(_, entry)| entry.is_expired_at(now));
        if due {
            self.pop_front()
        } else {
            None
        }
    }

    /// Removes the root entry regardless of its deadline.
    pub(crate) fn pop_front(&mut self) -> Option<(Arc<str>, Entry<V>)> {
        let key = Arc::clone(&self.heap.peek()?.key);
        self.remove(&key).map(|(key, entry, _)| (key, entry))
    }

    /// Verifies the store/heap correspondence and heap order.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.slots.len(), self.heap.len());
        for (key, slot) in &self.slots {
            let heap_slot = self.heap.get(slot.index).expect("recorded index in bounds");
            assert_eq!(&heap_slot.key, key);
            assert_eq!(heap_slot.deadline, slot.entry.expires_at());
        }
        if let Some(min) = self.next_deadline() {
            for slot in self.slots.values() {
                if let Some(deadline) = slot.entry.expires_at() {
                    assert!(min <= deadline);
                }
            }
        }
    }
}

/// The pair of listeners configured on a map.
struct Listeners<V> {
    on_will_expire: Option<Listener<V>>,
    on_will_evict: Option<Listener<V>>,
}

impl<V> Listeners<V> {
    /// Reports a removed entry, preferring expire when it is overdue.
    fn dispose(&self, key: &str, entry: &Entry<V>, now: Instant) -> Removal {
        if entry.is_expired_at(now) {
            if let Some(listener) = &self.on_will_expire {
                listener(key, entry);
            }
            Removal::Expired
        } else {
            if let Some(listener) = &self.on_will_evict {
                listener(key, entry);
            }
            Removal::Evicted
        }
    }
}

/// Shared state between a [`TtlMap`](crate::TtlMap) and its reaper.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared between caller threads and
/// the reaper task. All operations are thread-safe.
pub(crate) struct StorageEngine<V> {
    store: RwLock<Store<V>>,
    listeners: Listeners<V>,
    /// Wakes the reaper when the heap root may have changed
    wakeup: Notify,
    /// Flips to `true` exactly once, when draining begins
    draining: watch::Sender<bool>,
}

impl<V> std::fmt::Debug for StorageEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("len", &self.len())
            .field("draining", &*self.draining.borrow())
            .finish()
    }
}

impl<V> StorageEngine<V> {
    pub(crate) fn new(options: MapOptions<V>) -> Self {
        let (draining, _) = watch::channel(false);
        Self {
            store: RwLock::new(Store::with_capacity(options.initial_capacity)),
            listeners: Listeners {
                on_will_expire: options.on_will_expire,
                on_will_evict: options.on_will_evict,
            },
            wakeup: Notify::new(),
            draining,
        }
    }

    // A listener that panicked left the lock poisoned, but the structures
    // were already updated before it ran.
    fn read(&self) -> RwLockReadGuard<'_, Store<V>> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store<V>> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    /// Looks up a key, reporting `NotFound` once draining has begun.
    pub(crate) fn get(&self, key: &str) -> Result<Entry<V>>
    where
        V: Clone,
    {
        let store = self.read();
        if store.is_drained() {
            return Err(Error::NotFound(key.to_string()));
        }
        store
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Writes an entry under `key` according to `mode`.
    ///
    /// A superseded entry is reported through the expire or evict listener
    /// before the new one becomes visible. If that listener panics, the old
    /// entry stays removed and the new one is never inserted.
    pub(crate) fn set(&self, key: &str, entry: Entry<V>, mode: KeyExist) -> Result<()> {
        let mut store = self.write();
        if store.is_drained() {
            return Err(Error::Drained);
        }

        match (store.contains(key), mode) {
            (true, KeyExist::MustNotExist) => {
                return Err(Error::AlreadyExists(key.to_string()))
            }
            (false, KeyExist::MustExist) => return Err(Error::NotFound(key.to_string())),
            _ => {}
        }

        let mut root_changed = false;
        if let Some((old_key, old_entry, index)) = store.remove(key) {
            root_changed = index == 0;
            self.listeners.dispose(&old_key, &old_entry, Instant::now());
        }

        if store.insert(key, entry) == 0 {
            root_changed = true;
        }
        drop(store);

        if root_changed {
            self.wakeup.notify_one();
        }
        Ok(())
    }

    /// Removes a key without notifying any listener.
    pub(crate) fn delete(&self, key: &str) -> Result<Entry<V>> {
        let mut store = self.write();
        if store.is_drained() {
            return Err(Error::NotFound(key.to_string()));
        }

        let (_, entry, index) = store
            .remove(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        drop(store);

        if index == 0 {
            self.wakeup.notify_one();
        }
        Ok(entry)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.read().next_deadline()
    }

    /// Expires every overdue entry at the heap root, soonest first.
    ///
    /// Returns how many entries were expired.
    pub(crate) fn sweep_expired(&self) -> usize {
        let mut store = self.write();
        let mut expired = 0;
        while let Some((key, entry)) = store.pop_expired(Instant::now()) {
            if let Some(listener) = &self.listeners.on_will_expire {
                listener(&key, &entry);
            }
            expired += 1;
        }
        expired
    }

    /// Marks the store drained and raises the draining signal.
    ///
    /// Returns `false` if draining had already begun.
    pub(crate) fn begin_drain(&self) -> bool {
        let mut store = self.write();
        if store.drained {
            return false;
        }
        store.drained = true;
        self.draining.send_replace(true);
        debug!(remaining = store.len(), "Draining map");
        true
    }

    /// Removes every remaining entry, soonest first, through the listeners.
    ///
    /// Returns how many entries were expired and how many were evicted.
    pub(crate) fn flush(&self) -> (usize, usize) {
        let mut store = self.write();
        let (mut expired, mut evicted) = (0, 0);
        while let Some((key, entry)) = store.pop_front() {
            match self.listeners.dispose(&key, &entry, Instant::now()) {
                Removal::Expired => expired += 1,
                Removal::Evicted => evicted += 1,
            }
        }
        (expired, evicted)
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    pub(crate) fn subscribe_draining(&self) -> watch::Receiver<bool> {
        self.draining.subscribe()
    }

    pub(crate) fn is_draining(&self) -> bool {
        *self.draining.borrow()
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        self.read().assert_consistent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<(String, Removal)>>>;

    fn engine_with_log<V: 'static>() -> (StorageEngine<V>, Log) {
        let log: Log = Arc::default();
        let expired = Arc::clone(&log);
        let evicted = Arc::clone(&log);
        let options = MapOptions::new()
            .on_will_expire(move |key, _| {
                expired.lock().unwrap().push((key.to_string(), Removal::Expired))
            })
            .on_will_evict(move |key, _| {
                evicted.lock().unwrap().push((key.to_string(), Removal::Evicted))
            });
        (StorageEngine::new(options), log)
    }

    fn past() -> Instant {
        Instant::now() - Duration::from_millis(50)
    }

    #[test]
    fn test_store_insert_remove_keeps_correspondence() {
        let mut store = Store::with_capacity(8);
        let base = Instant::now() + Duration::from_secs(60);

        for i in 0..32u64 {
            let offset = (i * 13) % 32;
            let entry = Entry::expiring_at(offset, base + Duration::from_millis(offset));
            store.insert(&format!("k{}", offset), entry);
            store.assert_consistent();
        }
        store.insert("forever", Entry::persistent(0));
        store.assert_consistent();

        for i in (0..32u64).step_by(5) {
            let (key, entry, _) = store.remove(&format!("k{}", i)).unwrap();
            assert_eq!(&*key, format!("k{}", i));
            assert_eq!(*entry.value(), i);
            store.assert_consistent();
        }
        assert!(store.remove("k0").is_none());
        assert_eq!(store.len(), 32 + 1 - 7);
    }

    #[test]
    fn test_store_peek_and_pop_order() {
        let mut store = Store::with_capacity(0);
        let base = Instant::now() + Duration::from_secs(60);

        store.insert("forever", Entry::persistent("p"));
        store.insert("b", Entry::expiring_at("b", base + Duration::from_millis(2)));
        store.insert("a", Entry::expiring_at("a", base + Duration::from_millis(1)));

        let (key, entry) = store.peek().unwrap();
        assert_eq!(&**key, "a");
        assert_eq!(*entry.value(), "a");
        assert_eq!(store.next_deadline(), Some(base + Duration::from_millis(1)));

        let keys: Vec<String> = std::iter::from_fn(|| store.pop_front())
            .map(|(key, _)| key.to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "forever"]);
        assert!(store.peek().is_none());
        assert_eq!(store.next_deadline(), None);
    }

    #[test]
    fn test_store_pop_expired_stops_at_future() {
        let mut store = Store::with_capacity(0);
        store.insert("old", Entry::expiring_at(1, past()));
        store.insert("new", Entry::with_ttl(2, Duration::from_secs(60)));
        store.insert("forever", Entry::persistent(3));

        let now = Instant::now();
        let popped = store.pop_expired(now).map(|(key, _)| key.to_string());
        assert_eq!(popped.as_deref(), Some("old"));
        assert!(store.pop_expired(now).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_persistent_root_is_not_a_deadline() {
        let mut store = Store::with_capacity(0);
        store.insert("forever", Entry::persistent(()));

        assert_eq!(store.next_deadline(), None);
        assert!(store.pop_expired(Instant::now()).is_none());
    }

    #[test]
    fn test_set_policies() {
        let (engine, _) = engine_with_log();

        engine
            .set("a", Entry::persistent("v1"), KeyExist::MustNotExist)
            .unwrap();
        assert_eq!(
            engine.set("a", Entry::persistent("v2"), KeyExist::MustNotExist),
            Err(Error::AlreadyExists("a".into()))
        );
        assert_eq!(*engine.get("a").unwrap().value(), "v1");

        assert_eq!(
            engine.set("b", Entry::persistent("v"), KeyExist::MustExist),
            Err(Error::NotFound("b".into()))
        );
        assert_eq!(engine.len(), 1);

        engine
            .set("a", Entry::persistent("v3"), KeyExist::MustExist)
            .unwrap();
        assert_eq!(*engine.get("a").unwrap().value(), "v3");
        engine.assert_consistent();
    }

    #[test]
    fn test_overwrite_evicts_live_entry() {
        let (engine, log) = engine_with_log();

        let hello = Entry::with_ttl("hello", Duration::from_secs(1));
        engine.set("foo", hello, KeyExist::DontCare).unwrap();
        assert!(log.lock().unwrap().is_empty());

        let world = Entry::with_ttl("world", Duration::from_secs(2));
        engine.set("foo", world, KeyExist::DontCare).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![("foo".to_string(), Removal::Evicted)]);
        assert_eq!(*engine.get("foo").unwrap().value(), "world");
    }

    #[test]
    fn test_overwrite_expires_overdue_entry() {
        let (engine, log) = engine_with_log();

        let stale = Entry::expiring_at("stale", past());
        engine.set("foo", stale, KeyExist::DontCare).unwrap();
        engine.set("foo", Entry::persistent("fresh"), KeyExist::DontCare).unwrap();

        assert_eq!(*log.lock().unwrap(), vec![("foo".to_string(), Removal::Expired)]);
    }

    #[test]
    fn test_delete_is_silent() {
        let (engine, log) = engine_with_log();

        let overdue = Entry::expiring_at("v", past());
        engine.set("foo", overdue, KeyExist::DontCare).unwrap();
        assert_eq!(*engine.delete("foo").unwrap().value(), "v");
        assert_eq!(engine.delete("foo"), Err(Error::NotFound("foo".into())));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_sweep_expires_only_overdue_in_order() {
        let (engine, log) = engine_with_log();
        let base = past();

        let entries = [
            ("second", Entry::expiring_at(2, base + Duration::from_millis(2))),
            ("first", Entry::expiring_at(1, base + Duration::from_millis(1))),
            ("later", Entry::with_ttl(3, Duration::from_secs(60))),
            ("forever", Entry::persistent(4)),
        ];
        for (key, entry) in entries {
            engine.set(key, entry, KeyExist::DontCare).unwrap();
        }

        assert_eq!(engine.sweep_expired(), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("first".to_string(), Removal::Expired),
                ("second".to_string(), Removal::Expired),
            ]
        );
        assert_eq!(engine.len(), 2);
        engine.assert_consistent();
    }

    #[test]
    fn test_drain_flushes_and_rejects() {
        let (engine, log) = engine_with_log();

        let overdue = Entry::expiring_at(1, past());
        engine.set("overdue", overdue, KeyExist::DontCare).unwrap();
        engine.set("forever", Entry::persistent(2), KeyExist::DontCare).unwrap();

        assert!(engine.begin_drain());
        assert!(!engine.begin_drain());
        assert!(engine.is_draining());

        assert!(matches!(engine.get("forever"), Err(Error::NotFound(_))));
        assert!(matches!(engine.delete("forever"), Err(Error::NotFound(_))));
        assert_eq!(
            engine.set("x", Entry::persistent(3), KeyExist::DontCare),
            Err(Error::Drained)
        );

        assert_eq!(engine.flush(), (1, 1));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ("overdue".to_string(), Removal::Expired),
                ("forever".to_string(), Removal::Evicted),
            ]
        );
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_root_changes_signal_wakeup() {
        let (engine, _) = engine_with_log();
        let far = Duration::from_secs(60);

        engine.set("a", Entry::with_ttl(1, far), KeyExist::DontCare).unwrap();
        // The permit from the first insert is stored until someone waits.
        let mut notified = tokio_test::task::spawn(engine.wakeup().notified());
        tokio_test::assert_ready!(notified.poll());

        engine.set("b", Entry::with_ttl(2, far * 2), KeyExist::DontCare).unwrap();
        let mut notified = tokio_test::task::spawn(engine.wakeup().notified());
        tokio_test::assert_pending!(notified.poll());
        drop(notified);

        engine.delete("a").unwrap();
        let mut notified = tokio_test::task::spawn(engine.wakeup().notified());
        tokio_test::assert_ready!(notified.poll());
    }

    #[test]
    fn test_panicking_listener_loses_the_write() {
        let options = MapOptions::new().on_will_evict(|key: &str, _: &Entry<u32>| {
            panic!("evict listener failed on {}", key)
        });
        let engine = StorageEngine::new(options);
        engine.set("a", Entry::persistent(1), KeyExist::DontCare).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.set("a", Entry::persistent(2), KeyExist::DontCare)
        }));
        assert!(result.is_err());

        // Neither the old nor the new entry survives, and the lock is usable.
        assert_eq!(engine.get("a"), Err(Error::NotFound("a".into())));
        assert_eq!(engine.len(), 0);
        engine.assert_consistent();
        engine.set("a", Entry::persistent(3), KeyExist::MustNotExist).unwrap();
        assert_eq!(*engine.get("a").unwrap().value(), 3);
    }
}
