use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, trace};

use crate::{
    cancel::CancelToken,
    entry::{Generation, LoadEntry, Outcome},
    key::ResourceKey,
};

/// Stores at most one [`LoadEntry`] per key.
///
/// This is the deduplication and memory layer: repeated [`begin`](
/// Self::begin) calls for a key that is already pending or resolved
/// hand back the existing generation rather than starting anything new,
/// and [`commit`](Self::commit) only accepts the result of the latest
/// load actually started for a key.  The last load started determines
/// the stored result, regardless of the order in which loads complete.
///
/// The cache is a handle; clones share the same entries.  Every
/// operation is synchronous and runs under a single lock, so each one is
/// atomic with respect to every other operation on the same key.
pub struct LoadCache<K, V, E> {
    inner: Arc<Mutex<HashMap<K, Slot<V, E>>>>,
}

struct Slot<V, E> {
    // last generation assigned; 0 if nothing was ever started.
    generation: Generation,
    entry: Option<LoadEntry<V, E>>,
    // set by invalidating a pending entry; the next begin must not reuse it.
    stale: bool,
}

/// Whether a [`commit`](LoadCache::commit) was stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitStatus {
    /// The result settled the current generation.
    Applied,
    /// A newer load was started since, or the generation had already
    /// settled; the result was dropped.
    Discarded,
}

/// The atomic check-and-begin used by the coordinator.
pub(crate) enum Claim<V, E> {
    /// The key has settled; nothing to drive or join.
    Settled {
        generation: Generation,
        outcome: Outcome<V, E>,
    },
    /// A load of the given generation is already in flight.
    Joined(Generation),
    /// A new load was registered; the caller must drive it.
    Started {
        generation: Generation,
        cancel: CancelToken,
    },
}

/// Which rejections a [`claim`](LoadCache::claim) may replace with a new
/// load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Restart {
    /// Only loads that were cancelled; other failures stay until
    /// invalidated.
    Cancelled,
    /// Any rejection, as `begin` does.
    Rejected,
}

impl<V, E> Slot<V, E> {
    fn empty() -> Self {
        Self {
            generation: 0,
            entry: None,
            stale: false,
        }
    }

    fn start(&mut self) -> (Generation, CancelToken) {
        if let Some(LoadEntry::Pending { cancel, .. }) = &self.entry {
            // superseded; its result will be discarded anyway
            cancel.cancel();
        }
        self.generation += 1;
        let cancel = CancelToken::new();
        self.entry = Some(LoadEntry::Pending {
            generation: self.generation,
            cancel: cancel.clone(),
        });
        self.stale = false;
        (self.generation, cancel)
    }
}

impl<K, V, E> LoadCache<K, V, E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V, E> LoadCache<K, V, E>
where
    K: ResourceKey,
    V: Clone,
{
    /// Look up the entry for `key` without side effects.
    pub fn get(&self, key: &K) -> Option<LoadEntry<V, E>> {
        self.lock().get(key).and_then(|slot| slot.entry.clone())
    }

    /// Make sure a load is registered for `key` and return its generation.
    ///
    /// A pending or resolved entry is reused as is.  Otherwise, i.e. the
    /// key is absent, rejected or was invalidated, a new pending entry is
    /// created with the next generation.  Any pending load it replaces has
    /// its token cancelled.
    pub fn begin(&self, key: &K) -> Generation {
        match self.claim(key, Restart::Rejected) {
            Claim::Settled { generation, .. }
            | Claim::Joined(generation)
            | Claim::Started { generation, .. } => generation,
        }
    }

    /// Like `begin`, but reports whether the caller has to drive a new
    /// load, join one in flight, or can take the settled outcome as is.
    pub(crate) fn claim(&self, key: &K, restart: Restart) -> Claim<V, E> {
        let mut map = self.lock();
        let slot = map.entry(key.clone()).or_insert_with(Slot::empty);
        if !slot.stale {
            match &slot.entry {
                Some(LoadEntry::Pending { generation, .. }) => {
                    trace!(?key, generation, "joining load in flight");
                    return Claim::Joined(*generation);
                }
                Some(LoadEntry::Resolved { value, generation }) => {
                    return Claim::Settled {
                        generation: *generation,
                        outcome: Ok(value.clone()),
                    }
                }
                Some(LoadEntry::Rejected { error, generation })
                    if restart == Restart::Cancelled && !error.is_cancelled() =>
                {
                    return Claim::Settled {
                        generation: *generation,
                        outcome: Err(error.clone()),
                    }
                }
                _ => (),
            }
        }
        let (generation, cancel) = slot.start();
        debug!(?key, generation, "load started");
        Claim::Started { generation, cancel }
    }

    /// Settle the load of `generation` for `key` with `result`.
    ///
    /// Only applied if `generation` is the pending generation of the key;
    /// a stale result never overwrites a newer or already settled entry.
    pub fn commit(&self, key: &K, generation: Generation, result: Outcome<V, E>) -> CommitStatus {
        let mut map = self.lock();
        let Some(slot) = map.get_mut(key) else {
            debug!(?key, generation, "discarding result for unknown key");
            return CommitStatus::Discarded;
        };
        match &slot.entry {
            Some(LoadEntry::Pending {
                generation: current,
                ..
            }) if *current == generation => (),
            _ => {
                debug!(
                    ?key,
                    generation,
                    current = slot.generation,
                    "discarding stale result"
                );
                return CommitStatus::Discarded;
            }
        }
        slot.entry = Some(match result {
            Ok(value) => LoadEntry::Resolved { value, generation },
            Err(error) => LoadEntry::Rejected { error, generation },
        });
        debug!(?key, generation, "load settled");
        CommitStatus::Applied
    }

    /// Force the next `begin` for `key` to start a new generation.
    ///
    /// A settled entry is dropped outright.  A pending entry is kept so
    /// its waiters still get notified, but is marked as stale.  Returns
    /// whether there was anything to invalidate.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut map = self.lock();
        let Some(slot) = map.get_mut(key) else {
            return false;
        };
        match slot.entry {
            Some(LoadEntry::Pending { .. }) => slot.stale = true,
            Some(_) => {
                slot.entry = None;
                slot.stale = false;
            }
            None => return false,
        }
        debug!(?key, generation = slot.generation, "invalidated");
        true
    }

    /// The last generation started for `key`; 0 if none ever was.
    pub fn generation(&self, key: &K) -> Generation {
        self.lock().get(key).map_or(0, |slot| slot.generation)
    }

    /// Whether the entry for `key` was invalidated while still pending.
    pub fn is_stale(&self, key: &K) -> bool {
        self.lock().get(key).is_some_and(|slot| slot.stale)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|slot| slot.entry.is_some())
    }

    /// Number of keys currently holding an entry.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, E> LoadCache<K, V, E>
where
    K: ResourceKey,
{
    /// Signal the token of the pending load for `key`, if there is one.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().get(key).and_then(|slot| slot.entry.as_ref()) {
            Some(LoadEntry::Pending { generation, cancel }) => {
                debug!(?key, generation, "cancelling load");
                cancel.cancel();
                true
            }
            _ => false,
        }
    }
}

impl<K, V, E> Clone for LoadCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> Default for LoadCache<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> fmt::Debug for LoadCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.lock();
        f.debug_struct("LoadCache")
            .field("keys", &map.len())
            .field(
                "pending",
                &map.values()
                    .filter(|slot| matches!(slot.entry, Some(LoadEntry::Pending { .. })))
                    .count(),
            )
            .finish()
    }
}
