use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::oneshot::{channel, Receiver, Sender};
use tracing::{debug, trace};

use crate::{
    cache::{Claim, CommitStatus, LoadCache, Restart},
    cancel::CancelToken,
    entry::{Generation, LoadError, Outcome},
    key::ResourceKey,
};

/// Tells consumers when the entry for a key leaves the pending state.
///
/// Consumers register interest through [`subscribe`](Self::subscribe)
/// and wait on the returned [`Subscription`]; after a commit,
/// [`notify`](Self::notify) hands the settled outcome to every waiter
/// registered for the key, in the order they registered, and then forgets
/// them.  A subscription taken out after the key has settled never waits.
///
/// Registration and notification are serialized under the gate's lock,
/// and both consult the cache while holding it, so a settlement can never
/// slip in between "checked, still pending" and "registered".  The
/// [`RequestCoordinator`](crate::RequestCoordinator) goes one step further
/// and claims, commits and notifies under that same lock, so that neither
/// an invalidation nor a new load can come between a commit and the
/// waiters it settles.
pub struct SuspenseGate<K, V, E> {
    inner: Arc<SuspenseGateInner<K, V, E>>,
}

struct SuspenseGateInner<K, V, E> {
    cache: LoadCache<K, V, E>,
    waiters: Mutex<Waiters<K, V, E>>,
    cancel_unobserved: bool,
}

struct Waiters<K, V, E> {
    next_id: u64,
    by_key: HashMap<K, Vec<Waiter<V, E>>>,
}

struct Waiter<V, E> {
    id: u64,
    sender: Sender<Outcome<V, E>>,
}

/// A consumer's registration at a [`SuspenseGate`] for a single key.
///
/// Dropping the subscription, or calling [`withdraw`](Self::withdraw),
/// removes only this consumer's interest; the load itself carries on for
/// everyone else.
#[must_use = "a subscription does nothing unless waited on"]
pub struct Subscription<K: ResourceKey, V, E> {
    state: SubscriptionState<K, V, E>,
}

enum SubscriptionState<K: ResourceKey, V, E> {
    Settled(Outcome<V, E>),
    Waiting(Registration<K, V, E>),
}

struct Registration<K: ResourceKey, V, E> {
    gate: SuspenseGate<K, V, E>,
    key: K,
    id: u64,
    receiver: Receiver<Outcome<V, E>>,
}

impl<K, V, E> SuspenseGate<K, V, E> {
    pub fn new(cache: LoadCache<K, V, E>) -> Self {
        Self::with_cancel_unobserved(cache, false)
    }

    /// With `cancel_unobserved` set, the pending load of a key is
    /// cancelled once its last waiter withdraws.
    pub fn with_cancel_unobserved(cache: LoadCache<K, V, E>, cancel_unobserved: bool) -> Self {
        Self {
            inner: SuspenseGateInner {
                cache,
                waiters: Mutex::new(Waiters {
                    next_id: 0,
                    by_key: HashMap::new(),
                }),
                cancel_unobserved,
            }
            .into(),
        }
    }

    pub fn cache(&self) -> &LoadCache<K, V, E> {
        &self.inner.cache
    }

    fn lock(&self) -> MutexGuard<'_, Waiters<K, V, E>> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V, E> SuspenseGate<K, V, E>
where
    K: ResourceKey,
    V: Clone,
{
    /// Register interest in `key`.
    ///
    /// If the key has already settled the subscription carries that
    /// outcome and will not wait.  Note that a subscription for a key
    /// nobody is loading waits until someone does.
    pub fn subscribe(&self, key: K) -> Subscription<K, V, E> {
        let mut waiters = self.lock();
        if let Some(outcome) = self.inner.cache.get(&key).and_then(|entry| entry.outcome()) {
            return Subscription::settled(outcome);
        }
        self.register(&mut waiters, key)
    }

    /// Wait for `key` to settle and return its outcome.
    pub async fn wait(&self, key: K) -> Outcome<V, E> {
        self.subscribe(key).wait().await
    }

    /// Hand the settled outcome of `key` to all of its current waiters
    /// and clear them, returning how many were woken.
    ///
    /// Does nothing while the key is still pending, so waiters are never
    /// released early, and a repeated call finds nobody left to wake.
    pub fn notify(&self, key: &K) -> usize {
        let mut waiters = self.lock();
        let Some(outcome) = self.inner.cache.get(key).and_then(|entry| entry.outcome()) else {
            trace!(?key, "not settled, nobody to notify");
            return 0;
        };
        Self::release(&mut waiters, key, outcome)
    }

    /// Number of waiters currently registered for `key`.
    pub fn waiters(&self, key: &K) -> usize {
        self.lock().by_key.get(key).map_or(0, Vec::len)
    }

    /// Claim `key` in the cache and subscribe to it in one step.
    ///
    /// The subscription only waits if a load is in flight for the key,
    /// and a newly started load is handed back to be driven.
    pub(crate) fn claim(
        &self,
        key: K,
        restart: Restart,
    ) -> (Subscription<K, V, E>, Option<(Generation, CancelToken)>) {
        let mut waiters = self.lock();
        match self.inner.cache.claim(&key, restart) {
            Claim::Settled { outcome, .. } => (Subscription::settled(outcome), None),
            Claim::Joined(_) => (self.register(&mut waiters, key), None),
            Claim::Started { generation, cancel } => (
                self.register(&mut waiters, key),
                Some((generation, cancel)),
            ),
        }
    }

    /// Commit `result` for `generation` and, if it was applied, hand it to
    /// the waiters of `key` before anything else can touch the key.
    pub(crate) fn settle(
        &self,
        key: &K,
        generation: Generation,
        result: Outcome<V, E>,
    ) -> CommitStatus {
        let mut waiters = self.lock();
        let outcome = result.clone();
        let status = self.inner.cache.commit(key, generation, result);
        if status == CommitStatus::Applied {
            Self::release(&mut waiters, key, outcome);
        }
        status
    }

    fn register(&self, waiters: &mut Waiters<K, V, E>, key: K) -> Subscription<K, V, E> {
        let id = waiters.next_id;
        waiters.next_id += 1;
        let (sender, receiver) = channel();
        waiters
            .by_key
            .entry(key.clone())
            .or_default()
            .push(Waiter { id, sender });
        trace!(?key, id, "waiter registered");
        Subscription {
            state: SubscriptionState::Waiting(Registration {
                gate: self.clone(),
                key,
                id,
                receiver,
            }),
        }
    }

    fn release(waiters: &mut Waiters<K, V, E>, key: &K, outcome: Outcome<V, E>) -> usize {
        let Some(list) = waiters.by_key.remove(key) else {
            return 0;
        };
        let count = list.len();
        for waiter in list {
            // a receiver mid-withdrawal is simply gone
            let _ = waiter.sender.send(outcome.clone());
        }
        debug!(?key, count, "notified waiters");
        count
    }
}

impl<K: ResourceKey, V, E> Subscription<K, V, E> {
    fn settled(outcome: Outcome<V, E>) -> Self {
        Self {
            state: SubscriptionState::Settled(outcome),
        }
    }

    /// Whether the outcome was already available at subscription time.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, SubscriptionState::Settled(_))
    }

    /// Wait for the settlement of the key.
    ///
    /// Returns immediately if the key had settled by the time this
    /// subscription was taken out.
    pub async fn wait(self) -> Outcome<V, E> {
        match self.state {
            SubscriptionState::Settled(outcome) => outcome,
            SubscriptionState::Waiting(mut registration) => (&mut registration.receiver)
                .await
                .unwrap_or(Err(LoadError::Abandoned)),
        }
    }

    /// Withdraw interest without waiting, same as dropping.
    pub fn withdraw(self) {
        drop(self)
    }
}

impl<K: ResourceKey, V, E> Drop for Registration<K, V, E> {
    fn drop(&mut self) {
        self.gate.withdraw(&self.key, self.id);
    }
}

impl<K, V, E> SuspenseGate<K, V, E>
where
    K: ResourceKey,
{
    fn withdraw(&self, key: &K, id: u64) {
        let mut waiters = self.lock();
        let Some(list) = waiters.by_key.get_mut(key) else {
            return;
        };
        let before = list.len();
        list.retain(|waiter| waiter.id != id);
        if list.len() == before {
            return;
        }
        trace!(?key, id, "waiter withdrawn");
        if list.is_empty() {
            waiters.by_key.remove(key);
            if self.inner.cancel_unobserved && self.inner.cache.cancel(key) {
                debug!(?key, "last waiter withdrawn, load cancelled");
            }
        }
    }
}

impl<K, V, E> Clone for SuspenseGate<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> fmt::Debug for SuspenseGate<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let waiters = self.lock();
        f.debug_struct("SuspenseGate")
            .field("keys", &waiters.by_key.len())
            .field(
                "waiters",
                &waiters.by_key.values().map(Vec::len).sum::<usize>(),
            )
            .field("cancel_unobserved", &self.inner.cancel_unobserved)
            .finish()
    }
}

impl<K: ResourceKey, V, E> fmt::Debug for Subscription<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            SubscriptionState::Settled(_) => f
                .debug_struct("Subscription")
                .field("settled", &true)
                .finish(),
            SubscriptionState::Waiting(registration) => f
                .debug_struct("Subscription")
                .field("key", &registration.key)
                .field("id", &registration.id)
                .field("settled", &false)
                .finish(),
        }
    }
}
