use std::{fmt, marker::PhantomData, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tracing::{debug_span, trace, warn, Instrument};

use crate::{
    cache::{Claim, CommitStatus, LoadCache, Restart},
    cancel::CancelToken,
    entry::{Generation, LoadEntry, LoadError, Outcome},
    gate::{Subscription, SuspenseGate},
    key::ResourceKey,
    transport::Transport,
};

type Cache<K, T> = LoadCache<K, <T as Transport<K>>::Value, <T as Transport<K>>::Error>;
type Gate<K, T> = SuspenseGate<K, <T as Transport<K>>::Value, <T as Transport<K>>::Error>;

/// Issues loads through a [`Transport`] and delivers their outcome.
///
/// Any number of consumers may [`resolve`](Self::resolve) the same key
/// concurrently; only the first one to find the key absent starts a load,
/// everyone else joins it through the [`SuspenseGate`].  Each load is
/// tagged with the generation it was started under and only committed to
/// the [`LoadCache`] if that generation is still current, so a superseded
/// load can never overwrite a fresher result.
///
/// Failures are committed as rejections and handed to every consumer of
/// that generation; nothing is retried until the key is invalidated.
///
/// Loads are driven on tasks spawned onto the global
/// [`Executor`](leptos::task::Executor), so a load keeps going even if the
/// consumer that started it goes away.  The executor has to be initialized
/// before the first load is started, e.g. through
/// `Executor::init_tokio()` on the server.
pub struct RequestCoordinator<K, T: Transport<K>> {
    inner: Arc<CoordinatorInner<K, T>>,
}

struct CoordinatorInner<K, T: Transport<K>> {
    transport: T,
    cache: Cache<K, T>,
    gate: Gate<K, T>,
}

/// Configures a [`RequestCoordinator`].
pub struct CoordinatorBuilder<K, T: Transport<K>> {
    transport: T,
    cancel_when_unobserved: bool,
    key: PhantomData<fn(K)>,
}

impl<K, T> CoordinatorBuilder<K, T>
where
    K: ResourceKey,
    T: Transport<K>,
{
    /// Cancel a pending load once the last consumer waiting on it has
    /// withdrawn.  Off by default, in which case loads always run to
    /// completion.
    pub fn cancel_when_unobserved(mut self, cancel: bool) -> Self {
        self.cancel_when_unobserved = cancel;
        self
    }

    pub fn build(self) -> RequestCoordinator<K, T> {
        let cache = LoadCache::new();
        let gate = SuspenseGate::with_cancel_unobserved(cache.clone(), self.cancel_when_unobserved);
        RequestCoordinator {
            inner: CoordinatorInner {
                transport: self.transport,
                cache,
                gate,
            }
            .into(),
        }
    }
}

impl<K, T> RequestCoordinator<K, T>
where
    K: ResourceKey,
    T: Transport<K>,
{
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: T) -> CoordinatorBuilder<K, T> {
        CoordinatorBuilder {
            transport,
            cancel_when_unobserved: false,
            key: PhantomData,
        }
    }

    /// Resolve `key`, loading it if needed.
    ///
    /// Returns at once if the key has settled, otherwise waits for the
    /// load in flight, starting one first if there is none.
    ///
    /// # Panics
    ///
    /// Panics if a load has to be started before the global executor was
    /// initialized.
    pub async fn resolve(&self, key: K) -> Outcome<T::Value, T::Error> {
        self.subscribe(key).wait().await
    }

    /// Start loading `key` if needed and register interest in it, without
    /// waiting yet.
    ///
    /// Dropping the subscription withdraws only this consumer; the load
    /// itself is left alone unless the coordinator was built with
    /// [`cancel_when_unobserved`](CoordinatorBuilder::cancel_when_unobserved).
    pub fn subscribe(&self, key: K) -> Subscription<K, T::Value, T::Error> {
        let (subscription, started) = self.inner.gate.claim(key.clone(), Restart::Cancelled);
        if let Some((generation, cancel)) = started {
            self.spawn_load(key, generation, cancel);
        }
        subscription
    }

    /// Start loading `key` without waiting for it.
    ///
    /// Returns the generation in flight, or `None` if the key had
    /// already settled.
    pub fn prefetch(&self, key: K) -> Option<Generation> {
        match self.claim(key, Restart::Cancelled) {
            Claim::Settled { .. } => None,
            Claim::Joined(generation) | Claim::Started { generation, .. } => Some(generation),
        }
    }

    /// Make sure a load is registered for `key` and return its generation,
    /// the way [`LoadCache::begin`] does, while also driving any load this
    /// starts.
    ///
    /// A pending or resolved key is left alone.  An absent, rejected or
    /// invalidated key gets a new load, superseding whatever was pending.
    pub fn begin(&self, key: K) -> Generation {
        match self.claim(key, Restart::Rejected) {
            Claim::Settled { generation, .. }
            | Claim::Joined(generation)
            | Claim::Started { generation, .. } => generation,
        }
    }

    /// Invalidate `key` and resolve it again with a new load.
    ///
    /// A load still in flight for the key is superseded; its result will
    /// be discarded and everyone already waiting gets the new outcome.
    pub async fn reload(&self, key: K) -> Outcome<T::Value, T::Error> {
        self.inner.cache.invalidate(&key);
        self.resolve(key).await
    }

    /// Signal cancellation to the load in flight for `key`.
    ///
    /// Waiters of that load receive [`LoadError::Cancelled`], unless the
    /// transport settles first.
    pub fn cancel(&self, key: &K) -> bool {
        self.inner.cache.cancel(key)
    }

    /// Force the next request for `key` to start a new load.
    ///
    /// See [`LoadCache::invalidate`].
    pub fn invalidate(&self, key: &K) -> bool {
        self.inner.cache.invalidate(key)
    }

    /// The current entry for `key`, without loading anything.
    pub fn peek(&self, key: &K) -> Option<LoadEntry<T::Value, T::Error>> {
        self.inner.cache.get(key)
    }

    /// The last generation started for `key`; 0 if none ever was.
    pub fn generation(&self, key: &K) -> Generation {
        self.inner.cache.generation(key)
    }

    /// Whether the load in flight for `key` was invalidated.
    pub fn is_stale(&self, key: &K) -> bool {
        self.inner.cache.is_stale(key)
    }

    /// Number of consumers currently waiting on `key`.
    pub fn waiters(&self, key: &K) -> usize {
        self.inner.gate.waiters(key)
    }

    fn claim(&self, key: K, restart: Restart) -> Claim<T::Value, T::Error> {
        let claim = self.inner.cache.claim(&key, restart);
        if let Claim::Started { generation, cancel } = &claim {
            self.spawn_load(key, *generation, cancel.clone());
        }
        claim
    }

    fn spawn_load(&self, key: K, generation: Generation, cancel: CancelToken) {
        let inner = Arc::clone(&self.inner);
        let span = debug_span!("load", ?key, generation);
        leptos::task::spawn(
            async move {
                let load = AssertUnwindSafe(async {
                    inner.transport.load(&key, cancel.clone()).await
                })
                .catch_unwind();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(LoadError::Cancelled),
                    result = load => match result {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(error)) => Err(LoadError::transport(error)),
                        Err(_) => {
                            warn!("transport panicked");
                            Err(LoadError::Panicked)
                        }
                    },
                };
                inner.settle(&key, generation, result);
            }
            .instrument(span),
        );
    }
}

impl<K, T> CoordinatorInner<K, T>
where
    K: ResourceKey,
    T: Transport<K>,
{
    fn settle(&self, key: &K, generation: Generation, result: Outcome<T::Value, T::Error>) {
        if self.gate.settle(key, generation, result) == CommitStatus::Discarded {
            trace!("superseded result dropped");
        }
    }
}

impl<K, T: Transport<K>> Clone for RequestCoordinator<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T: Transport<K>> fmt::Debug for RequestCoordinator<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("cache", &self.inner.cache)
            .field("gate", &self.inner.gate)
            .finish()
    }
}
