use std::{fmt, future::Future};

use crate::cancel::CancelToken;

/// Performs the actual asynchronous load of a resource.
///
/// The [`RequestCoordinator`](crate::RequestCoordinator) calls [`load`](
/// Self::load) at most once per generation of a key.  The returned future
/// is driven on its own task, so it must own everything it needs.
///
/// The token is advisory: a transport may watch it to stop early, but it
/// is not required to, since a result arriving for a superseded
/// generation is discarded regardless.
pub trait Transport<K>: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;
    type Error: Send + Sync + 'static;

    fn load(
        &self,
        key: &K,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<Self::Value, Self::Error>> + Send + 'static;
}

/// A [`Transport`] backed by a closure, see [`transport_fn`].
#[derive(Clone)]
pub struct TransportFn<F> {
    f: F,
}

/// Build a [`Transport`] out of a closure taking the key and the token.
///
/// ```
/// use leptos_lazy_load::{transport_fn, CancelToken, ResourceId};
///
/// let transport = transport_fn(|key: ResourceId, _cancel: CancelToken| async move {
///     Ok::<_, std::io::Error>(format!("contents of {key}"))
/// });
/// # let _ = transport;
/// ```
pub fn transport_fn<F>(f: F) -> TransportFn<F> {
    TransportFn { f }
}

impl<K, F, Fut, V, E> Transport<K> for TransportFn<F>
where
    K: Clone,
    F: Fn(K, CancelToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn load(
        &self,
        key: &K,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<V, E>> + Send + 'static {
        (self.f)(key.clone(), cancel)
    }
}

impl<F> fmt::Debug for TransportFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFn").finish_non_exhaustive()
    }
}
