//! Sharing a [`RequestCoordinator`] through the Leptos reactive context.
//!
//! A coordinator is constructed explicitly, typically once per request
//! under SSR, and then [`provide`](RequestCoordinator::provide)d to the
//! view tree.  Components deeper down pick it up again and turn keys
//! into resources, with every component reading the same key sharing a
//! single load.
//!
//! ```
//! use std::future::Future;
//!
//! use leptos::prelude::*;
//! use leptos_lazy_load::{CancelToken, RequestCoordinator, ResourceId, Transport};
//!
//! #[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
//! struct User {
//!     name: String,
//! }
//!
//! struct UserApi;
//!
//! impl Transport<ResourceId> for UserApi {
//!     type Value = User;
//!     type Error = std::io::Error;
//!
//!     fn load(
//!         &self,
//!         key: &ResourceId,
//!         _cancel: CancelToken,
//!     ) -> impl Future<Output = Result<User, std::io::Error>> + Send + 'static {
//!         let name = key.to_string();
//!         async move { Ok(User { name }) }
//!     }
//! }
//!
//! type Users = RequestCoordinator<ResourceId, UserApi>;
//!
//! #[component]
//! fn App() -> impl IntoView {
//!     Users::new(UserApi).provide();
//!     view! { <UserName/> }
//! }
//!
//! #[component]
//! fn UserName() -> impl IntoView {
//!     let user = Users::expect_context().resource(|| ResourceId::from("user:42"));
//!     view! {
//!         <Suspense>
//!         {move || {
//!             let user = user.clone();
//!             Suspend::new(async move { user.await.map(|user| user.name) })
//!         }}
//!         </Suspense>
//!     }
//! }
//! ```

use std::fmt;

use leptos::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

use crate::{coordinator::RequestCoordinator, key::ResourceKey, transport::Transport};

impl<K, T> RequestCoordinator<K, T>
where
    K: ResourceKey,
    T: Transport<K>,
{
    /// Provide this coordinator as a context to the current reactive
    /// owner and its descendants.
    pub fn provide(&self) {
        provide_context(self.clone());
    }

    /// The coordinator provided by an ancestor, if any.
    pub fn from_context() -> Option<Self> {
        use_context::<Self>()
    }

    /// The coordinator provided by an ancestor.
    ///
    /// # Panics
    ///
    /// Panics if no such coordinator was provided.
    pub fn expect_context() -> Self {
        expect_context::<Self>()
    }

    /// A resource that resolves the key returned by `key` through this
    /// coordinator.
    ///
    /// `key` is tracked, so when it starts returning a different key the
    /// resource fetches again; a key that has settled resolves without
    /// touching the transport.  Rejections are converted into a
    /// [`ServerFnError`] so that they can cross over to the client.
    pub fn resource(
        &self,
        key: impl Fn() -> K + Send + Sync + 'static,
    ) -> ArcResource<Result<T::Value, ServerFnError>>
    where
        T::Value: Serialize + DeserializeOwned + PartialEq,
        T::Error: fmt::Display,
    {
        let coordinator = self.clone();
        ArcResource::new(key, move |key| {
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .resolve(key)
                    .await
                    .map_err(ServerFnError::new)
            }
        })
    }
}
