//! This crate coordinates lazily loaded resources, such as a deferred
//! code chunk or a data fetch, between any number of consumers that may
//! ask for them at the same time.  It decides when a load is started,
//! makes sure concurrent requests for the same resource collapse into a
//! single load, keeps results of superseded loads from overwriting newer
//! ones, and tells every consumer exactly once when the resource is
//! ready or has failed.
//!
//! ## Use case
//!
//! Under server-side rendering (SSR), several components in a view tree
//! often need the same piece of data: the page title, a breadcrumb and
//! the main article may all read the same record.  Left alone, each of
//! them would issue its own fetch, and if the data is refreshed while a
//! slower, older fetch is still in flight, whichever finishes last wins,
//! which may well be the stale one.  The usual fix of a module level
//! cache with a "mounted" flag here and an abort signal there leaks state
//! across requests and tests, and still leaves the ordering problem open.
//!
//! The pieces provided here are:
//!
//! - [`LoadCache`] keeps one [`LoadEntry`] per key, either pending,
//!   resolved or rejected, along with a per key [`Generation`] counter.
//!   A result is only committed if its generation is still current.
//! - [`RequestCoordinator`] starts loads through a [`Transport`], tags
//!   them with their generation and commits their outcome.
//! - [`SuspenseGate`] wakes every consumer waiting on a key once it
//!   settles, exactly once each.
//!
//! The [`Transport`] that actually performs the fetch or import, and the
//! renderer consuming the values, are left to the user.
//!
//! # Example
//!
//! ```
//! use leptos_lazy_load::{transport_fn, CancelToken, RequestCoordinator, ResourceId};
//!
//! # tokio_test::block_on(async {
//! # let _ = any_spawner::Executor::init_tokio();
//! let coordinator = RequestCoordinator::new(transport_fn(
//!     |key: ResourceId, _cancel: CancelToken| async move {
//!         // fetch the record here
//!         Ok::<_, std::io::Error>(format!("record for {key}"))
//!     },
//! ));
//!
//! let key = ResourceId::from("user:42");
//! // both consumers share a single load
//! let (a, b) = futures::join!(coordinator.resolve(key.clone()), coordinator.resolve(key));
//! assert_eq!(a.unwrap(), "record for user:42");
//! assert_eq!(b.unwrap(), "record for user:42");
//! # });
//! ```
//!
//! Within a Leptos application the coordinator may be provided as a
//! context and turned into resources, please refer to the [`context`]
//! module for details.
//!
//! # Feature Flags
#![cfg_attr(
    feature = "document-features",
    cfg_attr(doc, doc = ::document_features::document_features!())
)]

mod cache;
mod cancel;
pub mod context;
mod coordinator;
mod entry;
mod gate;
mod key;
mod transport;


pub use cache::{CommitStatus, LoadCache};
pub use cancel::CancelToken;
pub use coordinator::{CoordinatorBuilder, RequestCoordinator};
pub use entry::{Generation, LoadEntry, LoadError, Outcome};
pub use gate::{Subscription, SuspenseGate};
pub use key::{ResourceId, ResourceKey};
pub use transport::{transport_fn, Transport, TransportFn};
