use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use leptos::prelude::Owner;
use leptos_lazy_load::{CancelToken, RequestCoordinator, ResourceId, Transport};

pub fn init_renderer() -> Owner {
    let _ = any_spawner::Executor::init_tokio();
    let owner = Owner::new();
    owner.set();
    owner
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("no such record: {0}")]
pub struct NotFound(String);

/// Knows a single user, counting how often it was asked.
#[derive(Clone, Default)]
pub struct Records {
    calls: Arc<AtomicUsize>,
}

impl Records {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport<ResourceId> for Records {
    type Value = String;
    type Error = NotFound;

    fn load(
        &self,
        key: &ResourceId,
        _cancel: CancelToken,
    ) -> impl Future<Output = Result<String, NotFound>> + Send + 'static {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = key.clone();
        async move {
            #[cfg(feature = "ssr")]
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            match key.as_str() {
                "user:42" => Ok("Ann".to_string()),
                _ => Err(NotFound(key.to_string())),
            }
        }
    }
}

pub type Users = RequestCoordinator<ResourceId, Records>;

#[tokio::test]
async fn coordinator_is_found_through_context() {
    let _owner = init_renderer();
    let records = Records::default();
    Users::new(records.clone()).provide();

    let users = Users::from_context().expect("coordinator should be provided");
    assert_eq!(users.resolve(ResourceId::from("user:42")).await, Ok("Ann".to_string()));
    assert_eq!(
        Users::expect_context()
            .resolve(ResourceId::from("user:42"))
            .await,
        Ok("Ann".to_string())
    );
    assert_eq!(records.calls(), 1);
}

#[cfg(feature = "ssr")]
#[tokio::test]
async fn resources_for_the_same_key_share_a_load() {
    let _owner = init_renderer();
    let records = Records::default();
    Users::new(records.clone()).provide();

    let first = Users::expect_context().resource(|| ResourceId::from("user:42"));
    let second = Users::expect_context().resource(|| ResourceId::from("user:42"));

    assert_eq!(first.await.ok(), Some("Ann".to_string()));
    assert_eq!(second.await.ok(), Some("Ann".to_string()));
    assert_eq!(records.calls(), 1);
}

#[cfg(feature = "ssr")]
#[tokio::test]
async fn rejection_becomes_server_fn_error() {
    let _owner = init_renderer();
    Users::new(Records::default()).provide();

    let missing = Users::expect_context().resource(|| ResourceId::from("user:7"));
    let error = missing.await.expect_err("user:7 is not a known record");
    assert!(
        error.to_string().contains("no such record: user:7"),
        "unexpected error: {error}"
    );
}
