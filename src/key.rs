use std::{borrow::Borrow, fmt, hash::Hash, sync::Arc};

use serde::{Deserialize, Serialize};

/// Identifies a loadable unit of data or code.
///
/// Any type with total equality that can be hashed, cloned and moved
/// across tasks qualifies; two keys that compare equal will always
/// address the same entry in a [`LoadCache`](crate::LoadCache).
pub trait ResourceKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> ResourceKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// A ready-made string key, e.g. `"user:42"` or `"page:home"`.
///
/// Cloning is cheap as the underlying string is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceId").field(&&*self.0).finish()
    }
}
