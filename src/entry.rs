use std::{fmt, sync::Arc};

use crate::cancel::CancelToken;

/// Marks the currency of a load attempt for a key.
///
/// Every key starts at generation 0, meaning it was never loaded; each
/// load that is actually started takes the next number.
pub type Generation = u64;

/// The settled result of a load as seen by every consumer.
pub type Outcome<V, E> = Result<V, LoadError<E>>;

/// Why a load settled without a value.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum LoadError<E> {
    /// The transport reported a failure; the original cause is shared
    /// between all consumers of the settlement.
    #[error("transport failure: {0}")]
    Transport(Arc<E>),
    /// The load was cancelled before it could settle.
    #[error("load was cancelled before settlement")]
    Cancelled,
    /// The transport panicked while loading.
    #[error("load panicked before settlement")]
    Panicked,
    /// The waiter was released without ever receiving a settlement.
    #[error("waiter was released without a settlement")]
    Abandoned,
}

impl<E> LoadError<E> {
    pub fn transport(error: E) -> Self {
        Self::Transport(Arc::new(error))
    }

    /// The original transport failure, if that is why the load failed.
    pub fn transport_error(&self) -> Option<&E> {
        match self {
            Self::Transport(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E> Clone for LoadError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Transport(error) => Self::Transport(Arc::clone(error)),
            Self::Cancelled => Self::Cancelled,
            Self::Panicked => Self::Panicked,
            Self::Abandoned => Self::Abandoned,
        }
    }
}

/// The single entry a [`LoadCache`](crate::LoadCache) keeps for a key.
pub enum LoadEntry<V, E> {
    /// A load is in flight.
    Pending {
        generation: Generation,
        cancel: CancelToken,
    },
    /// The load produced a value.
    Resolved { value: V, generation: Generation },
    /// The load failed.
    Rejected {
        error: LoadError<E>,
        generation: Generation,
    },
}

impl<V, E> LoadEntry<V, E> {
    pub fn generation(&self) -> Generation {
        match self {
            Self::Pending { generation, .. }
            | Self::Resolved { generation, .. }
            | Self::Rejected { generation, .. } => *generation,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }
}

impl<V: Clone, E> LoadEntry<V, E> {
    /// The settled outcome, or `None` while the load is still pending.
    pub fn outcome(&self) -> Option<Outcome<V, E>> {
        match self {
            Self::Pending { .. } => None,
            Self::Resolved { value, .. } => Some(Ok(value.clone())),
            Self::Rejected { error, .. } => Some(Err(error.clone())),
        }
    }
}

impl<V: Clone, E> Clone for LoadEntry<V, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending { generation, cancel } => Self::Pending {
                generation: *generation,
                cancel: cancel.clone(),
            },
            Self::Resolved { value, generation } => Self::Resolved {
                value: value.clone(),
                generation: *generation,
            },
            Self::Rejected { error, generation } => Self::Rejected {
                error: error.clone(),
                generation: *generation,
            },
        }
    }
}

impl<V: fmt::Debug, E: fmt::Debug> fmt::Debug for LoadEntry<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending { generation, cancel } => f
                .debug_struct("Pending")
                .field("generation", generation)
                .field("cancelled", &cancel.is_cancelled())
                .finish(),
            Self::Resolved { value, generation } => f
                .debug_struct("Resolved")
                .field("value", value)
                .field("generation", generation)
                .finish(),
            Self::Rejected { error, generation } => f
                .debug_struct("Rejected")
                .field("error", error)
                .field("generation", generation)
                .finish(),
        }
    }
}
