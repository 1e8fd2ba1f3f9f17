//! Single-writer state cells backed by `tokio::sync::watch`.
//!
//! A [`StateCell`] is held by the one component allowed to write the value;
//! everybody else gets a read-only [`StateWatch`]. A write happens-before any
//! read that observes it through the watch channel.

use std::{fmt::Debug, sync::Arc};

use shared::domain::RunState;
use tokio::sync::watch;

use crate::SessionError;

pub struct StateCell<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Copy + PartialEq + Debug + Send + Sync + 'static> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Stores `value` and returns the previous one. Watchers are only woken
    /// when the value actually changes.
    pub fn set(&self, value: T) -> T {
        let mut previous = value;
        self.tx.send_if_modified(|current| {
            previous = *current;
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        previous
    }

    pub fn get(&self) -> T {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> StateWatch<T> {
        StateWatch {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct StateWatch<T> {
    rx: watch::Receiver<T>,
}

impl<T: Copy + PartialEq + Debug + Send + Sync + 'static> StateWatch<T> {
    pub fn get(&self) -> T {
        *self.rx.borrow()
    }

    /// Resolves as soon as the value satisfies `predicate`, checking the
    /// current value first.
    pub async fn wait_until(&mut self, predicate: impl FnMut(&T) -> bool) -> Result<T, SessionError> {
        let value = self
            .rx
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::StateClosed)?;
        Ok(*value)
    }

    /// Resolves on the next write that changes the value.
    pub async fn changed(&mut self) -> Result<T, SessionError> {
        self.rx
            .changed()
            .await
            .map_err(|_| SessionError::StateClosed)?;
        Ok(*self.rx.borrow_and_update())
    }

    pub fn mark_seen(&mut self) -> T {
        *self.rx.borrow_and_update()
    }
}

/// Host-owned run state. Only the host platform writes through this handle;
/// other components observe it via [`RunStateHandle::watch`].
#[derive(Clone)]
pub struct RunStateHandle {
    cell: StateCell<RunState>,
}

impl Default for RunStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateHandle {
    pub fn new() -> Self {
        Self {
            cell: StateCell::new(RunState::NotReady),
        }
    }

    pub fn set(&self, state: RunState) -> RunState {
        let previous = self.cell.set(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "run state changed");
        }
        previous
    }

    pub fn get(&self) -> RunState {
        self.cell.get()
    }

    pub fn watch(&self) -> StateWatch<RunState> {
        self.cell.watch()
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
