/*
 * This file is part of the IVMS Online.
 *
 * @copyright 2023 © by Rafał Wrzeszcz - Wrzasq.pl.
 */

use crate::api_error::ApiError;
use crate::runtime_error::RuntimeError;
use crate::store::{Collection, DocumentStore};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

/**
Live view over a collection.

The listener receives a fresh snapshot right away and again after every change to the watched collection. Dropping
the subscription (or calling [`Subscription::unsubscribe`]) stops the updates: once it returns, a listener call in
progress has finished and no further call starts. The listener must not release its own subscription.
 */
#[must_use = "dropping the subscription cancels it"]
pub struct Subscription {
    task: JoinHandle<()>,
    released: Arc<Mutex<bool>>,
}

impl Subscription {
    /// Spawns the watcher on the current Tokio runtime; fails outside of one.
    pub(crate) fn watch<T, R, F, L>(
        store: Arc<dyn DocumentStore>,
        collection: Collection,
        reload: R,
        listener: L,
    ) -> Result<Self, RuntimeError>
    where
        T: Send + 'static,
        R: Fn(Arc<dyn DocumentStore>) -> F + Send + 'static,
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
        L: Fn(T) + Send + 'static,
    {
        let runtime = Handle::try_current()?;
        let released = Arc::new(Mutex::new(false));
        let gate = Arc::clone(&released);

        // subscribe before the first load so no change slips in between
        let mut changes = store.subscribe();

        let task = runtime.spawn(async move {
            loop {
                match reload(Arc::clone(&store)).await {
                    Ok(snapshot) => {
                        let released = gate.lock().unwrap_or_else(PoisonError::into_inner);
                        if *released {
                            return;
                        }
                        listener(snapshot);
                    }
                    Err(error) => warn!(%collection, "failed to reload watched collection: {error}"),
                }

                loop {
                    match changes.recv().await {
                        Ok(change) if change.collection == collection => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => break,
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        });

        Ok(Self { task, released })
    }

    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // waits for a running listener call
        *self.released.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.task.abort();
    }
}
