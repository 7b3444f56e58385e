//! Per-key single-flight execution.
//!
//! Concurrent callers asking for the same key share one computation: the
//! first caller becomes the leader and spawns the work, the others wait on
//! the shared in-flight state and receive a clone of the leader's result.
//!
//! The work runs in its own task, so a caller whose future is dropped (for
//! example a disconnected HTTP client) does not abort it and the other
//! waiters still get their result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, error};

use crate::error::ImageError;

/// Outcome of [`SingleFlight::run`] from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This caller started the computation
    Leader,

    /// This caller joined a computation already in flight
    Waiter,
}

/// State for an in-flight computation.
struct InFlightState<V> {
    /// Notification for waiters
    notify: Notify,
    /// Result of the computation (set when complete)
    result: Mutex<Option<Result<V, ImageError>>>,
}

/// A table of in-flight computations keyed by `K`.
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, Arc<InFlightState<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently being computed.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Run `compute` for `key` unless a computation for it is already in
    /// flight, then wait for the shared result.
    ///
    /// Failures are delivered to every waiter and are not remembered: the
    /// next call after a failure starts a fresh computation.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: K, compute: F) -> (Result<V, ImageError>, Role)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, ImageError>> + Send + 'static,
    {
        let (state, role) = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(state) => (state.clone(), Role::Waiter),
                None => {
                    let state = Arc::new(InFlightState {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(key.clone(), state.clone());
                    (state, Role::Leader)
                }
            }
        };

        if role == Role::Leader {
            self.spawn_leader(key, state.clone(), compute);
        } else {
            debug!(key = %key, "Joining in-flight computation");
        }

        (Self::wait(&state).await, role)
    }

    fn spawn_leader<F, Fut>(self: &Arc<Self>, key: K, state: Arc<InFlightState<V>>, compute: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, ImageError>> + Send + 'static,
    {
        let group = Arc::clone(self);
        tokio::spawn(async move {
            // A panic inside the computation still has to release the waiters.
            let result = match tokio::spawn(compute()).await {
                Ok(result) => result,
                Err(join_error) => {
                    error!(key = %key, error = %join_error, "Computation task failed");
                    Err(ImageError::ComputationFailure {
                        message: format!("computation aborted: {}", join_error),
                    })
                }
            };

            *state.result.lock().await = Some(result);
            group.in_flight.lock().await.remove(&key);
            state.notify.notify_waiters();
        });
    }

    async fn wait(state: &InFlightState<V>) -> Result<V, ImageError> {
        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed.
            notified.as_mut().enable();

            if let Some(result) = state.result.lock().await.as_ref() {
                return result.clone();
            }
            notified.await;
        }
    }
}
