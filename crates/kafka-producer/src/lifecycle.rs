//! Shared publisher lifecycle.
//!
//! One [`PublisherLifecycle`] per process owns the single
//! [`BatchedPublisher`] that every worker shares:
//!
//! ```text
//! Uninitialized --first start--> Active --last stop / shutdown--> Closed
//! ```
//!
//! The first `start` builds the publisher from the factory while holding the
//! state lock, so racing starts all observe the same instance. The transition
//! to `Closed` flushes exactly once, with the configured bound, on a blocking
//! thread.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::PublisherError;
use crate::publisher::{BatchedPublisher, FlushReport};

/// Builds the shared publisher on first start.
pub type PublisherFactory =
    Box<dyn Fn() -> Result<BatchedPublisher, PublisherError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Failed to construct publisher: {0}")]
    Construct(#[from] PublisherError),

    #[error("Publisher already closed")]
    Closed,
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Active,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Uninitialized => write!(f, "uninitialized"),
            Phase::Active => write!(f, "active"),
            Phase::Closed => write!(f, "closed"),
        }
    }
}

enum State {
    Uninitialized,
    Active {
        publisher: Arc<BatchedPublisher>,
        workers: usize,
    },
    Closed,
}

pub struct PublisherLifecycle {
    state: Mutex<State>,
    factory: PublisherFactory,
    flush_timeout: Duration,
}

impl PublisherLifecycle {
    pub fn new(factory: PublisherFactory, flush_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::Uninitialized),
            factory,
            flush_timeout,
        }
    }

    /// Register a worker and return the shared publisher, building it if this
    /// is the first registration.
    pub async fn start(&self) -> Result<Arc<BatchedPublisher>, LifecycleError> {
        let mut state = self.state.lock().await;
        match &mut *state {
            State::Uninitialized => {
                let publisher = Arc::new((self.factory)()?);
                info!("Publisher initialized");
                *state = State::Active {
                    publisher: Arc::clone(&publisher),
                    workers: 1,
                };
                Ok(publisher)
            }
            State::Active { publisher, workers } => {
                *workers += 1;
                Ok(Arc::clone(publisher))
            }
            State::Closed => Err(LifecycleError::Closed),
        }
    }

    /// Deregister a worker. The last one out closes the publisher and returns
    /// the flush report.
    pub async fn stop(&self) -> Option<FlushReport> {
        let publisher = {
            let mut state = self.state.lock().await;
            if let State::Active { workers, .. } = &mut *state {
                if *workers > 1 {
                    *workers -= 1;
                    return None;
                }
            }
            Self::close(&mut state)?
        };
        self.flush(publisher).await
    }

    /// Close regardless of how many workers are still registered.
    pub async fn shutdown(&self) -> Option<FlushReport> {
        let publisher = {
            let mut state = self.state.lock().await;
            if matches!(*state, State::Uninitialized) {
                *state = State::Closed;
                return None;
            }
            Self::close(&mut state)?
        };
        self.flush(publisher).await
    }

    pub async fn phase(&self) -> Phase {
        match &*self.state.lock().await {
            State::Uninitialized => Phase::Uninitialized,
            State::Active { .. } => Phase::Active,
            State::Closed => Phase::Closed,
        }
    }

    /// Workers currently registered.
    pub async fn workers(&self) -> usize {
        match &*self.state.lock().await {
            State::Active { workers, .. } => *workers,
            State::Uninitialized | State::Closed => 0,
        }
    }

    /// Move an active lifecycle to `Closed`, handing back its publisher.
    fn close(state: &mut State) -> Option<Arc<BatchedPublisher>> {
        if !matches!(state, State::Active { .. }) {
            return None;
        }
        match std::mem::replace(state, State::Closed) {
            State::Active { publisher, .. } => Some(publisher),
            State::Uninitialized | State::Closed => None,
        }
    }

    async fn flush(&self, publisher: Arc<BatchedPublisher>) -> Option<FlushReport> {
        let timeout = self.flush_timeout;
        match tokio::task::spawn_blocking(move || publisher.flush(timeout)).await {
            Ok(report) => {
                info!(
                    "Publisher closed (unresolved: {}, timed out: {})",
                    report.unresolved, report.timed_out
                );
                Some(report)
            }
            Err(e) => {
                error!("Shutdown flush task failed: {e}");
                None
            }
        }
    }
}
