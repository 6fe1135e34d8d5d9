//! Bounded pool of expensive, stateful decode handles.
//!
//! Opening a decoder (a file handle, a server session) is slow, and the number
//! of native handles open at once must stay small. The pool shares a fixed
//! number of handles among any number of concurrent tile requests.
//!
//! # Modes
//!
//! - **Fixed** (`dynamic = false`): at most `size` resources ever exist.
//!   Callers queue until one is returned.
//! - **Dynamic** (`dynamic = true`): callers never wait. Extra resources are
//!   created under contention and destroyed on return once `size` idle
//!   resources are already pooled.
//!
//! # Release
//!
//! [`ResourcePool::acquire`] returns a [`PooledResource`] guard. Dropping the
//! guard returns the resource, on every exit path including errors and
//! cancellation.
//!
//! # Example
//!
//! ```ignore
//! let pool = ResourcePool::new(2, false, factory);
//!
//! let mut handle = pool.acquire().await?;
//! let bytes = source.read_tile(&mut handle, 0, &region).await?;
//! drop(handle); // returned to the pool
//!
//! pool.drain_and_close().await;
//! assert!(pool.acquire().await.is_err());
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::source::ResourceFactory;

// =============================================================================
// Pool State
// =============================================================================

struct PoolState<R> {
    /// Resources ready to be handed out
    idle: Vec<R>,
    /// Resources currently alive (idle + in use + being created)
    created: usize,
    /// Resources handed out or being created
    in_use: usize,
    /// Set once shutdown begins
    closed: bool,
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub dynamic: bool,
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
    pub closed: bool,
}

// =============================================================================
// ResourcePool
// =============================================================================

/// A bounded pool of interchangeable resources produced by a [`ResourceFactory`].
pub struct ResourcePool<R: Send + 'static> {
    factory: Arc<dyn ResourceFactory<Resource = R>>,
    size: usize,
    dynamic: bool,
    state: Mutex<PoolState<R>>,
    /// Signalled whenever a slot may have become available
    available: Notify,
    /// Signalled whenever the in-use count drops to zero
    drained: Notify,
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Create an empty pool. Resources are created lazily on demand.
    ///
    /// A `size` of zero is treated as one so a fixed pool can always make progress.
    pub fn new<F>(size: usize, dynamic: bool, factory: F) -> Self
    where
        F: ResourceFactory<Resource = R> + 'static,
    {
        Self::with_shared_factory(size, dynamic, Arc::new(factory))
    }

    /// Create a pool around an already shared factory.
    pub fn with_shared_factory(
        size: usize,
        dynamic: bool,
        factory: Arc<dyn ResourceFactory<Resource = R>>,
    ) -> Self {
        Self {
            factory,
            size: size.max(1),
            dynamic,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                created: 0,
                in_use: 0,
                closed: false,
            }),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Borrow a resource, waiting until one is free or may be created.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Shutdown`] if [`drain_and_close`](Self::drain_and_close)
    ///   has been called, including while this call was queued.
    /// - [`PoolError::ResourceCreation`] if the factory failed. The reserved
    ///   slot is released so other callers can retry.
    pub async fn acquire(&self) -> Result<PooledResource<'_, R>, PoolError> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock_state();
                if state.closed {
                    return Err(PoolError::Shutdown);
                }
                if let Some(resource) = state.idle.pop() {
                    state.in_use += 1;
                    return Ok(PooledResource::new(self, resource));
                }
                if self.dynamic || state.created < self.size {
                    state.created += 1;
                    state.in_use += 1;
                    break;
                }
            }

            notified.await;
        }

        let reservation = Reservation::new(self);
        match self.factory.create().await {
            Ok(resource) => {
                reservation.disarm();
                debug!(pool_size = self.size, "Created pooled resource");
                Ok(PooledResource::new(self, resource))
            }
            Err(e) => {
                warn!(error = %e, "Failed to create pooled resource");
                Err(PoolError::ResourceCreation(e))
            }
        }
    }

    /// Create resources until `size` of them exist.
    pub async fn prewarm(&self) -> Result<(), PoolError> {
        loop {
            {
                let mut state = self.lock_state();
                if state.closed {
                    return Err(PoolError::Shutdown);
                }
                if state.created >= self.size {
                    return Ok(());
                }
                state.created += 1;
                state.in_use += 1;
            }

            let reservation = Reservation::new(self);
            let resource = self
                .factory
                .create()
                .await
                .map_err(PoolError::ResourceCreation)?;
            reservation.disarm();
            self.release(resource);
        }
    }

    /// Stop handing out resources, wait for every borrowed one to come back,
    /// then destroy all of them.
    ///
    /// Callers queued in [`acquire`](Self::acquire) fail with
    /// [`PoolError::Shutdown`]. Calling this twice is harmless.
    pub async fn drain_and_close(&self) {
        {
            let mut state = self.lock_state();
            if !state.closed {
                state.closed = true;
                info!(in_use = state.in_use, "Draining resource pool");
            }
        }
        self.available.notify_waiters();

        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let in_use = self.lock_state().in_use;
            if in_use == 0 {
                break;
            }

            notified.await;
        }

        let idle = {
            let mut state = self.lock_state();
            state.created -= state.idle.len();
            std::mem::take(&mut state.idle)
        };
        let destroyed = idle.len();
        for resource in idle {
            self.factory.destroy(resource);
        }
        debug!(destroyed, "Resource pool closed");
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            size: self.size,
            dynamic: self.dynamic,
            created: state.created,
            idle: state.idle.len(),
            in_use: state.in_use,
            closed: state.closed,
        }
    }

    /// Target number of pooled resources.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Return a borrowed resource. Called from the guard's `Drop`.
    fn release(&self, resource: R) {
        let (retired, drained) = {
            let mut state = self.lock_state();
            state.in_use -= 1;
            let retired = if state.closed || (self.dynamic && state.idle.len() >= self.size) {
                state.created -= 1;
                Some(resource)
            } else {
                state.idle.push(resource);
                None
            };
            (retired, state.in_use == 0)
        };

        if let Some(resource) = retired {
            self.factory.destroy(resource);
        }

        self.available.notify_one();
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Give back a reserved slot whose resource was never produced.
    fn cancel_reservation(&self) {
        let drained = {
            let mut state = self.lock_state();
            state.created -= 1;
            state.in_use -= 1;
            state.in_use == 0
        };

        self.available.notify_one();
        if drained {
            self.drained.notify_waiters();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<R>> {
        // The state is only mutated by short, non-panicking sections.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// A counted slot whose resource is still being created.
///
/// Dropped without [`disarm`](Self::disarm) (factory error, or the acquiring
/// task was cancelled), it hands the slot back.
struct Reservation<'a, R: Send + 'static> {
    pool: &'a ResourcePool<R>,
    armed: bool,
}

impl<'a, R: Send + 'static> Reservation<'a, R> {
    fn new(pool: &'a ResourcePool<R>) -> Self {
        Self { pool, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<R: Send + 'static> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.cancel_reservation();
        }
    }
}

// =============================================================================
// PooledResource
// =============================================================================

/// Exclusive access to one pooled resource. Returned to the pool on drop.
pub struct PooledResource<'a, R: Send + 'static> {
    pool: &'a ResourcePool<R>,
    resource: Option<R>,
}

impl<'a, R: Send + 'static> PooledResource<'a, R> {
    fn new(pool: &'a ResourcePool<R>, resource: R) -> Self {
        Self {
            pool,
            resource: Some(resource),
        }
    }
}

impl<R: Send + 'static> Deref for PooledResource<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("resource is present until drop")
    }
}

impl<R: Send + 'static> DerefMut for PooledResource<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("resource is present until drop")
    }
}

impl<R: Send + 'static> Drop for PooledResource<'_, R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
