use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::TransportError;

/// Creates pool resources on demand.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    type Resource: Send;

    async fn create(&self) -> Result<Self::Resource, TransportError>;
}

/// Bounded rent/return resource pool.
///
/// Resources are created lazily up to `capacity`. `acquire` hands out an idle
/// resource when one exists, otherwise creates a new one; when the pool is
/// exhausted the requesting caller blocks until a resource is returned —
/// other callers are unaffected. The guard returns the resource on drop.
pub struct Pool<F: ResourceFactory> {
    factory: F,
    idle: Mutex<Vec<F::Resource>>,
    permits: std::sync::Arc<Semaphore>,
}

impl<F: ResourceFactory> Pool<F> {
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            permits: std::sync::Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<Pooled<'_, F>, TransportError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Connection("resource pool closed".to_string()))?;

        let idle = self.lock_idle().pop();
        let resource = match idle {
            Some(resource) => resource,
            // Permit drops on error, freeing the slot for the next caller.
            None => self.factory.create().await?,
        };

        Ok(Pooled {
            resource: Some(resource),
            pool: self,
            _permit: permit,
        })
    }

    /// Idle (returned, unrented) resource count.
    pub fn idle_len(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<F::Resource>> {
        // A poisoned lock only means a panic mid-push/pop; the Vec is still valid.
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scoped pool acquisition. Deref to the resource; dropping returns it to the
/// pool, `discard` throws it away (e.g. a broken connection) so the next
/// acquire creates a fresh one.
pub struct Pooled<'a, F: ResourceFactory> {
    resource: Option<F::Resource>,
    pool: &'a Pool<F>,
    _permit: OwnedSemaphorePermit,
}

impl<F: ResourceFactory> Pooled<'_, F> {
    pub fn discard(mut self) {
        self.resource = None;
    }
}

impl<F: ResourceFactory> Deref for Pooled<'_, F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource
            .as_ref()
            .unwrap_or_else(|| unreachable!("resource present until drop or discard"))
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .unwrap_or_else(|| unreachable!("resource present until drop or discard"))
    }
}

impl<F: ResourceFactory> Drop for Pooled<'_, F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.lock_idle().push(resource);
        }
    }
}
