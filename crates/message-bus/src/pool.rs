//! # Worker Pool
//!
//! Asynchronous dispatches run as tasks on the runtime captured when the bus
//! was built. A semaphore bounds how many of them execute at once; tasks
//! beyond the bound wait for a permit instead of being rejected.

use bus_types::BusError;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounded executor for async dispatches.
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Bind to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `BusError::NoRuntime` when called outside a runtime.
    pub fn new(size: usize) -> Result<Self, BusError> {
        let handle = Handle::try_current().map_err(|e| BusError::NoRuntime(e.to_string()))?;
        Ok(Self::with_handle(handle, size))
    }

    #[must_use]
    pub fn with_handle(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Run `task` once a permit is free.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            task.await;
        })
    }

    /// Maximum number of concurrently running tasks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
