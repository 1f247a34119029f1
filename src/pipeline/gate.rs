//! Per-resource concurrency gates.
//!
//! A gate is a counting semaphore with FIFO wakeups. Permits release on drop,
//! so every exit path (success, error, cancellation, panic unwinding) gives
//! the slot back. A waiter whose token fires leaves the queue immediately.

use crate::config::ConcurrencySettings;
use crate::error::{Result, TolkError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// The bottleneck resources a chunk competes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Speech-to-text engine.
    Transcription,
    /// Refinement and translation API.
    Refinement,
    /// Alignment compute.
    Alignment,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Transcription => f.write_str("transcription"),
            Resource::Refinement => f.write_str("refinement"),
            Resource::Alignment => f.write_str("alignment"),
        }
    }
}

/// A counting gate with a fixed number of permits.
#[derive(Clone)]
pub struct ResourceGate {
    resource: Resource,
    permits: usize,
    semaphore: Arc<Semaphore>,
}

impl ResourceGate {
    pub fn new(resource: Resource, permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            resource,
            permits,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Total permits of this gate.
    pub fn capacity(&self) -> usize {
        self.permits
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit, or fail with `Cancelled` if the token fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TolkError::Cancelled(Duration::ZERO)),
            permit = self.semaphore.clone().acquire_owned() => permit,
        };

        let permit = permit
            .map_err(|_| TolkError::Config(format!("{} gate was closed", self.resource)))?;
        trace!("Acquired {} permit", self.resource);

        Ok(GatePermit {
            resource: self.resource,
            _permit: permit,
        })
    }
}

impl fmt::Debug for ResourceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGate")
            .field("resource", &self.resource)
            .field("permits", &self.permits)
            .field("available", &self.available())
            .finish()
    }
}

/// A held permit. Dropping it releases the slot.
#[derive(Debug)]
pub struct GatePermit {
    resource: Resource,
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn resource(&self) -> Resource {
        self.resource
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        trace!("Released {} permit", self.resource);
    }
}

/// The three gates of one run, each sized independently.
#[derive(Debug, Clone)]
pub struct ResourceGates {
    pub transcription: ResourceGate,
    pub refinement: ResourceGate,
    pub alignment: ResourceGate,
}

impl ResourceGates {
    pub fn new(concurrency: &ConcurrencySettings) -> Self {
        Self {
            transcription: ResourceGate::new(Resource::Transcription, concurrency.transcription),
            refinement: ResourceGate::new(Resource::Refinement, concurrency.refinement),
            alignment: ResourceGate::new(Resource::Alignment, concurrency.alignment),
        }
    }

    pub fn get(&self, resource: Resource) -> &ResourceGate {
        match resource {
            Resource::Transcription => &self.transcription,
            Resource::Refinement => &self.refinement,
            Resource::Alignment => &self.alignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let gate = ResourceGate::new(Resource::Refinement, 2);
        let cancel = CancellationToken::new();

        let a = gate.acquire(&cancel).await.unwrap();
        let _b = gate.acquire(&cancel).await.unwrap();
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let gate = ResourceGate::new(Resource::Transcription, 1);
        let cancel = CancellationToken::new();
        let held = gate.acquire(&cancel).await.unwrap();

        let waiter_token = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let token = waiter_token.clone();
            tokio::spawn(async move { gate.acquire(&token).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        waiter_token.cancel();

        let result = waiter.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());

        // The cancelled waiter must not keep the slot once the holder leaves.
        drop(held);
        let again = tokio::time::timeout(Duration::from_secs(1), gate.acquire(&cancel)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_gate_bounds_concurrency() {
        let gate = ResourceGate::new(Resource::Alignment, 2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire(&CancellationToken::new()).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn test_zero_permits_rounds_up() {
        let gate = ResourceGate::new(Resource::Refinement, 0);
        assert_eq!(gate.capacity(), 1);
    }
}
