//! Flush gate: blocks producers while a flush runs.
//!
//! Checking the gate and enqueuing happen under one guard, so no chunk can
//! slip into the queue between a flush draining it and the gate reopening.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

#[derive(Debug)]
struct GateInner {
    guard: Mutex<()>,
    open: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct FlushGate {
    inner: Arc<GateInner>,
}

impl Default for FlushGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushGate {
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            inner: Arc::new(GateInner {
                guard: Mutex::new(()),
                open,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.inner.open.borrow()
    }

    /// Waits until the gate is open, then runs `f` while holding the guard.
    ///
    /// `f` must not block; it typically pushes onto the input queue.
    pub async fn admit<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut rx = self.inner.open.subscribe();
        loop {
            {
                let _guard = self.inner.guard.lock().unwrap_or_else(PoisonError::into_inner);
                if *self.inner.open.borrow() {
                    return f();
                }
            }
            tracing::trace!("Producer waiting on flush gate");
            if rx.wait_for(|open| *open).await.is_err() {
                // Sender lives as long as `self`; unreachable in practice.
                return f();
            }
        }
    }

    /// Closes the gate. Only valid inside an [`admit`](Self::admit) closure,
    /// where the guard is already held.
    pub(crate) fn close_held(&self) -> GatePermit {
        self.inner.open.send_replace(false);
        tracing::debug!("Flush gate closed");
        GatePermit {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Keeps the gate closed; dropping it reopens the gate on every exit path.
#[derive(Debug)]
pub struct GatePermit {
    inner: Arc<GateInner>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let _guard = self.inner.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.open.send_replace(true);
        tracing::debug!("Flush gate reopened");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn open_gate_admits_immediately() {
        let gate = FlushGate::new();
        assert!(gate.is_open());
        let value = gate.admit(|| 42).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn closed_gate_blocks_until_permit_dropped() {
        let gate = FlushGate::new();
        let permit = gate.admit(|| gate.close_held()).await;
        assert!(!gate.is_open());

        let admitted = Arc::new(AtomicUsize::new(0));
        let producer = {
            let gate = gate.clone();
            let admitted = Arc::clone(&admitted);
            tokio::spawn(async move {
                gate.admit(|| admitted.fetch_add(1, Ordering::SeqCst)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 0);

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn second_close_waits_for_first_permit() {
        let gate = FlushGate::new();
        let first = gate.admit(|| gate.close_held()).await;

        let second = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let permit = gate.admit(|| gate.close_held()).await;
                drop(permit);
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        drop(first);
        tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.is_open());
    }

    #[test]
    fn permit_reopens_on_panic_unwind() {
        let gate = FlushGate::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = gate.close_held();
            panic!("flush step failed");
        }));
        assert!(result.is_err());
        assert!(gate.is_open());
    }
}
