//! Plugin readiness as an explicit lifecycle value.
//!
//! Bootstrap owns the [`ReadinessGate`] and advances it; the identity service
//! holds a [`ReadinessObserver`] and reports the current state from `Probe`.

use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle of the plugin process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Configuration loaded; the startup handshake has not completed.
    Starting,
    /// The handshake succeeded and requests are served.
    Ready,
    /// Shutdown has begun.
    ShuttingDown,
}

/// Writable side of the readiness state.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<LifecycleState>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    /// Creates a gate in [`LifecycleState::Starting`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Starting);
        Self { tx }
    }

    /// Returns a read-only handle on the state.
    #[must_use]
    pub fn observer(&self) -> ReadinessObserver {
        ReadinessObserver {
            rx: self.tx.subscribe(),
        }
    }

    /// Marks the plugin ready.
    pub fn mark_ready(&self) {
        self.transition(LifecycleState::Ready);
    }

    /// Marks the plugin as shutting down.
    pub fn mark_shutting_down(&self) {
        self.transition(LifecycleState::ShuttingDown);
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            tracing::info!(?previous, ?next, "lifecycle transition");
        }
    }
}

/// Read-only view of the readiness state.
#[derive(Clone, Debug)]
pub struct ReadinessObserver {
    rx: watch::Receiver<LifecycleState>,
}

impl ReadinessObserver {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.rx.borrow()
    }

    /// Returns `true` only in [`LifecycleState::Ready`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_follows_transitions() {
        let gate = ReadinessGate::new();
        let observer = gate.observer();
        assert_eq!(observer.state(), LifecycleState::Starting);
        assert!(!observer.is_ready());

        gate.mark_ready();
        assert!(observer.is_ready());

        gate.mark_shutting_down();
        assert_eq!(observer.state(), LifecycleState::ShuttingDown);
        assert!(!observer.is_ready());
    }
}
