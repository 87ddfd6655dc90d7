//! Readiness gate
//!
//! A one-shot signal that the handshake finished. Every waiter resolves
//! together; the first `resolve`/`fail` wins and later calls are ignored.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ReadinessGate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    /// Returns true if this call opened the gate
    pub fn resolve(&self) -> bool {
        self.settle(GateState::Ready)
    }

    /// Returns true if this call failed the gate
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.settle(GateState::Failed(reason.into()))
    }

    fn settle(&self, outcome: GateState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = outcome;
                true
            } else {
                false
            }
        })
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        *self.state.borrow() == GateState::Pending
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.state.borrow(), GateState::Failed(_))
    }

    /// Wait until the gate settles
    pub async fn wait(&self) -> BridgeResult<()> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| *state != GateState::Pending)
            .await
            .map_err(|_| BridgeError::Handshake("readiness gate dropped".to_string()))?
            .clone();

        match settled {
            GateState::Failed(reason) => Err(BridgeError::Handshake(reason)),
            GateState::Ready | GateState::Pending => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn waiters_resolve_together() {
        let gate = ReadinessGate::new();
        let mut first = task::spawn(gate.wait());
        let mut second = task::spawn(gate.wait());

        assert_pending!(first.poll());
        assert_pending!(second.poll());

        assert!(gate.resolve());
        assert!(first.is_woken());
        assert!(second.is_woken());
        assert!(assert_ready!(first.poll()).is_ok());
        assert!(assert_ready!(second.poll()).is_ok());
    }

    #[test]
    fn settles_once() {
        let gate = ReadinessGate::new();
        assert!(gate.is_pending());
        assert!(gate.resolve());
        assert!(!gate.resolve());
        assert!(!gate.fail("too late"));
        assert_eq!(gate.state(), GateState::Ready);

        let gate = ReadinessGate::new();
        assert!(gate.fail("timed out"));
        assert!(!gate.resolve());
        assert!(gate.is_failed());
    }

    #[tokio::test]
    async fn failed_gate_rejects_waiters() {
        let gate = ReadinessGate::new();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.wait().await }
        });

        tokio::task::yield_now().await;
        gate.fail("no CONNECTED frame within 30s");

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Handshake(reason) if reason.contains("30s")));

        // late waiters see the settled state immediately
        assert!(gate.wait().await.is_err());
    }
}
