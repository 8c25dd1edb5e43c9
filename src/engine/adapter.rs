//! Outbound boundary towards exchange wire adapters.
//!
//! Submission is fire-and-forget: outcomes come back later as ordinary
//! execution events on the inbound feed.

use tokio::sync::mpsc;
use tracing::warn;

use super::commands::{AdapterRequest, CancelRequest, OrderRequest};
use crate::domain::StrategyId;

#[cfg_attr(test, mockall::automock)]
pub trait ExecutionAdapter: Send {
    fn place(&mut self, order: &OrderRequest);

    fn place_batch(&mut self, orders: &[OrderRequest]);

    /// Whether `place_batch` maps to a single exchange call
    fn supports_batch(&self) -> bool;

    fn cancel(&mut self, cancel: &CancelRequest);

    fn stop_strategy(&mut self, strategy: &StrategyId, reason: &str);
}

/// Keeps every request in emission order. Used by backtests and tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingAdapter {
    requests: Vec<AdapterRequest>,
    batch: bool,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_support(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn requests(&self) -> &[AdapterRequest] {
        &self.requests
    }

    pub fn take_requests(&mut self) -> Vec<AdapterRequest> {
        std::mem::take(&mut self.requests)
    }
}

impl ExecutionAdapter for RecordingAdapter {
    fn place(&mut self, order: &OrderRequest) {
        self.requests.push(AdapterRequest::Place {
            order: order.clone(),
        });
    }

    fn place_batch(&mut self, orders: &[OrderRequest]) {
        self.requests.push(AdapterRequest::PlaceBatch {
            orders: orders.to_vec(),
        });
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn cancel(&mut self, cancel: &CancelRequest) {
        self.requests.push(AdapterRequest::Cancel {
            cancel: cancel.clone(),
        });
    }

    fn stop_strategy(&mut self, strategy: &StrategyId, reason: &str) {
        self.requests.push(AdapterRequest::StopStrategy {
            strategy: strategy.clone(),
            reason: reason.to_string(),
        });
    }
}

/// Forwards requests to an async wire adapter task
#[derive(Debug, Clone)]
pub struct ChannelAdapter {
    tx: mpsc::UnboundedSender<AdapterRequest>,
    batch: bool,
}

impl ChannelAdapter {
    pub fn new(batch: bool) -> (Self, mpsc::UnboundedReceiver<AdapterRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, batch }, rx)
    }

    fn send(&self, request: AdapterRequest) {
        if self.tx.send(request).is_err() {
            warn!("adapter channel closed, request dropped");
        }
    }
}

impl ExecutionAdapter for ChannelAdapter {
    fn place(&mut self, order: &OrderRequest) {
        self.send(AdapterRequest::Place {
            order: order.clone(),
        });
    }

    fn place_batch(&mut self, orders: &[OrderRequest]) {
        self.send(AdapterRequest::PlaceBatch {
            orders: orders.to_vec(),
        });
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn cancel(&mut self, cancel: &CancelRequest) {
        self.send(AdapterRequest::Cancel {
            cancel: cancel.clone(),
        });
    }

    fn stop_strategy(&mut self, strategy: &StrategyId, reason: &str) {
        self.send(AdapterRequest::StopStrategy {
            strategy: strategy.clone(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_adapter_forwards_in_order() {
        let (mut adapter, mut rx) = ChannelAdapter::new(false);
        let strategy = StrategyId::new("s1");
        adapter.stop_strategy(&strategy, "first");
        adapter.stop_strategy(&strategy, "second");

        for expected in ["first", "second"] {
            match rx.recv().await {
                Some(AdapterRequest::StopStrategy { reason, .. }) => assert_eq!(reason, expected),
                other => panic!("unexpected request: {other:?}"),
            }
        }
    }

    #[test]
    fn test_channel_adapter_survives_closed_receiver() {
        let (mut adapter, rx) = ChannelAdapter::new(true);
        drop(rx);
        adapter.stop_strategy(&StrategyId::new("s1"), "gone");
        assert!(adapter.supports_batch());
    }
}
