//! Live driver: feeds the deterministic engine from an async event source.
//!
//! The engine itself never awaits. This loop waits for whichever comes first
//! (a shutdown signal, the next inbound event, the next timer deadline) and
//! advances the engine to the current clock reading.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::events::EventEnvelope;
use super::shutdown::{GracefulShutdown, ShutdownPhase, ShutdownSignal};
use super::supervisor::{Engine, EnginePhase};
use crate::error::Result;

/// Source of normalized inbound events
#[async_trait]
pub trait EventFeed: Send {
    /// `None` once the source is exhausted or disconnected
    async fn next_event(&mut self) -> Option<EventEnvelope>;
}

/// Events pushed by exchange adapter tasks
pub struct ChannelFeed {
    rx: mpsc::Receiver<EventEnvelope>,
}

impl ChannelFeed {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<EventEnvelope>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl EventFeed for ChannelFeed {
    async fn next_event(&mut self) -> Option<EventEnvelope> {
        self.rx.recv().await
    }
}

/// Pre-recorded events, yielded in order
#[derive(Debug, Default)]
pub struct ReplayFeed {
    events: VecDeque<EventEnvelope>,
}

impl ReplayFeed {
    pub fn new(events: Vec<EventEnvelope>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventFeed for ReplayFeed {
    async fn next_event(&mut self) -> Option<EventEnvelope> {
        self.events.pop_front()
    }
}

pub struct LiveDriver<F, C> {
    engine: Engine,
    feed: F,
    clock: C,
    shutdown: GracefulShutdown,
}

impl<F: EventFeed, C: Clock> LiveDriver<F, C> {
    pub fn new(engine: Engine, feed: F, clock: C, shutdown: GracefulShutdown) -> Self {
        Self {
            engine,
            feed,
            clock,
            shutdown,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }

    /// Run until a shutdown signal or until the feed closes, then stop all
    /// strategies and drain in-flight orders.
    pub async fn run(&mut self) -> Result<()> {
        if self.engine.phase() == EnginePhase::Idle {
            self.engine.start(self.clock.now_ms())?;
        }
        let mut signals = self.shutdown.subscribe();
        info!(now_ms = self.clock.now_ms(), "live driver started");

        let (drain, feed_open) = loop {
            if self.shutdown.is_shutdown_requested() {
                break (true, true);
            }
            let next_due = self.engine.next_timer_due();
            let sleep_for = next_due
                .map(|due| Duration::from_millis(due.saturating_sub(self.clock.now_ms()).max(0) as u64))
                .unwrap_or_default();

            tokio::select! {
                biased;

                signal = signals.recv() => {
                    let emergency = matches!(signal, Ok(ShutdownSignal::Emergency));
                    break (!emergency, true);
                }
                event = self.feed.next_event() => match event {
                    Some(envelope) => {
                        let now = self.clock.now_ms().max(envelope.ts_ms);
                        self.engine.ingest(envelope);
                        self.engine.advance_to(now);
                    }
                    None => {
                        info!("event feed closed");
                        break (false, false);
                    }
                },
                _ = tokio::time::sleep(sleep_for), if next_due.is_some() => {
                    self.engine.advance_to(self.clock.now_ms());
                }
            }
        };

        self.shutdown.set_phase(ShutdownPhase::StoppingStrategies);
        self.engine.shutdown();

        if drain && feed_open {
            self.shutdown.set_phase(ShutdownPhase::DrainingOrders);
            self.drain_orders().await;
        }
        self.shutdown.set_phase(ShutdownPhase::Complete);
        Ok(())
    }

    /// Keep applying execution events until no order is live or time runs out
    async fn drain_orders(&mut self) {
        let timeout = self.shutdown.drain_timeout();
        let drained = tokio::time::timeout(timeout, async {
            while self.engine.live_order_count() > 0 {
                let Some(envelope) = self.feed.next_event().await else {
                    break;
                };
                let now = self.clock.now_ms().max(envelope.ts_ms);
                self.engine.ingest(envelope);
                self.engine.advance_to(now);
            }
        })
        .await;

        let live = self.engine.live_order_count();
        match drained {
            Ok(()) if live == 0 => debug!("all orders drained"),
            Ok(()) => warn!(live, "event feed closed with orders still live"),
            Err(_) => warn!(live, timeout_ms = timeout.as_millis() as u64, "order drain timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Environment, ExchangeInstance};
    use crate::engine::adapter::RecordingAdapter;
    use crate::engine::clock::ManualClock;
    use crate::engine::events::{Event, ExchangeHealth, ExchangeStateChanged};
    use crate::engine::id_gen::SeededIdGenerator;

    fn engine() -> Engine {
        let mut engine = Engine::new(
            Box::new(RecordingAdapter::new()),
            Box::new(SeededIdGenerator::new(0, "t")),
        );
        engine.register_exchange(&ExchangeInstance::new("hyperliquid", Environment::Testnet));
        engine
    }

    fn halt(ts_ms: i64) -> EventEnvelope {
        EventEnvelope::new(
            ExchangeInstance::new("hyperliquid", Environment::Testnet),
            ts_ms,
            Event::ExchangeStateChanged(ExchangeStateChanged {
                old_state: ExchangeHealth::Active,
                new_state: ExchangeHealth::Halted,
                reason: String::new(),
            }),
        )
    }

    #[tokio::test]
    async fn test_replay_feed_runs_to_completion() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(50));
        let mut driver = LiveDriver::new(
            engine(),
            ReplayFeed::new(vec![halt(10), halt(20)]),
            ManualClock::new(0),
            shutdown.clone(),
        );
        driver.run().await.unwrap();

        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
        let engine = driver.into_engine();
        assert_eq!(engine.phase(), EnginePhase::Stopped);
        assert_eq!(engine.now_ms(), 20);
        assert_eq!(engine.router_stats().events_received, 2);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_channel_feed() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(50));
        let (tx, feed) = ChannelFeed::channel(8);
        let mut driver = LiveDriver::new(engine(), feed, ManualClock::new(0), shutdown.clone());

        tx.send(halt(5)).await.unwrap();
        let trigger = shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.request_shutdown(ShutdownSignal::Graceful);
            tx
        });

        driver.run().await.unwrap();
        let _tx = handle.await.unwrap();
        assert_eq!(driver.engine().phase(), EnginePhase::Stopped);
        assert_eq!(driver.engine().exchange_health(&halt(0).exchange), Some(ExchangeHealth::Halted));
    }
}
