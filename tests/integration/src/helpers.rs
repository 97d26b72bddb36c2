//! Test helpers
//!
//! Config builders, a handler that records every event, and shorthands for
//! wiring shards to the scripted gateway.

use async_trait::async_trait;
use fluxer_gateway::transport::Connector;
use fluxer_gateway::{
    DispatchEvent, EventHandler, GatewayConfig, GatewayResult, IdentifyLimiter, ShardConnection,
    ShardDescriptor, ShardEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::fixtures::{GATEWAY_URL, TOKEN};
use crate::gateway::{MockGateway, WAIT_TIMEOUT};

/// Config pointing at the scripted gateway
pub fn test_config() -> GatewayConfig {
    GatewayConfig::new(TOKEN).with_gateway_url(GATEWAY_URL)
}

/// A single shard wired to `gateway`
pub fn connect_shard(
    config: GatewayConfig,
    descriptor: ShardDescriptor,
    gateway: &Arc<MockGateway>,
    identify: Arc<dyn IdentifyLimiter>,
    handler: Arc<dyn EventHandler>,
) -> Arc<ShardConnection> {
    ShardConnection::new(
        descriptor,
        Arc::new(config),
        Arc::clone(gateway) as Arc<dyn Connector>,
        identify,
        handler,
    )
}

/// Run `open` in the background so the test can play the server meanwhile
pub fn spawn_open(shard: &Arc<ShardConnection>) -> JoinHandle<GatewayResult<()>> {
    let shard = Arc::clone(shard);
    tokio::spawn(async move { shard.open().await })
}

// ============================================================================
// Recording handler
// ============================================================================

/// One callback the handler received
#[derive(Debug, Clone)]
pub enum Recorded {
    Dispatch(DispatchEvent),
    Shard(ShardEvent),
}

/// Handler forwarding every callback to an [`EventLog`]
pub struct Recorder {
    tx: mpsc::UnboundedSender<Recorded>,
}

/// Receiving side of a [`Recorder`]
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<Recorded>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, EventLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), EventLog { rx })
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_dispatch(&self, event: DispatchEvent) {
        let _ = self.tx.send(Recorded::Dispatch(event));
    }

    async fn on_shard_event(&self, event: ShardEvent) {
        let _ = self.tx.send(Recorded::Shard(event));
    }
}

impl EventLog {
    /// Skip events until one matches `predicate`
    pub async fn wait_for<F>(&mut self, predicate: F) -> Recorded
    where
        F: Fn(&Recorded) -> bool,
    {
        let found = tokio::time::timeout(WAIT_TIMEOUT, async {
            while let Some(event) = self.rx.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(event)) => event,
            Ok(None) => panic!("Handler dropped before the expected event"),
            Err(_) => panic!("Expected event did not arrive in time"),
        }
    }

    /// Next lifecycle event matching `predicate`
    pub async fn shard_event<F>(&mut self, predicate: F) -> ShardEvent
    where
        F: Fn(&ShardEvent) -> bool,
    {
        match self
            .wait_for(|e| matches!(e, Recorded::Shard(event) if predicate(event)))
            .await
        {
            Recorded::Shard(event) => event,
            Recorded::Dispatch(_) => unreachable!(),
        }
    }

    /// Next dispatch of `event_type`
    pub async fn dispatch(&mut self, event_type: &str) -> DispatchEvent {
        match self
            .wait_for(|e| matches!(e, Recorded::Dispatch(event) if event.event_type == event_type))
            .await
        {
            Recorded::Dispatch(event) => event,
            Recorded::Shard(_) => unreachable!(),
        }
    }

    /// Everything recorded so far, without waiting
    pub fn drain(&mut self) -> Vec<Recorded> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
