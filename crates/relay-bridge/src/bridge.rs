//! External event bridge
//!
//! Subscribes to one fixed channel and relays what arrives there into the
//! process. A failed liveness probe, a lost stream or a failed subscribe
//! ends [`EventBridge::run`] with a [`BridgeError`]; whoever spawned the
//! bridge decides whether to start it again.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broker::{Broker, BrokerError, ChannelEvent, LivenessProbe, Subscription};
use crate::codec::{self, CodecError};

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Channel shared by every publisher and subscriber
    pub channel: String,
    /// Time between liveness probes
    pub ping_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: "myChannel".to_string(),
            ping_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Subscribing,
    Subscribed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Subscribing => "subscribing",
            BridgeState::Subscribed => "subscribed",
        }
    }
}

/// Destination for decoded channel events.
///
/// Records arrive as the producer wrote them; keys and extra fields are
/// not checked.
pub trait EventSink: Send + Sync {
    fn deliver(&self, channel: &str, records: &[serde_json::Value]);
}

/// Relays one external channel into the process
pub struct EventBridge {
    broker: Arc<dyn Broker>,
    config: BridgeConfig,
    sink: Option<Arc<dyn EventSink>>,
    state: watch::Sender<BridgeState>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("broker", &self.broker.name())
            .field("config", &self.config)
            .field("sink", &self.sink.is_some())
            .field("state", &self.state())
            .finish()
    }
}

impl EventBridge {
    pub fn new(broker: Arc<dyn Broker>, config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(BridgeState::Disconnected);
        Self {
            broker,
            config,
            sink: None,
            state,
            shutdown: CancellationToken::new(),
        }
    }

    /// Redistribute decoded events through `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Token that stops a running bridge cleanly
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn set_state(&self, state: BridgeState) {
        self.state.send_replace(state);
    }

    /// Subscribe and relay events until shutdown or a fatal error.
    pub async fn run(&self) -> Result<(), BridgeError> {
        self.set_state(BridgeState::Subscribing);
        info!(
            broker = self.broker.name(),
            channel = %self.config.channel,
            "Subscribing to external channel"
        );

        let Subscription { mut events, probe } =
            match self.broker.subscribe(&self.config.channel).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    self.set_state(BridgeState::Disconnected);
                    return Err(BridgeError::Subscribe(e));
                }
            };
        self.set_state(BridgeState::Subscribed);

        let (probe_tx, mut probe_rx) = oneshot::channel();
        let probe_task = tokio::spawn(run_probe(probe, self.config.ping_interval, probe_tx));

        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(channel = %self.config.channel, "Bridge shutting down");
                    break Ok(());
                }
                failure = &mut probe_rx => {
                    let error = failure.unwrap_or(BrokerError::Closed);
                    break Err(BridgeError::ProbeFailed(error));
                }
                event = events.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => break Err(BridgeError::StreamClosed),
                },
            }
        };

        probe_task.abort();
        self.set_state(BridgeState::Disconnected);
        result
    }

    fn handle_event(&self, event: ChannelEvent) {
        trace!(
            channel = %event.channel,
            bytes = event.payload.len(),
            "External event received"
        );

        let records = match codec::decode_records(&event.payload) {
            Ok(records) => records,
            Err(e) => {
                warn!(channel = %event.channel, error = %e, "Dropping undecodable external event");
                return;
            }
        };

        info!(
            channel = %event.channel,
            count = records.len(),
            records = ?records,
            "External event decoded"
        );

        if let Some(sink) = &self.sink {
            sink.deliver(&event.channel, &records);
        }
    }
}

async fn run_probe(
    mut probe: Box<dyn LivenessProbe>,
    every: Duration,
    failed: oneshot::Sender<BrokerError>,
) {
    let mut ticker = tokio::time::interval(every);
    // first tick fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = probe.ping().await {
            warn!(error = %e, "Broker liveness probe failed");
            let _ = failed.send(e);
            return;
        }
        debug!("Broker liveness probe ok");
    }
}

/// Bridge-related errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Subscribe failed: {0}")]
    Subscribe(BrokerError),
    #[error("Liveness probe failed: {0}")]
    ProbeFailed(BrokerError),
    #[error("Event stream closed")]
    StreamClosed,
    #[error("Encode error: {0}")]
    Encode(#[from] CodecError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
