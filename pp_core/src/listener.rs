//! Feed connection supervisor.
//!
//! One task owns the subscription and the pipeline. The watchdog only shares
//! the instant of the last frame; when the feed goes quiet for too long the
//! session is dropped and a fresh connection is made.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use zeromq::{Socket, SocketRecv, SubSocket};

use crate::config::FeedConfig;
use crate::feed::FeedError;
use crate::pipeline::IngestPipeline;
use crate::tick::{system_clock, Clock};

#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedSubscription>, FeedError>;
}

#[async_trait]
pub trait FeedSubscription: Send {
    /// Next raw frame. `Ok(None)` means the publisher closed the stream.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FeedError>;
}

/// ZeroMQ SUB socket subscribed to every topic.
pub struct ZmqConnector {
    endpoint: String,
}

impl ZmqConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

fn transport(err: zeromq::ZmqError) -> FeedError {
    FeedError::Transport(err.to_string())
}

#[async_trait]
impl FeedConnector for ZmqConnector {
    async fn connect(&self) -> Result<Box<dyn FeedSubscription>, FeedError> {
        let mut socket = SubSocket::new();
        socket.connect(&self.endpoint).await.map_err(transport)?;
        socket.subscribe("").await.map_err(transport)?;
        Ok(Box::new(ZmqSubscription { socket }))
    }
}

struct ZmqSubscription {
    socket: SubSocket,
}

#[async_trait]
impl FeedSubscription for ZmqSubscription {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FeedError> {
        let message = self.socket.recv().await.map_err(transport)?;
        Ok(Some(
            message
                .get(0)
                .map(|frame| frame.to_vec())
                .unwrap_or_default(),
        ))
    }
}

/// Last-frame instant shared with the pump.
#[derive(Debug, Clone)]
pub struct Watchdog {
    last_frame: Arc<Mutex<Instant>>,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_frame: Arc::new(Mutex::new(Instant::now())),
            timeout,
        }
    }

    pub fn touch(&self) {
        if let Ok(mut last_frame) = self.last_frame.lock() {
            *last_frame = Instant::now();
        }
    }

    fn deadline(&self) -> Instant {
        let last_frame = self
            .last_frame
            .lock()
            .map(|last_frame| *last_frame)
            .unwrap_or_else(|_| Instant::now());
        last_frame + self.timeout
    }

    /// Resolves once no frame has been seen for the whole timeout.
    pub async fn silenced(&self) {
        loop {
            let deadline = self.deadline();
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

#[derive(Clone)]
pub struct ListenerSettings {
    pub silence_timeout: Duration,
    pub reconnect_delay: Duration,
    pub clock: Clock,
}

impl ListenerSettings {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            silence_timeout: config.silence_timeout(),
            reconnect_delay: config.reconnect_delay(),
            clock: system_clock(),
        }
    }
}

#[derive(Debug)]
pub enum Disconnect {
    Closed,
    Silenced,
    Failed(FeedError),
}

async fn pump(
    subscription: &mut dyn FeedSubscription,
    pipeline: &mut IngestPipeline,
    watchdog: &Watchdog,
    clock: &Clock,
) -> Disconnect {
    loop {
        match subscription.next_frame().await {
            Ok(Some(frame)) => {
                watchdog.touch();
                pipeline.handle_frame(&frame, clock()).await;
            }
            Ok(None) => return Disconnect::Closed,
            Err(err) => return Disconnect::Failed(err),
        }
    }
}

/// Connects, pumps and reconnects until `shutdown` flips to true.
pub async fn run_listener(
    connector: &dyn FeedConnector,
    pipeline: &mut IngestPipeline,
    settings: &ListenerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let metrics = pipeline.metrics();
    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            connected = connector.connect() => connected,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(mut subscription) => {
                tracing::info!(target: "powerplay::listener", "feed.connected");
                let watchdog = Watchdog::new(settings.silence_timeout);
                let reason = tokio::select! {
                    reason = pump(subscription.as_mut(), pipeline, &watchdog, &settings.clock) => reason,
                    _ = watchdog.silenced() => Disconnect::Silenced,
                    _ = shutdown.changed() => break,
                };
                metrics.record_reconnect();
                match reason {
                    Disconnect::Silenced => tracing::warn!(
                        target: "powerplay::listener",
                        timeout_secs = settings.silence_timeout.as_secs(),
                        "feed.silenced"
                    ),
                    Disconnect::Closed => {
                        tracing::warn!(target: "powerplay::listener", "feed.closed")
                    }
                    Disconnect::Failed(err) => tracing::warn!(
                        target: "powerplay::listener",
                        error = %err,
                        "feed.failed"
                    ),
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: "powerplay::listener",
                    error = %err,
                    "feed.connect_failed"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!(target: "powerplay::listener", "feed.shutdown");
}
