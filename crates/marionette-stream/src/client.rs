//! WebSocket client supervising the telemetry connection

use crate::slot::PoseSlot;
use futures_util::StreamExt;
use marionette_core::config::StreamConfig;
use marionette_core::telemetry::PoseFrame;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type TelemetrySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Connection closed by peer")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub reconnect_delay: Duration,
    pub tolerance: f32,
}

impl StreamSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            tolerance: config.tolerance,
        }
    }
}

/// Why a live connection ended
enum SessionEnd {
    Deactivated,
    ClientDropped,
}

/// Owns the activity switch of the stream task.
///
/// Dropping the client stops the task.
pub struct PoseStreamClient {
    settings: StreamSettings,
    slot: PoseSlot,
    active: watch::Sender<bool>,
}

impl PoseStreamClient {
    pub fn new(settings: StreamSettings) -> Self {
        let slot = PoseSlot::new(settings.tolerance);
        let (active, _) = watch::channel(false);
        Self {
            settings,
            slot,
            active,
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Handle to the latest-frame slot this client publishes into
    pub fn slot(&self) -> PoseSlot {
        self.slot.clone()
    }

    /// Turn streaming on or off. Activating an already active client keeps
    /// the existing connection; deactivating closes it.
    pub fn connect(&self, active: bool) {
        let previous = self.active.send_replace(active);
        if previous != active {
            info!(active, url = %self.settings.url, "Telemetry stream toggled");
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Spawn the supervisor task on the current tokio runtime
    pub fn spawn(&self) -> JoinHandle<()> {
        tokio::spawn(self.supervisor())
    }

    /// Spawn the supervisor task on a specific runtime, for callers that are
    /// not themselves running inside tokio
    pub fn spawn_on(&self, handle: &tokio::runtime::Handle) -> JoinHandle<()> {
        handle.spawn(self.supervisor())
    }

    fn supervisor(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        run(self.settings.clone(), self.slot.clone(), self.active.subscribe())
    }
}

/// Keep at most one connection open while active, reconnecting after a delay
async fn run(settings: StreamSettings, slot: PoseSlot, mut active: watch::Receiver<bool>) {
    loop {
        let activated = active.wait_for(|on| *on).await.is_ok();
        if !activated {
            debug!("Stream client dropped, stopping supervisor");
            return;
        }

        info!(url = %settings.url, "Connecting to telemetry stream");
        match connect_async(settings.url.as_str()).await {
            Ok((socket, _response)) => {
                info!(url = %settings.url, "Telemetry stream connected");
                slot.set_connected(true);
                let outcome = session(socket, &slot, &mut active).await;
                slot.set_connected(false);

                match outcome {
                    Ok(SessionEnd::Deactivated) => {
                        info!("Telemetry stream closed");
                        continue;
                    }
                    Ok(SessionEnd::ClientDropped) => return,
                    Err(e) => warn!(error = %e, "Telemetry stream lost"),
                }
            }
            Err(e) => {
                warn!(url = %settings.url, error = %e, "Failed to connect to telemetry stream");
            }
        }

        let still_active = *active.borrow();
        if !still_active {
            continue;
        }
        slot.record_reconnect();
        debug!(delay_ms = settings.reconnect_delay.as_millis() as u64, "Reconnecting");

        tokio::select! {
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
            changed = active.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Pump one connection until it drops or streaming is switched off
async fn session(
    mut socket: TelemetrySocket,
    slot: &PoseSlot,
    active: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, StreamError> {
    loop {
        tokio::select! {
            changed = active.changed() => {
                if changed.is_err() {
                    let _ = socket.close(None).await;
                    return Ok(SessionEnd::ClientDropped);
                }
                let on = *active.borrow_and_update();
                if !on {
                    let _ = socket.close(None).await;
                    return Ok(SessionEnd::Deactivated);
                }
            }
            msg = socket.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    slot.ingest(PoseFrame::decode(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    slot.ingest(PoseFrame::decode_bytes(&bytes));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Telemetry server sent close");
                    return Err(StreamError::Closed);
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(StreamError::Closed),
            }
        }
    }
}
