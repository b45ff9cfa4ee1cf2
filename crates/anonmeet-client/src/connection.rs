//! Channel lifecycle and reconnection policy.
//!
//! The manager owns one live channel at a time. It never buffers outbound
//! commands while disconnected — sends are fire-and-forget best-effort, and
//! the reconciliation layer re-derives state from the next snapshot, so a
//! command lost to a dead channel simply never happened.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, trace, warn};

use anonmeet_types::events::{ClientCommand, ServerEvent};

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The retry budget is exhausted; fatal to the session. A later manual
    /// `connect()` resets the counter and starts over.
    #[error("gave up connecting after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal until the caller manually reconnects.
    GaveUp,
}

/// One live bidirectional channel: typed commands out, typed events in.
pub struct Channel {
    pub tx: mpsc::UnboundedSender<ClientCommand>,
    pub rx: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Seam for dialing a channel. Injectable so sessions and tests construct
/// their own connection objects instead of sharing module-global state.
pub trait Connector {
    fn connect(
        &mut self,
        url: &str,
    ) -> impl Future<Output = anyhow::Result<Channel>> + Send;
}

pub struct ConnectionManager<C> {
    connector: C,
    url: String,
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    state: ConnState,
    channel: Option<Channel>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, url: String, base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            connector,
            url,
            base_delay,
            max_attempts,
            attempts: 0,
            state: ConnState::Disconnected,
            channel: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|ch| !ch.tx.is_closed())
    }

    /// Return with the existing live channel, or establish a new one.
    /// Retries with linear backoff (`base_delay * attempt`); after
    /// `max_attempts` consecutive failures the manager goes `GaveUp` and the
    /// error is surfaced. A successful connect resets the attempt counter,
    /// as does calling this again from `GaveUp`.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.is_connected() {
            return Ok(());
        }
        if self.state == ConnState::GaveUp {
            self.attempts = 0;
        }

        loop {
            self.attempts += 1;
            self.state = ConnState::Connecting;

            match self.connector.connect(&self.url).await {
                Ok(channel) => {
                    info!("connected to {} (attempt {})", self.url, self.attempts);
                    self.channel = Some(channel);
                    self.attempts = 0;
                    self.state = ConnState::Connected;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "connect attempt {}/{} failed: {:#}",
                        self.attempts, self.max_attempts, e
                    );
                    if self.attempts >= self.max_attempts {
                        self.state = ConnState::GaveUp;
                        return Err(ConnectError::RetryBudgetExhausted {
                            attempts: self.attempts,
                        });
                    }
                    tokio::time::sleep(self.base_delay * self.attempts).await;
                }
            }
        }
    }

    /// Tear down the channel. Any retry in a concurrently dropped `connect`
    /// future dies with it.
    pub fn disconnect(&mut self) {
        self.channel = None;
        self.state = ConnState::Disconnected;
    }

    /// Best-effort send. Dropped (not buffered) when there is no live
    /// channel; state re-derives from the next snapshot.
    pub fn send(&mut self, cmd: ClientCommand) {
        match &self.channel {
            Some(ch) => {
                if ch.tx.send(cmd).is_err() {
                    trace!("channel died mid-send, dropping command");
                    self.channel = None;
                    self.state = ConnState::Disconnected;
                }
            }
            None => trace!("no live channel, dropping command"),
        }
    }

    /// Next inbound event. `None` means the channel is gone — the caller
    /// decides whether to reconnect.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        let ch = self.channel.as_mut()?;
        match ch.rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.channel = None;
                self.state = ConnState::Disconnected;
                None
            }
        }
    }
}

/// Production connector: dials a WebSocket and pumps JSON text frames
/// through a split sink/stream pair of tasks.
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&mut self, url: &str) -> anyhow::Result<Channel> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<ClientCommand>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        // Writer: typed commands -> JSON text frames
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("unserializable command: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        // Reader: JSON text frames -> typed events
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("bad event: {} -- raw: {}", e, &text[..text.len().min(200)]);
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        Ok(Channel {
            tx: cmd_tx,
            rx: event_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted connector: pops one pre-built result per dial.
    struct Scripted {
        results: std::collections::VecDeque<anyhow::Result<Channel>>,
        dials: u32,
    }

    impl Scripted {
        fn new(results: Vec<anyhow::Result<Channel>>) -> Self {
            Self {
                results: results.into(),
                dials: 0,
            }
        }
    }

    impl Connector for Scripted {
        async fn connect(&mut self, _url: &str) -> anyhow::Result<Channel> {
            self.dials += 1;
            self.results
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("refused")))
        }
    }

    /// Returns the channel plus the remote ends; callers keep the command
    /// receiver alive so `tx.is_closed()` stays false.
    fn live_channel() -> (
        Channel,
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ClientCommand>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Channel {
                tx: cmd_tx,
                rx: event_rx,
            },
            event_tx,
            cmd_rx,
        )
    }

    fn manager(results: Vec<anyhow::Result<Channel>>) -> ConnectionManager<Scripted> {
        ConnectionManager::new(
            Scripted::new(results),
            "ws://test".into(),
            Duration::from_millis(1),
            3,
        )
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let mut mgr = manager(vec![
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
        ]);

        let err = mgr.connect().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::RetryBudgetExhausted { attempts: 3 }
        ));
        assert_eq!(mgr.state(), ConnState::GaveUp);
        assert_eq!(mgr.connector.dials, 3);
    }

    #[tokio::test]
    async fn success_resets_attempt_counter() {
        let (channel, _tx, _cmd_rx) = live_channel();
        let mut mgr = manager(vec![
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
            Ok(channel),
        ]);

        mgr.connect().await.unwrap();
        assert_eq!(mgr.state(), ConnState::Connected);
        assert_eq!(mgr.attempts, 0);
    }

    #[tokio::test]
    async fn manual_connect_after_give_up_resets_counter() {
        let (channel, _tx, _cmd_rx) = live_channel();
        let mut mgr = manager(vec![
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
            Err(anyhow::anyhow!("down")),
            Ok(channel),
        ]);

        assert!(mgr.connect().await.is_err());
        // Manual retry from GaveUp starts a fresh budget.
        mgr.connect().await.unwrap();
        assert_eq!(mgr.state(), ConnState::Connected);
    }

    #[tokio::test]
    async fn existing_live_channel_is_reused() {
        let (channel, _tx, _cmd_rx) = live_channel();
        let mut mgr = manager(vec![Ok(channel)]);

        mgr.connect().await.unwrap();
        mgr.connect().await.unwrap();
        assert_eq!(mgr.connector.dials, 1);
    }

    #[tokio::test]
    async fn send_without_channel_is_dropped_not_buffered() {
        let (channel, _tx, _cmd_rx) = live_channel();
        let mut mgr = manager(vec![Ok(channel)]);

        // Not connected yet: dropped silently.
        mgr.send(ClientCommand::EndPoll {
            room_id: uuid::Uuid::nil(),
            poll_id: uuid::Uuid::nil(),
            user_id: uuid::Uuid::nil(),
        });
        assert_eq!(mgr.state(), ConnState::Disconnected);

        mgr.connect().await.unwrap();
        assert_eq!(mgr.state(), ConnState::Connected);
    }

    #[tokio::test]
    async fn recv_none_marks_disconnected() {
        let (channel, event_tx, _cmd_rx) = live_channel();
        let mut mgr = manager(vec![Ok(channel)]);

        mgr.connect().await.unwrap();
        drop(event_tx);

        assert!(mgr.recv().await.is_none());
        assert_eq!(mgr.state(), ConnState::Disconnected);
    }
}
