use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use watchparty_protocol::{ClientCommand, HubEvent};

use crate::error::{Result, SessionError};
use crate::task::ScheduledTask;

const CHANNEL_BUFFER: usize = 100;

/// What the hub connection delivers to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum HubInbound {
    Event(HubEvent),
    /// The connection is gone; nothing more will arrive.
    Disconnected,
}

/// Outbound half of the hub connection. Sends never wait on the network.
pub struct HubClient {
    commands: mpsc::Sender<ClientCommand>,
    io: Option<ScheduledTask>,
}

impl HubClient {
    /// Opens the WebSocket and spawns the task that pumps frames both ways.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<HubInbound>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        log::info!("Connected to hub at {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (command_tx, mut command_rx) = mpsc::channel::<ClientCommand>(CHANNEL_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER);

        let io = ScheduledTask::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = command_rx.recv() => {
                        let Some(command) = outgoing else {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&command) {
                            Ok(json) => json,
                            Err(e) => {
                                log::error!("Failed to serialize {}: {}", command.kind(), e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json)).await {
                            log::warn!("Hub send failed: {}", e);
                            break;
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => match serde_json::from_str::<HubEvent>(&text) {
                                Ok(event) => {
                                    if inbound_tx.send(HubInbound::Event(event)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => log::warn!("Dropping unparseable hub frame: {}", e),
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                log::warn!("Hub connection error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            log::info!("Hub connection closed");
            let _ = inbound_tx.send(HubInbound::Disconnected).await;
        });

        Ok((Self { commands: command_tx, io: Some(io) }, inbound_rx))
    }

    /// A client backed by a plain channel instead of a socket.
    pub fn channel() -> (Self, mpsc::Receiver<ClientCommand>) {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        (Self { commands: tx, io: None }, rx)
    }

    /// Queues a command for the hub.
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        log::debug!("-> {}", command.kind());
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => SessionError::Disconnected,
            mpsc::error::TrySendError::Full(cmd) => {
                SessionError::Transport(format!("outbound queue full, dropped {}", cmd.kind()))
            }
        })
    }

    /// Sender handle for background tasks such as the heartbeat.
    pub fn sender(&self) -> mpsc::Sender<ClientCommand> {
        self.commands.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed() || self.io.as_ref().is_some_and(|io| io.is_finished())
    }
}
