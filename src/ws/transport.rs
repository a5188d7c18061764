use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Frame(String),
    Closed(Option<String>),
}

/// An open live connection as seen by the supervisor.
///
/// Dropping the link closes the underlying transport.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<LinkEvent>,
}

/// The far side of a [`Link`]: whatever moves frames between the link and
/// the actual transport.
#[derive(Debug)]
pub struct Peer {
    pub sent: mpsc::Receiver<String>,
    pub frames: mpsc::Sender<LinkEvent>,
}

impl Link {
    pub fn pair(buffer: usize) -> (Link, Peer) {
        let (outbound, sent) = mpsc::channel(buffer);
        let (frames, inbound) = mpsc::channel(buffer);
        (Link { outbound, inbound }, Peer { sent, frames })
    }

    /// Queue a text frame without waiting.
    pub fn send(&self, frame: String) -> Result<()> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Transport("outbound buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Transport("link closed".to_string())
            }
        })
    }

    /// Next event; `None` once the far side is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.inbound.recv().await
    }
}

/// Opens live connections. Abstracted so the supervisor can be exercised
/// without a network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    buffer: usize,
}

impl WsConnector {
    pub fn new() -> Self {
        Self { buffer: 64 }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| AppError::Transport(e.to_string()))?;
        info!("Live channel opened: {}", url);

        let (link, peer) = Link::pair(self.buffer);
        tokio::spawn(pump(stream, peer));
        Ok(link)
    }
}

/// Shuttle frames between the socket and the link until either side ends.
async fn pump(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, mut peer: Peer) {
    let (mut ws_sender, mut ws_receiver) = stream.split();

    loop {
        tokio::select! {
            outgoing = peer.sent.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        error!("Failed to send frame: {}", e);
                        let _ = peer.frames.send(LinkEvent::Closed(Some(e.to_string()))).await;
                        break;
                    }
                }
                None => {
                    // Link dropped by the supervisor
                    debug!("Link released, closing socket");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if peer.frames.send(LinkEvent::Frame(text.as_str().to_owned())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.as_str().to_owned());
                    info!("Server closed live channel: {:?}", reason);
                    let _ = peer.frames.send(LinkEvent::Closed(reason)).await;
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("Received unexpected binary frame");
                }
                Some(Ok(_)) => {
                    // tungstenite answers pings itself
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    let _ = peer.frames.send(LinkEvent::Closed(Some(e.to_string()))).await;
                    break;
                }
                None => {
                    let _ = peer.frames.send(LinkEvent::Closed(None)).await;
                    break;
                }
            }
        }
    }
}
