//! Transport capability and its WebSocket implementation.
//!
//! A [`Connector`] opens one transport per connection attempt. Everything
//! the transport observes (open, text frames, close, error) is posted to the
//! attempt's [`EventSink`]; the returned [`TransportHandle`] is the only way
//! to write to it.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::error::{LinkError, Result};
use crate::events::{EventSink, TransportEvent};

pub trait Connector: Send {
    fn open(&mut self, url: &str, sink: EventSink) -> Result<Box<dyn TransportHandle>>;
}

pub trait TransportHandle: Send {
    /// Fire-and-forget send of one text frame.
    fn send(&mut self, text: String) -> Result<()>;
    fn close(&mut self);
}

#[derive(Debug)]
enum NetCommand {
    SendText(String),
    Close,
}

/// Opens WebSocket links with tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&mut self, url: &str, sink: EventSink) -> Result<Box<dyn TransportHandle>> {
        let url = Url::parse(url).map_err(|e| LinkError::Transport(format!("invalid url {url}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(LinkError::Transport(format!("unsupported scheme {other}")));
            }
        }

        let (tx_cmd, rx_cmd) = mpsc::unbounded_channel();
        let link = WsLink {
            url: url.to_string(),
            sink,
            rx_cmd,
        };
        tokio::spawn(link.run());
        Ok(Box::new(WsHandle {
            tx_cmd,
            closed: false,
        }))
    }
}

struct WsHandle {
    tx_cmd: mpsc::UnboundedSender<NetCommand>,
    closed: bool,
}

impl TransportHandle for WsHandle {
    fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(LinkError::Transport("link already closed".into()));
        }
        self.tx_cmd
            .send(NetCommand::SendText(text))
            .map_err(|_| LinkError::Transport("link task has exited".into()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.tx_cmd.send(NetCommand::Close);
    }
}

struct WsLink {
    url: String,
    sink: EventSink,
    rx_cmd: mpsc::UnboundedReceiver<NetCommand>,
}

impl WsLink {
    async fn run(mut self) {
        let attempt = self.sink.attempt();
        if let Err(e) = self.connect_and_loop().await {
            log::warn!("Link #{} error: {}", attempt, e);
            self.sink.transport(TransportEvent::Error(e.to_string()));
        }
        log::debug!("Link #{} task finished", attempt);
    }

    // 连接并进入读写主循环
    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        log::info!("Connecting to {}...", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();
        self.sink.transport(TransportEvent::Opened);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.sink.transport(TransportEvent::Message(text.to_string()));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            log::debug!("Ignoring {} byte binary message", data.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            let (code, reason) = match frame {
                                Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                                None => (None, String::new()),
                            };
                            self.sink.transport(TransportEvent::Closed { code, reason });
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            self.sink.transport(TransportEvent::Closed {
                                code: None,
                                reason: String::new(),
                            });
                            return Ok(());
                        }
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendText(text)) => {
                            write.send(Message::Text(text.into())).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            log::info!("Closing link");
                            let _ = write.send(Message::Close(None)).await;
                            self.sink.transport(TransportEvent::Closed {
                                code: Some(1000),
                                reason: String::new(),
                            });
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
