use crate::device::{Bench, MockDevice};
use futures_util::{SinkExt, StreamExt};
use lab_protocol::{ClientCommand, DeviceMessage};
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const MONITOR_POLL: Duration = Duration::from_millis(50);

type Client = WebSocketStream<TcpStream>;

/// Websocket side of the simulated board. Serves one panel at a time; a new
/// client replaces the old one.
pub struct DeviceServer {
    listener: TcpListener,
    device: MockDevice,
    bench: Box<dyn Bench + Send>,
}

impl DeviceServer {
    /// Binds before returning, so `local_addr` is valid immediately
    /// (use port 0 for an ephemeral port).
    pub async fn bind(addr: &str, bench: impl Bench + Send + 'static) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            device: MockDevice::new(),
            bench: Box::new(bench),
        })
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.device = self.device.with_monitor_interval(interval);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the server on the current tokio runtime.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let (stop, stopped) = oneshot::channel();
        let join = tokio::spawn(self.serve(stopped));
        tracing::info!("device websocket listening on {addr}");
        Ok(ServerHandle { addr, stop, join })
    }

    /// Serves until `stop` fires or its sender is dropped.
    pub async fn serve(mut self, mut stop: oneshot::Receiver<()>) {
        let mut client: Option<Client> = None;
        let mut ticker = tokio::time::interval(MONITOR_POLL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("ws accept failed: {e}");
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    let handshake = tokio_tungstenite::accept_async(stream);
                    let mut ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
                        Ok(Ok(ws)) => ws,
                        Ok(Err(e)) => {
                            tracing::warn!("ws handshake with {peer} failed: {e}");
                            continue;
                        }
                        Err(_) => {
                            tracing::warn!("ws handshake with {peer} timed out");
                            continue;
                        }
                    };

                    if let Some(mut prev) = client.take() {
                        tracing::info!("replacing client with {peer}");
                        let _ = prev.close(None).await;
                        self.device.detach();
                    }

                    tracing::info!("client connected from {peer}");
                    let greeting = self.device.attach();
                    if send(&mut ws, &greeting).await.is_ok() {
                        client = Some(ws);
                    } else {
                        self.device.detach();
                    }
                }
                frame = next_frame(&mut client) => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match parse_command(text.as_str()) {
                            Ok(cmd) => self.device.handle(cmd, self.bench.as_mut()),
                            Err(reply) => {
                                tracing::debug!("rejected frame {:?}: {reply:?}", text.as_str());
                                reply
                            }
                        };
                        deliver(&mut client, &mut self.device, &reply).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("client closed");
                        client = None;
                        self.device.detach();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("client dropped: {e}");
                        client = None;
                        self.device.detach();
                    }
                },
                _ = ticker.tick() => {
                    let reading = self.device.poll(Instant::now(), self.bench.as_mut());
                    if let Some(reading) = reading {
                        deliver(&mut client, &mut self.device, &reading).await;
                    }
                }
            }
        }

        if let Some(mut ws) = client {
            let _ = ws.close(None).await;
        }
    }
}

/// Owner of a spawned server.
pub struct ServerHandle {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, closes the client and releases the port.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.join.await;
    }
}

async fn next_frame(client: &mut Option<Client>) -> Option<Result<Message, WsError>> {
    match client.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn deliver(client: &mut Option<Client>, device: &mut MockDevice, msg: &DeviceMessage) {
    let Some(ws) = client.as_mut() else { return };
    if send(ws, msg).await.is_err() {
        tracing::debug!("write failed, dropping client");
        *client = None;
        device.detach();
    }
}

async fn send(ws: &mut Client, msg: &DeviceMessage) -> Result<(), WsError> {
    let payload = serde_json::to_string(msg).map_err(|e| WsError::Io(io::Error::other(e)))?;
    ws.send(Message::Text(payload.into())).await
}

/// Unparsable text and well-formed JSON naming an unknown command get
/// different error replies.
pub(crate) fn parse_command(text: &str) -> Result<ClientCommand, DeviceMessage> {
    let value: Value = serde_json::from_str(text).map_err(|_| error("invalid json"))?;
    serde_json::from_value(value).map_err(|_| error("Unknown command"))
}

fn error(message: &str) -> DeviceMessage {
    DeviceMessage::Error {
        message: message.to_string(),
    }
}
