use crate::modules::connection::{ConnectionState, Transport};
use crate::modules::error::LabError;
use crate::modules::events::{Notifier, PanelEvent};
use crate::modules::history::{ExperimentKind, Reading};
use crate::modules::session::{Intent, Session};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const COMMAND_CAPACITY: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub enum PanelCommand {
    Connect(String),
    Disconnect,
    Intent(Intent),
    Snapshot {
        kind: ExperimentKind,
        reply: oneshot::Sender<Vec<Reading>>,
    },
    Export {
        kind: ExperimentKind,
        reply: oneshot::Sender<Result<String, LabError>>,
    },
    Clear(ExperimentKind),
    State(oneshot::Sender<ConnectionState>),
    Shutdown,
}

/// Cloneable front door to the task that owns the `Session`.
#[derive(Clone)]
pub struct PanelHandle {
    tx: mpsc::Sender<PanelCommand>,
    events: Notifier,
}

impl PanelHandle {
    /// Spawns the driver on the current tokio runtime.
    pub fn spawn(session: Session) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = session.notifier();
        let join = tokio::spawn(run(rx, session));
        (Self { tx, events }, join)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    pub async fn connect(&self, address: impl Into<String>) -> Result<(), String> {
        self.post(PanelCommand::Connect(address.into())).await
    }

    pub async fn disconnect(&self) -> Result<(), String> {
        self.post(PanelCommand::Disconnect).await
    }

    pub async fn apply(&self, intent: Intent) -> Result<(), String> {
        self.post(PanelCommand::Intent(intent)).await
    }

    pub async fn clear(&self, kind: ExperimentKind) -> Result<(), String> {
        self.post(PanelCommand::Clear(kind)).await
    }

    pub async fn snapshot(&self, kind: ExperimentKind) -> Result<Vec<Reading>, String> {
        let (reply, rx) = oneshot::channel();
        self.post(PanelCommand::Snapshot { kind, reply }).await?;
        rx.await.map_err(|_| unavailable())
    }

    pub async fn export(&self, kind: ExperimentKind) -> Result<Result<String, LabError>, String> {
        let (reply, rx) = oneshot::channel();
        self.post(PanelCommand::Export { kind, reply }).await?;
        rx.await.map_err(|_| unavailable())
    }

    pub async fn state(&self) -> Result<ConnectionState, String> {
        let (reply, rx) = oneshot::channel();
        self.post(PanelCommand::State(reply)).await?;
        rx.await.map_err(|_| unavailable())
    }

    pub async fn shutdown(&self) -> Result<(), String> {
        self.post(PanelCommand::Shutdown).await
    }

    async fn post(&self, cmd: PanelCommand) -> Result<(), String> {
        self.tx.send(cmd).await.map_err(|_| unavailable())
    }
}

fn unavailable() -> String {
    "panel actor unavailable".to_string()
}

struct Link {
    socket: Socket,
    outbox: mpsc::UnboundedReceiver<Message>,
}

/// Queues frames for the driver loop; the dispatcher never waits on the socket.
struct OutboxTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl Transport for OutboxTransport {
    fn send_text(&mut self, payload: String) -> Result<(), LabError> {
        self.tx
            .send(Message::Text(payload.into()))
            .map_err(|_| LabError::TransportClosed)
    }

    fn close(&mut self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// Handshake in flight. It resolves inside the select loop so commands keep
/// flowing while the device is slow to answer.
type Handshake = Pin<Box<dyn Future<Output = Result<Socket, String>> + Send>>;

enum LinkEvent {
    Outbound(Option<Message>),
    Inbound(Option<Result<Message, WsError>>),
}

/// Single-task event loop: every session mutation happens here, one event at a time.
pub async fn run(mut rx: mpsc::Receiver<PanelCommand>, mut session: Session) {
    let mut link: Option<Link> = None;
    let mut pending: Option<Handshake> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                if !handle_command(&mut session, cmd, &mut link, &mut pending).await {
                    break;
                }
            }
            opened = finish_handshake(&mut pending) => {
                pending = None;
                on_handshake(&mut session, opened, &mut link).await;
            }
            event = next_link_event(&mut link) => match event {
                LinkEvent::Outbound(Some(msg)) => {
                    if let Some(active) = link.as_mut() {
                        let closing = matches!(msg, Message::Close(_));
                        if let Err(e) = active.socket.send(msg).await {
                            tracing::warn!("socket write failed: {e}");
                            session.on_closed();
                        } else if closing {
                            let _ = active.socket.close(None).await;
                        }
                    }
                }
                LinkEvent::Outbound(None) => {}
                LinkEvent::Inbound(Some(Ok(Message::Text(text)))) => {
                    tracing::debug!("frame: {}", text.as_str());
                    session.on_message(text.as_str());
                }
                LinkEvent::Inbound(Some(Ok(Message::Close(_))) | None) => session.on_closed(),
                LinkEvent::Inbound(Some(Ok(_))) => {}
                LinkEvent::Inbound(Some(Err(e))) => {
                    tracing::warn!("socket read failed: {e}");
                    session.on_closed();
                }
            },
        }

        if !session.is_connected() {
            drop_link(&mut link).await;
        }
    }

    drop_link(&mut link).await;
    session.teardown();
}

async fn finish_handshake(pending: &mut Option<Handshake>) -> Result<Socket, String> {
    match pending.as_mut() {
        Some(handshake) => handshake.await,
        None => std::future::pending().await,
    }
}

async fn next_link_event(link: &mut Option<Link>) -> LinkEvent {
    let Some(active) = link.as_mut() else {
        return std::future::pending().await;
    };
    tokio::select! {
        out = active.outbox.recv() => LinkEvent::Outbound(out),
        incoming = active.socket.next() => LinkEvent::Inbound(incoming),
    }
}

/// A socket that opens after the user gave up is refused by the session and closed.
async fn on_handshake(session: &mut Session, opened: Result<Socket, String>, link: &mut Option<Link>) {
    match opened {
        Ok(mut socket) => {
            let (tx, outbox) = mpsc::unbounded_channel();
            if session.on_open(Box::new(OutboxTransport { tx })) {
                *link = Some(Link { socket, outbox });
            } else {
                tracing::debug!("closing socket from an abandoned connect");
                let _ = socket.close(None).await;
            }
        }
        Err(e) if session.state() == ConnectionState::Connecting => {
            session.on_connect_failed(&e);
        }
        Err(e) => tracing::debug!("abandoned connect failed: {e}"),
    }
}

async fn handle_command(
    session: &mut Session,
    cmd: PanelCommand,
    link: &mut Option<Link>,
    pending: &mut Option<Handshake>,
) -> bool {
    match cmd {
        PanelCommand::Connect(address) => {
            let Ok(url) = session.connect(&address) else {
                return true;
            };
            drop_link(link).await;
            *pending = Some(Box::pin(async move {
                tokio_tungstenite::connect_async(url.as_str())
                    .await
                    .map(|(socket, _)| socket)
                    .map_err(|e| e.to_string())
            }));
        }
        PanelCommand::Disconnect => {
            session.disconnect();
            drop_link(link).await;
        }
        PanelCommand::Intent(intent) => {
            session.apply(intent);
        }
        PanelCommand::Snapshot { kind, reply } => {
            let _ = reply.send(session.snapshot(kind));
        }
        PanelCommand::Export { kind, reply } => {
            let _ = reply.send(session.export(kind));
        }
        PanelCommand::Clear(kind) => session.clear_history(kind),
        PanelCommand::State(reply) => {
            let _ = reply.send(session.state());
        }
        PanelCommand::Shutdown => return false,
    }
    true
}

/// Flushes anything still queued (including a close frame) and drops the socket.
async fn drop_link(link: &mut Option<Link>) {
    let Some(mut l) = link.take() else { return };
    while let Ok(msg) = l.outbox.try_recv() {
        if l.socket.send(msg).await.is_err() {
            break;
        }
    }
    let _ = l.socket.close(None).await;
}
