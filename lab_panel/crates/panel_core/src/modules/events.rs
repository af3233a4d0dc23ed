use crate::modules::connection::ConnectionState;
use crate::modules::history::{ExperimentKind, Reading};
use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_CAPACITY: usize = 256;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Danger,
}

/// A transient, user-visible message.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum PanelEvent {
    StateChanged { state: ConnectionState },
    Notice(Notice),
    ReadingRecorded { reading: Reading },
    ReadingRejected { experiment: ExperimentKind },
    LedStatus { brightness: u8 },
    GateResult { output: bool },
    HistoryCleared { experiment: ExperimentKind },
    Pong,
}

/// Fan-out of panel events. Sending never fails; events with no subscriber are dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<PanelEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PanelEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Danger => tracing::error!("{message}"),
            NoticeLevel::Warning => tracing::warn!("{message}"),
            NoticeLevel::Info | NoticeLevel::Success => tracing::info!("{message}"),
        }
        self.emit(PanelEvent::Notice(Notice { level, message }));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
