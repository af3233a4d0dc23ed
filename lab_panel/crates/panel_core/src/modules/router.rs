use crate::modules::error::LabError;
use crate::modules::events::{NoticeLevel, Notifier, PanelEvent};
use crate::modules::history::{ExperimentKind, HistoryStore, Reading};
use crate::modules::protocol::DeviceMessage;
use serde_json::Value;

/// What a single inbound frame turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Recorded(Reading),
    Rejected(ExperimentKind),
    LedStatus { brightness: u8 },
    GateResult { output: bool },
    Status(String),
    DeviceError(String),
    Pong,
    Ignored(String),
}

pub struct EventRouter {
    notifier: Notifier,
}

impl EventRouter {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    /// Routes one frame. Malformed payloads are reported and dropped.
    pub fn on_message(&self, raw: &str, history: &mut HistoryStore) -> Option<Routed> {
        match self.route(raw, history) {
            Ok(routed) => Some(routed),
            Err(e) => {
                tracing::warn!("{e}; payload: {raw}");
                self.notifier
                    .notice(NoticeLevel::Danger, "Error parsing server response");
                None
            }
        }
    }

    pub fn route(&self, raw: &str, history: &mut HistoryStore) -> Result<Routed, LabError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| LabError::MalformedMessage(e.to_string()))?;
        let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
            return Err(LabError::MalformedMessage("missing \"type\" field".to_string()));
        };
        let msg: DeviceMessage = serde_json::from_value(value)
            .map_err(|e| LabError::MalformedMessage(format!("{kind}: {e}")))?;

        tracing::debug!("received {kind}");
        Ok(self.dispatch(kind, msg, history))
    }

    fn dispatch(&self, kind: String, msg: DeviceMessage, history: &mut HistoryStore) -> Routed {
        let valid = msg.is_valid();
        match msg {
            DeviceMessage::ResistanceMeasurement {
                resistance,
                uncertainty,
                ..
            } => {
                if !valid {
                    return self.reject(ExperimentKind::Resistor, "resistance measurement");
                }
                let reading = Reading::now(ExperimentKind::Resistor, resistance)
                    .with_uncertainty(uncertainty);
                self.record(reading, history)
            }
            DeviceMessage::TemperatureReading { temperature, .. } => {
                if !valid {
                    return self.reject(ExperimentKind::Temperature, "temperature reading");
                }
                self.record(Reading::now(ExperimentKind::Temperature, temperature), history)
            }
            DeviceMessage::LightReading {
                light_intensity,
                resistance,
                ..
            } => {
                if !valid {
                    return self.reject(ExperimentKind::Light, "light reading");
                }
                let reading = Reading::now(ExperimentKind::Light, resistance)
                    .with_light(light_intensity, resistance);
                self.record(reading, history)
            }
            DeviceMessage::LedStatus { brightness, .. } => {
                self.notifier.emit(PanelEvent::LedStatus { brightness });
                Routed::LedStatus { brightness }
            }
            DeviceMessage::LogicGateResult { output } => {
                tracing::debug!("logic gate result: {output}");
                self.notifier.emit(PanelEvent::GateResult { output });
                Routed::GateResult { output }
            }
            DeviceMessage::Status { message } => {
                self.notifier.notice(NoticeLevel::Info, message.clone());
                Routed::Status(message)
            }
            DeviceMessage::Error { message } => {
                self.notifier
                    .notice(NoticeLevel::Danger, format!("Device error: {message}"));
                Routed::DeviceError(message)
            }
            DeviceMessage::Pong => {
                self.notifier.emit(PanelEvent::Pong);
                self.notifier
                    .notice(NoticeLevel::Success, "Connection test successful!");
                Routed::Pong
            }
            DeviceMessage::Unknown => {
                tracing::warn!("unknown message type: {kind}");
                Routed::Ignored(kind)
            }
        }
    }

    fn record(&self, reading: Reading, history: &mut HistoryStore) -> Routed {
        history.append(reading.clone());
        self.notifier.emit(PanelEvent::ReadingRecorded {
            reading: reading.clone(),
        });
        Routed::Recorded(reading)
    }

    fn reject(&self, experiment: ExperimentKind, what: &'static str) -> Routed {
        tracing::warn!("{}", LabError::InvalidReading(what));
        self.notifier.emit(PanelEvent::ReadingRejected { experiment });
        self.notifier
            .notice(NoticeLevel::Warning, format!("Invalid {what} received"));
        Routed::Rejected(experiment)
    }
}
