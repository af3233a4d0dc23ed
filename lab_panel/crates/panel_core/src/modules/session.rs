use crate::modules::config::PanelConfig;
use crate::modules::connection::{ConnectionManager, ConnectionState, Transport};
use crate::modules::dispatcher::CommandDispatcher;
use crate::modules::error::LabError;
use crate::modules::events::{NoticeLevel, Notifier, PanelEvent};
use crate::modules::gates::GateSelection;
use crate::modules::history::{ExperimentKind, HistoryStore, Reading};
use crate::modules::protocol::ClientCommand;
use crate::modules::router::{EventRouter, Routed};
use crate::modules::store::{KvStore, DEVICE_ADDRESS_KEY};
use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;

pub const MAX_BRIGHTNESS: u8 = 100;

/// A user action from one of the experiment panels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    MeasureResistor,
    SetLed(u8),
    LedOn,
    LedOff,
    ReadTemperature,
    StartMonitoring,
    StopMonitoring,
    ReadLight,
    SelectGate(GateSelection),
    Ping,
}

/// All state of one panel: the device connection, experiment history and the
/// bits of UI state that mirror the device.
pub struct Session {
    connection: ConnectionManager,
    dispatcher: CommandDispatcher,
    router: EventRouter,
    history: HistoryStore,
    store: Arc<dyn KvStore>,
    notifier: Notifier,
    last_address: Option<String>,
    led_brightness: u8,
    monitoring: bool,
    gate: Option<GateSelection>,
}

impl Session {
    pub fn create(config: &PanelConfig, store: Arc<dyn KvStore>) -> Self {
        let notifier = Notifier::new();
        let history = HistoryStore::load(Arc::clone(&store));
        let last_address = match store.get(DEVICE_ADDRESS_KEY) {
            Ok(addr) => addr.filter(|a| !a.trim().is_empty()),
            Err(e) => {
                tracing::warn!("could not read last device address: {e}");
                None
            }
        };

        Self {
            connection: ConnectionManager::new(config.device_port, notifier.clone()),
            dispatcher: CommandDispatcher::new(notifier.clone()),
            router: EventRouter::new(notifier.clone()),
            history,
            store,
            notifier,
            last_address,
            led_brightness: 0,
            monitoring: false,
            gate: None,
        }
    }

    pub fn teardown(mut self) {
        self.disconnect();
        tracing::debug!("session closed");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Last address that completed a handshake, for pre-filling.
    pub fn last_address(&self) -> Option<&str> {
        self.last_address.as_deref()
    }

    pub fn led_brightness(&self) -> u8 {
        self.led_brightness
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn gate(&self) -> Option<GateSelection> {
        self.gate
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// A rejected address leaves the current connection and monitoring untouched.
    pub fn connect(&mut self, address: &str) -> Result<Url, LabError> {
        let url = self.connection.connect(address)?;
        self.monitoring = false;
        Ok(url)
    }

    pub fn on_open(&mut self, transport: Box<dyn Transport>) -> bool {
        if !self.connection.on_open(transport) {
            return false;
        }
        if let Some(addr) = self.connection.address().map(str::to_owned) {
            if let Err(e) = self.store.set(DEVICE_ADDRESS_KEY, &addr) {
                tracing::warn!("could not save device address: {e}");
            }
            self.last_address = Some(addr);
        }
        true
    }

    pub fn on_connect_failed(&mut self, reason: &str) -> LabError {
        self.connection.on_connect_failed(reason)
    }

    pub fn on_closed(&mut self) {
        self.connection.on_closed();
        self.monitoring = false;
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.monitoring = false;
    }

    pub fn on_message(&mut self, raw: &str) -> Option<Routed> {
        let routed = self.router.on_message(raw, &mut self.history);
        if let Some(Routed::LedStatus { brightness }) = routed {
            self.led_brightness = brightness.min(MAX_BRIGHTNESS);
        }
        routed
    }

    /// Runs a user action. Returns whether a command reached the transport.
    pub fn apply(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::MeasureResistor => self.send(ClientCommand::MeasureResistor),
            Intent::SetLed(brightness) => self.set_led(brightness),
            Intent::LedOn => self.set_led(MAX_BRIGHTNESS),
            Intent::LedOff => self.set_led(0),
            Intent::ReadTemperature => self.send(ClientCommand::ReadTemperature),
            Intent::StartMonitoring => {
                if self.monitoring {
                    return false;
                }
                let sent = self.send(ClientCommand::StartTemperatureMonitoring);
                if sent {
                    self.monitoring = true;
                    self.notifier
                        .notice(NoticeLevel::Success, "Temperature monitoring started");
                }
                sent
            }
            Intent::StopMonitoring => {
                if !self.monitoring {
                    return false;
                }
                let sent = self.send(ClientCommand::StopTemperatureMonitoring);
                if sent {
                    self.monitoring = false;
                    self.notifier
                        .notice(NoticeLevel::Info, "Temperature monitoring stopped");
                }
                sent
            }
            Intent::ReadLight => self.send(ClientCommand::ReadLight),
            Intent::SelectGate(selection) => {
                self.select_gate(selection);
                self.mirror_gate(selection)
            }
            Intent::Ping => self.send(ClientCommand::Ping),
        }
    }

    /// Evaluates the gate locally; the device mirror never affects the result.
    pub fn select_gate(&mut self, selection: GateSelection) -> bool {
        self.gate = Some(selection);
        selection.output()
    }

    pub fn clear_history(&mut self, experiment: ExperimentKind) {
        self.history.clear(experiment);
        self.notifier.emit(PanelEvent::HistoryCleared { experiment });
        self.notifier
            .notice(NoticeLevel::Success, format!("{experiment} data cleared"));
    }

    pub fn snapshot(&self, experiment: ExperimentKind) -> Vec<Reading> {
        self.history.snapshot(experiment)
    }

    pub fn export(&self, experiment: ExperimentKind) -> Result<String, LabError> {
        self.history.export(experiment).inspect_err(|e| {
            if matches!(e, LabError::EmptyHistory(_)) {
                self.notifier
                    .notice(NoticeLevel::Warning, format!("No {experiment} data to export"));
            }
        })
    }

    fn send(&mut self, cmd: ClientCommand) -> bool {
        self.dispatcher.send(&mut self.connection, &cmd)
    }

    fn set_led(&mut self, brightness: u8) -> bool {
        let brightness = brightness.min(MAX_BRIGHTNESS);
        if !self.send(ClientCommand::SetLed { brightness }) {
            return false;
        }
        self.led_brightness = brightness;

        let reading = Reading::now(ExperimentKind::Pwm, f64::from(brightness));
        self.history.append(reading.clone());
        self.notifier.emit(PanelEvent::ReadingRecorded { reading });
        true
    }

    fn mirror_gate(&mut self, selection: GateSelection) -> bool {
        let cmd = ClientCommand::SetLogicGate {
            gate_type: selection.gate_type,
            input_a: u8::from(selection.input_a),
            input_b: u8::from(selection.input_b),
        };
        self.dispatcher.send_best_effort(&mut self.connection, &cmd)
    }
}
