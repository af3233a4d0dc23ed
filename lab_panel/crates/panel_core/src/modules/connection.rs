use crate::modules::error::LabError;
use crate::modules::events::{NoticeLevel, Notifier, PanelEvent};
use serde::Serialize;
use url::Url;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Write side of an open socket.
pub trait Transport: Send {
    fn send_text(&mut self, payload: String) -> Result<(), LabError>;
    fn close(&mut self);
}

/// Turns a bare device host into the websocket endpoint. No I/O happens here.
pub fn device_endpoint(address: &str, port: u16) -> Result<Url, LabError> {
    let host = address.trim();
    let invalid = || LabError::InvalidAddress(address.to_string());

    if host.is_empty()
        || host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '?' | '#' | '@'))
    {
        return Err(invalid());
    }

    let url = Url::parse(&format!("ws://{host}:{port}")).map_err(|_| invalid())?;
    match url.host_str() {
        Some(h) if !h.is_empty() => Ok(url),
        _ => Err(invalid()),
    }
}

/// Owns the single device socket and its lifecycle.
///
/// `Connected` holds exactly when a transport is present; every path out of
/// `Connected` drops it.
pub struct ConnectionManager {
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    address: Option<String>,
    port: u16,
    notifier: Notifier,
}

impl ConnectionManager {
    pub fn new(port: u16, notifier: Notifier) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport: None,
            address: None,
            port,
            notifier,
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Validates `address` and moves to `Connecting`. The caller opens the
    /// socket and reports back through `on_open` or `on_connect_failed`.
    pub fn connect(&mut self, address: &str) -> Result<Url, LabError> {
        let url = match device_endpoint(address, self.port) {
            Ok(url) => url,
            Err(e) => {
                self.notifier
                    .notice(NoticeLevel::Danger, "Please enter a valid device IP address");
                return Err(e);
            }
        };

        if self.state != ConnectionState::Disconnected {
            self.teardown();
        }

        tracing::info!("connecting to {url}");
        self.address = Some(address.trim().to_string());
        self.set_state(ConnectionState::Connecting);
        Ok(url)
    }

    /// Completes the handshake. Returns false (and closes `transport`) if the
    /// attempt was abandoned in the meantime.
    pub fn on_open(&mut self, mut transport: Box<dyn Transport>) -> bool {
        if self.state != ConnectionState::Connecting {
            transport.close();
            return false;
        }
        self.transport = Some(transport);
        self.set_state(ConnectionState::Connected);
        self.notifier.notice(NoticeLevel::Success, "Connected to device");
        true
    }

    pub fn on_connect_failed(&mut self, reason: &str) -> LabError {
        tracing::warn!("connect failed: {reason}");
        if self.state == ConnectionState::Connecting {
            self.address = None;
            self.set_state(ConnectionState::Disconnected);
        }
        self.notifier.notice(
            NoticeLevel::Danger,
            "Connection error. Please check the IP and try again.",
        );
        LabError::Connection(reason.to_string())
    }

    /// Transport error or unexpected close. No reconnect is attempted.
    pub fn on_closed(&mut self) {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Connecting => {
                let _ = self.on_connect_failed("closed during handshake");
            }
            ConnectionState::Connected => {
                tracing::warn!("{}", LabError::TransportClosed);
                self.transport = None;
                self.set_state(ConnectionState::Disconnected);
                self.notifier.notice(NoticeLevel::Warning, "Connection closed");
            }
        }
    }

    /// Idempotent.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.teardown();
        self.notifier.notice(NoticeLevel::Info, "Disconnected");
    }

    pub fn transmit(&mut self, payload: String) -> Result<(), LabError> {
        if !self.is_connected() {
            return Err(LabError::TransportClosed);
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(LabError::TransportClosed);
        };
        if let Err(e) = transport.send_text(payload) {
            self.on_closed();
            return Err(e);
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(mut t) = self.transport.take() {
            t.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::debug!("connection {:?} -> {:?}", self.state, state);
        self.state = state;
        self.notifier.emit(PanelEvent::StateChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Wire {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
        fail: bool,
    }

    impl Transport for Wire {
        fn send_text(&mut self, payload: String) -> Result<(), LabError> {
            if self.fail {
                return Err(LabError::TransportClosed);
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn states(rx: &mut tokio::sync::broadcast::Receiver<PanelEvent>) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let PanelEvent::StateChanged { state } = ev {
                out.push(state);
            }
        }
        out
    }

    #[test]
    fn endpoint_validation() {
        let url = device_endpoint(" 192.168.1.50 ", 81).unwrap();
        assert_eq!(url.as_str(), "ws://192.168.1.50:81/");
        assert!(device_endpoint("lab-device.local", 81).is_ok());

        for bad in ["", "   ", "192.168.1.50:90", "ws://192.168.1.50", "a b", "host/path", "300.1.1.1"] {
            assert!(
                matches!(device_endpoint(bad, 81), Err(LabError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn invalid_address_leaves_state_untouched() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        let mut conn = ConnectionManager::new(81, notifier);

        assert!(conn.connect("").is_err());
        assert_eq!(conn.current_state(), ConnectionState::Disconnected);
        assert!(states(&mut rx).is_empty());
    }

    #[test]
    fn open_then_unexpected_close() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        let mut conn = ConnectionManager::new(81, notifier);

        conn.connect("192.168.1.50").unwrap();
        assert_eq!(conn.current_state(), ConnectionState::Connecting);
        assert!(conn.on_open(Box::new(Wire::default())));
        assert!(conn.is_connected());

        conn.on_closed();
        assert_eq!(conn.current_state(), ConnectionState::Disconnected);
        assert!(matches!(
            conn.transmit("{}".to_string()),
            Err(LabError::TransportClosed)
        ));
        assert_eq!(
            states(&mut rx),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected
            ]
        );
    }

    #[test]
    fn disconnect_is_idempotent_and_closes_socket() {
        let mut conn = ConnectionManager::new(81, Notifier::new());
        conn.disconnect();

        let wire = Wire::default();
        conn.connect("10.0.0.7").unwrap();
        conn.on_open(Box::new(wire.clone()));
        conn.disconnect();
        conn.disconnect();

        assert!(*wire.closed.lock().unwrap());
        assert_eq!(conn.current_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn late_open_after_disconnect_is_refused() {
        let mut conn = ConnectionManager::new(81, Notifier::new());
        conn.connect("10.0.0.7").unwrap();
        conn.disconnect();

        let wire = Wire::default();
        assert!(!conn.on_open(Box::new(wire.clone())));
        assert!(*wire.closed.lock().unwrap());
        assert!(!conn.is_connected());
    }

    #[test]
    fn failed_write_drops_connection() {
        let mut conn = ConnectionManager::new(81, Notifier::new());
        conn.connect("10.0.0.7").unwrap();
        conn.on_open(Box::new(Wire {
            fail: true,
            ..Wire::default()
        }));

        assert!(conn.transmit("{}".to_string()).is_err());
        assert_eq!(conn.current_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_failure_returns_to_disconnected() {
        let mut conn = ConnectionManager::new(81, Notifier::new());
        conn.connect("10.0.0.7").unwrap();
        let err = conn.on_connect_failed("refused");
        assert!(matches!(err, LabError::Connection(_)));
        assert_eq!(conn.current_state(), ConnectionState::Disconnected);
        assert_eq!(conn.address(), None);
    }
}
