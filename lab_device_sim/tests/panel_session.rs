use futures_util::StreamExt;
use lab_device_sim::{Bench, DeviceServer, ServerHandle};
use panel_core::config::PanelConfig;
use panel_core::connection::ConnectionState;
use panel_core::events::{NoticeLevel, PanelEvent};
use panel_core::gates::GateSelection;
use panel_core::history::ExperimentKind;
use panel_core::protocol::GateType;
use panel_core::session::{Intent, Session};
use panel_core::store::{FileStore, KvStore, DEVICE_ADDRESS_KEY};
use panel_core::ws_actor::PanelHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

struct FixedBench;

impl Bench for FixedBench {
    fn resistance(&mut self) -> f64 {
        1500.0
    }
    fn temperature(&mut self) -> f64 {
        -127.0
    }
    fn ldr_resistance(&mut self) -> f64 {
        8_200.0
    }
}

async fn start_board() -> ServerHandle {
    DeviceServer::bind("127.0.0.1:0", FixedBench)
        .await
        .expect("bind")
        .spawn()
        .expect("spawn board")
}

fn panel_on(port: u16, store: Arc<FileStore>) -> (PanelHandle, JoinHandle<()>) {
    let config = PanelConfig::default().with_port(Some(port));
    PanelHandle::spawn(Session::create(&config, store))
}

async fn wait_for<F>(rx: &mut Receiver<PanelEvent>, mut pred: F) -> PanelEvent
where
    F: FnMut(&PanelEvent) -> bool,
{
    let fut = async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3), fut)
        .await
        .expect("timed out waiting for panel event")
}

#[tokio::test]
async fn panel_talks_to_simulated_board() {
    let board = start_board().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (panel, join) = panel_on(board.local_addr().port(), store.clone());
    let mut rx = panel.subscribe();

    panel.connect("127.0.0.1").await.unwrap();
    wait_for(&mut rx, |ev| {
        *ev == PanelEvent::StateChanged {
            state: ConnectionState::Connected,
        }
    })
    .await;
    assert_eq!(panel.state().await.unwrap(), ConnectionState::Connected);
    assert_eq!(
        store.get(DEVICE_ADDRESS_KEY).unwrap().as_deref(),
        Some("127.0.0.1")
    );

    panel.apply(Intent::MeasureResistor).await.unwrap();
    wait_for(&mut rx, |ev| {
        matches!(ev, PanelEvent::ReadingRecorded { reading } if reading.experiment == ExperimentKind::Resistor)
    })
    .await;
    let snap = panel.snapshot(ExperimentKind::Resistor).await.unwrap();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].value, 1500.0);

    // the bench reports a missing temperature probe
    panel.apply(Intent::ReadTemperature).await.unwrap();
    wait_for(&mut rx, |ev| {
        *ev == PanelEvent::ReadingRejected {
            experiment: ExperimentKind::Temperature,
        }
    })
    .await;
    assert!(panel
        .snapshot(ExperimentKind::Temperature)
        .await
        .unwrap()
        .is_empty());

    panel.apply(Intent::SetLed(40)).await.unwrap();
    wait_for(&mut rx, |ev| *ev == PanelEvent::LedStatus { brightness: 40 }).await;

    panel
        .apply(Intent::SelectGate(GateSelection::new(GateType::Or, false, false)))
        .await
        .unwrap();
    wait_for(&mut rx, |ev| *ev == PanelEvent::GateResult { output: false }).await;

    panel.apply(Intent::Ping).await.unwrap();
    wait_for(&mut rx, |ev| {
        matches!(ev, PanelEvent::Notice(n)
            if n.level == NoticeLevel::Success && n.message == "Connection test successful!")
    })
    .await;

    let csv = panel.export(ExperimentKind::Resistor).await.unwrap().unwrap();
    assert!(csv.starts_with("Timestamp,Value\n"));
    assert!(csv.contains(",1500"));

    panel.disconnect().await.unwrap();
    wait_for(&mut rx, |ev| {
        *ev == PanelEvent::StateChanged {
            state: ConnectionState::Disconnected,
        }
    })
    .await;

    panel.shutdown().await.unwrap();
    join.await.unwrap();
    assert!(panel.state().await.is_err());
    board.shutdown().await;
}

#[tokio::test]
async fn refused_connection_reports_error() {
    let board = start_board().await;
    let port = board.local_addr().port();
    board.shutdown().await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (panel, join) = panel_on(port, store.clone());
    let mut rx = panel.subscribe();

    panel.connect("127.0.0.1").await.unwrap();
    wait_for(&mut rx, |ev| {
        matches!(ev, PanelEvent::Notice(n) if n.level == NoticeLevel::Danger && n.message.starts_with("Connection error"))
    })
    .await;
    assert_eq!(panel.state().await.unwrap(), ConnectionState::Disconnected);
    assert!(store.get(DEVICE_ADDRESS_KEY).unwrap().is_none());

    panel.shutdown().await.unwrap();
    join.await.unwrap();
}

#[tokio::test]
async fn silent_device_does_not_stall_the_panel() {
    // accepts TCP but never answers the upgrade request
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (panel, join) = panel_on(port, store.clone());

    panel.connect("127.0.0.1").await.unwrap();
    let state = timeout(Duration::from_secs(1), panel.state())
        .await
        .expect("panel answers while connecting");
    assert_eq!(state.unwrap(), ConnectionState::Connecting);

    panel.disconnect().await.unwrap();
    let state = timeout(Duration::from_secs(1), panel.state())
        .await
        .expect("disconnect is handled while the handshake hangs");
    assert_eq!(state.unwrap(), ConnectionState::Disconnected);
    assert!(store.get(DEVICE_ADDRESS_KEY).unwrap().is_none());

    panel.shutdown().await.unwrap();
    timeout(Duration::from_secs(1), join)
        .await
        .expect("driver stops while the handshake hangs")
        .unwrap();
    silent.abort();
}

#[tokio::test]
async fn handshake_completing_after_disconnect_is_hung_up() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (release, released) = oneshot::channel::<()>();
    let device = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = released.await;
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(Message::Text(_))) => return false,
                Some(Ok(_)) => {}
            }
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let (panel, join) = panel_on(port, store.clone());
    let mut rx = panel.subscribe();

    panel.connect("127.0.0.1").await.unwrap();
    panel.disconnect().await.unwrap();
    assert_eq!(panel.state().await.unwrap(), ConnectionState::Disconnected);

    let _ = release.send(());
    let hung_up = timeout(Duration::from_secs(3), device)
        .await
        .expect("late socket was closed")
        .unwrap();
    assert!(hung_up);

    assert_eq!(panel.state().await.unwrap(), ConnectionState::Disconnected);
    assert!(store.get(DEVICE_ADDRESS_KEY).unwrap().is_none());
    let mut saw_connected = false;
    while let Ok(ev) = rx.try_recv() {
        saw_connected |= ev
            == PanelEvent::StateChanged {
                state: ConnectionState::Connected,
            };
    }
    assert!(!saw_connected);

    panel.shutdown().await.unwrap();
    join.await.unwrap();
}
