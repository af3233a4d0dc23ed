use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use panel_core::config::PanelConfig;
use panel_core::connection::ConnectionState;
use panel_core::events::{NoticeLevel, PanelEvent};
use panel_core::format::{
    export_filename, format_reading, format_uncertainty, light_level_percent,
};
use panel_core::gates::{self, GateSelection};
use panel_core::history::ExperimentKind;
use panel_core::session::{Intent, Session};
use panel_core::store::FileStore;
use panel_core::ws_actor::PanelHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "remote-lab", about = "Control panel for the remote electronics lab board")]
struct Args {
    /// Device host or IP. Defaults to the last address that connected.
    #[arg(long, global = true)]
    device: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// How long to wait for device replies after sending.
    #[arg(long, default_value_t = 1500, global = true)]
    listen_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take one reading.
    Measure { sensor: Sensor },
    /// Set LED brightness: 0-100, `on` or `off`.
    Led { level: String },
    /// Stream temperature readings.
    Monitor {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Evaluate a gate locally (mirrored to the board when --device is given).
    Gate {
        gate: String,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        a: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        b: u8,
    },
    TruthTable { gate: String },
    Ping,
    History { kind: String },
    Export {
        kind: String,
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    Clear { kind: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Sensor {
    Resistor,
    Temperature,
    Light,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = PanelConfig::from_env()
        .with_port(args.port)
        .with_data_dir(args.data_dir.clone());
    let store = FileStore::open(&config.data_dir)
        .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?;
    let mut session = Session::create(&config, Arc::new(store));
    let listen = Duration::from_millis(args.listen_ms);

    match &args.command {
        Command::TruthTable { gate } => {
            let gate = gates::parse_gate(gate)?;
            println!("{} truth table", gate.as_str());
            println!("A B | OUT");
            for (row, out) in gates::truth_table(gate).iter().enumerate() {
                println!("{} {} |  {}", row >> 1, row & 1, u8::from(*out));
            }
            Ok(())
        }
        Command::History { kind } => {
            let kind = parse_kind(kind)?;
            let readings = session.snapshot(kind);
            if readings.is_empty() {
                println!("no {kind} data");
            }
            for r in readings {
                println!(
                    "{}  {}",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    format_reading(kind, r.value)
                );
            }
            Ok(())
        }
        Command::Export { kind, out } => {
            let kind = parse_kind(kind)?;
            let csv = session.export(kind)?;
            let path = out.clone().unwrap_or_else(|| {
                PathBuf::from(export_filename(kind, chrono::Local::now().date_naive()))
            });
            std::fs::write(&path, csv)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::Clear { kind } => {
            let kind = parse_kind(kind)?;
            session.clear_history(kind);
            println!("{kind} data cleared");
            Ok(())
        }
        Command::Gate { gate, a, b } => {
            let selection = GateSelection::new(gates::parse_gate(gate)?, *a == 1, *b == 1);
            let output = session.select_gate(selection);
            println!("{} {} {} = {}", gate.to_uppercase(), a, b, u8::from(output));
            if args.device.is_none() {
                return Ok(());
            }
            let address = resolve_address(&args, &session)?;
            run_online(session, &address, &[Intent::SelectGate(selection)], listen).await
        }
        Command::Measure { sensor } => {
            let intent = match sensor {
                Sensor::Resistor => Intent::MeasureResistor,
                Sensor::Temperature => Intent::ReadTemperature,
                Sensor::Light => Intent::ReadLight,
            };
            let address = resolve_address(&args, &session)?;
            run_online(session, &address, &[intent], listen).await
        }
        Command::Led { level } => {
            let intent = match level.trim().to_ascii_lowercase().as_str() {
                "on" => Intent::LedOn,
                "off" => Intent::LedOff,
                n => Intent::SetLed(
                    n.parse::<u8>()
                        .map_err(|_| anyhow!("LED level must be 0-100, on or off"))?,
                ),
            };
            let address = resolve_address(&args, &session)?;
            run_online(session, &address, &[intent], listen).await
        }
        Command::Monitor { seconds } => {
            let address = resolve_address(&args, &session)?;
            run_online(
                session,
                &address,
                &[Intent::StartMonitoring],
                Duration::from_secs(*seconds),
            )
            .await
        }
        Command::Ping => {
            let address = resolve_address(&args, &session)?;
            run_online(session, &address, &[Intent::Ping], listen).await
        }
    }
}

fn parse_kind(name: &str) -> anyhow::Result<ExperimentKind> {
    ExperimentKind::parse(name).ok_or_else(|| {
        anyhow!("unknown experiment {name:?} (expected resistor, temperature, light or pwm)")
    })
}

fn resolve_address(args: &Args, session: &Session) -> anyhow::Result<String> {
    args.device
        .clone()
        .or_else(|| session.last_address().map(str::to_owned))
        .ok_or_else(|| anyhow!("no device address; pass --device"))
}

/// Connects, sends `intents`, prints whatever the board says for `listen`,
/// then disconnects.
async fn run_online(
    session: Session,
    address: &str,
    intents: &[Intent],
    listen: Duration,
) -> anyhow::Result<()> {
    let (panel, join) = PanelHandle::spawn(session);
    let mut rx = panel.subscribe();

    panel.connect(address).await.map_err(|e| anyhow!(e))?;
    let connected = tokio::time::timeout(CONNECT_TIMEOUT, wait_connected(&mut rx))
        .await
        .unwrap_or(false);
    if !connected {
        let _ = panel.disconnect().await;
        let _ = panel.shutdown().await;
        let _ = join.await;
        bail!("could not connect to {address}");
    }

    for intent in intents {
        panel.apply(*intent).await.map_err(|e| anyhow!(e))?;
    }

    let printer = tokio::spawn(print_events(rx));
    tokio::time::sleep(listen).await;

    if intents.contains(&Intent::StartMonitoring) {
        panel
            .apply(Intent::StopMonitoring)
            .await
            .map_err(|e| anyhow!(e))?;
    }
    panel.disconnect().await.map_err(|e| anyhow!(e))?;
    panel.shutdown().await.map_err(|e| anyhow!(e))?;
    join.await?;
    printer.abort();
    Ok(())
}

async fn wait_connected(rx: &mut Receiver<PanelEvent>) -> bool {
    loop {
        match rx.recv().await {
            Ok(PanelEvent::StateChanged { state }) => match state {
                ConnectionState::Connected => return true,
                ConnectionState::Disconnected => return false,
                ConnectionState::Connecting => {}
            },
            Ok(PanelEvent::Notice(n)) if n.level == NoticeLevel::Danger => {
                eprintln!("{}", n.message);
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return false,
        }
    }
}

async fn print_events(mut rx: Receiver<PanelEvent>) {
    loop {
        let ev = match rx.recv().await {
            Ok(ev) => ev,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("missed {n} events");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        match ev {
            PanelEvent::ReadingRecorded { reading } => {
                let mut line = format!(
                    "{} {}",
                    reading.experiment,
                    format_reading(reading.experiment, reading.value)
                );
                if let Some(u) = reading.uncertainty {
                    line.push_str(&format!(" ({})", format_uncertainty(u)));
                }
                if let Some(r) = reading.resistance {
                    line.push_str(&format!(" light {:.0}%", light_level_percent(r)));
                }
                println!("{line}");
            }
            PanelEvent::LedStatus { brightness } => println!("led {brightness}%"),
            PanelEvent::GateResult { output } => println!("board gate output {}", u8::from(output)),
            PanelEvent::Notice(n) => match n.level {
                NoticeLevel::Danger | NoticeLevel::Warning => eprintln!("{}", n.message),
                NoticeLevel::Info | NoticeLevel::Success => println!("{}", n.message),
            },
            PanelEvent::StateChanged { .. }
            | PanelEvent::ReadingRejected { .. }
            | PanelEvent::HistoryCleared { .. }
            | PanelEvent::Pong => {}
        }
    }
}
