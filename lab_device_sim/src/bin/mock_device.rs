use anyhow::Context;
use clap::Parser;
use lab_device_sim::{DeviceServer, SimulatedBench};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:0";
const ADDR_ENV: &str = "LAB_SIM_ADDR";

#[derive(Parser, Debug)]
#[command(name = "mock_device", about = "Simulated remote lab board speaking the panel protocol")]
struct Args {
    /// Listen address. Falls back to LAB_SIM_ADDR, then an ephemeral local port.
    #[arg(long)]
    addr: Option<String>,

    /// Write the bound address here once listening.
    #[arg(long, value_name = "PATH")]
    addr_file: Option<PathBuf>,

    /// Exit after this long instead of waiting for Ctrl-C.
    #[arg(long, value_name = "MS")]
    run_for_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    monitor_ms: Option<u64>,

    /// Nominal resistor under test, in ohms.
    #[arg(long)]
    resistance: Option<f64>,

    #[arg(long, value_name = "CELSIUS")]
    ambient: Option<f64>,

    /// LDR resistance, in ohms.
    #[arg(long)]
    ldr: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let addr = args
        .addr
        .clone()
        .or_else(|| std::env::var(ADDR_ENV).ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let mut bench = SimulatedBench::default();
    if let Some(ohms) = args.resistance {
        bench.resistor_ohms = ohms;
    }
    if let Some(c) = args.ambient {
        bench.ambient_c = c;
    }
    if let Some(ohms) = args.ldr {
        bench.ldr_ohms = ohms;
    }

    let mut server = DeviceServer::bind(&addr, bench)
        .await
        .with_context(|| format!("ws bind failed on {addr}"))?;
    if let Some(ms) = args.monitor_ms {
        server = server.with_monitor_interval(Duration::from_millis(ms));
    }
    let server = server.spawn().context("ws listener has no address")?;
    let local = server.local_addr();

    if let Some(path) = &args.addr_file {
        std::fs::write(path, local.to_string())
            .with_context(|| format!("could not write {}", path.display()))?;
    }
    println!("mock_device listening on ws://{local}");

    match args.run_for_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => tokio::signal::ctrl_c().await.context("ctrl-c handler")?,
    }

    server.shutdown().await;
    Ok(())
}
