//! gattsync-sim: drives a simulated adapter end to end.
//!
//! Scans for battery-service peripherals, then runs one sequential session per
//! peripheral (connect, discover, read, notify, disconnect) with all sessions
//! in parallel. Prints a JSON report on stdout; logs go to stderr.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use gattsync::sim::{SimCharacteristic, SimPeripheral, SimService, SimulatedTransport};
use gattsync::{Central, CentralConfig, Notification, Peripheral, PeripheralId, uuid_from_u16};

const BATTERY_SERVICE: Uuid = uuid_from_u16(0x180F);
const BATTERY_LEVEL: Uuid = uuid_from_u16(0x2A19);
const CLIENT_CONFIG: Uuid = uuid_from_u16(0x2902);
const DEVICE_INFO: Uuid = uuid_from_u16(0x180A);

struct Options {
    peripherals: usize,
    latency: Duration,
    timeout: Duration,
    scan: Duration,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("GATTSYNC_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("gattsync={level},gattsync_sim={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: gattsync-sim [--peripherals <n>] [--latency-ms <ms>] [--timeout-ms <ms>] [--scan-ms <ms>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --peripherals <n>   Simulated peripherals [default: 3]");
            eprintln!("  --latency-ms <ms>   Completion latency [default: 20]");
            eprintln!("  --timeout-ms <ms>   Per-call deadline [default: 2000]");
            eprintln!("  --scan-ms <ms>      Scan duration [default: 200]");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(options).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        peripherals: 3,
        latency: Duration::from_millis(20),
        timeout: Duration::from_millis(2000),
        scan: Duration::from_millis(200),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--peripherals" | "--latency-ms" | "--timeout-ms" | "--scan-ms" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or(format!("{flag} requires a value"))?
                    .parse::<u64>()
                    .map_err(|e| format!("{flag}: {e}"))?;
                match flag {
                    "--peripherals" => options.peripherals = value as usize,
                    "--latency-ms" => options.latency = Duration::from_millis(value),
                    "--timeout-ms" => options.timeout = Duration::from_millis(value),
                    _ => options.scan = Duration::from_millis(value),
                }
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(options)
}

#[derive(Serialize)]
struct SessionReport {
    peripheral: Peripheral,
    rssi: i16,
    services: Vec<Uuid>,
    battery_level: Option<u8>,
    notified_level: Option<u8>,
    client_config: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct Report {
    discovered: usize,
    sessions: Vec<SessionReport>,
    failures: Vec<String>,
}

async fn run(options: Options) -> anyhow::Result<()> {
    let sim = SimulatedTransport::new();
    sim.set_latency(options.latency);
    for n in 0..options.peripherals {
        sim.add_peripheral(simulated_sensor(n));
    }

    let config = CentralConfig::new("gattsync-sim").with_default_timeout(options.timeout);
    let (central, bus) = Central::with_notification_bus(config, Arc::new(sim.clone()))
        .context("failed to start central")?;
    let mut notifications = bus.subscribe();

    central
        .scan(Some(&[BATTERY_SERVICE][..]), None)
        .context("failed to start scan")?;
    central
        .stop_scan_after(options.scan)
        .await
        .context("failed to stop scan")?;

    let found = drain_discovered(&mut notifications);
    info!(count = found.len(), "Scan finished");

    let sessions = found.iter().map(|id| session(&central, &sim, id));
    let results = futures::future::join_all(sessions).await;

    let mut report = Report {
        discovered: found.len(),
        sessions: Vec::new(),
        failures: Vec::new(),
    };
    for (id, result) in found.iter().zip(results) {
        match result {
            Ok(session) => report.sessions.push(session),
            Err(e) => {
                warn!(peripheral = %id, error = %e, "Session failed");
                report.failures.push(format!("{id}: {e:#}"));
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn simulated_sensor(n: usize) -> SimPeripheral {
    SimPeripheral::new(format!("sensor-{n}"))
        .with_rssi(-40 - (n as i16 % 50))
        .with_service(
            SimService::new(BATTERY_SERVICE).with_characteristic(
                SimCharacteristic::new(BATTERY_LEVEL)
                    .with_value([100u8.saturating_sub(n as u8)])
                    .with_descriptor(CLIENT_CONFIG, [0, 0]),
            ),
        )
        .with_service(SimService::new(DEVICE_INFO))
}

fn drain_discovered(rx: &mut broadcast::Receiver<Notification>) -> Vec<PeripheralId> {
    let mut found = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(Notification::PeripheralDiscovered { advertisement }) => {
                let id = advertisement.peripheral.id;
                if !found.contains(&id) {
                    found.push(id);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!(missed = n, "Notification receiver lagged");
            }
            Err(_) => break,
        }
    }
    found
}

async fn session(
    central: &Central,
    sim: &SimulatedTransport,
    id: &PeripheralId,
) -> anyhow::Result<SessionReport> {
    let peripheral = central.connect(id, None).await.context("connect")?;
    let rssi = central.read_rssi(id, None).await.context("read rssi")?;

    let services = central
        .discover_services(id, None, None)
        .await
        .context("discover services")?;
    central
        .discover_characteristic(id, BATTERY_LEVEL, BATTERY_SERVICE, None)
        .await
        .context("discover battery level")?;
    let level = central
        .read_characteristic(id, BATTERY_LEVEL, BATTERY_SERVICE, None)
        .await
        .context("read battery level")?;

    let client_config = central
        .discover_descriptor(id, CLIENT_CONFIG, BATTERY_LEVEL, BATTERY_SERVICE, None)
        .await
        .context("discover client config")?;
    central
        .set_notify(id, true, BATTERY_LEVEL, BATTERY_SERVICE, None)
        .await
        .context("enable notifications")?;

    let next_level = level.value.as_deref().and_then(|v| v.first()).map(|v| v.saturating_sub(1));
    let (notified, pushed) = tokio::join!(
        central.wait_for_notification(id, BATTERY_LEVEL, BATTERY_SERVICE, None),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            sim.notify_value(id, BATTERY_LEVEL, BATTERY_SERVICE, [next_level.unwrap_or(0)])
        }
    );
    pushed.context("push notification")?;
    let notified = notified.context("wait for notification")?;

    central.disconnect(id, None).await.context("disconnect")?;

    Ok(SessionReport {
        peripheral,
        rssi,
        services: services.into_iter().map(|s| s.uuid).collect(),
        battery_level: level.value.as_deref().and_then(|v| v.first().copied()),
        notified_level: notified.value.as_deref().and_then(|v| v.first().copied()),
        client_config: client_config.value,
    })
}
