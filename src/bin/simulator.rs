use clap::{App, Arg};
use flexbus::cluster::{Cluster, CycleReport};
use flexbus::logger::MessageLogger;
use flexbus::protocol::Channel;
use flexbus::signals::{signals_to_bytes, SignalKind, SignalLayout};
use flexbus::simulator::Arbitration;
use flexbus::timing;
use flexbus::BusConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: &str = "8090";
const DEFAULT_PERIOD_MS: &str = "100";
const FRAME_BROADCAST_BUFFER_SIZE: usize = 1024;

/// One-line JSON requests a monitoring client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum ClientRequest {
    Stats,
    Config,
}

struct Ecu {
    name: &'static str,
    slots: &'static [u16],
    layout: SignalLayout,
}

fn demo_ecus() -> Vec<Ecu> {
    vec![
        Ecu {
            name: "ECU1",
            slots: &[10, 11, 12],
            layout: SignalLayout::new()
                .signal("engine_rpm", 0, SignalKind::U16)
                .signal("coolant_temp", 2, SignalKind::I8)
                .signal("throttle", 3, SignalKind::U8),
        },
        Ecu {
            name: "ECU2",
            slots: &[20, 21, 22],
            layout: SignalLayout::new()
                .signal("vehicle_speed", 0, SignalKind::U16)
                .signal("steering_angle", 2, SignalKind::I16)
                .signal("brake_pressure", 4, SignalKind::U8),
        },
        Ecu {
            name: "ECU3",
            slots: &[30, 31, 32],
            layout: SignalLayout::new()
                .signal("odometer", 0, SignalKind::U32)
                .signal("door_state", 4, SignalKind::U8),
        },
    ]
}

fn signal_values(name: &str, slot_id: u16, tick: u64) -> Vec<(&'static str, i64)> {
    let tick = (tick % 1000) as i64;
    let slot = i64::from(slot_id);
    match name {
        "ECU1" => vec![
            ("engine_rpm", 800 + tick * 5),
            ("coolant_temp", 70 + tick % 30),
            ("throttle", (tick + slot) % 100),
        ],
        "ECU2" => vec![
            ("vehicle_speed", tick % 250),
            ("steering_angle", (tick % 90) - 45),
            ("brake_pressure", (tick * 3 + slot) % 256),
        ],
        _ => vec![("odometer", 120_000 + tick), ("door_state", tick % 2)],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("flexbus-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("FlexRay cluster simulator streaming frames over TCP")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Bus configuration JSON")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("COUNT")
                .help("Stop after this many cycles (runs until Ctrl+C when omitted)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("period")
                .long("period-ms")
                .value_name("MS")
                .help("Wall-clock time between cycles")
                .takes_value(true)
                .default_value(DEFAULT_PERIOD_MS),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port for frame streaming")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .value_name("CSV")
                .help("Write every transmitted message to a CSV log on exit")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("arbitration")
                .long("arbitration")
                .help("Reject frames that collide in a slot"),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => BusConfig::load(path)?,
        None => BusConfig::default(),
    };
    let max_cycles = matches.value_of("cycles").map(str::parse::<u64>).transpose()?;
    let period_ms = matches.value_of("period").unwrap_or(DEFAULT_PERIOD_MS).parse::<u64>()?;
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let log_path = matches.value_of("log").map(String::from);
    let arbitration = if matches.is_present("arbitration") {
        Arbitration::RejectConflicts
    } else {
        Arbitration::Disabled
    };

    println!("FlexRay Cluster Simulator");
    println!("=========================");

    for warning in timing::validate_cycle_timing(&config) {
        warn!("Cycle timing: {}", warning);
    }
    info!(
        utilization_pct = timing::config_utilization(&config),
        static_slots = config.static_slots,
        cycle_us = config.cycle_duration,
        "Bus configured"
    );

    let ecus = demo_ecus();
    let mut cluster = Cluster::new(config).with_arbitration(arbitration);
    for ecu in &ecus {
        cluster.add_node(ecu.name, ecu.slots, Channel::AB)?;
    }
    cluster.start()?;
    let cluster = Arc::new(Mutex::new(cluster));

    let (frame_tx, _) = broadcast::channel(FRAME_BROADCAST_BUFFER_SIZE);

    let tcp_cluster = Arc::clone(&cluster);
    let tcp_frame_tx = frame_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_cluster, tcp_frame_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut logger = MessageLogger::new();
    let mut interval = time::interval(Duration::from_millis(period_ms.max(1)));
    let mut tick: u64 = 0;

    // Registered once so a Ctrl+C during a cycle step is not lost
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }

        let report = {
            let mut guard = cluster.lock().await;
            guard.run_cycle(|node, slot_id, _cycle| {
                let ecu = ecus.iter().find(|ecu| ecu.name == node)?;
                let values = signal_values(node, slot_id, tick);
                match signals_to_bytes(values, &ecu.layout, ecu.layout.min_payload_length()) {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(node, slot = slot_id, "Signal packing failed: {}", e);
                        None
                    }
                }
            })
        };

        match report {
            Ok(report) => publish(&report, &frame_tx, &mut logger),
            Err(e) => {
                error!("Cycle failed: {}", e);
                break;
            }
        }

        tick += 1;
        if max_cycles.is_some_and(|max| tick >= max) {
            break;
        }
    }

    {
        let mut guard = cluster.lock().await;
        guard.stop();
        let stats = guard.simulator().get_stats();
        info!(
            cycles = stats.cycles_elapsed,
            messages = stats.total_messages,
            rejected = stats.rejected_messages,
            "Simulation finished"
        );
    }

    if let Some(path) = log_path {
        logger.save(&path)?;
        if let Some(stats) = logger.get_statistics() {
            info!(
                path = %path,
                messages = stats.total_messages,
                unique_slots = stats.unique_slots,
                duration_s = stats.duration,
                "Message log written"
            );
        }
    }

    tcp_server.abort();
    println!("FlexRay Cluster Simulator stopped");

    Ok(())
}

fn publish(report: &CycleReport, frame_tx: &broadcast::Sender<String>, logger: &mut MessageLogger) {
    for record in &report.frames {
        logger.log_message(&record.message);

        match serde_json::to_string(record) {
            // No subscribers is not an error
            Ok(line) => {
                let _ = frame_tx.send(line);
            }
            Err(e) => warn!("Failed to serialize frame: {}", e),
        }
    }

    info!(
        cycle = report.cycle,
        frames = report.frames.len(),
        delivered = report.delivered,
        rejected = report.rejected,
        "Cycle complete"
    );
}

async fn start_tcp_server(
    port: u16,
    cluster: Arc<Mutex<Cluster>>,
    frame_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Client connected: {}", addr);
                let client_cluster = Arc::clone(&cluster);
                let frame_rx = frame_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_cluster, frame_rx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    cluster: Arc<Mutex<Cluster>>,
    mut frame_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let frame_writer = Arc::clone(&writer);
    let frame_task = tokio::spawn(async move {
        loop {
            let line = match frame_rx.recv().await {
                Ok(line) => line,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Slow client skipped {} frames", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let mut guard = frame_writer.lock().await;
            if let Err(e) = guard.write_all(format!("{line}\n").as_bytes()).await {
                warn!("Failed to send frame: {}", e);
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        if buf_reader.read_line(&mut line).await? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ClientRequest>(trimmed) {
            Ok(ClientRequest::Stats) => {
                let guard = cluster.lock().await;
                serde_json::to_string(&guard.simulator().get_stats())?
            }
            Ok(ClientRequest::Config) => {
                let guard = cluster.lock().await;
                serde_json::to_string(guard.config())?
            }
            Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
        };

        let mut guard = writer.lock().await;
        guard.write_all(format!("{response}\n").as_bytes()).await?;
    }

    frame_task.abort();
    Ok(())
}
