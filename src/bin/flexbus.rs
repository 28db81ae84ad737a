use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use flexbus::cluster::FrameRecord;
use flexbus::crc;
use flexbus::frame::{self, FrameHeader};
use flexbus::protocol::{format_payload_hex, parse_hex, FrameFlags, FLEXRAY_VERSION, MAX_PAYLOAD_LENGTH};
use flexbus::timing::{self, validate_cycle_timing};
use flexbus::{format_frame_id, BusConfig, Channel, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8090";

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let matches = App::new("flexbus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("FlexRay frame tools and cluster monitor")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "json", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("crc")
                .about("Compute the CRC-24 of a header and payload")
                .arg(
                    Arg::with_name("header")
                        .help("Header bytes as hex")
                        .required(true),
                )
                .arg(
                    Arg::with_name("payload")
                        .help("Payload bytes as hex"),
                ),
        )
        .subcommand(
            SubCommand::with_name("encode")
                .about("Encode a message into a wire frame")
                .arg(
                    Arg::with_name("slot")
                        .short("s")
                        .long("slot")
                        .takes_value(true)
                        .required(true)
                        .help("Slot ID (1-2047)"),
                )
                .arg(
                    Arg::with_name("cycle")
                        .short("c")
                        .long("cycle")
                        .takes_value(true)
                        .default_value("0")
                        .help("Cycle count (0-63)"),
                )
                .arg(
                    Arg::with_name("channel")
                        .long("channel")
                        .takes_value(true)
                        .possible_values(&["A", "B", "AB"])
                        .default_value("A"),
                )
                .arg(
                    Arg::with_name("flags")
                        .long("flags")
                        .takes_value(true)
                        .default_value("0")
                        .help("Frame indicator bits (0-15)"),
                )
                .arg(
                    Arg::with_name("payload")
                        .help("Payload bytes as hex"),
                ),
        )
        .subcommand(
            SubCommand::with_name("decode")
                .about("Decode a wire frame")
                .arg(Arg::with_name("frame").help("Frame bytes as hex").required(true))
                .arg(
                    Arg::with_name("verify")
                        .long("verify")
                        .help("Reject the frame when its CRC trailer does not match"),
                ),
        )
        .subcommand(
            SubCommand::with_name("frame-id")
                .about("Format a diagnostic frame identifier")
                .arg(Arg::with_name("slot").required(true))
                .arg(Arg::with_name("cycle").default_value("0")),
        )
        .subcommand(
            SubCommand::with_name("validate")
                .about("Check cycle timing of a bus configuration")
                .arg(
                    Arg::with_name("config")
                        .help("Configuration JSON (defaults when omitted)"),
                ),
        )
        .subcommand(
            SubCommand::with_name("utilization")
                .about("Static segment share of the communication cycle")
                .arg(
                    Arg::with_name("slots")
                        .long("slots")
                        .takes_value(true)
                        .default_value("64"),
                )
                .arg(
                    Arg::with_name("slot-us")
                        .long("slot-us")
                        .takes_value(true)
                        .default_value("50"),
                )
                .arg(
                    Arg::with_name("cycle-us")
                        .long("cycle-us")
                        .takes_value(true)
                        .default_value("5000"),
                ),
        )
        .subcommand(
            SubCommand::with_name("config")
                .about("Print or write the default bus configuration")
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .value_name("FILE"),
                ),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Stream frames from a running flexbus-sim")
                .arg(
                    Arg::with_name("host")
                        .short("H")
                        .long("host")
                        .takes_value(true)
                        .default_value(DEFAULT_HOST),
                )
                .arg(
                    Arg::with_name("port")
                        .short("p")
                        .long("port")
                        .takes_value(true)
                        .default_value(DEFAULT_PORT),
                ),
        )
        .get_matches();

    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{} {}", "FlexRay".bright_blue().bold(), FLEXRAY_VERSION.dimmed());
    }

    match matches.subcommand() {
        ("crc", Some(sub)) => handle_crc(sub, format),
        ("encode", Some(sub)) => handle_encode(sub, format),
        ("decode", Some(sub)) => handle_decode(sub, format),
        ("frame-id", Some(sub)) => handle_frame_id(sub),
        ("validate", Some(sub)) => handle_validate(sub, format),
        ("utilization", Some(sub)) => handle_utilization(sub, format),
        ("config", Some(sub)) => handle_config(sub),
        ("monitor", Some(sub)) => handle_monitor(sub, format).await,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            Ok(())
        }
    }
}

fn handle_crc(matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let header = parse_hex(matches.value_of("header").unwrap_or(""))?;
    let payload = parse_hex(matches.value_of("payload").unwrap_or(""))?;
    let checksum = crc::compute(&header, &payload);

    if format == "json" {
        println!("{}", serde_json::json!({ "crc": checksum, "hex": format!("{checksum:06X}") }));
    } else {
        println!("{} 0x{}", "CRC-24:".bright_white(), format!("{checksum:06X}").bright_cyan());
    }
    Ok(())
}

fn handle_encode(matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let slot_id: u16 = matches.value_of("slot").unwrap_or("").parse()?;
    let cycle: u8 = matches.value_of("cycle").unwrap_or("0").parse()?;
    let channel: Channel = matches.value_of("channel").unwrap_or("A").parse()?;
    let flags: u8 = matches.value_of("flags").unwrap_or("0").parse()?;
    let payload = parse_hex(matches.value_of("payload").unwrap_or(""))?;

    if payload.len() > MAX_PAYLOAD_LENGTH {
        eprintln!(
            "{} Payload of {} bytes exceeds {} bytes",
            "warning:".yellow(),
            payload.len(),
            MAX_PAYLOAD_LENGTH
        );
    }

    let message = Message::new(slot_id, cycle, channel, payload).with_flags(FrameFlags::from_bits(flags));
    let bytes = frame::encode(&message)?;

    match format {
        "json" => println!("{}", serde_json::json!({ "frame": hex::encode(&bytes), "length": bytes.len() })),
        "compact" => println!("{}", hex::encode(&bytes)),
        _ => {
            println!("{} {} bytes", "Frame:".bright_white(), bytes.len());
            println!("{}", format_payload_hex(&bytes, 16));
        }
    }
    Ok(())
}

fn handle_decode(matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let bytes = parse_hex(matches.value_of("frame").unwrap_or(""))?;
    let header = FrameHeader::parse(&bytes)?;
    let message = if matches.is_present("verify") {
        frame::decode_verified(&bytes)?
    } else {
        frame::decode(&bytes)?
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&message)?),
        "compact" => print_compact(&message),
        _ => {
            println!("{}", "Decoded Frame".bright_blue().bold());
            println!("  Slot:     {}", message.slot_id().to_string().bright_cyan());
            println!("  Cycle:    {}", message.cycle_count());
            println!("  Channel:  {}", message.channel());
            println!("  Flags:    0x{:X}", header.flags.bits());
            println!("  Length:   {}", header.payload_length);
            if let Ok(id) = format_frame_id(message.slot_id(), message.cycle_count()) {
                println!("  Frame ID: {}", id.as_str().bright_white());
            }
            if !message.payload().is_empty() {
                println!("{}", format_payload_hex(message.payload(), 16));
            }
        }
    }
    Ok(())
}

fn handle_frame_id(matches: &ArgMatches<'_>) -> CliResult {
    let slot_id: u16 = matches.value_of("slot").unwrap_or("").parse()?;
    let cycle: u8 = matches.value_of("cycle").unwrap_or("0").parse()?;
    println!("{}", format_frame_id(slot_id, cycle)?);
    Ok(())
}

fn handle_validate(matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let config = match matches.value_of("config") {
        Some(path) => BusConfig::load(path)?,
        None => BusConfig::default(),
    };
    let warnings = validate_cycle_timing(&config);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&warnings)?);
        return Ok(());
    }

    if warnings.is_empty() {
        println!("{} {}", "OK".green(), "Cycle timing is consistent".bright_green());
    } else {
        for warning in &warnings {
            println!("{} {}", "WARN".yellow(), warning);
        }
    }
    println!(
        "{} {:.1}%",
        "Static segment utilization:".bright_white(),
        timing::config_utilization(&config)
    );
    Ok(())
}

fn handle_utilization(matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let slots: u32 = matches.value_of("slots").unwrap_or("64").parse()?;
    let slot_us: u32 = matches.value_of("slot-us").unwrap_or("50").parse()?;
    let cycle_us: u32 = matches.value_of("cycle-us").unwrap_or("5000").parse()?;
    let utilization = timing::bus_utilization(slots, slot_us, cycle_us);

    if format == "json" {
        println!("{}", serde_json::json!({ "utilization": utilization }));
    } else {
        let value = format!("{utilization:.1}%");
        let value = if utilization >= 100.0 { value.red() } else { value.green() };
        println!("{} {}", "Bus utilization:".bright_white(), value);
    }
    Ok(())
}

fn handle_config(matches: &ArgMatches<'_>) -> CliResult {
    let config = BusConfig::default();
    match matches.value_of("output") {
        Some(path) => {
            config.save(path)?;
            println!("{} Wrote {}", "OK".green(), path.bright_white());
        }
        None => println!("{}", config.to_json()?),
    }
    Ok(())
}

async fn handle_monitor(matches: &ArgMatches<'_>, format: &str) -> CliResult {
    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    let stream = match TcpStream::connect((host, port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}:{}", "error:".red(), host, port);
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("Start it with {}", "flexbus-sim".bright_cyan());
            }
            return Err(e.into());
        }
    };

    println!("{}", "Monitoring FlexRay frames (Press Ctrl+C to stop)...".bright_blue().bold());
    if format == "table" {
        println!("{}", "  Frame ID     Node   Ch  Len  Payload".bright_white());
    }

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        if format == "json" {
            println!("{line}");
            continue;
        }

        let Ok(record) = serde_json::from_str::<FrameRecord>(&line) else {
            continue;
        };

        if format == "compact" {
            print_compact(&record.message);
        } else {
            println!(
                "  {:<12} {:<6} {:<3} {:>3}  {}",
                record.frame_id.bright_cyan(),
                record.node,
                record.message.channel(),
                record.message.payload().len(),
                hex::encode(record.message.payload()).dimmed()
            );
        }
    }

    Ok(())
}

fn print_compact(message: &Message) {
    println!(
        "{}:{}:{} {}",
        message.slot_id(),
        message.cycle_count(),
        message.channel(),
        hex::encode(message.payload())
    );
}
