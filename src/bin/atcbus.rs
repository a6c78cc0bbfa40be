use atcbus::console::{describe_reply, describe_request, ConsoleLine, Tone};
use atcbus::protocol::{ControlCommand, ControlCommandType, ControlResponse, ResponseStatus};
use atcbus::telemetry::TowerSnapshot;
use atcbus::{Operation, Packet, PlaneId, Runway};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::process::Command;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_DATA_PORT: &str = "7070";
const DEFAULT_CONTROL_PORT: &str = "7071";
const REPLY_SETTLE: Duration = Duration::from_millis(300);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

struct Target<'a> {
    host: &'a str,
    data_port: u16,
    control_port: u16,
    format: &'a str,
    verbose: bool,
}

fn plane_arg() -> Arg<'static, 'static> {
    Arg::with_name("plane")
        .help("Plane ID (0-15)")
        .required(true)
        .validator(|v| match v.parse::<u8>().ok().and_then(|raw| PlaneId::new(raw).ok()) {
            Some(_) => Ok(()),
            None => Err("Plane ID must be between 0 and 15".into()),
        })
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("atcbus")
        .version("0.1.0")
        .author("Tower Systems Engineering Team")
        .about("🛬 Runway arbitration tower console")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Tower host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Tower packet data port")
                .takes_value(true)
                .default_value(DEFAULT_DATA_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("control-port")
                .short("c")
                .long("control-port")
                .value_name("PORT")
                .help("Tower JSON control port")
                .takes_value(true)
                .default_value(DEFAULT_CONTROL_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
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
            SubCommand::with_name("id")
                .about("🆔 Ask the tower for a plane ID")
        )
        .subcommand(
            SubCommand::with_name("request")
                .about("✈️  Request a runway for takeoff or landing")
                .arg(plane_arg())
                .arg(
                    Arg::with_name("operation")
                        .help("Requested operation")
                        .required(true)
                        .possible_values(&["takeoff", "landing"]),
                )
        )
        .subcommand(
            SubCommand::with_name("declare")
                .about("🏁 Declare a runway clear")
                .arg(plane_arg())
                .arg(
                    Arg::with_name("runway")
                        .help("Runway being vacated")
                        .required(true)
                        .possible_values(&["0", "1"]),
                )
        )
        .subcommand(
            SubCommand::with_name("emergency")
                .about("🚨 Declare or resolve an emergency")
                .arg(plane_arg())
                .arg(
                    Arg::with_name("action")
                        .help("Emergency action")
                        .required(true)
                        .possible_values(&["declare", "resolve"]),
                )
        )
        .subcommand(
            SubCommand::with_name("send")
                .about("📦 Send a raw packet byte")
                .long_about("Sends one raw packet, given in decimal, 0x-prefixed hex, or 0b-prefixed binary")
                .arg(
                    Arg::with_name("byte")
                        .help("Packet byte")
                        .required(true)
                        .validator(|v| parse_byte(&v).map(|_| ())),
                )
        )
        .subcommand(
            SubCommand::with_name("interactive")
                .about("💬 Drive the tower line by line from stdin")
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📡 Print every tower reply as it is broadcast")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Monitor duration in seconds (default: infinite)")
                        .takes_value(true),
                )
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("📊 Show the tower's current state")
        )
        .subcommand(
            SubCommand::with_name("override")
                .about("🎛️  Set tower control inputs")
                .subcommand(
                    SubCommand::with_name("runway")
                        .about("Set the runway override mask (0 disables alternating mode)")
                        .arg(
                            Arg::with_name("mask")
                                .help("Override mask, bit n closes runway n")
                                .required(true)
                                .possible_values(&["0", "1", "2", "3"]),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("emergency")
                        .about("Allow any plane to resolve the active emergency")
                        .arg(
                            Arg::with_name("state")
                                .help("Override state")
                                .required(true)
                                .possible_values(&["on", "off", "enable", "disable"]),
                        ),
                )
        )
        .subcommand(
            SubCommand::with_name("reset")
                .about("♻️  Reset the tower to power-on state")
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .help("Confirm the reset")
                        .required(true),
                )
        )
        .subcommand(
            SubCommand::with_name("server")
                .about("🚀 Start the tower server")
                .arg(
                    Arg::with_name("background")
                        .short("b")
                        .long("background")
                        .help("Run server in background"),
                )
        )
        .get_matches();

    let target = Target {
        host: matches.value_of("host").unwrap_or(DEFAULT_HOST),
        data_port: matches.value_of("port").unwrap_or(DEFAULT_DATA_PORT).parse()?,
        control_port: matches
            .value_of("control-port")
            .unwrap_or(DEFAULT_CONTROL_PORT)
            .parse()?,
        format: matches.value_of("format").unwrap_or("table"),
        verbose: matches.is_present("verbose"),
    };

    if target.verbose {
        println!("{}", "🛬 atcbus - Runway Arbitration Tower".bright_blue().bold());
        println!(
            "{} {}:{} (control {})",
            "Connecting to".dimmed(),
            target.host,
            target.data_port,
            target.control_port
        );
    }

    match matches.subcommand() {
        ("id", _) => handle_packet(&target, Packet::id_please()).await?,
        ("request", Some(sub)) => {
            let plane = plane_value(sub)?;
            let operation = match sub.value_of("operation") {
                Some("landing") => Operation::Landing,
                _ => Operation::Takeoff,
            };
            handle_packet(&target, Packet::request(plane, operation)).await?;
        }
        ("declare", Some(sub)) => {
            let plane = plane_value(sub)?;
            let runway = Runway::from_bit(sub.value_of("runway") == Some("1"));
            handle_packet(&target, Packet::declare(plane, runway)).await?;
        }
        ("emergency", Some(sub)) => {
            let plane = plane_value(sub)?;
            let packet = match sub.value_of("action") {
                Some("resolve") => Packet::resolve_emergency(plane),
                _ => Packet::declare_emergency(plane),
            };
            handle_packet(&target, packet).await?;
        }
        ("send", Some(sub)) => {
            let byte = parse_byte(sub.value_of("byte").unwrap_or_default())?;
            handle_packet(&target, Packet::decode(byte)).await?;
        }
        ("interactive", _) => handle_interactive(&target).await?,
        ("monitor", Some(sub)) => handle_monitor(&target, sub).await?,
        ("status", _) => handle_status(&target).await?,
        ("override", Some(sub)) => handle_override(&target, sub).await?,
        ("reset", Some(sub)) => {
            if sub.is_present("confirm") {
                let response = send_control(&target, ControlCommandType::Reset).await?;
                print_control_result("Tower reset", &response, target.format);
            } else {
                println!("{}", "Reset requires --confirm flag".yellow());
            }
        }
        ("server", Some(sub)) => handle_server(sub, target.data_port, target.control_port)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the tower", "atcbus server".bright_cyan());
            println!("  {} Get a plane ID", "atcbus id".bright_cyan());
            println!("  {} Request takeoff", "atcbus request 0 takeoff".bright_cyan());
            println!("  {} Watch the tower", "atcbus monitor".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_packet(target: &Target<'_>, packet: Packet) -> CliResult<()> {
    let mut stream = connect(target.host, target.data_port).await?;

    if target.verbose {
        println!("{} {:#010b}", "Sending".dimmed(), packet.encode());
    }
    stream.write_all(&[packet.encode()]).await?;
    let replies = collect_replies(&mut stream).await?;

    match target.format {
        "json" => {
            let json = serde_json::json!({
                "request": packet.encode(),
                "replies": replies,
            });
            println!("{json}");
        }
        "compact" => {
            let rendered: Vec<String> = replies.iter().map(|byte| format!("{byte:#04x}")).collect();
            println!("{:#04x} -> [{}]", packet.encode(), rendered.join(", "));
        }
        _ => {
            print_line(&describe_request(packet));
            if replies.is_empty() {
                println!("{}", "(no reply)".dimmed());
            }
            for &byte in &replies {
                print_line(&describe_reply(Packet::decode(byte)));
            }
        }
    }

    Ok(())
}

async fn handle_interactive(target: &Target<'_>) -> CliResult<()> {
    let stream = connect(target.host, target.data_port).await?;
    let (mut reader, mut writer) = stream.into_split();

    println!("{}", "💬 Interactive tower session".bright_blue().bold());
    println!(
        "{}",
        "Commands: id | request <plane> takeoff|landing | declare <plane> 0|1 | emergency <plane> declare|resolve | send <byte> | quit"
            .dimmed()
    );

    let reply_task = tokio::spawn(async move {
        let mut buffer = [0u8; 64];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for &byte in &buffer[..n] {
                        print_line(&describe_reply(Packet::decode(byte)));
                    }
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if matches!(words[0], "quit" | "exit") {
            break;
        }

        match parse_packet_words(&words) {
            Ok(packet) => {
                print_line(&describe_request(packet));
                writer.write_all(&[packet.encode()]).await?;
            }
            Err(e) => println!("{} {}", "❌".red(), e.bright_red()),
        }
    }

    reply_task.abort();
    Ok(())
}

async fn handle_monitor(target: &Target<'_>, matches: &ArgMatches<'_>) -> CliResult<()> {
    let duration = matches
        .value_of("duration")
        .map(str::parse::<u64>)
        .transpose()?
        .map(Duration::from_secs);

    let mut stream = connect(target.host, target.data_port).await?;
    println!("{}", "📡 Monitoring tower replies (Press Ctrl+C to stop)...".bright_blue().bold());

    let watch = async {
        let mut buffer = [0u8; 64];
        loop {
            let n = stream.read(&mut buffer).await?;
            if n == 0 {
                println!("{}", "Tower closed the connection".yellow());
                return Ok::<(), std::io::Error>(());
            }
            for &byte in &buffer[..n] {
                match target.format {
                    "json" => println!("{}", serde_json::json!({ "reply": byte })),
                    "compact" => println!("{byte:#04x}"),
                    _ => print_line(&describe_reply(Packet::decode(byte))),
                }
            }
        }
    };

    match duration {
        Some(limit) => match tokio::time::timeout(limit, watch).await {
            Ok(result) => result?,
            Err(_) => println!("{}", "Monitor duration elapsed".dimmed()),
        },
        None => watch.await?,
    }

    Ok(())
}

async fn handle_status(target: &Target<'_>) -> CliResult<()> {
    let response = send_control(target, ControlCommandType::Status).await?;

    match target.format {
        "json" => println!("{}", serde_json::to_string(&response)?),
        "compact" => match &response.snapshot {
            Some(snapshot) => println!(
                "ids={:#06x} runways={:#04b} takeoff={} landing={} emergency={:?}",
                snapshot.allocated_mask,
                snapshot.active_runways(),
                snapshot.takeoff_queue.len(),
                snapshot.landing_queue.len(),
                snapshot.emergency
            ),
            None => println!("{}", "No snapshot".yellow()),
        },
        _ => match &response.snapshot {
            Some(snapshot) => print_snapshot(snapshot),
            None => println!("{} {}", "❌".red(), "Status check failed".bright_red()),
        },
    }

    Ok(())
}

async fn handle_override(target: &Target<'_>, matches: &ArgMatches<'_>) -> CliResult<()> {
    match matches.subcommand() {
        ("runway", Some(sub)) => {
            let mask: u8 = sub.value_of("mask").unwrap_or("0").parse()?;
            let response = send_control(target, ControlCommandType::SetRunwayOverride { mask }).await?;
            print_control_result("Runway override", &response, target.format);
        }
        ("emergency", Some(sub)) => {
            let enabled = normalize_state(sub.value_of("state").unwrap_or("off"));
            let response = send_control(target, ControlCommandType::SetEmergencyOverride { enabled }).await?;
            print_control_result("Emergency override", &response, target.format);
        }
        _ => {
            println!("{}", "Override subcommand required. Use 'atcbus override --help' for options.".yellow());
        }
    }
    Ok(())
}

fn handle_server(matches: &ArgMatches<'_>, data_port: u16, control_port: u16) -> CliResult<()> {
    let background = matches.is_present("background");

    println!("{}", "🚀 Starting tower server...".bright_green().bold());

    let mut cmd = Command::new("cargo");
    cmd.args(["run", "--bin", "atcbus-tower", "--", "--data-port"])
        .arg(data_port.to_string())
        .arg("--control-port")
        .arg(control_port.to_string());

    if background {
        cmd.spawn()?;
        println!("{} Tower started in background on port {}", "✅".green(), data_port);
    } else {
        println!("{} Tower starting on port {} (Press Ctrl+C to stop)", "🌐".bright_blue(), data_port);
        cmd.status()?;
    }

    Ok(())
}

// Helper functions

fn plane_value(matches: &ArgMatches<'_>) -> CliResult<PlaneId> {
    let raw: u8 = matches.value_of("plane").unwrap_or_default().parse()?;
    Ok(PlaneId::new(raw)?)
}

fn normalize_state(state: &str) -> bool {
    matches!(state, "on" | "enable")
}

fn parse_byte(text: &str) -> Result<u8, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u8::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b") {
        u8::from_str_radix(bin, 2)
    } else {
        text.parse::<u8>()
    };
    parsed.map_err(|_| format!("'{text}' is not a byte value"))
}

fn parse_packet_words(words: &[&str]) -> Result<Packet, String> {
    let plane = |index: usize| -> Result<PlaneId, String> {
        let text = words.get(index).ok_or("missing plane ID")?;
        let raw = text.parse::<u8>().map_err(|_| format!("'{text}' is not a plane ID"))?;
        PlaneId::new(raw).map_err(|e| e.to_string())
    };
    let word = |index: usize| words.get(index).copied().unwrap_or_default();

    match words.first().copied().unwrap_or_default() {
        "id" => Ok(Packet::id_please()),
        "request" => match word(2) {
            "takeoff" => Ok(Packet::request(plane(1)?, Operation::Takeoff)),
            "landing" => Ok(Packet::request(plane(1)?, Operation::Landing)),
            other => Err(format!("unknown operation '{other}'")),
        },
        "declare" => match word(2) {
            "0" => Ok(Packet::declare(plane(1)?, Runway::Zero)),
            "1" => Ok(Packet::declare(plane(1)?, Runway::One)),
            other => Err(format!("unknown runway '{other}'")),
        },
        "emergency" => match word(2) {
            "declare" => Ok(Packet::declare_emergency(plane(1)?)),
            "resolve" => Ok(Packet::resolve_emergency(plane(1)?)),
            other => Err(format!("unknown emergency action '{other}'")),
        },
        "send" => parse_byte(word(1)).map(Packet::decode),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn print_line(line: &ConsoleLine) {
    let text = line.to_string();
    let colored = match line.tone {
        Tone::Granted => text.bright_green(),
        Tone::Waiting => text.yellow(),
        Tone::Refused => text.bright_red(),
        Tone::Normal => text.normal(),
    };
    println!("{colored}");
}

fn print_control_result(action: &str, response: &ControlResponse, format: &str) {
    match format {
        "json" => match serde_json::to_string(response) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("{} {}", "❌".red(), e),
        },
        "compact" => println!("{:?}", response.status),
        _ => {
            let message = response.message.as_deref().unwrap_or("");
            match response.status {
                ResponseStatus::Success => {
                    println!("{} {}: {}", "✅".green(), action.bright_white(), message.bright_cyan());
                }
                ResponseStatus::InvalidCommand | ResponseStatus::Error => {
                    println!("{} {} failed: {}", "❌".red(), action.bright_white(), message.bright_red());
                }
            }
        }
    }
}

fn print_snapshot(snapshot: &TowerSnapshot) {
    println!("\n{}", "🗼 Tower Status".bright_blue().bold());
    println!("{}", "═══════════════".bright_blue());

    let allocated: Vec<String> = (0..16u8)
        .filter(|bit| snapshot.allocated_mask & (1 << bit) != 0)
        .map(|bit| bit.to_string())
        .collect();
    println!(
        "IDs in use:    {} {}",
        format!("{}/16", allocated.len()).bright_cyan(),
        if snapshot.airspace_full { "(airspace full)".bright_red() } else { "".normal() }
    );
    if !allocated.is_empty() {
        println!("               {}", allocated.join(" ").dimmed());
    }

    for (index, runway) in snapshot.runways.iter().enumerate() {
        match runway.occupant() {
            Some(occupant) => println!(
                "Runway {}:      {} ({})",
                index,
                format!("Plane {}", occupant.plane).bright_yellow(),
                occupant.operation
            ),
            None => println!("Runway {}:      {}", index, "free".bright_green()),
        }
    }

    let render_queue = |queue: &[PlaneId]| -> String {
        if queue.is_empty() {
            "empty".to_string()
        } else {
            queue.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
        }
    };
    println!("Takeoff queue: {}", render_queue(&snapshot.takeoff_queue));
    println!("Landing queue: {}", render_queue(&snapshot.landing_queue));

    match snapshot.emergency {
        atcbus::emergency::EmergencyState::Active { by } => {
            println!("Emergency:     {}", format!("ACTIVE (plane {by})").bright_red().bold());
        }
        atcbus::emergency::EmergencyState::Inactive => println!("Emergency:     {}", "none".bright_green()),
    }

    println!(
        "Controls:      runway override {:#04b}, emergency override {}",
        snapshot.controls.runway_override,
        if snapshot.controls.emergency_override { "on" } else { "off" }
    );
    println!(
        "Next priority: {}",
        if snapshot.takeoff_first { "takeoff" } else { "landing" }
    );

    println!("\n{}", "📊 Statistics".bright_white().bold());
    let stats = &snapshot.stats;
    println!(
        "packets {}  clear {}  hold {}  divert {}  say-again {}  ignored {}",
        stats.packets, stats.clearances, stats.holds, stats.diverts, stats.say_agains, stats.ignored
    );
}

async fn connect(host: &str, port: u16) -> CliResult<TcpStream> {
    let addr = format!("{host}:{port}");
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to tower at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Tower is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "atcbus server".bright_cyan());
                eprintln!("   or");
                eprintln!("   {}", "cargo run --bin atcbus-tower".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            Err(e.into())
        }
    }
}

/// Reads reply bytes until the tower has been quiet for `REPLY_SETTLE`.
async fn collect_replies(stream: &mut TcpStream) -> CliResult<Vec<u8>> {
    let mut replies = Vec::new();
    let mut buffer = [0u8; 64];

    loop {
        match tokio::time::timeout(REPLY_SETTLE, stream.read(&mut buffer)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => replies.extend_from_slice(&buffer[..n]),
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    Ok(replies)
}

async fn send_control(target: &Target<'_>, command_type: ControlCommandType) -> CliResult<ControlResponse> {
    let stream = connect(target.host, target.control_port).await?;
    let (reader, mut writer) = stream.into_split();

    let command = ControlCommand {
        id: current_timestamp() as u32,
        command_type,
    };
    let json = serde_json::to_string(&command)?;

    match tokio::time::timeout(CONTROL_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await?;
        Ok::<String, std::io::Error>(line)
    })
    .await
    {
        Ok(line) => Ok(serde_json::from_str(line?.trim())?),
        Err(_) => {
            eprintln!("{} Command timed out after 5 seconds", "⏰".yellow());
            Err("Command timeout".into())
        }
    }
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
