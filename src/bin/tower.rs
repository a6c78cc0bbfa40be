use atcbus::config::TowerConfig;
use atcbus::server::TowerServer;
use clap::{App, Arg};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = App::new("atcbus-tower")
        .version("0.1.0")
        .about("🗼 Runway arbitration tower server")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("data-port")
                .long("data-port")
                .value_name("PORT")
                .help("Override the packet data port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("control-port")
                .long("control-port")
                .value_name("PORT")
                .help("Override the JSON control port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("release-on-declare")
                .long("release-on-declare")
                .help("Retire a plane's ID once it declares its runway clear"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => TowerConfig::load(path)?,
        None => TowerConfig::default(),
    };
    if let Some(port) = matches.value_of("data-port") {
        config.data_port = port.parse()?;
    }
    if let Some(port) = matches.value_of("control-port") {
        config.control_port = port.parse()?;
    }
    if matches.is_present("release-on-declare") {
        config.release_on_declare = true;
    }

    println!("🗼 Runway Arbitration Tower");
    println!("===========================");

    let server = TowerServer::bind(config).await?;
    info!("Tower ready, data {} control {}", server.data_addr()?, server.control_addr()?);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Tower server error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down tower");
        }
    }

    Ok(())
}
