//! TCP front end for the tower.
//!
//! Two listeners: the data port carries raw packet bytes exactly as the serial
//! line would, and the control port carries line-delimited JSON commands.
//! Everything inbound is funnelled through one channel to the single task that
//! owns the [`Arbiter`], so packets are dispatched strictly one at a time.
//! Replies are broadcast to every data client, like a shared serial wire.

use crate::arbiter::Arbiter;
use crate::config::{ConfigError, TowerConfig};
use crate::console::{describe_reply, describe_request};
use crate::protocol::{
    ControlCommand, ControlCommandType, ControlHandler, ControlResponse, Packet, ProtocolError, ResponseStatus,
};
use crate::telemetry::SnapshotCollector;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

const EVENT_QUEUE_SIZE: usize = 64;
const READ_CHUNK_SIZE: usize = 64;

#[derive(Debug)]
pub enum TowerEvent {
    Packet(u8),
    Control {
        command: ControlCommand,
        respond: oneshot::Sender<ControlResponse>,
    },
}

#[derive(Debug, Error)]
pub enum TowerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Tower task stopped")]
    TowerStopped,
}

pub struct TowerServer {
    config: TowerConfig,
    data_listener: TcpListener,
    control_listener: TcpListener,
}

impl TowerServer {
    pub async fn bind(config: TowerConfig) -> Result<Self, TowerError> {
        config.validate()?;

        let data_listener = TcpListener::bind(config.data_addr()).await?;
        let control_listener = TcpListener::bind(config.control_addr()).await?;

        Ok(Self {
            config,
            data_listener,
            control_listener,
        })
    }

    pub fn data_addr(&self) -> Result<SocketAddr, TowerError> {
        Ok(self.data_listener.local_addr()?)
    }

    pub fn control_addr(&self) -> Result<SocketAddr, TowerError> {
        Ok(self.control_listener.local_addr()?)
    }

    /// Serves until the tower task stops.
    pub async fn run(self) -> Result<(), TowerError> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let (reply_tx, _) = broadcast::channel(self.config.reply_buffer);

        let mut arbiter = Arbiter::with_config(self.config.arbiter_config());
        arbiter.set_controls(self.config.controls);

        info!("🌐 Data link listening on {}", self.data_addr()?);
        info!("🛠️  Control channel listening on {}", self.control_addr()?);

        let data_task = tokio::spawn(accept_data_clients(self.data_listener, event_tx.clone(), reply_tx.clone()));
        let control_task = tokio::spawn(accept_control_clients(self.control_listener, event_tx));

        run_tower(arbiter, event_rx, reply_tx).await;

        data_task.abort();
        control_task.abort();
        Err(TowerError::TowerStopped)
    }
}

/// The single consumer: owns the arbiter and processes events in arrival order.
pub async fn run_tower(
    mut arbiter: Arbiter,
    mut events: mpsc::Receiver<TowerEvent>,
    replies: broadcast::Sender<u8>,
) {
    let mut collector = SnapshotCollector::new();

    while let Some(event) = events.recv().await {
        match event {
            TowerEvent::Packet(byte) => {
                info!("📨 {}", describe_request(Packet::decode(byte)));
                for reply in arbiter.process_byte(byte) {
                    info!("📤 {}", describe_reply(reply));
                    // No subscribers just means nobody is listening right now
                    let _ = replies.send(reply.encode());
                }
            }
            TowerEvent::Control { command, respond } => {
                let response = execute_control(&mut arbiter, &mut collector, &command);
                if respond.send(response).is_err() {
                    debug!("Control client went away before its response");
                }
            }
        }
    }
}

/// Applies a validated control command and attaches a fresh snapshot.
pub fn execute_control(
    arbiter: &mut Arbiter,
    collector: &mut SnapshotCollector,
    command: &ControlCommand,
) -> ControlResponse {
    let message = match command.command_type {
        ControlCommandType::Status => None,
        ControlCommandType::SetRunwayOverride { mask } => {
            arbiter.set_runway_override(mask);
            info!(mask, "Runway override set");
            Some(alloc::format!("Runway override set to {mask:#04b}"))
        }
        ControlCommandType::SetEmergencyOverride { enabled } => {
            arbiter.set_emergency_override(enabled);
            info!(enabled, "Emergency override set");
            Some(alloc::format!(
                "Emergency override {}",
                if enabled { "enabled" } else { "disabled" }
            ))
        }
        ControlCommandType::Reset => {
            arbiter.reset();
            Some("Tower reset".into())
        }
    };

    ControlResponse {
        id: command.id,
        status: ResponseStatus::Success,
        message,
        snapshot: Some(collector.collect(arbiter)),
    }
}

async fn accept_data_clients(listener: TcpListener, events: mpsc::Sender<TowerEvent>, replies: broadcast::Sender<u8>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 Data client connected: {}", addr);
                let client_events = events.clone();
                let client_replies = replies.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_data_client(stream, client_events, client_replies).await {
                        warn!("Data client {} error: {}", addr, e);
                    }
                    info!("🔌 Data client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept data connection: {}", e);
            }
        }
    }
}

async fn handle_data_client(
    stream: TcpStream,
    events: mpsc::Sender<TowerEvent>,
    mut replies: broadcast::Receiver<u8>,
) -> Result<(), TowerError> {
    let (mut reader, mut writer) = stream.into_split();

    let forward_task = tokio::spawn(async move {
        loop {
            match replies.recv().await {
                Ok(byte) => {
                    if let Err(e) = writer.write_all(&[byte]).await {
                        warn!("Failed to forward reply: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Data client lagging, replies dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut buffer = [0u8; READ_CHUNK_SIZE];
    let result = loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e.into()),
        };

        let mut forwarded = Ok(());
        for &byte in &buffer[..n] {
            if events.send(TowerEvent::Packet(byte)).await.is_err() {
                forwarded = Err(TowerError::TowerStopped);
                break;
            }
        }
        if forwarded.is_err() {
            break forwarded;
        }
    };

    forward_task.abort();
    result
}

async fn accept_control_clients(listener: TcpListener, events: mpsc::Sender<TowerEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 Control client connected: {}", addr);
                let client_events = events.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_control_client(stream, client_events).await {
                        warn!("Control client {} error: {}", addr, e);
                    }
                    info!("🔌 Control client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept control connection: {}", e);
            }
        }
    }
}

async fn handle_control_client(stream: TcpStream, events: mpsc::Sender<TowerEvent>) -> Result<(), TowerError> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut handler = ControlHandler::new();

    let mut line = alloc::string::String::new();
    loop {
        line.clear();
        if buf_reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed = handler
            .parse_command(trimmed)
            .and_then(|command| handler.validate_command(&command).map(|()| command));

        let response = match parsed {
            Ok(command) => {
                info!("📨 Control command: {:?}", command.command_type);
                let (respond, response_rx) = oneshot::channel();
                events
                    .send(TowerEvent::Control { command, respond })
                    .await
                    .map_err(|_| TowerError::TowerStopped)?;
                response_rx.await.map_err(|_| TowerError::TowerStopped)?
            }
            Err(e) => {
                warn!("Rejected control command: {}", e);
                let message = alloc::format!("Invalid command: {e}");
                handler.create_response(0, ResponseStatus::InvalidCommand, Some(&message))
            }
        };

        let json = handler.serialize_response(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
}
