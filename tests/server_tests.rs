use atcbus::*;
use atcbus::link::{pump, LoopbackLink};
use atcbus::protocol::{ControlResponse, ResponseStatus};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn plane(raw: u8) -> PlaneId {
    PlaneId::new(raw).unwrap()
}

async fn start_tower(config: TowerConfig) -> (SocketAddr, SocketAddr) {
    let config = TowerConfig {
        data_port: 0,
        control_port: 0,
        ..config
    };
    let server = TowerServer::bind(config).await.unwrap();
    let data_addr = server.data_addr().unwrap();
    let control_addr = server.control_addr().unwrap();
    tokio::spawn(server.run());
    (data_addr, control_addr)
}

async fn exchange(stream: &mut TcpStream, packet: Packet, reply_count: usize) -> Vec<Packet> {
    stream.write_all(&[packet.encode()]).await.unwrap();
    read_replies(stream, reply_count).await
}

async fn read_replies(stream: &mut TcpStream, count: usize) -> Vec<Packet> {
    let mut buffer = vec![0u8; count];
    tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut buffer))
        .await
        .unwrap()
        .unwrap();
    buffer.into_iter().map(Packet::decode).collect()
}

async fn control(addr: SocketAddr, line: &str) -> ControlResponse {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(line.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(IO_TIMEOUT, BufReader::new(reader).read_line(&mut response))
        .await
        .unwrap()
        .unwrap();
    serde_json::from_str(response.trim()).unwrap()
}

#[tokio::test]
async fn test_data_port_serves_packets() {
    let (data_addr, _) = start_tower(TowerConfig::default()).await;
    let mut stream = TcpStream::connect(data_addr).await.unwrap();

    assert_eq!(exchange(&mut stream, Packet::id_please(), 1).await, vec![Packet::id_available(plane(0))]);
    assert_eq!(
        exchange(&mut stream, Packet::request(plane(0), Operation::Landing), 1).await,
        vec![Packet::clear(plane(0), Runway::Zero)]
    );
    assert_eq!(
        exchange(&mut stream, Packet::hold(plane(0)), 1).await,
        vec![Packet::say_again(plane(0))]
    );
}

#[tokio::test]
async fn test_replies_are_broadcast_to_every_client() {
    let (data_addr, _) = start_tower(TowerConfig::default()).await;

    let mut watcher = TcpStream::connect(data_addr).await.unwrap();
    assert_eq!(exchange(&mut watcher, Packet::id_please(), 1).await, vec![Packet::id_available(plane(0))]);

    let mut pilot = TcpStream::connect(data_addr).await.unwrap();
    assert_eq!(exchange(&mut pilot, Packet::id_please(), 1).await, vec![Packet::id_available(plane(1))]);
    assert_eq!(
        exchange(&mut pilot, Packet::request(plane(1), Operation::Takeoff), 1).await,
        vec![Packet::clear(plane(1), Runway::Zero)]
    );

    assert_eq!(
        read_replies(&mut watcher, 2).await,
        vec![Packet::id_available(plane(1)), Packet::clear(plane(1), Runway::Zero)]
    );
}

#[tokio::test]
async fn test_control_status_reflects_traffic() {
    let (data_addr, control_addr) = start_tower(TowerConfig::default()).await;
    let mut stream = TcpStream::connect(data_addr).await.unwrap();
    for _ in 0..3 {
        exchange(&mut stream, Packet::id_please(), 1).await;
    }
    exchange(&mut stream, Packet::request(plane(2), Operation::Takeoff), 1).await;

    let response = control(control_addr, r#"{"id": 7, "command_type": "Status"}"#).await;
    assert_eq!(response.id, 7);
    assert_eq!(response.status, ResponseStatus::Success);

    let snapshot = response.snapshot.unwrap();
    assert_eq!(snapshot.allocated_mask, 0b111);
    assert_eq!(snapshot.active_runways(), 0b01);
    assert_eq!(snapshot.last_replies, vec![Packet::clear(plane(2), Runway::Zero).encode()]);
}

#[tokio::test]
async fn test_control_rejects_invalid_commands() {
    let (_, control_addr) = start_tower(TowerConfig::default()).await;

    let response = control(control_addr, "{ nope").await;
    assert_eq!(response.status, ResponseStatus::InvalidCommand);
    assert!(response.snapshot.is_none());

    let response = control(
        control_addr,
        r#"{"id": 2, "command_type": {"SetRunwayOverride": {"mask": 9}}}"#,
    )
    .await;
    assert_eq!(response.status, ResponseStatus::InvalidCommand);
}

#[tokio::test]
async fn test_runway_override_over_control_channel() {
    let (data_addr, control_addr) = start_tower(TowerConfig::default()).await;

    let response = control(
        control_addr,
        r#"{"id": 1, "command_type": {"SetRunwayOverride": {"mask": 1}}}"#,
    )
    .await;
    assert_eq!(response.status, ResponseStatus::Success);

    let mut stream = TcpStream::connect(data_addr).await.unwrap();
    exchange(&mut stream, Packet::id_please(), 1).await;
    assert_eq!(
        exchange(&mut stream, Packet::request(plane(0), Operation::Takeoff), 1).await,
        vec![Packet::clear(plane(0), Runway::One)]
    );
}

#[tokio::test]
async fn test_configured_release_on_declare() {
    let config = TowerConfig {
        release_on_declare: true,
        ..TowerConfig::default()
    };
    let (data_addr, _) = start_tower(config).await;
    let mut stream = TcpStream::connect(data_addr).await.unwrap();

    exchange(&mut stream, Packet::id_please(), 1).await;
    exchange(&mut stream, Packet::request(plane(0), Operation::Takeoff), 1).await;
    stream.write_all(&[Packet::declare(plane(0), Runway::Zero).encode()]).await.unwrap();

    // The declare has no reply; the next ID reuses plane 0
    assert_eq!(exchange(&mut stream, Packet::id_please(), 1).await, vec![Packet::id_available(plane(0))]);
}

#[test]
fn test_loopback_link_runs_basic_flow() {
    let mut link = LoopbackLink::default();
    let mut tower = Arbiter::new();

    for packet in [
        Packet::id_please(),
        Packet::id_please(),
        Packet::request(plane(0), Operation::Takeoff),
        Packet::request(plane(1), Operation::Takeoff),
        Packet::declare(plane(0), Runway::Zero),
    ] {
        link.send(packet.encode()).unwrap();
    }
    assert_eq!(link.pending_requests(), 5);
    assert_eq!(pump(&mut link, &mut tower), Ok(5));

    let replies: Vec<Packet> = link.receive_all().into_iter().map(Packet::decode).collect();
    assert_eq!(
        replies,
        vec![
            Packet::id_available(plane(0)),
            Packet::id_available(plane(1)),
            Packet::clear(plane(0), Runway::Zero),
            Packet::clear(plane(1), Runway::One),
        ]
    );
}
