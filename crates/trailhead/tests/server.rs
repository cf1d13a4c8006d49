//! End-to-end tests: a real server on a loopback port and raw line clients.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use trailhead::protocol::{
    Codec, GameData, GameDataField, LineCodec, Packet, PacketType, PlayerId, SERVER_ORIGIN,
    ServerInfo,
};
use trailhead::session::messages::{KickPlayer, ListPlayers, StartServer, StopServer};
use trailhead::{Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(3);

// =========================================================================
// Helpers
// =========================================================================

fn config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind = "127.0.0.1:0".into();
    config.admission.name = "Test Server".into();
    config.admission.message = "Have fun".into();
    config.admission.allowed_game_modes = vec!["Kolben".into()];
    config
}

async fn start(config: ServerConfig) -> (Arc<Server>, String) {
    let server = Server::new(config);
    let addr = server.start().await.expect("server should start");
    (server, addr.to_string())
}

fn join_data(name: &str, mode: &str) -> GameData {
    GameData::default()
        .with(GameDataField::GameMode, mode)
        .with(GameDataField::IsGameJoltPlayer, "0")
        .with(GameDataField::DecimalSeparator, ".")
        .with(GameDataField::Name, name)
        .with(GameDataField::LevelFile, "route1.dat")
        .with(GameDataField::Position, "0|0|0")
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("should connect");
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, packet: &Packet) {
        let line = LineCodec.encode(packet);
        self.send_raw(&line).await;
    }

    /// Connects and joins; returns the client and its assigned ID.
    async fn join(addr: &str, name: &str) -> (Self, u32) {
        let mut client = Self::connect(addr).await;
        client
            .send(&join_data(name, "Kolben").to_packet(SERVER_ORIGIN))
            .await;
        let id = client.recv_kind(PacketType::Id).await;
        (client, id.item(0).parse().unwrap())
    }

    /// Next packet, or `None` at EOF.
    async fn recv(&mut self) -> Option<Packet> {
        let line = tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a packet")
            .ok()??;
        Some(LineCodec.decode(&line).expect("server sent an invalid line"))
    }

    /// Skips packets until one of `kind` arrives.
    async fn recv_kind(&mut self, kind: PacketType) -> Packet {
        loop {
            match self.recv().await {
                Some(packet) if packet.packet_type() == kind => return packet,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {kind:?}"),
            }
        }
    }

    /// Drains until the server closes the connection.
    async fn expect_closed(&mut self) {
        while self.recv().await.is_some() {}
    }
}

async fn player_names(server: &Server) -> Vec<String> {
    let dispatcher = server.dispatcher().await.expect("server is running");
    let players = dispatcher.send(ListPlayers).await.unwrap();
    players.into_iter().map(|p| p.name).collect()
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition never became true"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Joining
// =========================================================================

#[tokio::test]
async fn test_join_kolben_assigns_id_and_introduces_players() {
    let (_server, addr) = start(config()).await;

    let (mut ash, ash_id) = Client::join(&addr, "Ash").await;
    assert_eq!(ash_id, 1);

    let (mut brock, brock_id) = Client::join(&addr, "Brock").await;
    assert_eq!(brock_id, 2);

    // The newcomer learns about the existing player...
    let create = brock.recv_kind(PacketType::CreatePlayer).await;
    assert_eq!(create.item(0), "1");
    let state = brock.recv_kind(PacketType::GameData).await;
    assert_eq!(state.origin(), 1);
    assert_eq!(GameData::from_packet(&state).unwrap().name(), "Ash");

    // ...and the existing player learns about the newcomer.
    let create = ash.recv_kind(PacketType::CreatePlayer).await;
    assert_eq!(create.item(0), "2");
    let state = ash.recv_kind(PacketType::GameData).await;
    assert_eq!(state.origin(), 2);
    assert_eq!(GameData::from_packet(&state).unwrap().name(), "Brock");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_introduce_each_pair_once() {
    const PLAYERS: usize = 16;
    let (_server, addr) = start(config()).await;

    let joins = (0..PLAYERS).map(|i| {
        let addr = addr.clone();
        tokio::spawn(async move {
            let mut client = Client::connect(&addr).await;
            client
                .send(&join_data(&format!("Trainer{i}"), "Kolben").to_packet(SERVER_ORIGIN))
                .await;

            let first = client.recv().await.expect("should receive a packet");
            assert_eq!(first.packet_type(), PacketType::Id, "own Id must come first");
            let own: u32 = first.item(0).parse().unwrap();

            let mut created = Vec::new();
            while created.len() < PLAYERS - 1 {
                let packet = client.recv().await.expect("connection closed");
                if packet.packet_type() == PacketType::CreatePlayer {
                    created.push(packet.item(0).parse::<u32>().unwrap());
                }
            }
            // Anything still in flight would be a second introduction.
            while let Ok(Some(packet)) =
                tokio::time::timeout(Duration::from_millis(300), client.recv()).await
            {
                if packet.packet_type() == PacketType::CreatePlayer {
                    created.push(packet.item(0).parse::<u32>().unwrap());
                }
            }
            (client, own, created)
        })
    });

    let mut clients = Vec::new();
    for join in joins.collect::<Vec<_>>() {
        clients.push(join.await.unwrap());
    }

    let ids: HashSet<u32> = clients.iter().map(|(_, own, _)| *own).collect();
    assert_eq!(ids, (1..=PLAYERS as u32).collect::<HashSet<_>>());
    for (_, own, created) in &clients {
        let unique: HashSet<u32> = created.iter().copied().collect();
        assert_eq!(created.len(), unique.len(), "player {own} was introduced twice to someone");
        assert!(!unique.contains(own));
        assert_eq!(unique.len(), PLAYERS - 1);
    }
}

#[tokio::test]
async fn test_join_sends_welcome_message() {
    let (_server, addr) = start(config()).await;
    let (mut ash, _) = Client::join(&addr, "Ash").await;

    let joined = ash.recv_kind(PacketType::ServerMessage).await;
    assert_eq!(joined.item(0), "Ash joined the game.");
    let welcome = ash.recv_kind(PacketType::ServerMessage).await;
    assert_eq!(welcome.item(0), "Welcome to Test Server! Have fun");
}

#[tokio::test]
async fn test_join_max_players_zero_is_kicked_and_closed() {
    let mut config = config();
    config.admission.max_players = 0;
    let (server, addr) = start(config).await;

    let mut client = Client::connect(&addr).await;
    client
        .send(&join_data("Ash", "Kolben").to_packet(SERVER_ORIGIN))
        .await;

    let kicked = client.recv().await.expect("should receive a packet");
    assert_eq!(kicked.packet_type(), PacketType::Kicked);
    assert_eq!(kicked.item(0), "The server is full (0 players).");
    client.expect_closed().await;

    assert!(player_names(&server).await.is_empty());
}

#[tokio::test]
async fn test_join_refused_consumes_no_id() {
    let mut config = config();
    config.admission.max_players = 1;
    let (_server, addr) = start(config).await;

    let (ash, ash_id) = Client::join(&addr, "Ash").await;
    assert_eq!(ash_id, 1);

    let mut brock = Client::connect(&addr).await;
    brock
        .send(&join_data("Brock", "Kolben").to_packet(SERVER_ORIGIN))
        .await;
    let kicked = brock.recv_kind(PacketType::Kicked).await;
    assert_eq!(kicked.item(0), "The server is full (1 players).");
    brock.expect_closed().await;

    drop(ash);
    // Ash's slot frees once the server notices the hang-up; until then
    // Misty is turned away like Brock.
    let deadline = tokio::time::Instant::now() + WAIT;
    let misty_id = loop {
        let mut misty = Client::connect(&addr).await;
        misty
            .send(&join_data("Misty", "Kolben").to_packet(SERVER_ORIGIN))
            .await;
        match misty.recv().await {
            Some(p) if p.packet_type() == PacketType::Id => break p.item(0).to_string(),
            _ => {
                assert!(tokio::time::Instant::now() < deadline, "slot never freed");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    };
    assert_eq!(misty_id, "1");
}

#[tokio::test]
async fn test_join_wrong_game_mode_is_kicked() {
    let (_server, addr) = start(config()).await;

    let mut client = Client::connect(&addr).await;
    client
        .send(&join_data("Ash", "Pokemon 3D").to_packet(SERVER_ORIGIN))
        .await;

    let kicked = client.recv_kind(PacketType::Kicked).await;
    assert_eq!(
        kicked.item(0),
        "This server does not allow the game mode \"Pokemon 3D\"."
    );
    client.expect_closed().await;
}

#[tokio::test]
async fn test_malformed_line_keeps_connection_open() {
    let (_server, addr) = start(config()).await;

    let mut client = Client::connect(&addr).await;
    client.send_raw("this is not a packet").await;
    client.send_raw("0.5|0|-1|1|0|").await;
    client
        .send(&join_data("Ash", "Kolben").to_packet(SERVER_ORIGIN))
        .await;

    let id = client.recv_kind(PacketType::Id).await;
    assert_eq!(id.item(0), "1");
}

// =========================================================================
// Relaying
// =========================================================================

#[tokio::test]
async fn test_chat_is_broadcast_with_sender_origin() {
    let (_server, addr) = start(config()).await;
    let (mut ash, _) = Client::join(&addr, "Ash").await;
    let (mut brock, brock_id) = Client::join(&addr, "Brock").await;

    brock.send(&Packet::chat(brock_id as i32, "hello")).await;

    let chat = ash.recv_kind(PacketType::ChatMessage).await;
    assert_eq!(chat.origin(), 2);
    assert_eq!(chat.item(0), "hello");
    let echo = brock.recv_kind(PacketType::ChatMessage).await;
    assert_eq!(echo.item(0), "hello");
}

#[tokio::test]
async fn test_partial_game_data_is_merged_and_forwarded() {
    let (_server, addr) = start(config()).await;
    let (mut ash, _) = Client::join(&addr, "Ash").await;
    let (mut brock, brock_id) = Client::join(&addr, "Brock").await;

    // Ash first sees Brock's join state.
    ash.recv_kind(PacketType::GameData).await;

    let update = GameData::default().with(GameDataField::Position, "5|0|7");
    brock.send(&update.to_packet(brock_id as i32)).await;

    let forwarded = ash.recv_kind(PacketType::GameData).await;
    let data = GameData::from_packet(&forwarded).unwrap();
    assert_eq!(forwarded.origin(), 2);
    assert_eq!(data.get(GameDataField::Position), "5|0|7");
    assert_eq!(data.name(), "Brock");
}

#[tokio::test]
async fn test_leave_sends_destroy_player_to_others() {
    let (_server, addr) = start(config()).await;
    let (mut ash, _) = Client::join(&addr, "Ash").await;
    let (brock, _) = Client::join(&addr, "Brock").await;

    drop(brock);

    let destroy = ash.recv_kind(PacketType::DestroyPlayer).await;
    assert_eq!(destroy.item(0), "2");
    let notice = ash.recv_kind(PacketType::ServerMessage).await;
    assert!(notice.item(0).contains("Brock"));
}

#[tokio::test]
async fn test_server_data_request_replies_then_closes() {
    let (_server, addr) = start(config()).await;
    let (_ash, _) = Client::join(&addr, "Ash").await;

    let mut scanner = Client::connect(&addr).await;
    scanner
        .send(&Packet::new(PacketType::ServerDataRequest, SERVER_ORIGIN, Vec::new()).unwrap())
        .await;

    let reply = scanner.recv_kind(PacketType::ServerInfoData).await;
    let info = ServerInfo::from_packet(&reply).unwrap();
    assert_eq!(info.player_count, 1);
    assert_eq!(info.max_players, 20);
    assert_eq!(info.name, "Test Server");
    assert_eq!(info.message, "Have fun");
    assert_eq!(info.player_names, vec!["Ash".to_string()]);
    scanner.expect_closed().await;
}

// =========================================================================
// Liveness
// =========================================================================

#[tokio::test]
async fn test_silent_connection_is_dropped_after_timeout() {
    let mut config = config();
    config.server.no_ping_timeout_secs = 1;
    config.server.watchdog_tick_ms = 50;
    let (server, addr) = start(config).await;

    let mut client = Client::connect(&addr).await;
    tokio::time::timeout(Duration::from_secs(3), client.expect_closed())
        .await
        .expect("watchdog should close an idle connection");
    let server = &server;
    eventually(|| async move { server.connection_count().await == 0 }).await;
}

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let mut config = config();
    config.server.max_line_length = 64;
    let (_server, addr) = start(config).await;

    let mut client = Client::connect(&addr).await;
    client.send_raw(&"x".repeat(1024)).await;
    client.expect_closed().await;
}

// =========================================================================
// Commands and lifecycle
// =========================================================================

#[tokio::test]
async fn test_kick_player_command_kicks_and_notifies_others() {
    let (server, addr) = start(config()).await;
    let (mut ash, _) = Client::join(&addr, "Ash").await;
    let (mut brock, _) = Client::join(&addr, "Brock").await;

    let dispatcher = server.dispatcher().await.unwrap();
    dispatcher
        .send(KickPlayer {
            id: PlayerId(1),
            reason: "spamming".into(),
        })
        .await
        .unwrap();

    let kicked = ash.recv_kind(PacketType::Kicked).await;
    assert_eq!(kicked.item(0), "spamming");
    ash.expect_closed().await;

    brock.recv_kind(PacketType::DestroyPlayer).await;
    let notice = brock.recv_kind(PacketType::ServerMessage).await;
    assert_eq!(notice.item(0), "Ash was kicked: spamming");
    assert_eq!(player_names(&server).await, vec!["Brock".to_string()]);
}

#[tokio::test]
async fn test_kick_unknown_player_is_an_error() {
    let (server, _addr) = start(config()).await;
    let dispatcher = server.dispatcher().await.unwrap();

    let err = dispatcher
        .send(KickPlayer {
            id: PlayerId(9),
            reason: "nope".into(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("P-9"));
}

#[tokio::test]
async fn test_start_twice_returns_same_address() {
    let (server, addr) = start(config()).await;
    let again = server.start().await.unwrap();
    assert_eq!(again.to_string(), addr);
}

#[tokio::test]
async fn test_stop_sends_server_close_and_is_idempotent() {
    let (server, addr) = start(config()).await;
    let (mut ash, _) = Client::join(&addr, "Ash").await;

    server.stop().await.unwrap();

    let close = ash.recv_kind(PacketType::ServerClose).await;
    assert_eq!(close.item(0), "The server is shutting down.");
    ash.expect_closed().await;

    server.stop().await.unwrap();
    assert!(!server.is_running().await);
    assert!(server.dispatcher().await.is_none());
}

#[tokio::test]
async fn test_restart_gets_fresh_registry() {
    let (server, addr) = start(config()).await;
    let (_ash, _) = Client::join(&addr, "Ash").await;
    let (_brock, _) = Client::join(&addr, "Brock").await;

    server.stop().await.unwrap();
    let addr = server.start().await.unwrap().to_string();

    let (_misty, misty_id) = Client::join(&addr, "Misty").await;
    assert_eq!(misty_id, 1);
    assert_eq!(player_names(&server).await, vec!["Misty".to_string()]);
}

#[tokio::test]
async fn test_stop_server_request_stops_the_server() {
    let (server, _addr) = start(config()).await;

    server.control().send(StopServer).await.unwrap();

    assert!(!server.is_running().await);
}

#[tokio::test]
async fn test_start_server_request_starts_a_stopped_server() {
    let server = Server::new(config());
    assert!(!server.is_running().await);

    server.control().send(StartServer).await.unwrap();
    let addr = server.local_addr().await.expect("server should be running").to_string();
    let (_ash, ash_id) = Client::join(&addr, "Ash").await;
    assert_eq!(ash_id, 1);

    server.control().send(StopServer).await.unwrap();
    assert!(!server.is_running().await);

    server.control().send(StartServer).await.unwrap();
    server.control().send(StartServer).await.unwrap();
    assert!(server.is_running().await);
    assert!(player_names(&server).await.is_empty());
}
