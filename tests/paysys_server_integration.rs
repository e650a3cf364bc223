use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use paysys::config::ServerConfig;
use paysys::network::crypt::transform;
use paysys::resolver::learned::LearnedKeyStore;
use paysys::resolver::KNOWN_KEYS;
use paysys::servers::paysys::store::MemoryAccountStore;
use paysys::servers::paysys::PaysysState;

/// 229-byte login frame captured from a live client (admin / "1").
const ADMIN_LOGIN_FRAME: &str = "e500ff424579772b2fdb9a211033d5f119fd0ea0457377292fda9a211052b19c70930ea0457377292fda9a21101185df31a73c937d32476b16e8a9192262f5df33a63e990445311e1ae2ae185252b19c70930ea0457377292fda9a211052b19c70930ea0457377292fda9a21109219ad714030a04530cba0954552247669a55d2284ae1d3b7377292fda9a211052b19c70930ea0457377292fda9a211052b19c70930ea0457377292fda9a211052b19c7093ca91c774270481f986480a2d9979b6930ea0457377292fda9a211052b19c70930ea0457377292fda9a211052b19c70930ea0c1";

async fn start_server(state: PaysysState) -> (std::net::SocketAddr, Arc<PaysysState>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(state);

    let s = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = PaysysState::serve(s, listener).await;
    });

    (addr, state)
}

async fn start_test_server() -> (std::net::SocketAddr, Arc<PaysysState>) {
    start_server(PaysysState::test_only()).await
}

async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut greeting = vec![0u8; 34];
    client.read_exact(&mut greeting).await.unwrap();
    client
}

async fn handshake(client: &mut TcpStream) {
    client.write_all(&[0x5A; 127]).await.unwrap();
    let mut ack = vec![0u8; 53];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(&ack[..4], &[0x35, 0x00, 0x97, 0x44]);
}

async fn assert_closed(client: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let r = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("server did not close the connection");
    assert!(!matches!(r, Ok(n) if n > 0), "unexpected extra bytes: {:?}", r);
}

#[tokio::test]
async fn test_greeting_written_first() {
    let (addr, _) = start_test_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut greeting = vec![0u8; 34];
    client.read_exact(&mut greeting).await.unwrap();
    assert_eq!(&greeting[..4], &[0x22, 0x00, 0x20, 0x00]);
    assert_eq!(&greeting[10..18], &[0xF5, 0x4D, 0x3F, 0xC9, 0x5A, 0xCF, 0xB2, 0x5E]);
}

#[tokio::test]
async fn test_bishop_survives_arbitrary_frames() {
    let (addr, state) = start_test_server().await;
    let mut client = connect(addr).await;
    handshake(&mut client).await;

    for junk in [&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07][..], &[0xFF; 40][..], &[0x09][..]] {
        client.write_all(junk).await.unwrap();
        let mut ack = [0u8; 4];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, [0x04, 0x00, 0x01, 0x00]);
    }

    // re-handshake inside the session
    handshake(&mut client).await;

    let sessions = state.active_bishop_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].frames_handled >= 4);
}

#[tokio::test]
async fn test_bishop_relays_login() {
    let (addr, _) = start_test_server().await;
    let mut client = connect(addr).await;
    handshake(&mut client).await;

    client.write_all(&hex::decode(ADMIN_LOGIN_FRAME).unwrap()).await.unwrap();
    let mut reply = vec![0u8; 68];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x44, 0x00, 0xFF, 0xA8]);
    let plain = transform(&reply[4..], &KNOWN_KEYS[0]);
    assert_eq!(plain[0], 0);

    // still open for the next frame
    client.write_all(&[0x06, 0x00, 0xFF, 0x14, 0x00, 0x00]).await.unwrap();
    let mut confirm = [0u8; 6];
    client.read_exact(&mut confirm).await.unwrap();
    assert_eq!(confirm, [0x06, 0x00, 0xFF, 0x15, 0x00, 0x00]);
}

#[tokio::test]
async fn test_one_shot_login_gets_one_reply_then_eof() {
    let (addr, state) = start_test_server().await;
    let mut client = connect(addr).await;

    client.write_all(&hex::decode(ADMIN_LOGIN_FRAME).unwrap()).await.unwrap();
    let mut reply = vec![0u8; 68];
    client.read_exact(&mut reply).await.unwrap();
    let plain = transform(&reply[4..], &KNOWN_KEYS[0]);
    assert_eq!(plain[0], 0);
    assert_eq!(&plain[1..17], b"Login successful");

    assert_closed(&mut client).await;
    assert_eq!(state.resolver.learned().get("admin"), Some(KNOWN_KEYS[0]));
}

#[tokio::test]
async fn test_one_shot_garbage_gets_ack_then_eof() {
    let (addr, _) = start_test_server().await;
    let mut client = connect(addr).await;

    client.write_all(&[0x10, 0x00, 0x34, 0x12, 0x00]).await.unwrap();
    let mut ack = [0u8; 4];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x04, 0x00, 0x01, 0x00]);

    assert_closed(&mut client).await;
}

#[tokio::test]
async fn test_bishop_acl_rejects_unlisted_peer() {
    let config = ServerConfig::from_str("bishop_allow: [\"10.0.0.0/8\"]\norigin_cooldown_secs: 0\n").unwrap();
    let state = PaysysState::new(
        config,
        Arc::new(MemoryAccountStore::permissive()),
        Arc::new(LearnedKeyStore::in_memory()),
    )
    .unwrap();
    let (addr, state) = start_server(state).await;
    let mut client = connect(addr).await;

    client.write_all(&[0x5A; 127]).await.unwrap();
    let mut ack = [0u8; 4];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x04, 0x00, 0x01, 0x00]);

    assert_closed(&mut client).await;
    assert!(state.active_bishop_sessions().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_bishop_sessions() {
    let (addr, state) = start_test_server().await;
    let mut client = connect(addr).await;
    handshake(&mut client).await;

    state.shutdown();
    assert_closed(&mut client).await;
    assert!(state.shutdown.is_cancelled());
}
