use std::error::Error;
use std::time::Duration;

use jardim_bridge::{Bridge, BridgeConfig, CancellationToken, ConnectStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
const DISCONNECT: [u8; 2] = [0xe0, 0x00];
const LIGHT: &str = "plant/actuators/light";

/// Accepts one client, acknowledges it and records everything it sends.
async fn broker() -> std::io::Result<(u16, JoinHandle<std::io::Result<Vec<u8>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let session = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;
        socket.write_all(&CONNACK).await?;

        let mut received = Vec::new();
        socket.read_to_end(&mut received).await?;
        Ok(received)
    });
    Ok((port, session))
}

fn qos0_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    let mut packet = vec![0x30, remaining as u8, 0x00, topic.len() as u8];
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

#[tokio::test]
async fn shutdown_flushes_the_command_before_disconnecting() -> Result<(), Box<dyn Error>> {
    let (port, session) = broker().await?;
    let bridge = Bridge::new(BridgeConfig {
        host: "127.0.0.1".into(),
        port,
        ..Default::default()
    });

    assert_eq!(
        bridge.connect(CancellationToken::new()).await,
        ConnectStatus::Connected
    );
    assert!(bridge.publish(LIGHT, "ON").await.is_sent());

    bridge.shutdown().await;
    assert!(!bridge.is_connected());

    let received = tokio::time::timeout(Duration::from_secs(5), session).await???;
    let command = qos0_publish(LIGHT, b"ON");

    assert!(received.windows(command.len()).any(|w| w == command));
    assert!(received.ends_with(&DISCONNECT));
    Ok(())
}

#[tokio::test]
async fn shutdown_twice_is_harmless() -> Result<(), Box<dyn Error>> {
    let (port, session) = broker().await?;
    let bridge = Bridge::new(BridgeConfig {
        host: "127.0.0.1".into(),
        port,
        ..Default::default()
    });

    bridge.connect(CancellationToken::new()).await;
    bridge.shutdown().await;
    bridge.shutdown().await;

    let received = tokio::time::timeout(Duration::from_secs(5), session).await???;
    assert!(received.ends_with(&DISCONNECT));
    Ok(())
}
