use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pq_dtls::{
    Client, ConnectionState, Context, ContextBuilder, Error, Result, SecurityLevel, Server, SessionEvent,
};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(20);

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn builder(level: SecurityLevel) -> ContextBuilder {
    ContextBuilder::new()
        .with_identity(b"test certificate".to_vec(), b"test key".to_vec())
        .with_security_level(level)
        .with_retransmit_interval(Duration::from_millis(100))
}

async fn listen(level: SecurityLevel) -> Result<Server> {
    builder(level).listen(loopback()).await
}

fn client_context(level: SecurityLevel) -> Result<Arc<Context>> {
    builder(level).as_client().build()
}

#[tokio::test]
async fn test_hybrid_ping_pong() -> Result<()> {
    let mut server = listen(SecurityLevel::Hybrid).await?;
    let addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await?;
        assert_eq!(connection.state(), ConnectionState::Connected);
        let ping = connection.recv().await?;
        assert_eq!(ping, b"ping");
        connection.send(b"pong").await?;
        Ok::<_, Error>(connection)
    });

    let mut client = timeout(DEADLINE, Client::connect(client_context(SecurityLevel::Hybrid)?, addr))
        .await
        .map_err(|_| Error::HandshakeTimeout(DEADLINE.as_millis() as u64))??;
    assert_eq!(client.epoch(), 1);
    assert_eq!(client.peer_addr(), addr);

    client.send(b"ping").await?;
    let pong = timeout(DEADLINE, client.recv()).await.map_err(|_| Error::SessionClosed)??;
    assert_eq!(pong, b"pong");

    let _server_connection = server_task.await.map_err(|e| Error::Internal(e.to_string()))??;
    client.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_large_message_is_fragmented_and_reassembled() -> Result<()> {
    let mut server = builder(SecurityLevel::Standard).with_mtu(600).listen(loopback()).await?;
    let addr = server.local_addr();
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await?;
        let received = connection.recv().await?;
        Ok::<_, Error>(received)
    });

    let client = builder(SecurityLevel::Standard).with_mtu(600).connect(addr).await?;
    client.send(&payload).await?;

    let received = timeout(DEADLINE, server_task)
        .await
        .map_err(|_| Error::SessionClosed)?
        .map_err(|e| Error::Internal(e.to_string()))??;
    assert_eq!(received, expected);
    Ok(())
}

#[tokio::test]
async fn test_rekey_converges() -> Result<()> {
    let mut server = listen(SecurityLevel::Hybrid).await?;
    let addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await?;
        let mut rekeyed = None;
        loop {
            match connection.next_event().await {
                Some(SessionEvent::Rekeyed(epoch)) => rekeyed = Some(epoch),
                Some(SessionEvent::Data(data)) => {
                    connection.send(&data).await?;
                    break;
                }
                Some(_) => {}
                None => return Err(Error::SessionClosed),
            }
        }
        Ok::<_, Error>((connection, rekeyed))
    });

    let mut client = Client::connect(client_context(SecurityLevel::Hybrid)?, addr).await?;
    client.rekey().await?;
    assert_eq!(client.epoch(), 2);

    client.send(b"after rekey").await?;
    let echoed = timeout(DEADLINE, client.recv()).await.map_err(|_| Error::SessionClosed)??;
    assert_eq!(echoed, b"after rekey");

    let (server_connection, rekeyed) = server_task.await.map_err(|e| Error::Internal(e.to_string()))??;
    assert_eq!(rekeyed, Some(2));
    assert_eq!(server_connection.epoch(), 2);
    Ok(())
}

#[tokio::test]
async fn test_close_is_seen_by_peer() -> Result<()> {
    let mut server = listen(SecurityLevel::Standard).await?;
    let addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await?;
        let result = connection.recv().await;
        Ok::<_, Error>(result)
    });

    let mut client = Client::connect(client_context(SecurityLevel::Standard)?, addr).await?;
    client.close().await?;
    client.close().await?;
    assert!(matches!(client.send(b"late").await, Err(Error::SessionClosed)));

    let result = timeout(DEADLINE, server_task)
        .await
        .map_err(|_| Error::SessionClosed)?
        .map_err(|e| Error::Internal(e.to_string()))??;
    assert!(matches!(result, Err(Error::SessionClosed)));
    Ok(())
}

#[tokio::test]
async fn test_server_handles_several_clients() -> Result<()> {
    let mut server = listen(SecurityLevel::Standard).await?;
    let addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        let mut accepted = 0;
        for _ in 0..3 {
            let mut connection = server.accept().await?;
            tokio::spawn(async move {
                while let Ok(data) = connection.recv().await {
                    if connection.send(&data).await.is_err() {
                        break;
                    }
                }
            });
            accepted += 1;
        }
        Ok::<_, Error>(accepted)
    });

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::connect(client_context(SecurityLevel::Standard)?, addr).await?);
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let message = format!("client {}", i);
        client.send(message.as_bytes()).await?;
        let echoed = timeout(DEADLINE, client.recv()).await.map_err(|_| Error::SessionClosed)??;
        assert_eq!(echoed, message.as_bytes());
    }

    let accepted = server_task.await.map_err(|e| Error::Internal(e.to_string()))??;
    assert_eq!(accepted, 3);
    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout_against_silent_peer() -> Result<()> {
    // Bound but never answers
    let silent = UdpSocket::bind(loopback()).await?;
    let addr = silent.local_addr()?;

    let context = builder(SecurityLevel::Standard)
        .with_handshake_timeout(Duration::from_millis(400))
        .with_retransmit_interval(Duration::from_millis(50))
        .as_client()
        .build()?;

    let result = timeout(DEADLINE, Client::connect(context, addr))
        .await
        .map_err(|_| Error::Internal("connect never resolved".into()))?;
    assert!(matches!(result, Err(Error::HandshakeTimeout(400))));
    Ok(())
}

#[tokio::test]
async fn test_mismatched_suites_fail_handshake() -> Result<()> {
    let server = builder(SecurityLevel::PostQuantumHigh).listen(loopback()).await?;
    let addr = server.local_addr();

    let context = builder(SecurityLevel::Standard)
        .with_handshake_timeout(Duration::from_secs(5))
        .as_client()
        .build()?;

    let result = timeout(DEADLINE, Client::connect(context, addr))
        .await
        .map_err(|_| Error::Internal("connect never resolved".into()))?;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_roles_are_checked() -> Result<()> {
    let server_context = builder(SecurityLevel::Standard).as_server().build()?;
    let result = Client::connect(server_context, SocketAddr::from(([127, 0, 0, 1], 9))).await;
    assert!(matches!(result, Err(Error::Config(_))));

    let client_context = client_context(SecurityLevel::Standard)?;
    let result = Server::listen(client_context, loopback()).await;
    assert!(matches!(result, Err(Error::Config(_))));
    Ok(())
}
