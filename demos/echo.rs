/*!
Echo server and client over loopback.

This example demonstrates how to:
1. Bind a PQ-DTLS server with a hybrid Kyber768 + X25519 suite
2. Connect a client and complete the handshake
3. Exchange a few messages, rekey once and close

Run with `RUST_LOG=pq_dtls=debug cargo run --example echo` to watch the
handshake and record layer.
*/

use std::net::SocketAddr;

use pq_dtls::{ContextBuilder, Error, Result, SecurityLevel, SessionEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind: SocketAddr = "127.0.0.1:0"
        .parse()
        .map_err(|_| Error::Config("invalid bind address".into()))?;

    let mut server = ContextBuilder::new()
        .with_identity(b"echo server certificate".to_vec(), b"echo server key".to_vec())
        .with_security_level(SecurityLevel::Hybrid)
        .listen(bind)
        .await?;
    let server_addr = server.local_addr();

    // Echo every message back until the peer goes away
    let echo = tokio::spawn(async move {
        let mut connection = server.accept().await?;
        info!(peer = %connection.peer_addr(), "accepted");
        while let Some(event) = connection.next_event().await {
            match event {
                SessionEvent::Data(data) => connection.send(&data).await?,
                SessionEvent::Rekeyed(epoch) => info!(epoch, "server followed rekey"),
                SessionEvent::Error(kind) => warn!(%kind, "server session failed"),
                SessionEvent::Closed => break,
                SessionEvent::Connected => {}
            }
        }
        Ok::<_, Error>(())
    });

    let mut client = ContextBuilder::new()
        .with_identity(b"echo client certificate".to_vec(), b"echo client key".to_vec())
        .with_security_level(SecurityLevel::Hybrid)
        .connect(server_addr)
        .await?;
    info!(epoch = client.epoch(), "handshake complete");

    for message in ["hello", "post-quantum", "datagrams"] {
        client.send(message.as_bytes()).await?;
        let reply = client.recv().await?;
        println!("echo: {}", String::from_utf8_lossy(&reply));
    }

    client.rekey().await?;
    info!(epoch = client.epoch(), "client rekeyed");

    // Larger than one datagram, so it is fragmented and reassembled
    let large = vec![0x5a; 16 * 1024];
    client.send(&large).await?;
    let reply = client.recv().await?;
    println!("echo: {} bytes, intact: {}", reply.len(), reply == large);

    client.close().await?;
    match echo.await {
        Ok(result) => result?,
        Err(err) => warn!(error = %err, "echo task failed"),
    }
    Ok(())
}
