//! WebTransport server implementation
//!
//! Each client opens one bidirectional stream carrying length-prefixed
//! frames. A reader task feeds frames into the shared `GameSession`; the
//! connection task drains the connection's outbound queue into the stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use wtransport::endpoint::IncomingSession;
use wtransport::{Endpoint, VarInt};

use crate::config::ServerConfig;
use crate::game::entity::ConnectionId;
use crate::net::connection::Outbound;
use crate::net::framing::{read_message, write_message, FramingError};
use crate::net::game_session::{schedule_ping_reply, GameSession};
use crate::net::tls::TlsConfig;

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    game_session: Arc<RwLock<GameSession>>,
}

impl WebTransportServer {
    /// Create a new WebTransport server
    pub async fn new(config: ServerConfig, game_session: Arc<RwLock<GameSession>>) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;
        Ok(Self {
            config,
            tls_config,
            game_session,
        })
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        &self.tls_config.cert_hash
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        let bind_addr = self.bind_addr();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_address(bind_addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;
        tracing::info!("WebTransport server listening on {}", bind_addr);

        loop {
            let incoming = server.accept().await;
            let game_session = self.game_session.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, game_session).await {
                    tracing::warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport connection
async fn handle_connection(incoming: IncomingSession, game_session: Arc<RwLock<GameSession>>) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    tracing::debug!(
        "New session from {}, path {}",
        session_request.authority(),
        session_request.path()
    );

    let connection = session_request.accept().await?;
    let (send, recv) = connection.accept_bi().await?;

    let (conn_id, outbound) = game_session.write().await.connect(Instant::now());
    tracing::info!("Connection {} opened from {}", conn_id, connection.remote_address());

    let result = serve_stream(game_session, conn_id, outbound, recv, send).await;
    connection.close(VarInt::from_u32(0), b"closed");
    result.map_err(Into::into)
}

/// Run one client stream until either side closes it.
///
/// The reader is a separate task because a partially read frame must never
/// be abandoned; it is aborted once the writer stops.
pub async fn serve_stream<R, W>(
    game_session: Arc<RwLock<GameSession>>,
    conn_id: ConnectionId,
    mut outbound: mpsc::Receiver<Outbound>,
    mut recv: R,
    mut send: W,
) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let reader_session = game_session.clone();
    let reader = tokio::spawn(async move {
        let result = read_loop(&reader_session, conn_id, &mut recv).await;
        if let Err(e) = &result {
            tracing::debug!("Connection {} read ended: {}", conn_id, e);
        }
        reader_session.write().await.disconnect(conn_id);
    });

    let mut result = Ok(());
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = write_message(&mut send, &frame).await {
                    result = Err(e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    reader.abort();
    game_session.write().await.disconnect(conn_id);
    result
}

async fn read_loop<R: AsyncRead + Unpin>(
    game_session: &RwLock<GameSession>,
    conn_id: ConnectionId,
    recv: &mut R,
) -> Result<(), FramingError> {
    loop {
        let buffer = read_message(recv).await?;
        let mut session = game_session.write().await;
        let outcome = session.handle_buffer(conn_id, &buffer, Instant::now());

        if let Some(reply) = outcome.ping_reply {
            let delay = session.game_loop().config().ping_reply_delay;
            schedule_ping_reply(reply, delay, session.metrics().clone());
        }
        if session.connections().get(conn_id).is_none() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::GameConfig;
    use crate::game::game_loop::GameLoop;
    use crate::game::world::{NameTable, World};
    use crate::metrics::Metrics;
    use crate::net::protocol::{ClientMessage, MessageType};
    use tokio::io::duplex;

    fn shared_session() -> Arc<RwLock<GameSession>> {
        let config = GameConfig {
            max_flies: 0,
            ping_reply_delay: Duration::from_millis(1),
            ..GameConfig::default()
        };
        let names: NameTable = vec!["Orb".to_string()].into();
        let world = World::with_seed(Arc::new(config), names, 3);
        let session = GameSession::from_game_loop(GameLoop::from_world(world), 16, Arc::new(Metrics::new()));
        Arc::new(RwLock::new(session))
    }

    #[tokio::test]
    async fn test_stream_spawn_and_ping() {
        let game_session = shared_session();
        let (conn_id, outbound) = game_session.write().await.connect(Instant::now());

        let (mut client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(serve_stream(
            game_session.clone(),
            conn_id,
            outbound,
            server_read,
            server_write,
        ));

        let mut buffer = ClientMessage::SpawnMe.encode();
        buffer.extend(ClientMessage::Ping.encode());
        write_message(&mut client, &buffer).await.unwrap();

        let spawn = read_message(&mut client).await.unwrap();
        assert_eq!(spawn[0], MessageType::SpawnMe as u8);
        let snapshot = read_message(&mut client).await.unwrap();
        assert_eq!(snapshot[0], MessageType::UpdateData as u8);
        let pong = read_message(&mut client).await.unwrap();
        assert_eq!(pong, vec![MessageType::Ping as u8]);

        drop(client);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .ok();
        let session = game_session.read().await;
        assert_eq!(session.connections().count(), 0);
        assert_eq!(session.game_loop().world().player_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_stream() {
        let game_session = shared_session();
        let (conn_id, outbound) = game_session.write().await.connect(Instant::now());

        let (mut client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(serve_stream(
            game_session.clone(),
            conn_id,
            outbound,
            server_read,
            server_write,
        ));

        use tokio::io::AsyncWriteExt;
        client.write_all(&(1u32 << 20).to_le_bytes()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .ok();
        assert!(game_session.read().await.connections().get(conn_id).is_none());
    }
}
