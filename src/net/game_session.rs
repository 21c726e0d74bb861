//! Game session manager - owns the simulation and every connection, applies
//! client commands and fans tick output out to players.
//!
//! All mutation goes through one `GameSession` behind a tokio `RwLock`, so
//! message handling and ticks never interleave mid-operation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::game::entity::ConnectionId;
use crate::game::game_loop::{GameLoop, TickReport};
use crate::game::world::NameTable;
use crate::metrics::Metrics;
use crate::net::connection::{ConnectionManager, Outbound, PendingPing, SendError};
use crate::net::protocol::{
    decode_messages, encode_name, encode_ping, encode_spawn, encode_you_died, ClientMessage,
    ProtocolError,
};

/// Seconds between periodic status lines
const STATUS_LOG_INTERVAL_SECS: u64 = 30;

/// Result of handling one inbound buffer
#[derive(Debug, Default)]
pub struct BufferOutcome {
    /// Commands applied before decoding stopped
    pub applied: usize,
    /// Pings seen in the buffer
    pub pings: usize,
    /// Reply to schedule; repeated Pings share it, and none is handed out
    /// while an earlier reply is still pending
    pub ping_reply: Option<PendingPing>,
    /// The error that aborted the rest of the buffer
    pub error: Option<ProtocolError>,
}

/// Shared game session that manages the simulation and player connections
pub struct GameSession {
    game_loop: GameLoop,
    connections: ConnectionManager,
    metrics: Arc<Metrics>,
    /// Connections whose queue rejected a frame since the last sweep
    failed_sends: Vec<(ConnectionId, SendError)>,
}

impl GameSession {
    pub fn new(config: GameConfig, names: NameTable, queue_capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self::from_game_loop(GameLoop::new(config, names), queue_capacity, metrics)
    }

    pub fn from_game_loop(game_loop: GameLoop, queue_capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            game_loop,
            connections: ConnectionManager::new(queue_capacity),
            metrics,
            failed_sends: Vec::new(),
        }
    }

    #[inline]
    pub fn game_loop(&self) -> &GameLoop {
        &self.game_loop
    }

    #[inline]
    pub fn game_loop_mut(&mut self) -> &mut GameLoop {
        &mut self.game_loop
    }

    #[inline]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Register a freshly accepted connection
    pub fn connect(&mut self, now: Instant) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (id, rx) = self.connections.create(now);
        self.metrics
            .connections_active
            .store(self.connections.count() as u64, Ordering::Relaxed);
        debug!("Connection {} registered", id);
        (id, rx)
    }

    /// Drop a connection and the spider it controls. Safe to call twice.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        let Some(mut conn) = self.connections.remove(connection) else {
            return;
        };
        if let Some(entity) = conn.detach() {
            self.game_loop.world_mut().remove(entity);
        }
        info!(
            "Connection {} closed after {:.1}s ({} bytes in, {} bytes out)",
            connection,
            conn.created_at.elapsed().as_secs_f32(),
            conn.bytes_received,
            conn.bytes_sent
        );
        self.update_gauges();
    }

    /// Decode and apply every command in one client buffer.
    ///
    /// A protocol error stops the buffer; commands before it stay applied.
    pub fn handle_buffer(&mut self, connection: ConnectionId, buffer: &[u8], now: Instant) -> BufferOutcome {
        let mut outcome = BufferOutcome::default();
        let Some(conn) = self.connections.get_mut(connection) else {
            return outcome;
        };
        conn.record_received(buffer.len(), now);
        if let Some(entity) = conn.entity {
            self.game_loop.world_mut().touch(entity, now);
        }
        self.metrics.record_received(buffer.len());

        for message in decode_messages(buffer) {
            let result = message.and_then(|message| self.apply(connection, message, now, &mut outcome));
            if let Err(e) = result {
                warn!("Connection {}: {}; dropping rest of buffer", connection, e);
                self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                outcome.error = Some(e);
                break;
            }
            outcome.applied += 1;
        }

        if outcome.pings > 0 {
            outcome.ping_reply = self.connections.get(connection).and_then(|c| c.claim_ping_reply());
        }
        self.sweep_failed_sends();
        outcome
    }

    fn apply(
        &mut self,
        connection: ConnectionId,
        message: ClientMessage,
        now: Instant,
        outcome: &mut BufferOutcome,
    ) -> Result<(), ProtocolError> {
        let owned = self.connections.get(connection).and_then(|c| c.entity);
        if let Some(claimed) = message.claimed_id() {
            if owned != Some(claimed) || !self.game_loop.world().contains(claimed) {
                return Err(ProtocolError::KeyMismatch { claimed, owned });
            }
        }

        let config = Arc::clone(self.game_loop.world().config());
        let world = self.game_loop.world_mut();
        match message {
            ClientMessage::SpawnMe => self.spawn(connection, now),
            ClientMessage::UpdateData { id, x, y, angle } => {
                if let Some(spider) = world.get_mut(id) {
                    spider.apply_client_hint(x, y, angle, &config);
                }
            }
            ClientMessage::SetMoving { id, moving } => {
                if let Some(spider) = world.get_mut(id) {
                    spider.moving = moving;
                    spider.dirty = true;
                }
            }
            ClientMessage::SetRotation { id, rotation } => {
                if let Some(spider) = world.get_mut(id) {
                    spider.rotation = rotation;
                    spider.dirty = true;
                }
            }
            ClientMessage::Ping => outcome.pings += 1,
            ClientMessage::NameRequest { id } => match world.get(id) {
                Some(spider) => {
                    let reply = encode_name(id, &spider.name);
                    self.send_to(connection, reply.into());
                }
                None => debug!("Connection {} asked for unknown spider {}", connection, id),
            },
        }
        Ok(())
    }

    /// Create a spider for the connection, replacing one it already owns
    fn spawn(&mut self, connection: ConnectionId, now: Instant) {
        let previous = self.connections.get_mut(connection).and_then(|c| c.detach());
        if let Some(old) = previous {
            debug!("Connection {} respawning, dropping spider {}", connection, old);
            self.game_loop.world_mut().remove(old);
        }

        let id = match self.game_loop.world_mut().add_player(connection, now) {
            Ok(id) => id,
            Err(e) => {
                warn!("Connection {} could not spawn: {}", connection, e);
                return;
            }
        };
        if let Some(conn) = self.connections.get_mut(connection) {
            conn.attach(id);
        }

        let arena_size = self.game_loop.config().arena_size as u16;
        if let Some(spider) = self.game_loop.world().get(id) {
            info!("Connection {} spawned spider {} '{}'", connection, id, spider.name);
            let spawn = encode_spawn(arena_size, spider);
            self.send_to(connection, spawn.into());
        }
        if let Some(snapshot) = self.game_loop.full_snapshot() {
            self.send_to(connection, snapshot.into());
        }
        self.update_gauges();
    }

    /// Queue a frame for one connection, remembering failures for the sweep
    fn send_to(&mut self, connection: ConnectionId, frame: Arc<[u8]>) {
        let Some(conn) = self.connections.get_mut(connection) else {
            return;
        };
        let len = frame.len();
        match conn.send(frame) {
            Ok(()) => self.metrics.record_sent(len),
            Err(e) => self.failed_sends.push((connection, e)),
        }
    }

    /// Disconnect every connection whose queue overflowed or closed
    fn sweep_failed_sends(&mut self) {
        for (connection, reason) in std::mem::take(&mut self.failed_sends) {
            if self.connections.get(connection).is_none() {
                continue;
            }
            if reason == SendError::Overflow {
                warn!("Connection {} fell behind; disconnecting", connection);
                self.metrics.overflow_disconnects.fetch_add(1, Ordering::Relaxed);
            }
            self.disconnect(connection);
        }
    }

    /// Run one simulation step and deliver its output
    pub fn tick(&mut self, dt: f32, now: Instant) -> TickReport {
        let started = Instant::now();
        let mut report = self.game_loop.tick(dt, now);

        for &connection in &report.died {
            if let Some(conn) = self.connections.get_mut(connection) {
                conn.detach();
            }
            self.send_to(connection, encode_you_died().into());
            self.metrics.deaths_total.fetch_add(1, Ordering::Relaxed);
        }

        for &connection in &report.timed_out {
            if let Some(mut conn) = self.connections.remove(connection) {
                conn.detach();
                conn.request_close();
            }
            self.metrics.timeouts_total.fetch_add(1, Ordering::Relaxed);
        }

        // Connections without a live spider time out here
        let timeout = self.game_loop.config().ping_timeout;
        for connection in self.connections.idle_ids(now, timeout) {
            info!("Connection {} timed out", connection);
            if let Some(conn) = self.connections.get_mut(connection) {
                conn.request_close();
            }
            self.disconnect(connection);
            self.metrics.timeouts_total.fetch_add(1, Ordering::Relaxed);
            report.timed_out.push(connection);
        }

        if let Some(update) = &report.update {
            let frame: Arc<[u8]> = Arc::from(update.as_slice());
            for conn in self.connections.playing_mut() {
                match conn.send(frame.clone()) {
                    Ok(()) => self.metrics.record_sent(frame.len()),
                    Err(e) => self.failed_sends.push((conn.id, e)),
                }
            }
        }
        self.sweep_failed_sends();

        self.metrics.bites_total.fetch_add(report.bites as u64, Ordering::Relaxed);
        self.metrics
            .index_faults_total
            .fetch_add(report.index_faults as u64, Ordering::Relaxed);
        self.update_gauges();
        self.metrics.record_tick_time(started.elapsed());
        report
    }

    fn update_gauges(&self) {
        let world = self.game_loop.world();
        self.metrics.players.store(world.player_count() as u64, Ordering::Relaxed);
        self.metrics.flies.store(world.fly_count() as u64, Ordering::Relaxed);
        self.metrics
            .connections_active
            .store(self.connections.count() as u64, Ordering::Relaxed);
    }
}

/// Answer a client Ping after `delay`, unless the connection is gone by then
pub fn schedule_ping_reply(reply: PendingPing, delay: Duration, metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if reply.deliver(Arc::from(encode_ping())) {
            metrics.record_sent(1);
        }
    });
}

/// Start the game loop background task
pub fn start_game_loop(session: Arc<RwLock<GameSession>>, tick_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Game loop started, one tick every {:?}", tick_interval);
        let start = Instant::now();
        let mut last_tick = start;
        let mut last_status = start;

        loop {
            ticker.tick().await;
            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f32();
            last_tick = now;

            let mut session = session.write().await;
            session.tick(dt, now);

            if now.duration_since(last_status).as_secs() >= STATUS_LOG_INTERVAL_SECS {
                last_status = now;
                let world = session.game_loop().world();
                let metrics = session.metrics();
                let grid = world.grid().stats();
                info!(
                    "Arena: {}s, tick {}, {} players, {} flies, {} connections | tick p95 {}us | grid {} cells used, max {} per cell",
                    start.elapsed().as_secs(),
                    session.game_loop().tick_count(),
                    world.player_count(),
                    world.fly_count(),
                    session.connections().count(),
                    metrics.tick_time_p95_us.load(Ordering::Relaxed),
                    grid.non_empty_cells,
                    grid.max_per_cell,
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityId, Rotation};
    use crate::game::world::World;
    use crate::net::protocol::{decode_update, MessageType};
    use crate::util::vec2::Vec2;

    const DT: f32 = 0.125;

    fn session(queue_capacity: usize) -> GameSession {
        let config = GameConfig {
            max_flies: 0,
            ..GameConfig::default()
        };
        let names: NameTable = vec!["Weaver".to_string()].into();
        let world = World::with_seed(Arc::new(config), names, 21);
        GameSession::from_game_loop(GameLoop::from_world(world), queue_capacity, Arc::new(Metrics::new()))
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn frames(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Vec<u8>> {
        drain(rx)
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Frame(bytes) => Some(bytes.to_vec()),
                Outbound::Close => None,
            })
            .collect()
    }

    fn spawn_player(
        session: &mut GameSession,
        now: Instant,
    ) -> (ConnectionId, mpsc::Receiver<Outbound>, EntityId) {
        let (conn, mut rx) = session.connect(now);
        let outcome = session.handle_buffer(conn, &ClientMessage::SpawnMe.encode(), now);
        assert!(outcome.error.is_none());
        let entity = session.connections().get(conn).unwrap().entity.unwrap();
        frames(&mut rx);
        (conn, rx, entity)
    }

    fn place(session: &mut GameSession, id: EntityId, x: f32, y: f32) {
        let spider = session.game_loop_mut().world_mut().get_mut(id).unwrap();
        spider.position = Vec2::new(x, y);
    }

    #[tokio::test]
    async fn test_spawn_sends_spawn_then_snapshot() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, mut rx) = session.connect(now);

        session.handle_buffer(conn, &ClientMessage::SpawnMe.encode(), now);

        let frames = frames(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0], MessageType::SpawnMe as u8);
        assert_eq!(frames[0].len(), 18 + "Weaver".len());
        assert_eq!(&frames[0][1..3], &8u16.to_le_bytes());

        let entity = session.connections().get(conn).unwrap().entity.unwrap();
        assert_eq!(&frames[0][3..5], &entity.to_le_bytes());
        let snapshot = decode_update(&frames[1]).unwrap();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].id, entity);
    }

    #[tokio::test]
    async fn test_commands_apply_to_own_spider() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, _rx, id) = spawn_player(&mut session, now);

        let mut buffer = ClientMessage::SetMoving { id, moving: true }.encode();
        buffer.extend(ClientMessage::SetRotation { id, rotation: Rotation::Left }.encode());
        buffer.extend(ClientMessage::UpdateData { id, x: 9.0, y: 1.0, angle: 0.5 }.encode());
        let outcome = session.handle_buffer(conn, &buffer, now);

        assert_eq!(outcome.applied, 3);
        let spider = session.game_loop().world().get(id).unwrap();
        assert!(spider.moving);
        assert_eq!(spider.rotation, Rotation::Left);
        assert!((spider.position.x - 1.0).abs() < 1e-5);
        assert!((spider.angle - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_key_mismatch_aborts_buffer() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, _rx, id) = spawn_player(&mut session, now);
        let wrong = id.wrapping_add(1);

        let mut buffer = ClientMessage::SetMoving { id: wrong, moving: true }.encode();
        buffer.extend(ClientMessage::SetMoving { id, moving: true }.encode());
        let outcome = session.handle_buffer(conn, &buffer, now);

        assert_eq!(
            outcome.error,
            Some(ProtocolError::KeyMismatch {
                claimed: wrong,
                owned: Some(id)
            })
        );
        assert_eq!(outcome.applied, 0);
        assert!(!session.game_loop().world().get(id).unwrap().moving);
        assert_eq!(session.metrics().protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_keeps_earlier_commands() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, _rx, id) = spawn_player(&mut session, now);

        let mut buffer = ClientMessage::SetMoving { id, moving: true }.encode();
        buffer.push(0);
        buffer.extend(ClientMessage::SetRotation { id, rotation: Rotation::Right }.encode());
        let outcome = session.handle_buffer(conn, &buffer, now);

        assert_eq!(outcome.error, Some(ProtocolError::UnknownMessageType(0)));
        let spider = session.game_loop().world().get(id).unwrap();
        assert!(spider.moving);
        assert_eq!(spider.rotation, Rotation::None);
        assert!(session.connections().get(conn).is_some());
    }

    #[tokio::test]
    async fn test_commands_before_spawn_rejected() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, _rx) = session.connect(now);

        let outcome = session.handle_buffer(conn, &ClientMessage::SetMoving { id: 5, moving: true }.encode(), now);
        assert_eq!(
            outcome.error,
            Some(ProtocolError::KeyMismatch { claimed: 5, owned: None })
        );
    }

    #[tokio::test]
    async fn test_name_request() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, mut rx, id) = spawn_player(&mut session, now);
        let unknown = id.wrapping_add(1);

        let mut buffer = ClientMessage::NameRequest { id: unknown }.encode();
        buffer.extend(ClientMessage::NameRequest { id }.encode());
        let outcome = session.handle_buffer(conn, &buffer, now);

        assert!(outcome.error.is_none());
        assert_eq!(outcome.applied, 2);
        let frames = frames(&mut rx);
        assert_eq!(frames, vec![encode_name(id, "Weaver")]);
    }

    #[tokio::test]
    async fn test_ping_requests_reply() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, mut rx) = session.connect(now);

        let mut buffer = ClientMessage::Ping.encode();
        buffer.extend(ClientMessage::Ping.encode());
        let outcome = session.handle_buffer(conn, &buffer, now);

        assert_eq!(outcome.pings, 2);
        let reply = outcome.ping_reply.unwrap();
        assert!(frames(&mut rx).is_empty());

        schedule_ping_reply(reply, Duration::from_millis(5), session.metrics().clone());
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(Outbound::Frame(bytes))) => assert_eq!(&bytes[..], &[201]),
            other => panic!("expected ping reply, got {:?}", other),
        }
        assert!(frames(&mut rx).is_empty());

        let outcome = session.handle_buffer(conn, &ClientMessage::Ping.encode(), now);
        assert!(outcome.ping_reply.is_some());
    }

    #[tokio::test]
    async fn test_ping_flood_gets_one_reply() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, _rx) = session.connect(now);

        let flood = vec![MessageType::Ping as u8; 60_000];
        let outcome = session.handle_buffer(conn, &flood, now);
        assert_eq!(outcome.pings, 60_000);
        assert!(outcome.ping_reply.is_some());

        // Still pending: later buffers do not schedule more replies
        let outcome = session.handle_buffer(conn, &flood, now);
        assert_eq!(outcome.pings, 60_000);
        assert!(outcome.ping_reply.is_none());
    }

    #[tokio::test]
    async fn test_respawn_replaces_spider() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, mut rx, first) = spawn_player(&mut session, now);

        session.handle_buffer(conn, &ClientMessage::SpawnMe.encode(), now);
        let second = session.connections().get(conn).unwrap().entity.unwrap();
        assert_ne!(first, second);
        assert!(!session.game_loop().world().contains(first));
        assert_eq!(session.game_loop().world().player_count(), 1);
        frames(&mut rx);

        session.tick(DT, now);
        let update = decode_update(&frames(&mut rx)[0]).unwrap();
        assert_eq!(update.removed, vec![first]);
    }

    #[tokio::test]
    async fn test_tick_broadcasts_to_players_only() {
        let mut session = session(16);
        let now = Instant::now();
        let (_a, mut rx_a, _) = spawn_player(&mut session, now);
        let (_b, mut rx_b) = session.connect(now);

        session.tick(DT, now);

        assert_eq!(frames(&mut rx_a).len(), 1);
        assert!(frames(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_death_sends_you_died_and_unlinks() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, mut rx, id) = spawn_player(&mut session, now);
        session.game_loop_mut().world_mut().get_mut(id).unwrap().health = 0.0;

        let report = session.tick(DT, now);

        assert_eq!(report.died, vec![conn]);
        assert_eq!(frames(&mut rx), vec![encode_you_died()]);
        assert_eq!(session.connections().get(conn).unwrap().entity, None);

        let outcome = session.handle_buffer(conn, &ClientMessage::SetMoving { id, moving: true }.encode(), now);
        assert!(matches!(outcome.error, Some(ProtocolError::KeyMismatch { .. })));

        let outcome = session.handle_buffer(conn, &ClientMessage::SpawnMe.encode(), now);
        assert!(outcome.error.is_none());
        assert!(session.connections().get(conn).unwrap().entity.is_some());
    }

    #[tokio::test]
    async fn test_ping_timeout_closes_connection() {
        let mut session = session(16);
        let start = Instant::now();
        let (conn, mut rx, id) = spawn_player(&mut session, start);

        let report = session.tick(DT, start + Duration::from_secs(16));

        assert_eq!(report.timed_out, vec![conn]);
        assert!(session.connections().get(conn).is_none());
        assert!(!session.game_loop().world().contains(id));
        assert!(matches!(drain(&mut rx).last(), Some(Outbound::Close)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_activity_defers_timeout() {
        let mut session = session(16);
        let start = Instant::now();
        let (conn, _rx, _id) = spawn_player(&mut session, start);

        let later = start + Duration::from_secs(10);
        session.handle_buffer(conn, &ClientMessage::Ping.encode(), later);
        let report = session.tick(DT, start + Duration::from_secs(20));

        assert!(report.timed_out.is_empty());
        assert!(session.connections().get(conn).is_some());
    }

    #[tokio::test]
    async fn test_idle_connection_without_spider_times_out() {
        let mut session = session(16);
        let start = Instant::now();
        let (idle, mut rx_idle) = session.connect(start);
        let (player_conn, _rx, _) = spawn_player(&mut session, start);

        // The player keeps talking; the other connection never spawned
        let later = start + Duration::from_secs(3600);
        session.handle_buffer(player_conn, &ClientMessage::Ping.encode(), later);
        let report = session.tick(DT, later);

        assert_eq!(report.timed_out, vec![idle]);
        assert!(session.connections().get(idle).is_none());
        assert!(session.connections().get(player_conn).is_some());
        assert!(matches!(drain(&mut rx_idle).last(), Some(Outbound::Close)));
        assert_eq!(session.metrics().timeouts_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_dead_player_connection_times_out() {
        let mut session = session(16);
        let start = Instant::now();
        let (conn, _rx, id) = spawn_player(&mut session, start);
        session.game_loop_mut().world_mut().get_mut(id).unwrap().health = 0.0;
        session.tick(DT, start);
        assert!(session.connections().get(conn).is_some());

        let report = session.tick(DT, start + Duration::from_secs(16));
        assert_eq!(report.timed_out, vec![conn]);
        assert_eq!(session.connections().count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_disconnects() {
        let mut session = session(2);
        let now = Instant::now();
        let (conn, _rx) = session.connect(now);

        // Spawn and snapshot fill the queue; the name reply overflows it
        session.handle_buffer(conn, &ClientMessage::SpawnMe.encode(), now);
        let id = session.connections().get(conn).unwrap().entity.unwrap();
        session.handle_buffer(conn, &ClientMessage::NameRequest { id }.encode(), now);

        assert!(session.connections().get(conn).is_none());
        assert!(!session.game_loop().world().contains(id));
        assert_eq!(session.metrics().overflow_disconnects.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_spider() {
        let mut session = session(16);
        let now = Instant::now();
        let (conn, _rx, id) = spawn_player(&mut session, now);
        let (_other, mut rx_other, other_id) = spawn_player(&mut session, now);
        place(&mut session, id, 1.0, 1.0);
        place(&mut session, other_id, 5.0, 5.0);
        session.tick(DT, now);
        frames(&mut rx_other);

        session.disconnect(conn);
        session.disconnect(conn);

        assert!(!session.game_loop().world().contains(id));
        assert_eq!(session.connections().count(), 1);
        session.tick(DT, now);
        let update = decode_update(&frames(&mut rx_other)[0]).unwrap();
        assert_eq!(update.removed, vec![id]);
    }

    #[tokio::test]
    async fn test_game_loop_task_ticks() {
        let session = Arc::new(RwLock::new(session(16)));
        let handle = start_game_loop(session.clone(), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        let ticks = session.read().await.game_loop().tick_count();
        assert!(ticks >= 2, "only {} ticks", ticks);
    }
}
