//! Prometheus-compatible metrics endpoint
//!
//! Exposes arena metrics in Prometheus format, plus a JSON view.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Tick samples kept for percentiles
const TICK_HISTORY_LEN: usize = 1000;

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // Population
    pub players: AtomicU64,
    pub flies: AtomicU64,
    pub bites_total: AtomicU64,
    pub deaths_total: AtomicU64,
    pub timeouts_total: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,
    pub index_faults_total: AtomicU64,

    // Network stats
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub overflow_disconnects: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

#[derive(Debug, Serialize)]
struct JsonSnapshot {
    population: JsonPopulation,
    performance: JsonPerformance,
    network: JsonNetwork,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct JsonPopulation {
    players: u64,
    flies: u64,
    bites: u64,
    deaths: u64,
    timeouts: u64,
}

#[derive(Debug, Serialize)]
struct JsonPerformance {
    tick_time_us: u64,
    tick_time_p95_us: u64,
    tick_time_p99_us: u64,
    tick_time_max_us: u64,
    tick_count: u64,
    index_faults: u64,
}

#[derive(Debug, Serialize)]
struct JsonNetwork {
    connections: u64,
    messages_sent: u64,
    messages_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    protocol_errors: u64,
    overflow_disconnects: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            players: AtomicU64::new(0),
            flies: AtomicU64::new(0),
            bites_total: AtomicU64::new(0),
            deaths_total: AtomicU64::new(0),
            timeouts_total: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            index_faults_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            overflow_disconnects: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY_LEN)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY_LEN {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Count one outbound frame
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count one inbound buffer
    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("spider_arena_players", "Player-controlled spiders alive", "gauge",
            self.players.load(Ordering::Relaxed));
        metric!("spider_arena_flies", "NPC flies alive", "gauge",
            self.flies.load(Ordering::Relaxed));
        metric!("spider_arena_bites_total", "Bites that landed", "counter",
            self.bites_total.load(Ordering::Relaxed));
        metric!("spider_arena_deaths_total", "YouDied notifications sent", "counter",
            self.deaths_total.load(Ordering::Relaxed));
        metric!("spider_arena_timeouts_total", "Players dropped by ping timeout", "counter",
            self.timeouts_total.load(Ordering::Relaxed));

        metric!("spider_arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("spider_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("spider_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("spider_arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("spider_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("spider_arena_index_faults_total", "Entities skipped by the spatial index", "counter",
            self.index_faults_total.load(Ordering::Relaxed));

        metric!("spider_arena_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("spider_arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("spider_arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("spider_arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("spider_arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("spider_arena_protocol_errors_total", "Client buffers aborted by protocol errors", "counter",
            self.protocol_errors.load(Ordering::Relaxed));
        metric!("spider_arena_overflow_disconnects_total", "Connections dropped for a full outbound queue", "counter",
            self.overflow_disconnects.load(Ordering::Relaxed));
        metric!("spider_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let snapshot = JsonSnapshot {
            population: JsonPopulation {
                players: load(&self.players),
                flies: load(&self.flies),
                bites: load(&self.bites_total),
                deaths: load(&self.deaths_total),
                timeouts: load(&self.timeouts_total),
            },
            performance: JsonPerformance {
                tick_time_us: load(&self.tick_time_us),
                tick_time_p95_us: load(&self.tick_time_p95_us),
                tick_time_p99_us: load(&self.tick_time_p99_us),
                tick_time_max_us: load(&self.tick_time_max_us),
                tick_count: load(&self.tick_count),
                index_faults: load(&self.index_faults_total),
            },
            network: JsonNetwork {
                connections: load(&self.connections_active),
                messages_sent: load(&self.messages_sent),
                messages_received: load(&self.messages_received),
                bytes_sent: load(&self.bytes_sent),
                bytes_received: load(&self.bytes_received),
                protocol_errors: load(&self.protocol_errors),
                overflow_disconnects: load(&self.overflow_disconnects),
            },
            uptime_seconds: self.uptime_seconds(),
        };
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
                        let body = metrics.to_json();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
