use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{arena, feeding, flies, net, size, speed, timing};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Port of the Prometheus metrics endpoint
    pub metrics_port: u16,
    /// Newline-separated list of spider names
    pub names_path: String,
    /// Outbound messages buffered per connection before it is dropped
    pub outbound_queue_capacity: usize,
    /// Path to TLS certificate file (if not using the dev certificate)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (if not using the dev certificate)
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 27278,
            metrics_port: 9090,
            names_path: "names.txt".to_string(),
            outbound_queue_capacity: net::OUTBOUND_QUEUE_CAPACITY,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse("BIND_ADDRESS") {
            config.bind_address = addr;
        }

        if let Some(port) = env_parse::<u16>("PORT") {
            if port > 0 {
                config.port = port;
            } else {
                tracing::warn!("PORT must be > 0, using default");
            }
        }

        if let Some(port) = env_parse::<u16>("METRICS_PORT") {
            config.metrics_port = port;
        }

        if let Ok(path) = std::env::var("NAMES_PATH") {
            config.names_path = path;
        }

        if let Some(capacity) = env_parse::<usize>("OUTBOUND_QUEUE_CAPACITY") {
            if capacity > 0 {
                config.outbound_queue_capacity = capacity;
            } else {
                tracing::warn!("OUTBOUND_QUEUE_CAPACITY must be > 0, using default");
            }
        }

        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }

        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be at least 1".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}

/// Simulation tuning consumed by the game core
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Side length of the wrapping arena
    pub arena_size: f32,
    /// Side length of one spatial grid cell
    pub cell_size: f32,
    /// Whether the 3x3 neighbour scan wraps across arena edges
    pub wrap_neighbors: bool,
    pub min_size: f32,
    pub max_size: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub best_move_speed: f32,
    pub worst_move_speed: f32,
    pub best_rotate_speed: f32,
    pub worst_rotate_speed: f32,
    /// Feeding time constant (seconds)
    pub eat_time: f32,
    /// Health drain time constant at MIN size (seconds)
    pub death_buffer: f32,
    /// Attack cone half-angle (radians)
    pub facing_cone: f32,
    /// "Caught from behind" cone half-angle (radians)
    pub behind_cone: f32,
    pub max_flies: usize,
    /// Seconds between fly spawns
    pub fly_spawn_interval: f32,
    pub tick_interval: Duration,
    pub ping_timeout: Duration,
    pub ping_reply_delay: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            arena_size: arena::SIZE,
            cell_size: arena::CELL_SIZE,
            wrap_neighbors: true,
            min_size: size::MIN,
            max_size: size::MAX,
            min_scale: size::MIN_SCALE,
            max_scale: size::MAX_SCALE,
            best_move_speed: speed::BEST_MOVE,
            worst_move_speed: speed::WORST_MOVE,
            best_rotate_speed: speed::BEST_ROTATE,
            worst_rotate_speed: speed::WORST_ROTATE,
            eat_time: feeding::EAT_TIME,
            death_buffer: feeding::DEATH_BUFFER,
            facing_cone: feeding::FACING_CONE,
            behind_cone: feeding::BEHIND_CONE,
            max_flies: flies::MAX_COUNT,
            fly_spawn_interval: flies::SPAWN_INTERVAL,
            tick_interval: Duration::from_millis(timing::TICK_INTERVAL_MS),
            ping_timeout: Duration::from_millis(timing::PING_TIMEOUT_MS),
            ping_reply_delay: Duration::from_millis(timing::PING_REPLY_DELAY_MS),
        }
    }
}

impl GameConfig {
    /// Load tuning overrides from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(size) = env_parse("ARENA_SIZE") {
            config.arena_size = size;
        }
        if let Some(cell) = env_parse("CELL_SIZE") {
            config.cell_size = cell;
        }
        if let Some(wrap) = env_parse("WRAP_NEIGHBORS") {
            config.wrap_neighbors = wrap;
        }
        if let Some(max_flies) = env_parse("MAX_FLIES") {
            config.max_flies = max_flies;
        }
        if let Some(interval) = env_parse("FLY_SPAWN_INTERVAL") {
            config.fly_spawn_interval = interval;
        }
        if let Some(eat_time) = env_parse("EAT_TIME") {
            config.eat_time = eat_time;
        }
        if let Some(buffer) = env_parse("DEATH_BUFFER") {
            config.death_buffer = buffer;
        }
        if let Some(ms) = env_parse("TICK_INTERVAL_MS") {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("PING_TIMEOUT_MS") {
            config.ping_timeout = Duration::from_millis(ms);
        }

        config
    }

    /// Number of grid cells along one side of the arena
    pub fn cells_per_row(&self) -> usize {
        (self.arena_size / self.cell_size).ceil() as usize
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !(self.arena_size > 0.0) || self.arena_size > u16::MAX as f32 {
            return Err("arena_size must be in (0, 65535]".to_string());
        }
        // Sent to clients as a u16
        if self.arena_size.fract() != 0.0 {
            return Err("arena_size must be a whole number".to_string());
        }
        if !(self.cell_size > 0.0) || self.cell_size > self.arena_size {
            return Err("cell_size must be in (0, arena_size]".to_string());
        }
        if self.cells_per_row() > arena::MAX_CELLS_PER_ROW {
            return Err(format!(
                "arena_size / cell_size gives more than {} cells per row",
                arena::MAX_CELLS_PER_ROW
            ));
        }
        if !(self.min_size > 0.0) || self.min_size >= self.max_size {
            return Err("min_size must be positive and below max_size".to_string());
        }
        if !(self.eat_time > 0.0) || !(self.death_buffer > 0.0) {
            return Err("eat_time and death_buffer must be positive".to_string());
        }
        if !(self.fly_spawn_interval > 0.0) {
            return Err("fly_spawn_interval must be positive".to_string());
        }
        if self.tick_interval.is_zero() {
            return Err("tick_interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Why a name list could not be used
#[derive(Debug, thiserror::Error)]
pub enum NamesError {
    #[error("failed to read names file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {0}: names must be ASCII")]
    NonAscii(usize),
    #[error("name list is empty")]
    Empty,
}

/// Parse a newline-separated name list. Blank lines are skipped and names
/// are trimmed; the result always holds at least one name.
pub fn parse_names(text: &str) -> Result<Vec<String>, NamesError> {
    let mut names = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        if !name.is_ascii() {
            return Err(NamesError::NonAscii(index + 1));
        }
        names.push(name.to_string());
    }
    if names.is_empty() {
        return Err(NamesError::Empty);
    }
    Ok(names)
}

/// Read and parse the name list at `path`
pub fn load_names(path: &str) -> Result<Vec<String>, NamesError> {
    parse_names(&std::fs::read_to_string(path)?)
}

/// Parse an environment variable, warning when it is present but malformed
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}
