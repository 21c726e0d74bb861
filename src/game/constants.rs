/// Arena geometry
pub mod arena {
    /// Side length of the square, edge-wrapping arena (world units)
    pub const SIZE: f32 = 8.0;
    /// Side length of one spatial grid cell
    pub const CELL_SIZE: f32 = 0.5;
    /// Upper bound on grid cells along one side
    pub const MAX_CELLS_PER_ROW: usize = 1024;
}

/// Size (mass) bounds and the derived physical properties
pub mod size {
    /// Size of a freshly spawned spider and the floor every entity is clamped to
    pub const MIN: f32 = 100.0;
    /// Ceiling for growth through feeding
    pub const MAX: f32 = 100_000.0;
    /// Render scale of the smallest spider
    pub const MIN_SCALE: f32 = 0.125;
    /// Render scale of the largest spider
    pub const MAX_SCALE: f32 = 1.0;
    /// Collision radius as a fraction of render scale
    pub const RADIUS_FACTOR: f32 = 0.75;
}

/// Movement speeds. "Best" applies at MIN size, "worst" at MAX size.
pub mod speed {
    /// Units per second
    pub const BEST_MOVE: f32 = 256.0;
    pub const WORST_MOVE: f32 = 24.0;
    /// Radians per second (270 degrees)
    pub const BEST_ROTATE: f32 = 4.712_389;
    /// Radians per second (30 degrees)
    pub const WORST_ROTATE: f32 = 0.523_598_8;
}

/// Feeding (combat) constants
pub mod feeding {
    use std::f32::consts::PI;

    /// Seconds for an attacker to eat its own (or the defender's, if smaller) size
    pub const EAT_TIME: f32 = 2.5;
    /// Seconds of biting at MIN size before health runs out
    pub const DEATH_BUFFER: f32 = 0.001;
    /// Half-angle of the cone an attacker must be facing its target within
    pub const FACING_CONE: f32 = PI / 3.0;
    /// Half-angle used to decide the defender is turned away from the attacker
    pub const BEHIND_CONE: f32 = PI / 2.0;
}

/// NPC fly population
pub mod flies {
    /// Population cap
    pub const MAX_COUNT: usize = 15;
    /// Seconds between spawns while below the cap
    pub const SPAWN_INTERVAL: f32 = 2.5;
}

/// Simulation timing
pub mod timing {
    /// Nominal tick interval in milliseconds (8 Hz)
    pub const TICK_INTERVAL_MS: u64 = 125;
    /// Idle time before a player connection is dropped
    pub const PING_TIMEOUT_MS: u64 = 15_000;
    /// Delay before answering a client Ping
    pub const PING_REPLY_DELAY_MS: u64 = 5_000;
}

/// Entity identifier allocation
pub mod ids {
    /// Ids are drawn from `0..ID_SPACE`
    pub const ID_SPACE: u32 = 65_535;
    /// Random draws before falling back to a deterministic scan
    pub const RANDOM_ATTEMPTS: u32 = 16;
}

/// Networking constants
pub mod net {
    /// Maximum framed message size
    pub const MAX_MESSAGE_SIZE: usize = 65536;
    /// Default capacity of each connection's outbound queue (messages)
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
    /// Longest name the wire format can carry
    pub const MAX_NAME_LEN: usize = u8::MAX as usize;
}
