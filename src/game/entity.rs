//! Spider entities: player-controlled spiders and NPC flies
//!
//! Both share one representation; `EntityKind` tells them apart and carries
//! the connection link that only players have. Physical properties (radius,
//! speeds) are pure functions of size, trading agility for bulk.

use std::f32::consts::TAU;
use std::time::Instant;

use rand::Rng;

use crate::config::GameConfig;
use crate::util::torus::{angle_between, normalize_angle, shortest_delta, wrap_position};
use crate::util::vec2::Vec2;

/// Entity identifier, unique among live entities
pub type EntityId = u16;

/// Transport-assigned connection identifier
pub type ConnectionId = u64;

/// Discrete animation state reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpiderState {
    Idle = 0,
    Moving = 1,
    Biting = 2,
    Fly = 66,
}

impl SpiderState {
    #[inline]
    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

/// Rotation intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    Left,
    #[default]
    None,
    Right,
}

impl Rotation {
    /// Signed wire byte: left is +1, right is -1
    pub fn wire_value(self) -> i8 {
        match self {
            Rotation::Left => 1,
            Rotation::None => 0,
            Rotation::Right => -1,
        }
    }

    /// Sign applied to the angle; turning left increases it
    #[inline]
    fn direction(self) -> f32 {
        self.wire_value() as f32
    }
}

/// Player-or-fly discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player {
        connection: ConnectionId,
        /// Last inbound activity on the owning connection
        last_seen: Instant,
    },
    Fly,
}

/// One simulated actor
#[derive(Debug, Clone)]
pub struct Spider {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub position: Vec2,
    /// Heading in radians, `[0, 2π)`
    pub angle: f32,
    pub size: f32,
    /// `[0, 1]`; the spider is dead at 0
    pub health: f32,
    pub kills: u16,
    pub moving: bool,
    pub rotation: Rotation,
    pub state: SpiderState,
    /// State included in the last broadcast, for edge-triggered dirtiness
    pub last_state: SpiderState,
    /// Spatial grid bucket the spider is currently filed under
    pub current_cell: Option<usize>,
    /// Needs to go out in the next delta
    pub dirty: bool,
}

impl Spider {
    /// Create a spider at a random position and heading with MIN size
    pub fn spawn<R: Rng>(
        id: EntityId,
        name: String,
        kind: EntityKind,
        config: &GameConfig,
        rng: &mut R,
    ) -> Self {
        let position = Vec2::new(
            rng.gen_range(0.0..config.arena_size),
            rng.gen_range(0.0..config.arena_size),
        );
        let state = match kind {
            EntityKind::Player { .. } => SpiderState::Idle,
            EntityKind::Fly => SpiderState::Fly,
        };
        Self {
            id,
            name,
            kind,
            position,
            angle: rng.gen_range(0.0..TAU),
            size: config.min_size,
            health: 1.0,
            kills: 0,
            moving: false,
            rotation: Rotation::None,
            state,
            last_state: state,
            current_cell: None,
            dirty: true,
        }
    }

    #[inline]
    pub fn is_fly(&self) -> bool {
        matches!(self.kind, EntityKind::Fly)
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.health <= 0.0
    }

    /// Owning connection, players only
    pub fn connection(&self) -> Option<ConnectionId> {
        match self.kind {
            EntityKind::Player { connection, .. } => Some(connection),
            EntityKind::Fly => None,
        }
    }

    /// State byte for the wire; flies always report `Fly`
    pub fn wire_state(&self) -> u8 {
        if self.is_fly() {
            SpiderState::Fly.wire_value()
        } else {
            self.state.wire_value()
        }
    }

    /// Growth progress in `[0, 1]`, square-root shaped
    pub fn ratio(&self, config: &GameConfig) -> f32 {
        let span = config.max_size - config.min_size;
        ((self.size - config.min_size) / span).clamp(0.0, 1.0).sqrt()
    }

    pub fn radius(&self, config: &GameConfig) -> f32 {
        let scale = config.min_scale + (config.max_scale - config.min_scale) * self.ratio(config);
        scale * crate::game::constants::size::RADIUS_FACTOR
    }

    pub fn move_speed(&self, config: &GameConfig) -> f32 {
        config.best_move_speed
            + (config.worst_move_speed - config.best_move_speed) * self.ratio(config)
    }

    pub fn rotate_speed(&self, config: &GameConfig) -> f32 {
        config.best_rotate_speed
            + (config.worst_rotate_speed - config.best_rotate_speed) * self.ratio(config)
    }

    /// Advance rotation and movement intents by `dt` seconds.
    ///
    /// Returns whether anything changed. Dead spiders do not move.
    pub fn integrate(&mut self, dt: f32, config: &GameConfig) -> bool {
        if self.is_dead() {
            return false;
        }
        self.state = SpiderState::Idle;
        let mut changed = false;

        if self.rotation != Rotation::None {
            let turn = self.rotate_speed(config) * dt * self.rotation.direction();
            self.angle = normalize_angle(self.angle + turn);
            self.dirty = true;
            self.state = SpiderState::Moving;
            changed = true;
        }

        if self.moving {
            let step = Vec2::from_angle(self.angle) * (self.move_speed(config) * dt);
            self.position = wrap_position(self.position + step, config.arena_size);
            self.dirty = true;
            self.state = SpiderState::Moving;
            changed = true;
        }

        changed
    }

    /// Displacement from this spider to `other`, across arena edges when the
    /// neighbour scan wraps
    pub fn offset_to(&self, other: &Spider, config: &GameConfig) -> Vec2 {
        if config.wrap_neighbors {
            shortest_delta(self.position, other.position, config.arena_size)
        } else {
            other.position - self.position
        }
    }

    /// Bearing from this spider to `other` in radians
    pub fn bearing_to(&self, other: &Spider, config: &GameConfig) -> f32 {
        normalize_angle(self.offset_to(other, config).angle())
    }

    /// Whether `other` lies within this spider's attack cone
    pub fn is_facing(&self, other: &Spider, config: &GameConfig) -> bool {
        angle_between(self.bearing_to(other, config), self.angle) < config.facing_cone
    }

    /// Apply a client-reported position and heading
    pub fn apply_client_hint(&mut self, x: f32, y: f32, angle: f32, config: &GameConfig) {
        self.position = wrap_position(Vec2::new(x, y), config.arena_size);
        self.angle = normalize_angle(angle);
        self.dirty = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::f32::consts::PI;

    pub(crate) fn player_at(id: EntityId, x: f32, y: f32, angle: f32) -> Spider {
        let config = GameConfig::default();
        let mut spider = Spider::spawn(
            id,
            format!("spider-{}", id),
            EntityKind::Player {
                connection: id as ConnectionId,
                last_seen: Instant::now(),
            },
            &config,
            &mut rand::thread_rng(),
        );
        spider.position = Vec2::new(x, y);
        spider.angle = angle;
        spider
    }

    pub(crate) fn fly_at(id: EntityId, x: f32, y: f32) -> Spider {
        let config = GameConfig::default();
        let mut fly = Spider::spawn(
            id,
            "fly".to_string(),
            EntityKind::Fly,
            &config,
            &mut rand::thread_rng(),
        );
        fly.position = Vec2::new(x, y);
        fly
    }

    #[test]
    fn test_spawn_defaults() {
        let config = GameConfig::default();
        let spider = player_at(1, 1.0, 1.0, 0.0);
        assert_eq!(spider.size, config.min_size);
        assert_eq!(spider.health, 1.0);
        assert_eq!(spider.kills, 0);
        assert!(spider.dirty);
        assert!(spider.current_cell.is_none());
        assert_eq!(spider.connection(), Some(1));
    }

    #[test]
    fn test_spawn_position_inside_arena() {
        let config = GameConfig::default();
        let mut rng = rand::thread_rng();
        for id in 0..200 {
            let spider = Spider::spawn(id, String::new(), EntityKind::Fly, &config, &mut rng);
            assert!(spider.position.x >= 0.0 && spider.position.x < config.arena_size);
            assert!(spider.position.y >= 0.0 && spider.position.y < config.arena_size);
            assert!(spider.angle >= 0.0 && spider.angle < TAU);
        }
    }

    #[test]
    fn test_fly_reports_fly_state() {
        let fly = fly_at(3, 0.0, 0.0);
        assert!(fly.is_fly());
        assert_eq!(fly.wire_state(), 66);
        assert_eq!(fly.connection(), None);
    }

    #[test]
    fn test_derived_properties_at_bounds() {
        let config = GameConfig::default();
        let mut spider = player_at(1, 0.0, 0.0, 0.0);

        assert_eq!(spider.ratio(&config), 0.0);
        assert!((spider.radius(&config) - 0.125 * 0.75).abs() < 1e-6);
        assert!((spider.move_speed(&config) - config.best_move_speed).abs() < 1e-4);
        assert!((spider.rotate_speed(&config) - config.best_rotate_speed).abs() < 1e-4);

        spider.size = config.max_size;
        assert!((spider.ratio(&config) - 1.0).abs() < 1e-6);
        assert!((spider.radius(&config) - 0.75).abs() < 1e-6);
        assert!((spider.move_speed(&config) - config.worst_move_speed).abs() < 1e-3);
        assert!((spider.rotate_speed(&config) - config.worst_rotate_speed).abs() < 1e-4);
    }

    #[test]
    fn test_bigger_is_slower() {
        let config = GameConfig::default();
        let small = player_at(1, 0.0, 0.0, 0.0);
        let mut big = player_at(2, 0.0, 0.0, 0.0);
        big.size = 5_000.0;
        assert!(big.move_speed(&config) < small.move_speed(&config));
        assert!(big.rotate_speed(&config) < small.rotate_speed(&config));
        assert!(big.radius(&config) > small.radius(&config));
    }

    #[test]
    fn test_integrate_idle_is_noop() {
        let config = GameConfig::default();
        let mut spider = player_at(1, 2.0, 2.0, 1.0);
        spider.dirty = false;
        assert!(!spider.integrate(0.125, &config));
        assert!(!spider.dirty);
        assert_eq!(spider.state, SpiderState::Idle);
        assert_eq!(spider.position, Vec2::new(2.0, 2.0));
    }

    #[test]
    fn test_integrate_wraps_position() {
        let config = GameConfig::default();
        let mut spider = player_at(1, config.arena_size - 0.01, 3.0, 0.0);
        spider.moving = true;
        let dt = 0.02 / spider.move_speed(&config);

        assert!(spider.integrate(dt, &config));
        assert!((spider.position.x - 0.01).abs() < 1e-4, "x = {}", spider.position.x);
        assert!((spider.position.y - 3.0).abs() < 1e-4);
        assert_eq!(spider.state, SpiderState::Moving);
        assert!(spider.dirty);
    }

    #[test]
    fn test_integrate_rotation_direction() {
        let config = GameConfig::default();
        let mut spider = player_at(1, 2.0, 2.0, 1.0);
        spider.rotation = Rotation::Left;
        spider.integrate(0.1, &config);
        assert!(spider.angle > 1.0);

        let mut spider = player_at(2, 2.0, 2.0, 1.0);
        spider.rotation = Rotation::Right;
        spider.integrate(0.1, &config);
        assert!(spider.angle < 1.0);
        assert_eq!(spider.state, SpiderState::Moving);
    }

    #[test]
    fn test_integrate_keeps_angle_normalized() {
        let config = GameConfig::default();
        let mut spider = player_at(1, 2.0, 2.0, 0.01);
        spider.rotation = Rotation::Right;
        spider.integrate(0.5, &config);
        assert!(spider.angle >= 0.0 && spider.angle < TAU);
    }

    #[test]
    fn test_dead_spider_does_not_integrate() {
        let config = GameConfig::default();
        let mut spider = player_at(1, 2.0, 2.0, 0.0);
        spider.moving = true;
        spider.health = 0.0;
        assert!(!spider.integrate(0.125, &config));
        assert_eq!(spider.position, Vec2::new(2.0, 2.0));
    }

    #[test]
    fn test_is_facing() {
        let config = GameConfig::default();
        let hunter = player_at(1, 2.0, 2.0, 0.0);
        let ahead = player_at(2, 2.1, 2.0, 0.0);
        let side = player_at(3, 2.0, 2.1, 0.0);
        let behind = player_at(4, 1.9, 2.0, 0.0);

        assert!(hunter.is_facing(&ahead, &config));
        assert!(!hunter.is_facing(&side, &config));
        assert!(!hunter.is_facing(&behind, &config));
    }

    #[test]
    fn test_is_facing_across_edge() {
        let config = GameConfig::default();
        let hunter = player_at(1, config.arena_size - 0.05, 4.0, 0.0);
        let prey = player_at(2, 0.05, 4.0, PI);
        assert!(hunter.is_facing(&prey, &config));

        let plain = GameConfig {
            wrap_neighbors: false,
            ..GameConfig::default()
        };
        assert!(!hunter.is_facing(&prey, &plain));
    }

    #[test]
    fn test_apply_client_hint_wraps() {
        let config = GameConfig::default();
        let mut spider = player_at(1, 0.0, 0.0, 0.0);
        spider.dirty = false;
        spider.apply_client_hint(-0.5, 9.0, -PI / 2.0, &config);
        assert!((spider.position.x - 7.5).abs() < 1e-5);
        assert!((spider.position.y - 1.0).abs() < 1e-5);
        assert!((spider.angle - 1.5 * PI).abs() < 1e-5);
        assert!(spider.dirty);
    }

    #[test]
    fn test_rotation_wire_values() {
        assert_eq!(Rotation::Left.wire_value(), 1);
        assert_eq!(Rotation::None.wire_value(), 0);
        assert_eq!(Rotation::Right.wire_value(), -1);
    }
}
