//! Feeding: who may bite whom, and how mass and health move on a bite

use crate::config::GameConfig;
use crate::game::entity::{Spider, SpiderState};
use crate::util::torus::angle_between;

/// Result of one bite
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Feeding {
    /// Size gained by the attacker, including the death bonus
    pub eaten: f32,
    /// The defender's health ran out on this bite
    pub killed: bool,
}

/// Whether the two spiders' collision circles overlap
pub fn in_contact(a: &Spider, b: &Spider, config: &GameConfig) -> bool {
    let reach = a.radius(config) + b.radius(config);
    a.offset_to(b, config).length_sq() <= reach * reach
}

/// Whether `attacker` may bite `defender`.
///
/// The attacker has to face its target. Flies are always fair game, and a
/// bigger spider wins outright; otherwise the bite only lands when the
/// defender is turned away, i.e. caught from behind while heading roughly
/// the same way.
pub fn can_bite(attacker: &Spider, defender: &Spider, config: &GameConfig) -> bool {
    if !attacker.is_facing(defender, config) {
        return false;
    }
    if defender.is_fly() || attacker.size > defender.size {
        return true;
    }
    let bearing = attacker.bearing_to(defender, config);
    angle_between(bearing, defender.angle) < config.behind_cone
        && angle_between(attacker.angle, defender.angle) < config.facing_cone
}

/// Transfer mass from `defender` to `attacker` over `dt` seconds.
///
/// A defender pinned at minimum size loses health instead; when that runs
/// out the attacker also eats the remaining minimum mass and, for a player
/// victim, inherits its kills (at least one).
pub fn bite(attacker: &mut Spider, defender: &mut Spider, dt: f32, config: &GameConfig) -> Feeding {
    if attacker.is_dead() || defender.is_dead() {
        return Feeding::default();
    }
    attacker.state = SpiderState::Biting;

    let mut eaten = (attacker.size.min(defender.size) * dt / config.eat_time)
        .min(defender.size - config.min_size)
        .max(0.0);
    defender.size -= eaten;

    let mut killed = false;
    if defender.size <= config.min_size {
        defender.size = config.min_size;
        defender.health = (defender.health - dt / config.death_buffer).max(0.0);
        if defender.is_dead() {
            killed = true;
            eaten += config.min_size;
            if !defender.is_fly() {
                attacker.kills = attacker.kills.saturating_add(defender.kills.max(1));
            }
        }
    }

    if eaten > 0.0 {
        attacker.size = (attacker.size + eaten).min(config.max_size);
        attacker.health = (attacker.health + dt / config.death_buffer).min(1.0);
        attacker.dirty = true;
        defender.dirty = true;
    }

    Feeding { eaten, killed }
}

/// Contact, eligibility and bite in one step. Returns `None` when no bite
/// was attempted.
pub fn resolve(
    attacker: &mut Spider,
    defender: &mut Spider,
    dt: f32,
    config: &GameConfig,
) -> Option<Feeding> {
    if attacker.is_dead() || defender.is_dead() {
        return None;
    }
    if !in_contact(attacker, defender, config) || !can_bite(attacker, defender, config) {
        return None;
    }
    Some(bite(attacker, defender, dt, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::tests::{fly_at, player_at};
    use std::f32::consts::PI;

    const DT: f32 = 0.125;

    #[test]
    fn test_mass_transfer_conserves_size() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut defender = player_at(2, 2.1, 2.0, 0.0);
        attacker.size = 1000.0;
        defender.size = 500.0;

        let feeding = bite(&mut attacker, &mut defender, DT, &config);

        assert!(!feeding.killed);
        assert!((feeding.eaten - 25.0).abs() < 1e-3);
        assert!((attacker.size - 1025.0).abs() < 1e-3);
        assert!((defender.size - 475.0).abs() < 1e-3);
        assert_eq!(attacker.state, SpiderState::Biting);
        assert!(attacker.dirty && defender.dirty);
    }

    #[test]
    fn test_death_bonus_and_kill_inheritance() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut defender = player_at(2, 2.1, 2.0, 0.0);
        attacker.size = 1000.0;
        attacker.kills = 2;
        defender.size = 100.5;
        defender.kills = 3;

        let feeding = bite(&mut attacker, &mut defender, DT, &config);

        assert!(feeding.killed);
        assert!(defender.is_dead());
        assert_eq!(defender.size, config.min_size);
        assert!((attacker.size - 1100.5).abs() < 1e-3);
        assert_eq!(attacker.kills, 5);
    }

    #[test]
    fn test_first_kill_counts_one() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut defender = player_at(2, 2.1, 2.0, 0.0);

        bite(&mut attacker, &mut defender, DT, &config);

        assert!(defender.is_dead());
        assert_eq!(attacker.kills, 1);
    }

    #[test]
    fn test_eating_fly_grants_no_kill() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut fly = fly_at(2, 2.1, 2.0);

        let feeding = bite(&mut attacker, &mut fly, DT, &config);

        assert!(feeding.killed);
        assert_eq!(attacker.kills, 0);
        assert!((attacker.size - 2.0 * config.min_size).abs() < 1e-3);
    }

    #[test]
    fn test_kills_saturate() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut defender = player_at(2, 2.1, 2.0, 0.0);
        attacker.kills = u16::MAX - 1;
        defender.kills = 10;

        bite(&mut attacker, &mut defender, DT, &config);
        assert_eq!(attacker.kills, u16::MAX);
    }

    #[test]
    fn test_size_and_health_stay_bounded() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut defender = player_at(2, 2.1, 2.0, 0.0);
        attacker.size = config.max_size - 1.0;
        defender.size = config.max_size;

        bite(&mut attacker, &mut defender, 1.0, &config);

        assert_eq!(attacker.size, config.max_size);
        assert!(attacker.health <= 1.0);
        assert!(defender.size >= config.min_size);
    }

    #[test]
    fn test_dead_spiders_do_not_feed() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut defender = player_at(2, 2.1, 2.0, 0.0);
        defender.health = 0.0;
        attacker.dirty = false;

        assert_eq!(bite(&mut attacker, &mut defender, DT, &config), Feeding::default());
        assert_eq!(attacker.size, config.min_size);
        assert!(!attacker.dirty);
    }

    #[test]
    fn test_bigger_facing_spider_bites() {
        let config = GameConfig::default();
        let mut big = player_at(1, 2.0, 2.0, 0.0);
        let small = player_at(2, 2.1, 2.0, PI);
        big.size = 500.0;

        assert!(can_bite(&big, &small, &config));
        assert!(!can_bite(&small, &big, &config));
    }

    #[test]
    fn test_equal_head_on_spiders_cannot_bite() {
        let config = GameConfig::default();
        let a = player_at(1, 2.0, 2.0, 0.0);
        let b = player_at(2, 2.1, 2.0, PI);

        assert!(!can_bite(&a, &b, &config));
        assert!(!can_bite(&b, &a, &config));
    }

    #[test]
    fn test_smaller_spider_bites_from_behind() {
        let config = GameConfig::default();
        let mut big = player_at(1, 2.1, 2.0, 0.0);
        let small = player_at(2, 2.0, 2.0, 0.0);
        big.size = 500.0;

        assert!(can_bite(&small, &big, &config));
        assert!(!can_bite(&big, &small, &config));
    }

    #[test]
    fn test_must_face_to_bite() {
        let config = GameConfig::default();
        let mut big = player_at(1, 2.0, 2.0, PI);
        let small = player_at(2, 2.1, 2.0, 0.0);
        big.size = 500.0;

        assert!(!can_bite(&big, &small, &config));
    }

    #[test]
    fn test_flies_always_bitten_when_faced() {
        let config = GameConfig::default();
        let spider = player_at(1, 2.0, 2.0, 0.0);
        let mut fly = fly_at(2, 2.1, 2.0);
        fly.size = 5_000.0;

        assert!(can_bite(&spider, &fly, &config));
    }

    #[test]
    fn test_resolve_requires_contact() {
        let config = GameConfig::default();
        let mut attacker = player_at(1, 2.0, 2.0, 0.0);
        let mut far = fly_at(2, 3.0, 2.0);
        assert!(resolve(&mut attacker, &mut far, DT, &config).is_none());

        let mut near = fly_at(3, 2.1, 2.0);
        let feeding = resolve(&mut attacker, &mut near, DT, &config).unwrap();
        assert!(feeding.killed);
    }

    #[test]
    fn test_contact_across_edge() {
        let config = GameConfig::default();
        let a = player_at(1, config.arena_size - 0.05, 4.0, 0.0);
        let b = fly_at(2, 0.05, 4.0);
        assert!(in_contact(&a, &b, &config));
    }
}
