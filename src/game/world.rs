//! Entity registry: the set of live spiders and flies, their ids, and the
//! spatial index they are filed under.
//!
//! Entities are stored densely in insertion order with an id-to-slot map on
//! the side, so the tick can iterate deterministically and borrow two
//! entities mutably at once for feeding.

use std::sync::Arc;
use std::time::Instant;

use bitvec::prelude::*;
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::GameConfig;
use crate::game::constants::ids::{ID_SPACE, RANDOM_ATTEMPTS};
use crate::game::entity::{ConnectionId, EntityId, EntityKind, Spider};
use crate::game::spatial::SpatialGrid;

/// Shared, immutable pool of player names
pub type NameTable = Arc<[String]>;

/// Name used when the name table is empty
const FALLBACK_NAME: &str = "spider";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("all {0} entity ids are in use")]
    IdSpaceExhausted(u32),
}

pub struct World {
    config: Arc<GameConfig>,
    names: NameTable,
    spiders: Vec<Spider>,
    slots: HashMap<EntityId, usize>,
    grid: SpatialGrid,
    /// Ids removed since the last delta, each at most once
    removed: Vec<EntityId>,
    /// Ids that may not be handed out: live entities plus pending removals
    reserved: BitVec,
    scan_cursor: u32,
    fly_count: usize,
    fly_spawn_timer: f32,
    rng: StdRng,
}

impl World {
    pub fn new(config: Arc<GameConfig>, names: NameTable) -> Self {
        Self::with_rng(config, names, StdRng::from_entropy())
    }

    /// Deterministic world for tests and benchmarks
    pub fn with_seed(config: Arc<GameConfig>, names: NameTable, seed: u64) -> Self {
        Self::with_rng(config, names, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: Arc<GameConfig>, names: NameTable, rng: StdRng) -> Self {
        let grid = SpatialGrid::from_config(&config);
        Self {
            config,
            names,
            spiders: Vec::new(),
            slots: HashMap::new(),
            grid,
            removed: Vec::new(),
            reserved: bitvec![0; ID_SPACE as usize],
            scan_cursor: 0,
            fly_count: 0,
            fly_spawn_timer: 0.0,
            rng,
        }
    }

    #[inline]
    pub fn config(&self) -> &Arc<GameConfig> {
        &self.config
    }

    #[inline]
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Reserve a fresh id: a few random draws, then a deterministic scan
    pub fn allocate_id(&mut self) -> Result<EntityId, WorldError> {
        for _ in 0..RANDOM_ATTEMPTS {
            let candidate = self.rng.gen_range(0..ID_SPACE);
            if !self.reserved[candidate as usize] {
                self.reserved.set(candidate as usize, true);
                return Ok(candidate as EntityId);
            }
        }

        for offset in 0..ID_SPACE {
            let candidate = (self.scan_cursor + offset) % ID_SPACE;
            if !self.reserved[candidate as usize] {
                self.reserved.set(candidate as usize, true);
                self.scan_cursor = (candidate + 1) % ID_SPACE;
                return Ok(candidate as EntityId);
            }
        }

        Err(WorldError::IdSpaceExhausted(ID_SPACE))
    }

    fn random_name(&mut self) -> String {
        self.names
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_NAME.to_string())
    }

    fn insert(&mut self, spider: Spider) -> EntityId {
        let id = spider.id;
        self.slots.insert(id, self.spiders.len());
        self.spiders.push(spider);
        id
    }

    /// Spawn a player-controlled spider owned by `connection`
    pub fn add_player(&mut self, connection: ConnectionId, now: Instant) -> Result<EntityId, WorldError> {
        let id = self.allocate_id()?;
        let name = self.random_name();
        let kind = EntityKind::Player {
            connection,
            last_seen: now,
        };
        let spider = Spider::spawn(id, name, kind, &self.config, &mut self.rng);
        debug!("Spawned spider {} '{}' for connection {}", id, spider.name, connection);
        Ok(self.insert(spider))
    }

    /// Spawn an NPC fly
    pub fn add_fly(&mut self) -> Result<EntityId, WorldError> {
        let id = self.allocate_id()?;
        let fly = Spider::spawn(id, String::new(), EntityKind::Fly, &self.config, &mut self.rng);
        self.fly_count += 1;
        Ok(self.insert(fly))
    }

    /// Count down the fly spawn timer and spawn one fly when it expires.
    ///
    /// The timer only runs while the population is below the cap; the very
    /// first call spawns immediately.
    pub fn maintain_flies(&mut self, dt: f32) -> Option<EntityId> {
        if self.fly_count >= self.config.max_flies {
            return None;
        }
        self.fly_spawn_timer -= dt;
        if self.fly_spawn_timer > 0.0 {
            return None;
        }
        self.fly_spawn_timer += self.config.fly_spawn_interval;

        match self.add_fly() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Fly spawn skipped: {}", e);
                None
            }
        }
    }

    /// Remove an entity: unfile it from the grid, release its fly slot and
    /// record the id for the next delta. Its id stays reserved until the
    /// removal has been broadcast.
    pub fn remove(&mut self, id: EntityId) -> Option<Spider> {
        let slot = self.slots.remove(&id)?;
        let spider = self.spiders.remove(slot);
        for moved in &self.spiders[slot..] {
            if let Some(index) = self.slots.get_mut(&moved.id) {
                *index -= 1;
            }
        }

        if let Some(cell) = spider.current_cell {
            self.grid.remove(id, cell);
        }
        if spider.is_fly() {
            self.fly_count = self.fly_count.saturating_sub(1);
        }
        if !self.removed.contains(&id) {
            self.removed.push(id);
        }
        Some(spider)
    }

    /// Ids removed since the last call; releases them for reuse
    pub fn take_removed(&mut self) -> Vec<EntityId> {
        let removed = std::mem::take(&mut self.removed);
        for &id in &removed {
            if !self.slots.contains_key(&id) {
                self.reserved.set(id as usize, false);
            }
        }
        removed
    }

    #[inline]
    pub fn removed(&self) -> &[EntityId] {
        &self.removed
    }

    /// Record inbound activity for a player's spider
    pub fn touch(&mut self, id: EntityId, now: Instant) {
        if let Some(spider) = self.get_mut(id) {
            if let EntityKind::Player { last_seen, .. } = &mut spider.kind {
                *last_seen = now;
            }
        }
    }

    /// File every entity under the cell matching its current position.
    ///
    /// Entities whose position cannot be indexed are logged and keep their
    /// previous cell. Returns the number of such faults.
    pub fn reindex(&mut self) -> usize {
        let mut faults = 0;
        for spider in &mut self.spiders {
            match self.grid.relocate(spider.id, spider.current_cell, spider.position) {
                Ok(Some(cell)) => spider.current_cell = Some(cell),
                Ok(None) => {}
                Err(e) => {
                    warn!("Spider {} not indexed this tick: {}", spider.id, e);
                    faults += 1;
                }
            }
        }
        faults
    }

    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&Spider> {
        self.slots.get(&id).map(|&slot| &self.spiders[slot])
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Spider> {
        let slot = *self.slots.get(&id)?;
        self.spiders.get_mut(slot)
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Storage slot of an entity; stable until the next removal
    #[inline]
    pub fn slot_of(&self, id: EntityId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    /// Borrow two distinct entities mutably
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut Spider, &mut Spider)> {
        if a == b || a >= self.spiders.len() || b >= self.spiders.len() {
            return None;
        }
        if a < b {
            let (head, tail) = self.spiders.split_at_mut(b);
            Some((&mut head[a], &mut tail[0]))
        } else {
            let (head, tail) = self.spiders.split_at_mut(a);
            Some((&mut tail[0], &mut head[b]))
        }
    }

    /// Entities in insertion order
    #[inline]
    pub fn spiders(&self) -> &[Spider] {
        &self.spiders
    }

    #[inline]
    pub fn spiders_mut(&mut self) -> &mut [Spider] {
        &mut self.spiders
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.spiders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spiders.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.spiders.len() - self.fly_count
    }

    #[inline]
    pub fn fly_count(&self) -> usize {
        self.fly_count
    }
}
